// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The session directory.
//!
//! Three loops share one session table:
//!
//! - the control loop processes management commands one at a time and is
//!   the only place sessions are created or destroyed,
//! - the receive loop drains the inbound packet queue and hands each packet
//!   to the session it belongs to,
//! - the lifecycle loop tracks which senders are running and relaunches the
//!   ones that failed on a fixed retry period.

use crate::error::Error;
use crate::log::dir_log;
use crate::packet::Control;
use crate::session::{
    Session, SessionEvent, SessionNotification, SessionStatus, Transport,
};
use crate::{
    Owner, SessionParams, DEFAULT_PARAMS, MAX_DISCRIMINATOR, MICRO_BFD_MAC,
    MIN_CONTROL_PACKET_LEN, REACHABILITY_OWNER, RX_QUEUE_CAPACITY,
};
use mg_common::clock::{Clock, Timer};
use mg_common::net::{InterfaceKind, InterfaceResolver, Reachability, TrackOp};
use mg_common::{read_lock, write_lock};
use rand::Rng;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use slog::Logger;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::mpsc::{
    channel, sync_channel, Receiver, Sender, SyncSender,
};
use std::sync::{Arc, RwLock};
use std::thread::Builder;
use std::time::Duration;

const UNIT_DIRECTORY: &str = "directory";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DirectoryConfig {
    /// Floor on the transmit interval while a session is not up.
    pub startup_tx_interval: Duration,

    /// How often failed senders are relaunched.
    pub retry_interval: Duration,

    /// Tick resolution of session detection timers.
    pub timer_resolution: Duration,

    pub max_sessions: usize,

    /// Random draws before discriminator allocation gives up.
    pub max_id_attempts: usize,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            startup_tx_interval: Duration::from_secs(1),
            retry_interval: Duration::from_secs(5),
            timer_resolution: Duration::from_millis(10),
            max_sessions: MAX_DISCRIMINATOR as usize,
            max_id_attempts: 64,
        }
    }
}

/// A request to monitor a destination on behalf of an owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SessionRequest {
    pub dest: IpAddr,
    pub owner: Owner,

    /// Parameter set to bind to. Falls back to the default set.
    #[serde(default)]
    pub param_name: Option<String>,

    /// Only create the session if the next hop is on this interface.
    #[serde(default)]
    pub interface: Option<String>,

    /// Run one session per member link when the next hop is an aggregate.
    #[serde(default)]
    pub per_link: bool,
}

impl SessionRequest {
    pub fn new(dest: IpAddr, owner: Owner) -> Self {
        Self {
            dest,
            owner,
            param_name: None,
            interface: None,
            per_link: false,
        }
    }
}

/// A buffer taken off the wire by a transport receive loop.
#[derive(Debug, Clone)]
pub struct RecvPacket {
    pub src: IpAddr,
    pub buf: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Created(u32),
    SenderFailed(u32),
    RetryTick,
    Stop,
}

type Reply<T> = Sender<Result<T, Error>>;

enum Command {
    Create(SessionRequest, Reply<u32>),
    Delete {
        dest: IpAddr,
        owner: Owner,
        force: bool,
        reply: Reply<()>,
    },
    AdminUp(IpAddr, Reply<()>),
    AdminDown(IpAddr, Reply<()>),
    AdminUpAll(Reply<()>),
    AdminDownAll(Reply<()>),
    ReachabilityChanged {
        dest: IpAddr,
        reachable: bool,
        reply: Reply<Vec<u32>>,
    },
    UpdateParams(SessionParams, Reply<()>),
    RemoveParams(String, Reply<()>),
    Shutdown(Reply<()>),
}

struct ParamSet {
    params: SessionParams,
    sessions: usize,
}

/// Every index the directory keeps. Sessions are destroyed by removing them
/// from `sessions`; nothing else holds a `Session`.
struct SessionTable {
    sessions: BTreeMap<u32, Session>,
    active: Vec<u32>,
    inactive: Vec<u32>,
    pending: BTreeMap<IpAddr, SessionRequest>,
    params: BTreeMap<String, ParamSet>,
    num_sessions: usize,
}

impl SessionTable {
    fn new() -> Self {
        let mut params = BTreeMap::new();
        params.insert(
            DEFAULT_PARAMS.to_string(),
            ParamSet {
                params: SessionParams::default(),
                sessions: 0,
            },
        );
        Self {
            sessions: BTreeMap::new(),
            active: Vec::new(),
            inactive: Vec::new(),
            pending: BTreeMap::new(),
            params,
            num_sessions: 0,
        }
    }

    fn ids_for(&self, dest: IpAddr) -> Vec<u32> {
        self.sessions
            .values()
            .filter(|s| s.peer == dest)
            .map(|s| s.id)
            .collect()
    }

    /// Find the session a packet belongs to: by Your Discriminator when the
    /// peer knows it, otherwise by source address.
    fn route(&self, src: IpAddr, pkt: &Control) -> Option<&Session> {
        if pkt.your_discriminator != 0 {
            if let Some(s) = self.sessions.get(&pkt.your_discriminator) {
                return Some(s);
            }
        }
        self.sessions.values().find(|s| s.peer == src)
    }

    fn allocate_discriminator<R: Rng>(
        &self,
        rng: &mut R,
        config: &DirectoryConfig,
    ) -> Result<u32, Error> {
        if self.num_sessions >= config.max_sessions {
            return Err(Error::SessionLimit(config.max_sessions));
        }
        draw_discriminator(rng, config.max_id_attempts, |id| {
            self.sessions.contains_key(&id)
        })
        .ok_or(Error::DiscriminatorExhausted(config.max_id_attempts))
    }

    fn params_for(&self, name: Option<&str>) -> SessionParams {
        name.and_then(|n| self.params.get(n))
            .or_else(|| self.params.get(DEFAULT_PARAMS))
            .map(|p| p.params.clone())
            .unwrap_or_default()
    }

    fn insert(&mut self, session: Session) {
        let name = session.status().param_name;
        if let Some(p) = self.params.get_mut(&name) {
            p.sessions += 1;
        }
        self.num_sessions += 1;
        self.active.push(session.id);
        self.sessions.insert(session.id, session);
    }

    fn remove(&mut self, id: u32) -> Option<Session> {
        let session = self.sessions.remove(&id)?;
        let name = session.status().param_name;
        if let Some(p) = self.params.get_mut(&name) {
            p.sessions = p.sessions.saturating_sub(1);
        }
        self.num_sessions -= 1;
        self.active.retain(|x| *x != id);
        self.inactive.retain(|x| *x != id);
        Some(session)
    }
}

/// Draw random discriminators until one is not in use, giving up after
/// `attempts` draws.
fn draw_discriminator<R: Rng, F: Fn(u32) -> bool>(
    rng: &mut R,
    attempts: usize,
    in_use: F,
) -> Option<u32> {
    (0..attempts)
        .map(|_| rng.gen_range(1..=MAX_DISCRIMINATOR))
        .find(|id| !in_use(*id))
}

/// Handle to the directory. Every mutating operation goes through the
/// control loop and waits for its result.
pub struct Directory {
    cmd: Sender<Command>,
    rx: SyncSender<RecvPacket>,
    table: Arc<RwLock<SessionTable>>,
    log: Logger,
}

impl Directory {
    pub fn new(
        config: DirectoryConfig,
        transport: Arc<dyn Transport>,
        reachability: Arc<dyn Reachability>,
        resolver: Arc<dyn InterfaceResolver>,
        notify: Option<SyncSender<SessionNotification>>,
        log: Logger,
    ) -> Result<Self, Error> {
        let table = Arc::new(RwLock::new(SessionTable::new()));
        let (cmd_tx, cmd_rx) = channel();
        let (rx_tx, rx_rx) = sync_channel(RX_QUEUE_CAPACITY);
        let (lc_tx, lc_rx) = channel();

        let retry = Timer::new(config.retry_interval);
        retry.enable();
        let clock = Clock::new(
            config.retry_interval / 5,
            vec![(retry, LifecycleEvent::RetryTick)],
            lc_tx.clone(),
            log.clone(),
        );

        let runner = DirectoryRunner {
            table: table.clone(),
            transport,
            reachability,
            resolver,
            lifecycle: lc_tx,
            notify,
            config,
            log: log.clone(),
        };
        Builder::new()
            .name("bfd-control".into())
            .spawn(move || runner.run(cmd_rx))?;

        let t = table.clone();
        let l = log.clone();
        Builder::new()
            .name("bfd-dispatch".into())
            .spawn(move || receive_loop(&t, rx_rx, &l))?;

        let t = table.clone();
        let l = log.clone();
        Builder::new()
            .name("bfd-lifecycle".into())
            .spawn(move || lifecycle_loop(&t, lc_rx, clock, &l))?;

        Ok(Self {
            cmd: cmd_tx,
            rx: rx_tx,
            table,
            log,
        })
    }

    fn call<T>(&self, f: impl FnOnce(Reply<T>) -> Command) -> Result<T, Error> {
        let (tx, rx) = channel();
        self.cmd.send(f(tx)).map_err(|_| Error::Shutdown)?;
        rx.recv().map_err(|_| Error::Shutdown)?
    }

    /// Start monitoring a destination, or add an owner to the session that
    /// already monitors it. Returns the session discriminator.
    pub fn create(&self, req: SessionRequest) -> Result<u32, Error> {
        self.call(|r| Command::Create(req, r))
    }

    /// Drop an owner's interest in a destination. The session goes away
    /// with its last owner, or immediately when `force` is set.
    pub fn delete(
        &self,
        dest: IpAddr,
        owner: Owner,
        force: bool,
    ) -> Result<(), Error> {
        self.call(|reply| Command::Delete {
            dest,
            owner,
            force,
            reply,
        })
    }

    pub fn admin_up(&self, dest: IpAddr) -> Result<(), Error> {
        self.call(|r| Command::AdminUp(dest, r))
    }

    pub fn admin_down(&self, dest: IpAddr) -> Result<(), Error> {
        self.call(|r| Command::AdminDown(dest, r))
    }

    pub fn admin_up_all(&self) -> Result<(), Error> {
        self.call(Command::AdminUpAll)
    }

    pub fn admin_down_all(&self) -> Result<(), Error> {
        self.call(Command::AdminDownAll)
    }

    /// Tell the directory the reachability of a destination changed.
    /// Returns the sessions created from pending requests.
    pub fn reachability_changed(
        &self,
        dest: IpAddr,
        reachable: bool,
    ) -> Result<Vec<u32>, Error> {
        self.call(|reply| Command::ReachabilityChanged {
            dest,
            reachable,
            reply,
        })
    }

    pub fn update_params(&self, params: SessionParams) -> Result<(), Error> {
        self.call(|r| Command::UpdateParams(params, r))
    }

    pub fn remove_params(&self, name: &str) -> Result<(), Error> {
        let name = name.to_string();
        self.call(|r| Command::RemoveParams(name, r))
    }

    pub fn shutdown(&self) -> Result<(), Error> {
        self.call(Command::Shutdown)
    }

    /// The queue transport receive loops push inbound buffers onto. Pushing
    /// blocks while the queue is full.
    pub fn packet_sender(&self) -> SyncSender<RecvPacket> {
        self.rx.clone()
    }

    pub fn receive(&self, src: IpAddr, buf: Vec<u8>) -> Result<(), Error> {
        self.rx
            .send(RecvPacket { src, buf })
            .map_err(|_| Error::Shutdown)
    }

    pub fn session(&self, id: u32) -> Option<SessionStatus> {
        read_lock!(self.table).sessions.get(&id).map(|s| s.status())
    }

    pub fn session_for(&self, dest: IpAddr) -> Option<SessionStatus> {
        read_lock!(self.table)
            .sessions
            .values()
            .find(|s| s.peer == dest)
            .map(|s| s.status())
    }

    pub fn sessions(&self) -> Vec<SessionStatus> {
        read_lock!(self.table)
            .sessions
            .values()
            .map(|s| s.status())
            .collect()
    }

    pub fn session_count(&self) -> usize {
        read_lock!(self.table).num_sessions
    }

    /// Number of sessions bound to a parameter set.
    pub fn param_session_count(&self, name: &str) -> Option<usize> {
        read_lock!(self.table).params.get(name).map(|p| p.sessions)
    }

    pub fn params(&self, name: &str) -> Option<SessionParams> {
        read_lock!(self.table)
            .params
            .get(name)
            .map(|p| p.params.clone())
    }

    pub fn active_ids(&self) -> Vec<u32> {
        read_lock!(self.table).active.clone()
    }

    pub fn inactive_ids(&self) -> Vec<u32> {
        read_lock!(self.table).inactive.clone()
    }

    pub fn pending(&self) -> Vec<SessionRequest> {
        read_lock!(self.table).pending.values().cloned().collect()
    }
}

impl Drop for Directory {
    fn drop(&mut self) {
        let (tx, _rx) = channel();
        if self.cmd.send(Command::Shutdown(tx)).is_err() {
            dir_log!(self.log, debug, "control loop already stopped");
        }
    }
}

struct DirectoryRunner {
    table: Arc<RwLock<SessionTable>>,
    transport: Arc<dyn Transport>,
    reachability: Arc<dyn Reachability>,
    resolver: Arc<dyn InterfaceResolver>,
    lifecycle: Sender<LifecycleEvent>,
    notify: Option<SyncSender<SessionNotification>>,
    config: DirectoryConfig,
    log: Logger,
}

impl DirectoryRunner {
    fn run(self, rx: Receiver<Command>) {
        while let Ok(cmd) = rx.recv() {
            // A dropped reply receiver only means the caller stopped
            // waiting.
            match cmd {
                Command::Create(req, reply) => {
                    let _ = reply.send(self.create(&req));
                }
                Command::Delete {
                    dest,
                    owner,
                    force,
                    reply,
                } => {
                    let _ = reply.send(self.delete(dest, owner, force));
                }
                Command::AdminUp(dest, reply) => {
                    let _ = reply.send(self.signal(dest, SessionEvent::AdminUp));
                }
                Command::AdminDown(dest, reply) => {
                    let _ =
                        reply.send(self.signal(dest, SessionEvent::AdminDown));
                }
                Command::AdminUpAll(reply) => {
                    self.signal_all(SessionEvent::AdminUp);
                    let _ = reply.send(Ok(()));
                }
                Command::AdminDownAll(reply) => {
                    self.signal_all(SessionEvent::AdminDown);
                    let _ = reply.send(Ok(()));
                }
                Command::ReachabilityChanged {
                    dest,
                    reachable,
                    reply,
                } => {
                    let _ = reply
                        .send(Ok(self.reachability_changed(dest, reachable)));
                }
                Command::UpdateParams(params, reply) => {
                    self.update_params(params);
                    let _ = reply.send(Ok(()));
                }
                Command::RemoveParams(name, reply) => {
                    let _ = reply.send(self.remove_params(&name));
                }
                Command::Shutdown(reply) => {
                    self.shutdown();
                    let _ = reply.send(Ok(()));
                    break;
                }
            }
        }
        dir_log!(self.log, info, "control loop stopped");
    }

    fn create(&self, req: &SessionRequest) -> Result<u32, Error> {
        {
            let t = read_lock!(self.table);
            let ids = t.ids_for(req.dest);
            if let Some(first) = ids.first() {
                for id in &ids {
                    if let Some(s) = t.sessions.get(id) {
                        s.update(|st| st.owners.insert(req.owner));
                    }
                }
                dir_log!(self.log, info, "owner added to existing session";
                    "peer" => format_args!("{}", req.dest),
                    "owner" => format_args!("{:?}", req.owner)
                );
                return Ok(*first);
            }
        }

        self.reachability
            .track(req.dest, REACHABILITY_OWNER, TrackOp::Add);
        let info = match self.reachability.query(req.dest) {
            Ok(info) if info.reachable => info,
            Ok(_) => {
                return Err(
                    self.defer(req, Error::Unreachable { dest: req.dest })
                )
            }
            Err(e) => return Err(self.defer(req, e.into())),
        };

        let ifindex = info.next_hop_interface;
        let ifname = self.resolver.name_for(ifindex).unwrap_or_default();
        if let Some(wanted) = &req.interface {
            if *wanted != ifname {
                return Err(self.defer(
                    req,
                    Error::InterfaceMismatch {
                        dest: req.dest,
                        wanted: wanted.clone(),
                        actual: ifname,
                    },
                ));
            }
        }

        let mut t = write_lock!(self.table);
        let id = if req.per_link
            && self.resolver.type_of(ifindex) == InterfaceKind::Aggregate
        {
            let members = self.resolver.members(ifindex);
            if t.num_sessions + members.len() > self.config.max_sessions {
                return Err(Error::SessionLimit(self.config.max_sessions));
            }
            let mut created = Vec::with_capacity(members.len());
            for link in members {
                let local_mac = self
                    .resolver
                    .name_for(link)
                    .and_then(|n| self.resolver.mac_for(&n));
                let spawned = self.spawn_session(&mut t, req, link, |st| {
                    st.per_link = true;
                    st.local_mac = local_mac;
                    st.remote_mac = Some(MICRO_BFD_MAC);
                });
                match spawned {
                    Ok(id) => created.push(id),
                    Err(e) => {
                        // All member sessions or none.
                        for id in created {
                            if let Some(s) = t.remove(id) {
                                s.stop();
                            }
                        }
                        return Err(e);
                    }
                }
            }
            created
                .first()
                .copied()
                .ok_or(Error::NoMemberLinks(ifindex))?
        } else {
            self.spawn_session(&mut t, req, ifindex, |_| {})?
        };
        t.pending.remove(&req.dest);
        Ok(id)
    }

    /// Remember a request that cannot be satisfied yet.
    fn defer(&self, req: &SessionRequest, e: Error) -> Error {
        dir_log!(self.log, warn, "session creation deferred: {e}";
            "peer" => format_args!("{}", req.dest)
        );
        write_lock!(self.table)
            .pending
            .entry(req.dest)
            .or_insert_with(|| req.clone());
        e
    }

    fn spawn_session<F: FnOnce(&mut SessionStatus)>(
        &self,
        t: &mut SessionTable,
        req: &SessionRequest,
        ifindex: u32,
        customize: F,
    ) -> Result<u32, Error> {
        let id =
            t.allocate_discriminator(&mut rand::thread_rng(), &self.config)?;
        let params = t.params_for(req.param_name.as_deref());
        let mut status =
            SessionStatus::new(id, req.dest, ifindex, &params, req.owner);
        status.interface_specific = req.interface.is_some();
        customize(&mut status);

        let session = Session::new(
            status,
            self.transport.clone(),
            self.lifecycle.clone(),
            self.notify.clone(),
            &self.config,
            self.log.clone(),
        )?;
        session.start_sender()?;
        t.insert(session);

        dir_log!(self.log, info, "session created";
            "discriminator" => id,
            "peer" => format_args!("{}", req.dest),
            "interface" => ifindex,
            "params" => params.name
        );
        if self.lifecycle.send(LifecycleEvent::Created(id)).is_err() {
            dir_log!(self.log, error, "lifecycle loop gone");
        }
        Ok(id)
    }

    fn delete(
        &self,
        dest: IpAddr,
        owner: Owner,
        force: bool,
    ) -> Result<(), Error> {
        let mut t = write_lock!(self.table);
        let ids = t.ids_for(dest);
        if ids.is_empty() {
            if t.pending.remove(&dest).is_some() {
                drop(t);
                self.reachability
                    .track(dest, REACHABILITY_OWNER, TrackOp::Remove);
                return Ok(());
            }
            dir_log!(self.log, warn, "delete for unknown destination";
                "peer" => format_args!("{dest}")
            );
            return Err(Error::NoSession(dest));
        }

        for id in ids {
            let Some(s) = t.sessions.get(&id) else {
                continue;
            };
            let mut orphaned = false;
            s.update(|st| {
                st.owners.remove(owner);
                orphaned = st.owners.is_empty();
            });
            if force || orphaned {
                if let Some(s) = t.remove(id) {
                    s.stop();
                    dir_log!(self.log, info, "session deleted";
                        "discriminator" => id,
                        "peer" => format_args!("{dest}")
                    );
                }
            }
        }

        let gone = t.ids_for(dest).is_empty();
        drop(t);
        if gone {
            self.reachability
                .track(dest, REACHABILITY_OWNER, TrackOp::Remove);
        }
        Ok(())
    }

    fn signal(&self, dest: IpAddr, event: SessionEvent) -> Result<(), Error> {
        let t = read_lock!(self.table);
        let ids = t.ids_for(dest);
        if ids.is_empty() {
            dir_log!(self.log, warn, "admin change for unknown destination";
                "peer" => format_args!("{dest}")
            );
            return Err(Error::NoSession(dest));
        }
        for id in ids {
            if let Some(s) = t.sessions.get(&id) {
                s.deliver(event.clone());
            }
        }
        Ok(())
    }

    fn signal_all(&self, event: SessionEvent) {
        for s in read_lock!(self.table).sessions.values() {
            s.deliver(event.clone());
        }
    }

    fn reachability_changed(&self, dest: IpAddr, reachable: bool) -> Vec<u32> {
        if !reachable {
            return Vec::new();
        }
        let req = read_lock!(self.table).pending.get(&dest).cloned();
        let Some(req) = req else {
            return Vec::new();
        };
        match self.create(&req) {
            Ok(id) => {
                write_lock!(self.table).pending.remove(&dest);
                vec![id]
            }
            Err(e) => {
                dir_log!(self.log, debug, "pending retry failed: {e}";
                    "peer" => format_args!("{dest}")
                );
                Vec::new()
            }
        }
    }

    fn update_params(&self, params: SessionParams) {
        let mut t = write_lock!(self.table);
        t.params
            .entry(params.name.clone())
            .and_modify(|p| p.params = params.clone())
            .or_insert_with(|| ParamSet {
                params: params.clone(),
                sessions: 0,
            });
        let mut polled = 0usize;
        for s in t.sessions.values() {
            if s.status().param_name == params.name {
                s.apply_params(&params);
                polled += 1;
            }
        }
        dir_log!(self.log, info, "parameter set updated";
            "params" => params.name,
            "sessions" => polled
        );
    }

    fn remove_params(&self, name: &str) -> Result<(), Error> {
        if name == DEFAULT_PARAMS {
            return Err(Error::DefaultParams);
        }
        let mut t = write_lock!(self.table);
        if t.params.remove(name).is_none() {
            return Err(Error::NoParams(name.to_string()));
        }
        let defaults = SessionParams::defaults(name);
        for s in t.sessions.values() {
            if s.status().param_name == name {
                s.apply_params(&defaults);
            }
        }
        Ok(())
    }

    fn shutdown(&self) {
        let mut t = write_lock!(self.table);
        let ids: Vec<u32> = t.sessions.keys().copied().collect();
        let mut dests = Vec::new();
        for id in ids {
            if let Some(s) = t.remove(id) {
                s.stop();
                dests.push(s.peer);
            }
        }
        t.pending.clear();
        drop(t);
        dests.sort();
        dests.dedup();
        for dest in dests {
            self.reachability
                .track(dest, REACHABILITY_OWNER, TrackOp::Remove);
        }
        if self.lifecycle.send(LifecycleEvent::Stop).is_err() {
            dir_log!(self.log, debug, "lifecycle loop already stopped");
        }
    }
}

/// Decode a received buffer and hand it to its session. Returns the
/// discriminator of the session the packet went to.
fn dispatch(
    table: &RwLock<SessionTable>,
    pkt: &RecvPacket,
    log: &Logger,
) -> Option<u32> {
    if pkt.buf.len() < MIN_CONTROL_PACKET_LEN {
        dir_log!(log, trace, "dropping short packet";
            "src" => format_args!("{}", pkt.src),
            "len" => pkt.buf.len()
        );
        return None;
    }
    let control = match Control::from_bytes(&pkt.buf) {
        Ok(c) => c,
        Err(e) => {
            dir_log!(log, warn, "dropping malformed packet: {e}";
                "src" => format_args!("{}", pkt.src)
            );
            return None;
        }
    };
    let t = read_lock!(table);
    match t.route(pkt.src, &control) {
        Some(s) => {
            s.deliver(SessionEvent::Packet(control));
            Some(s.id)
        }
        None => {
            dir_log!(log, trace, "no session for packet";
                "src" => format_args!("{}", pkt.src),
                "your_discriminator" => control.your_discriminator
            );
            None
        }
    }
}

fn receive_loop(
    table: &RwLock<SessionTable>,
    rx: Receiver<RecvPacket>,
    log: &Logger,
) {
    while let Ok(pkt) = rx.recv() {
        dispatch(table, &pkt, log);
    }
    dir_log!(log, debug, "receive loop stopped");
}

fn lifecycle_loop(
    table: &RwLock<SessionTable>,
    rx: Receiver<LifecycleEvent>,
    _clock: Clock,
    log: &Logger,
) {
    while let Ok(event) = rx.recv() {
        match event {
            LifecycleEvent::Created(id) => {
                if let Some(s) = read_lock!(table).sessions.get(&id) {
                    s.update(|st| st.sender_active = true);
                }
            }
            LifecycleEvent::SenderFailed(id) => {
                let mut guard = write_lock!(table);
                let t = &mut *guard;
                if t.sessions.contains_key(&id) && !t.inactive.contains(&id) {
                    t.active.retain(|x| *x != id);
                    t.inactive.push(id);
                    dir_log!(log, warn, "sender failed, queued for retry";
                        "discriminator" => id
                    );
                }
            }
            LifecycleEvent::RetryTick => {
                let mut guard = write_lock!(table);
                let t = &mut *guard;
                for id in std::mem::take(&mut t.inactive) {
                    let Some(s) = t.sessions.get(&id) else {
                        continue;
                    };
                    match s.start_sender() {
                        Ok(()) => t.active.push(id),
                        Err(e) => {
                            dir_log!(log, error, "sender relaunch failed: {e}";
                                "discriminator" => id
                            );
                            t.inactive.push(id);
                        }
                    }
                }
            }
            LifecycleEvent::Stop => break,
        }
    }
    dir_log!(log, debug, "lifecycle loop stopped");
}
