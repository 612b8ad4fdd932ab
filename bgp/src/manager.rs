// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-peer supervision of the connection state machines.
//!
//! Two routers that connect to each other at the same time end up with two
//! TCP connections for one session. The [`FsmManager`] runs a state machine
//! for each (ids 0 and 1), decides which one survives once both have seen
//! an open message, and is the only thing that reports session state to the
//! layer above.

use crate::config::{PeerConfig, RouterConfig};
use crate::connection::{BgpConnection, BgpConnector, ConnectionDirection};
use crate::error::Error;
use crate::fsm::{complement, FsmEvent, FsmHandle, FsmId, FsmStateKind};
use crate::log::manager_log;
use crate::messages::{
    AddPathElement, AsSize, CeaseErrorSubcode, OpenMessage, UpdateMessage,
};
use mg_common::{read_lock, write_lock};
use slog::Logger;
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::{Arc, RwLock};
use std::time::Duration;

const UNIT_MANAGER: &str = "manager";

/// Attributes of the peer learned from the open message that won collision
/// resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAttributes {
    pub peer: SocketAddr,
    pub router_id: Ipv4Addr,
    pub asn: u32,
    pub as_size: AsSize,
    pub hold_time: Duration,
    pub keepalive_time: Duration,
    pub add_path: Vec<AddPathElement>,
}

/// What the manager reports to the layer that owns the peer.
pub enum SupervisorEvent<Cnx: BgpConnection> {
    ConnectionEstablished { peer: SocketAddr, id: FsmId, conn: Cnx },
    ConnectionBroken { peer: SocketAddr, id: FsmId },
    StateChange { peer: SocketAddr, state: FsmStateKind },
    PeerAttributes(PeerAttributes),
    Update { peer: SocketAddr, update: UpdateMessage },
}

/// Administrative commands forwarded to every state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    ManualStart,
    ManualStop,
    PassiveManualStart,
}

impl<Cnx: BgpConnection> From<Command> for FsmEvent<Cnx> {
    fn from(c: Command) -> Self {
        match c {
            Command::ManualStart => FsmEvent::ManualStart,
            Command::ManualStop => FsmEvent::ManualStop,
            Command::PassiveManualStart => FsmEvent::PassiveManualStart,
        }
    }
}

struct FsmTable<Cnx: BgpConnection> {
    fsms: BTreeMap<FsmId, FsmHandle<Cnx>>,
    active: Option<FsmId>,
}

impl<Cnx: BgpConnection> FsmTable<Cnx> {
    fn id_for_direction(&self, dir: ConnectionDirection) -> Option<FsmId> {
        self.fsms
            .iter()
            .find(|(_, h)| h.shared.direction() == Some(dir))
            .map(|(id, _)| *id)
    }
}

/// State shared between the manager handle and the state machine threads.
pub(crate) struct Shared<Cnx: BgpConnection> {
    pub(crate) peer: SocketAddr,
    pub(crate) router: RouterConfig,
    pub(crate) config: PeerConfig,
    pub(crate) connector: Arc<dyn BgpConnector<Cnx>>,
    pub(crate) log: Logger,
    table: RwLock<FsmTable<Cnx>>,
    accept: AtomicBool,
    supervisor: SyncSender<SupervisorEvent<Cnx>>,
}

pub struct FsmManager<Cnx: BgpConnection> {
    shared: Arc<Shared<Cnx>>,
}

impl<Cnx: BgpConnection> FsmManager<Cnx> {
    /// Create the manager for the peer described by `config` along with its
    /// first state machine, which is told to wait for the peer passively.
    pub fn new(
        router: RouterConfig,
        config: PeerConfig,
        connector: Arc<dyn BgpConnector<Cnx>>,
        supervisor: SyncSender<SupervisorEvent<Cnx>>,
        log: Logger,
    ) -> Result<Self, Error> {
        let shared = Arc::new(Shared {
            peer: config.host,
            accept: AtomicBool::new(config.accept),
            router,
            config,
            connector,
            log,
            table: RwLock::new(FsmTable {
                fsms: BTreeMap::new(),
                active: None,
            }),
            supervisor,
        });

        let first = FsmHandle::spawn(0, FsmStateKind::Idle, shared.clone())?;
        // A send can only fail if the thread is already gone.
        let _ = first.event_tx.send(FsmEvent::PassiveManualStart);
        write_lock!(shared.table).fsms.insert(0, first);
        manager_log!(shared, info, "fsm manager started");

        Ok(Self { shared })
    }

    pub fn peer(&self) -> SocketAddr {
        self.shared.peer
    }

    pub fn accept_connections(&self) {
        self.shared.accept.store(true, Ordering::Relaxed);
    }

    pub fn reject_connections(&self) {
        self.shared.accept.store(false, Ordering::Relaxed);
    }

    /// Hand an inbound connection from the peer to the state machines.
    pub fn accept(&self, conn: Cnx) -> Result<(), Error> {
        self.shared.accept(conn)
    }

    pub fn tcp_conn_failed(&self, id: FsmId) {
        self.shared.tcp_conn_failed(id)
    }

    pub fn new_connection(
        &self,
        id: FsmId,
        direction: ConnectionDirection,
        conn: Cnx,
    ) -> Result<(), Error> {
        self.shared.new_connection(id, direction, conn)
    }

    /// Run collision resolution for an open received by machine `id`.
    /// Returns false when that machine lost and must not proceed.
    pub fn received_open(
        &self,
        id: FsmId,
        direction: ConnectionDirection,
        open: &OpenMessage,
        hold_time: Duration,
        keepalive_time: Duration,
    ) -> Result<bool, Error> {
        self.shared
            .received_open(id, direction, open, hold_time, keepalive_time)
    }

    pub fn send_update(&self, update: UpdateMessage) -> Result<(), Error> {
        self.shared.send_update(update)
    }

    pub fn command(&self, command: Command) {
        self.shared.command(command)
    }

    /// Push every machine back through a connection failure.
    pub fn stop_fsm(&self, reason: &str) {
        self.shared.stop_fsm(reason)
    }

    /// Close every machine and forget about them.
    pub fn cleanup(&self) {
        self.shared.cleanup()
    }

    pub fn active(&self) -> Option<FsmId> {
        read_lock!(self.shared.table).active
    }

    pub fn fsm_count(&self) -> usize {
        read_lock!(self.shared.table).fsms.len()
    }

    pub fn fsm_state(&self, id: FsmId) -> Option<FsmStateKind> {
        read_lock!(self.shared.table)
            .fsms
            .get(&id)
            .map(|h| h.shared.state())
    }

    pub fn fsm_direction(&self, id: FsmId) -> Option<ConnectionDirection> {
        read_lock!(self.shared.table)
            .fsms
            .get(&id)
            .and_then(|h| h.shared.direction())
    }
}

impl<Cnx: BgpConnection> Drop for FsmManager<Cnx> {
    fn drop(&mut self) {
        self.shared.cleanup();
    }
}

impl<Cnx: BgpConnection> Shared<Cnx> {
    fn accept(&self, conn: Cnx) -> Result<(), Error> {
        let from = conn.peer();
        if !self.accept.load(Ordering::Relaxed) {
            manager_log!(self, info, "not accepting connections yet";
                "from" => from.to_string()
            );
            conn.close();
            return Err(Error::ConnectionRefused(from));
        }

        let table = read_lock!(self.table);
        if table
            .id_for_direction(ConnectionDirection::Inbound)
            .is_some()
        {
            manager_log!(self, info, "inbound connection already present";
                "from" => from.to_string()
            );
            conn.close();
            return Err(Error::ConnectionRefused(from));
        }
        for h in table.fsms.values() {
            let _ = h.event_tx.send(FsmEvent::InboundConnection(conn.clone()));
        }
        Ok(())
    }

    pub(crate) fn tcp_conn_failed(&self, id: FsmId) {
        let mut table = write_lock!(self.table);
        let mut events = Vec::new();
        manager_log!(self, info, "fsm {id} tcp connection failed");
        if table.fsms.len() != 1 && table.active != Some(id) {
            self.close_fsm(
                &mut table,
                id,
                CeaseErrorSubcode::ConnectionRejected,
                &mut events,
            );
        }
        drop(table);
        self.deliver(events);
    }

    pub(crate) fn new_connection(
        self: &Arc<Self>,
        id: FsmId,
        direction: ConnectionDirection,
        conn: Cnx,
    ) -> Result<(), Error> {
        let new_id = complement(id);
        let mut table = write_lock!(self.table);
        if table.fsms.contains_key(&new_id) {
            manager_log!(self, error, "fsm {new_id} already exists");
            conn.close();
            return Err(Error::FsmExists(new_id));
        }

        let (initial, event) = match direction {
            ConnectionDirection::Outbound => {
                (FsmStateKind::Connect, FsmEvent::Connected(conn))
            }
            ConnectionDirection::Inbound => {
                (FsmStateKind::Active, FsmEvent::InboundConnection(conn))
            }
        };
        manager_log!(self, info, "creating fsm {new_id}";
            "direction" => direction.to_string()
        );
        let handle = FsmHandle::spawn(new_id, initial, self.clone())?;
        let _ = handle.event_tx.send(event);
        table.fsms.insert(new_id, handle);
        Ok(())
    }

    pub(crate) fn received_open(
        &self,
        id: FsmId,
        direction: ConnectionDirection,
        open: &OpenMessage,
        hold_time: Duration,
        keepalive_time: Duration,
    ) -> Result<bool, Error> {
        let mut events = Vec::new();
        let mut table = write_lock!(self.table);
        let result = self.resolve_collision(
            &mut table,
            id,
            direction,
            open,
            &mut events,
        );
        drop(table);
        self.deliver(events);

        if !result? {
            return Ok(false);
        }
        self.deliver([SupervisorEvent::PeerAttributes(PeerAttributes {
            peer: self.peer,
            router_id: open.router_id(),
            asn: open.asn(),
            as_size: open.as_size(),
            hold_time,
            keepalive_time,
            add_path: open.add_path_families(),
        })]);
        Ok(true)
    }

    /// Close whichever machine loses the collision with `id`. Returns false
    /// when `id` itself is the loser.
    fn resolve_collision(
        &self,
        table: &mut FsmTable<Cnx>,
        id: FsmId,
        direction: ConnectionDirection,
        open: &OpenMessage,
        events: &mut Vec<SupervisorEvent<Cnx>>,
    ) -> Result<bool, Error> {
        let local = self.router.id_u32();
        let remote = open.id;

        let others: Vec<FsmStateKind> = table
            .fsms
            .iter()
            .filter(|(fsm_id, _)| **fsm_id != id)
            .map(|(_, h)| h.shared.state())
            .collect();

        let mut close_dir = None;
        for state in others {
            if state < FsmStateKind::OpenSent {
                continue;
            }
            // RFC 4271 §6.8
            let dir = if state == FsmStateKind::Established {
                direction
            } else if local > remote {
                ConnectionDirection::Inbound
            } else if local < remote {
                ConnectionDirection::Outbound
            } else {
                return Err(Error::DuplicateRouterId(Ipv4Addr::from(local)));
            };
            close_dir = Some(dir);
            match table.id_for_direction(dir) {
                Some(victim) => {
                    manager_log!(self, info, "collision resolved";
                        "closing" => victim,
                        "direction" => dir.to_string()
                    );
                    self.close_fsm(
                        table,
                        victim,
                        CeaseErrorSubcode::ConnectionCollisionResolution,
                        events,
                    );
                }
                None => {
                    manager_log!(self, warn, "no {dir} fsm to close");
                }
            }
        }

        if close_dir == Some(direction) {
            manager_log!(self, info, "fsm {id} lost collision resolution");
            return Ok(false);
        }
        Ok(true)
    }

    pub(crate) fn established(&self, id: FsmId, conn: Cnx) {
        let mut table = write_lock!(self.table);
        manager_log!(self, info, "fsm {id} connection established");
        table.active = Some(id);
        drop(table);
        self.deliver([SupervisorEvent::ConnectionEstablished {
            peer: self.peer,
            id,
            conn,
        }]);
    }

    pub(crate) fn broken(&self, id: FsmId) {
        let mut events = Vec::new();
        let mut table = write_lock!(self.table);
        self.broken_locked(&mut table, id, &mut events);
        drop(table);
        self.deliver(events);
    }

    fn broken_locked(
        &self,
        table: &mut FsmTable<Cnx>,
        id: FsmId,
        events: &mut Vec<SupervisorEvent<Cnx>>,
    ) {
        if table.active == Some(id) {
            manager_log!(self, info, "fsm {id} connection broken");
            table.active = None;
            events.push(SupervisorEvent::ConnectionBroken {
                peer: self.peer,
                id,
            });
        }
    }

    pub(crate) fn state_change(&self, id: FsmId, state: FsmStateKind) {
        let active = read_lock!(self.table).active;
        if active.is_none() || active == Some(id) {
            self.deliver([SupervisorEvent::StateChange {
                peer: self.peer,
                state,
            }]);
        }
    }

    pub(crate) fn received_update(&self, id: FsmId, update: UpdateMessage) {
        let active = read_lock!(self.table).active;
        if active == Some(id) {
            self.deliver([SupervisorEvent::Update {
                peer: self.peer,
                update,
            }]);
        }
    }

    fn send_update(&self, update: UpdateMessage) -> Result<(), Error> {
        let table = read_lock!(self.table);
        let Some(id) = table.active else {
            manager_log!(self, info, "not established, dropping update");
            return Err(Error::NoActiveFsm);
        };
        let h = table.fsms.get(&id).ok_or(Error::NoFsm(id))?;
        h.event_tx
            .send(FsmEvent::Transmit(update.into()))
            .map_err(|_| Error::Shutdown)
    }

    fn command(&self, command: Command) {
        let table = read_lock!(self.table);
        for h in table.fsms.values() {
            let _ = h.event_tx.send(command.into());
        }
    }

    fn stop_fsm(&self, reason: &str) {
        let mut events = Vec::new();
        let mut table = write_lock!(self.table);
        let ids: Vec<FsmId> = table.fsms.keys().copied().collect();
        for id in ids {
            manager_log!(self, info, "stopping fsm {id}: {reason}");
            if let Some(h) = table.fsms.get(&id) {
                let _ = h.event_tx.send(FsmEvent::TcpConnectionFails);
            }
            self.broken_locked(&mut table, id, &mut events);
        }
        drop(table);
        self.deliver(events);
    }

    fn cleanup(&self) {
        let mut events = Vec::new();
        let mut table = write_lock!(self.table);
        let ids: Vec<FsmId> = table.fsms.keys().copied().collect();
        for id in ids {
            self.close_fsm(
                &mut table,
                id,
                CeaseErrorSubcode::AdministrativeShutdown,
                &mut events,
            );
        }
        drop(table);
        self.deliver(events);
    }

    fn close_fsm(
        &self,
        table: &mut FsmTable<Cnx>,
        id: FsmId,
        reason: CeaseErrorSubcode,
        events: &mut Vec<SupervisorEvent<Cnx>>,
    ) {
        let Some(h) = table.fsms.remove(&id) else {
            manager_log!(self, info, "fsm {id} to close not found");
            return;
        };
        let _ = h.event_tx.send(FsmEvent::Close(reason));
        self.broken_locked(table, id, events);
        manager_log!(self, info, "closed fsm {id}");
    }

    /// Hand events to the supervisor. This blocks while the supervisor queue
    /// is full, so it must never be called with the table lock held.
    fn deliver<I>(&self, events: I)
    where
        I: IntoIterator<Item = SupervisorEvent<Cnx>>,
    {
        for event in events {
            if self.supervisor.send(event).is_err() {
                manager_log!(self, error, "supervisor gone, event dropped");
                return;
            }
        }
    }
}
