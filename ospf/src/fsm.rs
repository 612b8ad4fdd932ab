// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The per-interface state machine.
//!
//! Every interface gets a thread that owns its [`InterfaceStatus`] and
//! consumes a single inbox of [`InterfaceEvent`]s. Neighbor updates come from
//! the neighbor state machines through the [`InterfaceFsm`] handle, hello and
//! wait timer expirations come from a [`Clock`] owned by the thread. The
//! flavor of the machine is fixed by the interface type when it starts.

use crate::election::{elect_bdr_and_dr, Outcome};
use crate::error::Error;
use crate::interface::{
    Hello, IfState, InterfaceConfig, InterfaceStatus, InterfaceType,
    NeighborEntry, NeighborMessage,
};
use crate::log::intf_log;
use crate::{ALL_SPF_ROUTERS, STOP_TIMEOUT};
use mg_common::clock::{Clock, Timer};
use mg_common::{lock, read_lock, write_lock};
use slog::Logger;
use std::collections::btree_map::Entry;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, sync_channel, Receiver, Sender, SyncSender};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::Builder;
use std::time::Duration;

const UNIT_INTERFACE: &str = "interface_fsm";

/// Puts hellos on the wire for an interface.
pub trait HelloTransmitter: Send + Sync + 'static {
    fn send_hello(&self, interface: &str, hello: Hello) -> Result<(), Error>;
}

/// Work the interface asks of the link-state database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LsaRequest {
    /// The interface changed state and the router-LSA must be redone.
    InterfaceStateChanged {
        interface: String,
        area: Ipv4Addr,
        state: IfState,
    },

    /// The interface became DR, or the set of fully adjacent neighbors
    /// changed while it was DR.
    CreateNetworkLsa { interface: String, area: Ipv4Addr },

    /// The interface is no longer DR.
    FlushNetworkLsa { interface: String, area: Ipv4Addr },
}

pub(crate) enum InterfaceEvent {
    HelloTimerExpires,
    WaitTimerExpires,
    BackupSeen,
    NeighborCreate(NeighborMessage),
    NeighborChange(NeighborMessage),
    NeighborDown(Ipv4Addr),
    NeighborFull { router_id: Ipv4Addr, full: bool },
    Stop,
}

#[derive(Debug, Clone, Copy)]
enum InterfaceTimer {
    Hello,
    Wait,
}

impl From<InterfaceTimer> for InterfaceEvent {
    fn from(t: InterfaceTimer) -> Self {
        match t {
            InterfaceTimer::Hello => InterfaceEvent::HelloTimerExpires,
            InterfaceTimer::Wait => InterfaceEvent::WaitTimerExpires,
        }
    }
}

/// Handle to a running interface state machine.
pub struct InterfaceFsm {
    pub name: String,
    event_tx: Sender<InterfaceEvent>,
    ack_rx: Mutex<Receiver<()>>,
    status: Arc<RwLock<InterfaceStatus>>,
    stopped: AtomicBool,
    log: Logger,
}

impl InterfaceFsm {
    /// Start the state machine for an interface. Timers tick at
    /// `resolution`.
    pub fn start(
        config: InterfaceConfig,
        router_id: Ipv4Addr,
        resolution: Duration,
        transmitter: Arc<dyn HelloTransmitter>,
        lsa_tx: SyncSender<LsaRequest>,
        log: Logger,
    ) -> Result<Self, Error> {
        let (event_tx, event_rx) = channel();
        let (ack_tx, ack_rx) = sync_channel(1);
        let status =
            Arc::new(RwLock::new(InterfaceStatus::new(&config, router_id)));

        let runner = InterfaceRunner {
            name: config.name.clone(),
            hello: Timer::new(config.hello_interval),
            wait: Timer::one_shot(config.dead_interval),
            config,
            status: status.clone(),
            transmitter,
            lsa_tx,
            ack_tx,
            log: log.clone(),
        };
        let name = runner.name.clone();
        let clock_tx = event_tx.clone();
        Builder::new()
            .name(format!("ospf-intf-{name}"))
            .spawn(move || runner.run(event_rx, clock_tx, resolution))?;

        Ok(Self {
            name,
            event_tx,
            ack_rx: Mutex::new(ack_rx),
            status,
            stopped: AtomicBool::new(false),
            log,
        })
    }

    pub fn status(&self) -> InterfaceStatus {
        read_lock!(self.status).clone()
    }

    pub fn state(&self) -> IfState {
        read_lock!(self.status).state
    }

    pub fn neighbor_create(&self, msg: NeighborMessage) -> Result<(), Error> {
        self.send(InterfaceEvent::NeighborCreate(msg))
    }

    pub fn neighbor_change(&self, msg: NeighborMessage) -> Result<(), Error> {
        self.send(InterfaceEvent::NeighborChange(msg))
    }

    pub fn neighbor_down(&self, router_id: Ipv4Addr) -> Result<(), Error> {
        self.send(InterfaceEvent::NeighborDown(router_id))
    }

    /// Report that the adjacency with a neighbor became full, or stopped
    /// being full.
    pub fn neighbor_full(
        &self,
        router_id: Ipv4Addr,
        full: bool,
    ) -> Result<(), Error> {
        self.send(InterfaceEvent::NeighborFull { router_id, full })
    }

    /// A neighbor declared itself BDR, or declared itself DR with no BDR.
    pub fn backup_seen(&self) -> Result<(), Error> {
        self.send(InterfaceEvent::BackupSeen)
    }

    fn send(&self, event: InterfaceEvent) -> Result<(), Error> {
        self.event_tx
            .send(event)
            .map_err(|_| Error::Shutdown(self.name.clone()))
    }

    /// Stop the state machine and wait for it to acknowledge. If it does not
    /// within [`STOP_TIMEOUT`] the machine is abandoned.
    pub fn stop(&self) -> Result<(), Error> {
        self.stopped.store(true, Ordering::Relaxed);
        self.send(InterfaceEvent::Stop)?;
        match lock!(self.ack_rx).recv_timeout(STOP_TIMEOUT) {
            Ok(()) => {
                intf_log!(self, info, "stopped");
                Ok(())
            }
            Err(e) => {
                intf_log!(self, warn, "stop not acknowledged, abandoning";
                    "error" => format!("{e}")
                );
                Err(Error::StopTimeout(self.name.clone()))
            }
        }
    }
}

impl Drop for InterfaceFsm {
    fn drop(&mut self) {
        if !self.stopped.load(Ordering::Relaxed) {
            let _ = self.event_tx.send(InterfaceEvent::Stop);
        }
    }
}

struct InterfaceRunner {
    name: String,
    config: InterfaceConfig,
    status: Arc<RwLock<InterfaceStatus>>,
    transmitter: Arc<dyn HelloTransmitter>,
    lsa_tx: SyncSender<LsaRequest>,
    ack_tx: SyncSender<()>,
    hello: Timer,
    wait: Timer,
    log: Logger,
}

impl InterfaceRunner {
    fn run(
        self,
        rx: Receiver<InterfaceEvent>,
        clock_tx: Sender<InterfaceEvent>,
        resolution: Duration,
    ) {
        // Dropped on every exit path, which stops both timers.
        let _clock = Clock::new(
            resolution,
            vec![
                (self.hello.clone(), InterfaceTimer::Hello),
                (self.wait.clone(), InterfaceTimer::Wait),
            ],
            clock_tx,
            self.log.clone(),
        );

        self.startup();
        match self.config.if_type {
            InterfaceType::PointToPoint => self.point_to_point(&rx),
            InterfaceType::Broadcast => self.broadcast(&rx),
        }

        self.hello.disable();
        self.wait.disable();
        write_lock!(self.status).state = IfState::Down;
        let _ = self.ack_tx.try_send(());
    }

    fn startup(&self) {
        let state = match (self.config.if_type, self.config.priority) {
            (InterfaceType::PointToPoint, _) => IfState::PointToPoint,
            (InterfaceType::Broadcast, 0) => IfState::OtherDesignatedRouter,
            (InterfaceType::Broadcast, _) => IfState::Waiting,
        };
        if state == IfState::Waiting {
            self.wait.restart();
        }
        self.hello.restart();
        write_lock!(self.status).state = state;
        intf_log!(self, info, "interface up";
            "state" => format!("{state}"),
            "type" => format!("{:?}", self.config.if_type)
        );
        self.send_hello();
        self.state_changed(state);
    }

    fn point_to_point(&self, rx: &Receiver<InterfaceEvent>) {
        while let Ok(event) = rx.recv() {
            match event {
                InterfaceEvent::HelloTimerExpires => self.send_hello(),
                InterfaceEvent::NeighborCreate(m) => {
                    if self.p2p_claims_role(&m) {
                        continue;
                    }
                    self.add_neighbor(m);
                }
                InterfaceEvent::NeighborChange(m) => {
                    if self.p2p_claims_role(&m) {
                        continue;
                    }
                    self.update_neighbor(m);
                }
                InterfaceEvent::NeighborDown(id) => {
                    self.remove_neighbor(id);
                }
                InterfaceEvent::NeighborFull { router_id, full } => {
                    self.neighbor_full(router_id, full)
                }
                InterfaceEvent::WaitTimerExpires
                | InterfaceEvent::BackupSeen => {
                    intf_log!(self, debug, "no election on point-to-point");
                }
                InterfaceEvent::Stop => return,
            }
        }
    }

    fn broadcast(&self, rx: &Receiver<InterfaceEvent>) {
        while let Ok(event) = rx.recv() {
            match event {
                InterfaceEvent::HelloTimerExpires => self.send_hello(),
                InterfaceEvent::WaitTimerExpires => {
                    intf_log!(self, info, "wait timer expired");
                    self.elect();
                }
                InterfaceEvent::BackupSeen => {
                    if self.state() == IfState::Waiting {
                        intf_log!(self, info, "backup seen");
                        self.elect();
                    } else {
                        intf_log!(self, debug, "backup seen outside waiting");
                    }
                }
                InterfaceEvent::NeighborCreate(m) => {
                    let two_way = m.two_way;
                    if self.add_neighbor(m)
                        && two_way
                        && self.state() > IfState::Waiting
                    {
                        self.elect();
                    }
                }
                InterfaceEvent::NeighborChange(m) => {
                    let changed = match self.update_neighbor(m) {
                        Some((old, new)) => neighbor_changed(&old, &new),
                        None => false,
                    };
                    if changed && self.state() > IfState::Waiting {
                        intf_log!(self, info, "neighbor change";
                            "neighbor" => format!("{}", m.router_id)
                        );
                        self.elect();
                    }
                }
                InterfaceEvent::NeighborDown(id) => {
                    let was_two_way = self
                        .remove_neighbor(id)
                        .map(|n| n.two_way)
                        .unwrap_or(false);
                    if was_two_way && self.state() > IfState::Waiting {
                        self.elect();
                    }
                }
                InterfaceEvent::NeighborFull { router_id, full } => {
                    self.neighbor_full(router_id, full)
                }
                InterfaceEvent::Stop => return,
            }
        }
    }

    fn state(&self) -> IfState {
        read_lock!(self.status).state
    }

    /// Point-to-point links have no designated routers. A neighbor that
    /// advertises one is misconfigured and its update is ignored.
    fn p2p_claims_role(&self, m: &NeighborMessage) -> bool {
        if m.dr.is_unspecified() && m.bdr.is_unspecified() {
            return false;
        }
        intf_log!(self, error, "neighbor advertises dr/bdr on p2p link";
            "neighbor" => format!("{}", m.router_id),
            "dr" => format!("{}", m.dr),
            "bdr" => format!("{}", m.bdr)
        );
        true
    }

    /// Returns true if the neighbor was not already known.
    fn add_neighbor(&self, m: NeighborMessage) -> bool {
        let mut st = write_lock!(self.status);
        match st.neighbors.entry(m.router_id) {
            Entry::Occupied(_) => {
                intf_log!(self, debug, "neighbor already known";
                    "neighbor" => format!("{}", m.router_id)
                );
                false
            }
            Entry::Vacant(v) => {
                v.insert(m.into());
                intf_log!(self, info, "neighbor added";
                    "neighbor" => format!("{}", m.router_id),
                    "address" => format!("{}", m.address)
                );
                true
            }
        }
    }

    /// Returns the neighbor entry before and after the update.
    fn update_neighbor(
        &self,
        m: NeighborMessage,
    ) -> Option<(NeighborEntry, NeighborEntry)> {
        let mut st = write_lock!(self.status);
        let Some(entry) = st.neighbors.get_mut(&m.router_id) else {
            intf_log!(self, error, "change for unknown neighbor";
                "neighbor" => format!("{}", m.router_id)
            );
            return None;
        };
        let old = *entry;
        entry.address = m.address;
        entry.priority = m.priority;
        entry.two_way = m.two_way;
        entry.dr = m.dr;
        entry.bdr = m.bdr;
        Some((old, *entry))
    }

    fn remove_neighbor(&self, router_id: Ipv4Addr) -> Option<NeighborEntry> {
        let removed = write_lock!(self.status).neighbors.remove(&router_id);
        match removed {
            Some(_) => intf_log!(self, info, "neighbor removed";
                "neighbor" => format!("{router_id}")
            ),
            None => intf_log!(self, warn, "down for unknown neighbor";
                "neighbor" => format!("{router_id}")
            ),
        }
        removed
    }

    /// Track the full flag. The network-LSA lists the fully adjacent
    /// neighbors, so the DR must redo it when the flag flips.
    fn neighbor_full(&self, router_id: Ipv4Addr, full: bool) {
        let regenerate = {
            let mut st = write_lock!(self.status);
            let is_dr = st.state == IfState::DesignatedRouter;
            match st.neighbors.get_mut(&router_id) {
                Some(n) if n.full != full => {
                    n.full = full;
                    is_dr
                }
                Some(_) => false,
                None => {
                    intf_log!(self, warn, "full state for unknown neighbor";
                        "neighbor" => format!("{router_id}")
                    );
                    false
                }
            }
        };
        if regenerate {
            self.notify(LsaRequest::CreateNetworkLsa {
                interface: self.name.clone(),
                area: self.config.area,
            });
        }
    }

    fn elect(&self) {
        let outcome = elect_bdr_and_dr(&mut write_lock!(self.status));
        self.wait.disable();
        self.elected(outcome);
    }

    fn elected(&self, o: Outcome) {
        intf_log!(self, info, "election complete";
            "state" => format!("{}", o.new_state),
            "previous" => format!("{}", o.old_state),
            "dr" => format!("{}", o.dr.router_id),
            "bdr" => format!("{}", o.bdr.router_id)
        );
        self.state_changed(o.new_state);
        if o.became_dr() {
            self.notify(LsaRequest::CreateNetworkLsa {
                interface: self.name.clone(),
                area: self.config.area,
            });
        } else if o.lost_dr() {
            self.notify(LsaRequest::FlushNetworkLsa {
                interface: self.name.clone(),
                area: self.config.area,
            });
        }
    }

    fn state_changed(&self, state: IfState) {
        self.notify(LsaRequest::InterfaceStateChanged {
            interface: self.name.clone(),
            area: self.config.area,
            state,
        });
    }

    fn notify(&self, req: LsaRequest) {
        if let Err(e) = self.lsa_tx.send(req) {
            intf_log!(self, error, "lsa request dropped, receiver gone";
                "request" => format!("{:?}", e.0)
            );
        }
    }

    fn send_hello(&self) {
        let hello = {
            let st = read_lock!(self.status);
            Hello {
                destination: ALL_SPF_ROUTERS,
                router_id: st.router_id,
                area: st.area,
                address: st.address,
                priority: st.priority,
                hello_interval: self.config.hello_interval,
                dead_interval: self.config.dead_interval,
                dr: st.dr,
                bdr: st.bdr,
                neighbors: st.neighbors.keys().copied().collect(),
            }
        };
        if let Err(e) = self.transmitter.send_hello(&self.name, hello) {
            intf_log!(self, warn, "hello send failed: {e}");
        }
    }
}

/// Whether an update to a neighbor must trigger a new election.
fn neighbor_changed(old: &NeighborEntry, new: &NeighborEntry) -> bool {
    let claims_flipped = old.claims_dr() != new.claims_dr()
        || old.claims_bdr() != new.claims_bdr();
    old.two_way != new.two_way
        || (old.two_way && claims_flipped)
        || (old.two_way && old.priority != new.priority)
}

#[cfg(test)]
mod test {
    use super::*;
    use mg_common::log::init_logger;
    use mg_common::wait_for_eq;
    use pretty_assertions::assert_eq;

    const LOCAL_ID: Ipv4Addr = Ipv4Addr::new(1, 1, 1, 1);
    const LOCAL_ADDR: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const PEER_ID: Ipv4Addr = Ipv4Addr::new(2, 2, 2, 2);
    const PEER_ADDR: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
    const RECV: Duration = Duration::from_secs(2);

    #[derive(Default)]
    struct RecordingTransmitter {
        hellos: Mutex<Vec<Hello>>,
    }

    impl RecordingTransmitter {
        fn count(&self) -> usize {
            lock!(self.hellos).len()
        }

        fn last(&self) -> Option<Hello> {
            lock!(self.hellos).last().cloned()
        }
    }

    impl HelloTransmitter for RecordingTransmitter {
        fn send_hello(
            &self,
            _interface: &str,
            hello: Hello,
        ) -> Result<(), Error> {
            lock!(self.hellos).push(hello);
            Ok(())
        }
    }

    struct Harness {
        fsm: InterfaceFsm,
        tx: Arc<RecordingTransmitter>,
        lsa: Receiver<LsaRequest>,
    }

    impl Harness {
        fn next(&self) -> anyhow::Result<LsaRequest> {
            Ok(self.lsa.recv_timeout(RECV)?)
        }

        fn expect_state_change(&self, state: IfState) -> anyhow::Result<()> {
            assert_eq!(
                self.next()?,
                LsaRequest::InterfaceStateChanged {
                    interface: "eth0".into(),
                    area: Ipv4Addr::UNSPECIFIED,
                    state,
                }
            );
            Ok(())
        }
    }

    fn start(
        if_type: InterfaceType,
        priority: u8,
        dead_interval: Duration,
    ) -> anyhow::Result<Harness> {
        let config = InterfaceConfig {
            name: "eth0".into(),
            address: LOCAL_ADDR,
            area: Ipv4Addr::UNSPECIFIED,
            if_type,
            priority,
            hello_interval: Duration::from_millis(50),
            dead_interval,
        };
        let tx = Arc::new(RecordingTransmitter::default());
        let (lsa_tx, lsa) = sync_channel(64);
        let fsm = InterfaceFsm::start(
            config,
            LOCAL_ID,
            Duration::from_millis(5),
            tx.clone(),
            lsa_tx,
            init_logger(),
        )?;
        Ok(Harness { fsm, tx, lsa })
    }

    fn peer(priority: u8, dr: Ipv4Addr, bdr: Ipv4Addr) -> NeighborMessage {
        NeighborMessage {
            router_id: PEER_ID,
            address: PEER_ADDR,
            priority,
            two_way: true,
            dr,
            bdr,
        }
    }

    /// Bring up a broadcast interface with priority 5 and a priority 1
    /// neighbor, and let the wait timer make the local router DR.
    fn local_dr() -> anyhow::Result<Harness> {
        let h = start(InterfaceType::Broadcast, 5, Duration::from_millis(100))?;
        h.expect_state_change(IfState::Waiting)?;
        h.fsm.neighbor_create(peer(
            1,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
        ))?;
        h.expect_state_change(IfState::DesignatedRouter)?;
        assert_eq!(
            h.next()?,
            LsaRequest::CreateNetworkLsa {
                interface: "eth0".into(),
                area: Ipv4Addr::UNSPECIFIED,
            }
        );
        Ok(h)
    }

    #[test]
    fn point_to_point_sends_hellos() -> anyhow::Result<()> {
        let h = start(InterfaceType::PointToPoint, 1, Duration::from_secs(1))?;
        h.expect_state_change(IfState::PointToPoint)?;
        wait_for_eq!((h.tx.count() >= 3), true);

        let hello = h.tx.last().ok_or(anyhow::anyhow!("no hello"))?;
        assert_eq!(hello.destination, ALL_SPF_ROUTERS);
        assert_eq!(hello.router_id, LOCAL_ID);
        assert_eq!(hello.dr, Ipv4Addr::UNSPECIFIED);

        h.fsm.stop()?;
        assert_eq!(h.fsm.state(), IfState::Down);
        Ok(())
    }

    #[test]
    fn point_to_point_rejects_designated_routers() -> anyhow::Result<()> {
        let h = start(InterfaceType::PointToPoint, 1, Duration::from_secs(1))?;
        h.expect_state_change(IfState::PointToPoint)?;

        h.fsm.neighbor_create(peer(1, PEER_ADDR, Ipv4Addr::UNSPECIFIED))?;
        h.fsm.neighbor_create(peer(
            1,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
        ))?;
        wait_for_eq!(h.fsm.status().neighbors.len(), 1);

        // A change that claims a BDR is dropped, the priority stays put.
        h.fsm.neighbor_change(peer(9, Ipv4Addr::UNSPECIFIED, PEER_ADDR))?;
        h.fsm.neighbor_change(peer(
            2,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
        ))?;
        wait_for_eq!(
            h.fsm.status().neighbors.get(&PEER_ID).map(|n| n.priority),
            Some(2)
        );

        wait_for_eq!(
            h.tx.last().map(|hello| hello.neighbors),
            Some(vec![PEER_ID])
        );

        h.fsm.neighbor_down(PEER_ID)?;
        wait_for_eq!(h.fsm.status().neighbors.len(), 0);
        assert_eq!(h.fsm.state(), IfState::PointToPoint);
        h.fsm.stop()?;
        Ok(())
    }

    #[test]
    fn priority_zero_never_waits() -> anyhow::Result<()> {
        let h = start(InterfaceType::Broadcast, 0, Duration::from_millis(50))?;
        h.expect_state_change(IfState::OtherDesignatedRouter)?;
        h.fsm.stop()?;
        Ok(())
    }

    #[test]
    fn wait_timer_runs_election() -> anyhow::Result<()> {
        let h = local_dr()?;
        let st = h.fsm.status();
        assert_eq!(st.dr, LOCAL_ADDR);
        assert_eq!(st.dr_id, LOCAL_ID);
        assert_eq!(st.bdr, PEER_ADDR);
        assert_eq!(st.bdr_id, PEER_ID);
        assert_eq!(st.events, 1);
        wait_for_eq!(h.tx.last().map(|hello| hello.dr), Some(LOCAL_ADDR));
        h.fsm.stop()?;
        Ok(())
    }

    #[test]
    fn backup_seen_elects_before_wait_expires() -> anyhow::Result<()> {
        let h = start(InterfaceType::Broadcast, 1, Duration::from_secs(60))?;
        h.expect_state_change(IfState::Waiting)?;
        h.fsm.neighbor_create(peer(1, PEER_ADDR, Ipv4Addr::UNSPECIFIED))?;
        h.fsm.backup_seen()?;

        // The neighbor already claims DR so the local router ends up BDR.
        h.expect_state_change(IfState::BackupDesignatedRouter)?;
        let st = h.fsm.status();
        assert_eq!(st.dr, PEER_ADDR);
        assert_eq!(st.bdr, LOCAL_ADDR);

        // Once out of waiting further sightings are ignored, and a BDR has
        // no network-LSA to redo.
        h.fsm.backup_seen()?;
        h.fsm.neighbor_full(PEER_ID, true)?;
        wait_for_eq!(
            h.fsm.status().neighbors.get(&PEER_ID).map(|n| n.full),
            Some(true)
        );
        assert_eq!(h.fsm.status().events, 1);
        assert!(h.lsa.try_recv().is_err());
        h.fsm.stop()?;
        Ok(())
    }

    #[test]
    fn neighbor_change_reelects() -> anyhow::Result<()> {
        let h = local_dr()?;

        // Resending what is already known is not a change.
        h.fsm.neighbor_change(peer(
            1,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
        ))?;

        // A higher priority neighbor that claims DR takes over.
        h.fsm.neighbor_change(peer(9, PEER_ADDR, Ipv4Addr::UNSPECIFIED))?;
        h.expect_state_change(IfState::OtherDesignatedRouter)?;
        assert_eq!(
            h.next()?,
            LsaRequest::FlushNetworkLsa {
                interface: "eth0".into(),
                area: Ipv4Addr::UNSPECIFIED,
            }
        );
        let st = h.fsm.status();
        assert_eq!(st.dr_id, PEER_ID);
        assert_eq!(st.events, 2);
        h.fsm.stop()?;
        Ok(())
    }

    #[test]
    fn neighbor_down_reelects() -> anyhow::Result<()> {
        let h = local_dr()?;
        h.fsm.neighbor_down(PEER_ID)?;
        h.expect_state_change(IfState::DesignatedRouter)?;
        let st = h.fsm.status();
        assert_eq!(st.bdr, Ipv4Addr::UNSPECIFIED);
        assert_eq!(st.events, 2);
        h.fsm.stop()?;
        Ok(())
    }

    #[test]
    fn full_state_regenerates_only_as_dr() -> anyhow::Result<()> {
        let h = local_dr()?;
        let create = LsaRequest::CreateNetworkLsa {
            interface: "eth0".into(),
            area: Ipv4Addr::UNSPECIFIED,
        };

        h.fsm.neighbor_full(PEER_ID, true)?;
        assert_eq!(h.next()?, create);

        // No flip, no request.
        h.fsm.neighbor_full(PEER_ID, true)?;
        h.fsm.neighbor_full(PEER_ID, false)?;
        assert_eq!(h.next()?, create);
        h.fsm.stop()?;

        let other =
            start(InterfaceType::Broadcast, 0, Duration::from_secs(1))?;
        other.expect_state_change(IfState::OtherDesignatedRouter)?;
        other
            .fsm
            .neighbor_create(peer(1, PEER_ADDR, Ipv4Addr::UNSPECIFIED))?;
        other.expect_state_change(IfState::OtherDesignatedRouter)?;
        other.fsm.neighbor_full(PEER_ID, true)?;
        wait_for_eq!(
            other.fsm.status().neighbors.get(&PEER_ID).map(|n| n.full),
            Some(true)
        );
        assert!(other.lsa.try_recv().is_err());
        other.fsm.stop()?;
        Ok(())
    }

    #[test]
    fn stop_is_acknowledged_once() -> anyhow::Result<()> {
        let h = start(InterfaceType::Broadcast, 1, Duration::from_secs(60))?;
        h.expect_state_change(IfState::Waiting)?;
        h.fsm.stop()?;
        assert_eq!(h.fsm.state(), IfState::Down);

        let sent = h.tx.count();
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(h.tx.count(), sent);

        assert!(matches!(h.fsm.stop(), Err(Error::Shutdown(_))));
        Ok(())
    }

    #[test]
    fn change_rules() {
        let base = NeighborEntry {
            address: PEER_ADDR,
            priority: 1,
            two_way: true,
            full: false,
            dr: Ipv4Addr::UNSPECIFIED,
            bdr: Ipv4Addr::UNSPECIFIED,
        };
        let changed = |new| neighbor_changed(&base, &new);
        assert!(!changed(base));
        assert!(!changed(NeighborEntry { full: true, ..base }));
        assert!(changed(NeighborEntry { dr: PEER_ADDR, ..base }));
        assert!(changed(NeighborEntry { bdr: PEER_ADDR, ..base }));
        assert!(changed(NeighborEntry { priority: 2, ..base }));
        assert!(changed(NeighborEntry {
            two_way: false,
            ..base
        }));

        let one_way = NeighborEntry {
            two_way: false,
            ..base
        };
        let changed = |new| neighbor_changed(&one_way, &new);
        assert!(!changed(NeighborEntry { priority: 7, ..one_way }));
        assert!(!changed(NeighborEntry { dr: PEER_ADDR, ..one_way }));
    }
}
