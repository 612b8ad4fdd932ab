// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::config::{Asn, PeerConfig, RouterConfig};
use crate::connection::{BgpConnection, ConnectionDirection};
use crate::connection_channel::{
    BgpConnectionChannel, ChannelConnector, Listener,
};
use crate::error::Error;
use crate::fsm::{FsmId, FsmStateKind};
use crate::manager::{Command, FsmManager, SupervisorEvent};
use crate::messages::{
    CeaseErrorSubcode, ErrorCode, Message, NotificationMessage, OpenMessage,
    UpdateMessage,
};
use mg_common::log::init_logger;
use mg_common::{sockaddr, wait_for_eq};
use pretty_assertions::assert_eq;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver};
use std::sync::Arc;
use std::thread::{sleep, spawn, JoinHandle};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(2);
const REMOTE_ASN: u32 = 65001;

type Event = SupervisorEvent<BgpConnectionChannel>;

struct Harness {
    mgr: FsmManager<BgpConnectionChannel>,
    events: Receiver<Event>,
    listener: Listener,
    local: SocketAddr,
    peer: SocketAddr,
}

fn peer_config(host: SocketAddr, passive: bool, accept: bool) -> PeerConfig {
    PeerConfig {
        name: "peer".into(),
        host,
        hold_time: 30,
        keepalive: 10,
        connect_retry: 60,
        idle_hold_time: 60,
        resolution: 10,
        passive,
        accept,
    }
}

fn harness(
    local_id: Ipv4Addr,
    local: &str,
    peer: &str,
    accept: bool,
) -> Harness {
    harness_with_queue(local_id, local, peer, accept, 256)
}

fn harness_with_queue(
    local_id: Ipv4Addr,
    local: &str,
    peer: &str,
    accept: bool,
    depth: usize,
) -> Harness {
    let local: SocketAddr = sockaddr!(local);
    let peer: SocketAddr = sockaddr!(peer);
    let listener = Listener::bind(peer);
    let (tx, events) = sync_channel(depth);
    let mgr = FsmManager::new(
        RouterConfig {
            asn: Asn::FourOctet(65000),
            id: local_id,
        },
        peer_config(peer, true, accept),
        Arc::new(ChannelConnector { local }),
        tx,
        init_logger(),
    )
    .expect("manager");
    wait_for_eq!(mgr.fsm_state(0), Some(FsmStateKind::Active));
    Harness {
        mgr,
        events,
        listener,
        local,
        peer,
    }
}

fn open_from(id: Ipv4Addr) -> Message {
    OpenMessage::new4(REMOTE_ASN, 30, u32::from(id)).into()
}

/// Drive fsm 0 out to the peer and into open sent. Returns the peer's end.
fn outbound_open_sent(h: &Harness) -> BgpConnectionChannel {
    h.mgr.command(Command::ManualStart);
    let remote = h.listener.accept(TIMEOUT).expect("outbound connection");
    remote.recv_kind("open", TIMEOUT).expect("open");
    wait_for_eq!(h.mgr.fsm_state(0), Some(FsmStateKind::OpenSent));
    remote
}

/// Connect the peer to us. Returns the peer's end once our open is seen.
fn inbound_open_sent(h: &Harness) -> BgpConnectionChannel {
    let (remote, local) = BgpConnectionChannel::pair(h.peer, h.local);
    h.mgr.accept(local).expect("accept");
    remote.recv_kind("open", TIMEOUT).expect("open");
    remote
}

fn establish(h: &Harness, remote: &BgpConnectionChannel, peer_id: Ipv4Addr) {
    remote.send(open_from(peer_id)).expect("send open");
    remote.recv_kind("keepalive", TIMEOUT).expect("keepalive");
    remote.send(Message::KeepAlive).expect("send keepalive");
    wait_for_eq!(h.mgr.active(), Some(0));
}

fn expect_notification(remote: &BgpConnectionChannel) -> NotificationMessage {
    match remote.recv_kind("notification", TIMEOUT) {
        Ok(Message::Notification(n)) => n,
        other => panic!("expected notification, got {other:?}"),
    }
}

fn expect_event<F: Fn(&Event) -> bool>(rx: &Receiver<Event>, f: F) -> Event {
    loop {
        let ev = rx.recv_timeout(TIMEOUT).expect("supervisor event");
        if f(&ev) {
            return ev;
        }
    }
}

#[test]
fn collision_local_id_higher_keeps_outbound() {
    let local_id = Ipv4Addr::new(10, 0, 0, 2);
    let peer_id = Ipv4Addr::new(10, 0, 0, 1);
    let h = harness(local_id, "127.0.10.1:179", "127.0.10.2:179", true);

    let out = outbound_open_sent(&h);
    let inb = inbound_open_sent(&h);
    wait_for_eq!(h.mgr.fsm_state(1), Some(FsmStateKind::OpenSent));
    assert_eq!(h.mgr.fsm_direction(1), Some(ConnectionDirection::Inbound));

    inb.send(open_from(peer_id)).expect("send open");
    assert_eq!(
        expect_notification(&inb),
        NotificationMessage::cease(
            CeaseErrorSubcode::ConnectionCollisionResolution
        )
    );
    wait_for_eq!(h.mgr.fsm_count(), 1);
    assert_eq!(h.mgr.fsm_direction(0), Some(ConnectionDirection::Outbound));

    establish(&h, &out, peer_id);
    let ev = expect_event(&h.events, |e| {
        matches!(e, SupervisorEvent::PeerAttributes(_))
    });
    if let SupervisorEvent::PeerAttributes(attrs) = ev {
        assert_eq!(attrs.router_id, peer_id);
        assert_eq!(attrs.asn, REMOTE_ASN);
        assert_eq!(attrs.hold_time, Duration::from_secs(30));
        assert_eq!(attrs.keepalive_time, Duration::from_secs(10));
    }
    expect_event(&h.events, |e| {
        matches!(e, SupervisorEvent::ConnectionEstablished { id: 0, .. })
    });
}

#[test]
fn collision_local_id_lower_keeps_inbound() {
    let local_id = Ipv4Addr::new(10, 0, 0, 1);
    let peer_id = Ipv4Addr::new(10, 0, 0, 2);
    let h = harness(local_id, "127.0.11.1:179", "127.0.11.2:179", true);

    let out = outbound_open_sent(&h);
    let inb = inbound_open_sent(&h);
    wait_for_eq!(h.mgr.fsm_state(1), Some(FsmStateKind::OpenSent));

    inb.send(open_from(peer_id)).expect("send open");
    assert_eq!(
        expect_notification(&out),
        NotificationMessage::cease(
            CeaseErrorSubcode::ConnectionCollisionResolution
        )
    );
    inb.recv_kind("keepalive", TIMEOUT).expect("keepalive");
    wait_for_eq!(h.mgr.fsm_count(), 1);
    wait_for_eq!(h.mgr.fsm_state(1), Some(FsmStateKind::OpenConfirm));
    assert_eq!(h.mgr.fsm_state(0), None);
}

#[test]
fn established_connection_wins_collision() {
    let local_id = Ipv4Addr::new(10, 0, 0, 1);
    let peer_id = Ipv4Addr::new(10, 0, 0, 2);
    let h = harness(local_id, "127.0.12.1:179", "127.0.12.2:179", true);

    let out = outbound_open_sent(&h);
    establish(&h, &out, peer_id);

    // The peer's id is higher, but the established session still wins.
    let inb = inbound_open_sent(&h);
    wait_for_eq!(h.mgr.fsm_count(), 2);
    inb.send(open_from(peer_id)).expect("send open");
    assert_eq!(
        expect_notification(&inb),
        NotificationMessage::cease(
            CeaseErrorSubcode::ConnectionCollisionResolution
        )
    );
    wait_for_eq!(h.mgr.fsm_count(), 1);
    assert_eq!(h.mgr.active(), Some(0));
    assert_eq!(h.mgr.fsm_state(0), Some(FsmStateKind::Established));
}

#[test]
fn equal_router_ids_are_rejected() {
    let local_id = Ipv4Addr::new(10, 0, 0, 7);
    let h = harness(local_id, "127.0.13.1:179", "127.0.13.2:179", true);

    let _out = outbound_open_sent(&h);
    let inb = inbound_open_sent(&h);
    wait_for_eq!(h.mgr.fsm_state(1), Some(FsmStateKind::OpenSent));

    let open = OpenMessage::new4(REMOTE_ASN, 30, u32::from(local_id));
    let result = h.mgr.received_open(
        1,
        ConnectionDirection::Inbound,
        &open,
        Duration::from_secs(30),
        Duration::from_secs(10),
    );
    assert!(matches!(
        result,
        Err(Error::DuplicateRouterId(id)) if id == local_id
    ));
    assert_eq!(h.mgr.fsm_count(), 2);

    inb.send(open.into()).expect("send open");
    let n = expect_notification(&inb);
    assert_eq!(n.error_code, ErrorCode::Open);
}

#[test]
fn accept_rules() {
    let h = harness(
        Ipv4Addr::new(10, 0, 0, 1),
        "127.0.14.1:179",
        "127.0.14.2:179",
        false,
    );

    let (remote, local) = BgpConnectionChannel::pair(h.peer, h.local);
    assert!(matches!(
        h.mgr.accept(local),
        Err(Error::ConnectionRefused(_))
    ));
    assert!(matches!(remote.recv(TIMEOUT), Err(Error::Disconnected)));

    h.mgr.accept_connections();
    let _inb = inbound_open_sent(&h);
    wait_for_eq!(h.mgr.fsm_state(0), Some(FsmStateKind::OpenSent));
    assert_eq!(h.mgr.fsm_direction(0), Some(ConnectionDirection::Inbound));

    let (_remote, local) = BgpConnectionChannel::pair(h.peer, h.local);
    assert!(matches!(
        h.mgr.accept(local),
        Err(Error::ConnectionRefused(_))
    ));
    assert_eq!(h.mgr.fsm_count(), 1);
}

#[test]
fn tcp_failure_closes_only_the_spare_machine() {
    let peer_id = Ipv4Addr::new(10, 0, 0, 2);
    let h = harness(
        Ipv4Addr::new(10, 0, 0, 1),
        "127.0.15.1:179",
        "127.0.15.2:179",
        true,
    );

    h.mgr.tcp_conn_failed(0);
    assert_eq!(h.mgr.fsm_count(), 1);

    let out = outbound_open_sent(&h);
    establish(&h, &out, peer_id);
    let _inb = inbound_open_sent(&h);
    wait_for_eq!(h.mgr.fsm_count(), 2);

    h.mgr.tcp_conn_failed(0);
    assert_eq!(h.mgr.fsm_count(), 2);
    assert_eq!(h.mgr.active(), Some(0));

    h.mgr.tcp_conn_failed(1);
    assert_eq!(h.mgr.fsm_count(), 1);
    assert_eq!(h.mgr.fsm_state(1), None);
}

#[test]
fn updates_flow_through_the_active_machine() {
    let peer_id = Ipv4Addr::new(10, 0, 0, 2);
    let h = harness(
        Ipv4Addr::new(10, 0, 0, 1),
        "127.0.16.1:179",
        "127.0.16.2:179",
        true,
    );

    let update = UpdateMessage {
        nlri: vec!["198.51.100.0/24".parse().expect("prefix")],
        ..Default::default()
    };
    assert!(matches!(
        h.mgr.send_update(update.clone()),
        Err(Error::NoActiveFsm)
    ));

    let out = outbound_open_sent(&h);
    establish(&h, &out, peer_id);
    h.mgr.send_update(update.clone()).expect("send update");
    assert_eq!(
        out.recv_kind("update", TIMEOUT).expect("update"),
        Message::Update(update.clone())
    );

    out.send(update.clone().into()).expect("send update");
    let ev = expect_event(&h.events, |e| {
        matches!(e, SupervisorEvent::Update { .. })
    });
    if let SupervisorEvent::Update { update: received, .. } = ev {
        assert_eq!(received, update);
    }
}

#[test]
fn only_the_active_machine_reports_state() {
    let peer_id = Ipv4Addr::new(10, 0, 0, 2);
    let h = harness(
        Ipv4Addr::new(10, 0, 0, 1),
        "127.0.17.1:179",
        "127.0.17.2:179",
        true,
    );

    let out = outbound_open_sent(&h);
    establish(&h, &out, peer_id);
    expect_event(&h.events, |e| {
        matches!(
            e,
            SupervisorEvent::StateChange {
                state: FsmStateKind::Established,
                ..
            }
        )
    });

    let _inb = inbound_open_sent(&h);
    wait_for_eq!(h.mgr.fsm_state(1), Some(FsmStateKind::OpenSent));
    sleep(Duration::from_millis(100));
    let reported: Vec<FsmStateKind> = h
        .events
        .try_iter()
        .filter_map(|e| match e {
            SupervisorEvent::StateChange { state, .. } => Some(state),
            _ => None,
        })
        .collect();
    assert_eq!(reported, Vec::<FsmStateKind>::new());
}

#[test]
fn stop_and_cleanup() {
    let peer_id = Ipv4Addr::new(10, 0, 0, 2);
    let h = harness(
        Ipv4Addr::new(10, 0, 0, 1),
        "127.0.18.1:179",
        "127.0.18.2:179",
        true,
    );

    let out = outbound_open_sent(&h);
    establish(&h, &out, peer_id);

    h.mgr.stop_fsm("peer deconfigured");
    assert_eq!(h.mgr.active(), None);
    expect_event(&h.events, |e| {
        matches!(e, SupervisorEvent::ConnectionBroken { id: 0, .. })
    });
    wait_for_eq!(h.mgr.fsm_state(0), Some(FsmStateKind::Idle));
    assert!(matches!(out.recv_kind("open", TIMEOUT), Err(Error::Disconnected)));

    h.mgr.cleanup();
    assert_eq!(h.mgr.fsm_count(), 0);
    h.mgr.command(Command::ManualStart);
    assert_eq!(h.mgr.fsm_count(), 0);
}

#[test]
fn slow_supervisor_loses_no_events() {
    let peer_id = Ipv4Addr::new(10, 0, 0, 2);
    let Harness {
        mgr,
        events,
        listener,
        ..
    } = harness_with_queue(
        Ipv4Addr::new(10, 0, 0, 1),
        "127.0.20.1:179",
        "127.0.20.2:179",
        true,
        1,
    );

    // Read far slower than the machine produces, with room for one event.
    let drain = spawn(move || {
        let mut seen = Vec::new();
        loop {
            sleep(Duration::from_millis(20));
            let Ok(ev) = events.recv_timeout(TIMEOUT) else {
                break;
            };
            let done = matches!(
                ev,
                SupervisorEvent::StateChange {
                    state: FsmStateKind::Established,
                    ..
                }
            );
            seen.push(ev);
            if done {
                break;
            }
        }
        seen
    });

    mgr.command(Command::ManualStart);
    let remote = listener.accept(TIMEOUT).expect("outbound connection");
    remote.recv_kind("open", TIMEOUT).expect("open");
    remote.send(open_from(peer_id)).expect("send open");
    remote.recv_kind("keepalive", TIMEOUT).expect("keepalive");
    remote.send(Message::KeepAlive).expect("send keepalive");
    wait_for_eq!(mgr.active(), Some(0));

    let seen = drain.join().expect("drain thread");
    let attrs = seen
        .iter()
        .filter(|e| matches!(e, SupervisorEvent::PeerAttributes(_)))
        .count();
    let established = seen
        .iter()
        .filter(|e| {
            matches!(e, SupervisorEvent::ConnectionEstablished { id: 0, .. })
        })
        .count();
    assert_eq!((attrs, established), (1, 1));

    let states: Vec<FsmStateKind> = seen
        .iter()
        .filter_map(|e| match e {
            SupervisorEvent::StateChange { state, .. } => Some(*state),
            _ => None,
        })
        .collect();
    assert_eq!(states.first(), Some(&FsmStateKind::Connect));
    assert!(states.ends_with(&[
        FsmStateKind::OpenSent,
        FsmStateKind::OpenConfirm,
        FsmStateKind::Established,
    ]));
}

struct AcceptLoop {
    shutdown: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl AcceptLoop {
    fn run(
        listener: Listener,
        mgr: Arc<FsmManager<BgpConnectionChannel>>,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = shutdown.clone();
        let handle = spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                if let Ok(conn) = listener.accept(Duration::from_millis(50)) {
                    let _ = mgr.accept(conn);
                }
            }
        });
        Self { shutdown, handle }
    }

    fn stop(self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.handle.join().expect("accept loop");
    }
}

fn router(
    id: Ipv4Addr,
    local: SocketAddr,
    peer: SocketAddr,
    passive: bool,
) -> (Arc<FsmManager<BgpConnectionChannel>>, Receiver<Event>) {
    let (tx, rx) = sync_channel(256);
    let mgr = FsmManager::new(
        RouterConfig {
            asn: Asn::TwoOctet(65000 + u16::from(id.octets()[3])),
            id,
        },
        peer_config(peer, passive, true),
        Arc::new(ChannelConnector { local }),
        tx,
        init_logger(),
    )
    .expect("manager");
    (Arc::new(mgr), rx)
}

#[test]
fn two_routers_peer() {
    let a_addr: SocketAddr = sockaddr!("127.0.19.1:179");
    let b_addr: SocketAddr = sockaddr!("127.0.19.2:179");
    let a_listener = Listener::bind(a_addr);
    let b_listener = Listener::bind(b_addr);

    let (a, _a_events) =
        router(Ipv4Addr::new(10, 0, 0, 1), a_addr, b_addr, false);
    let (b, b_events) =
        router(Ipv4Addr::new(10, 0, 0, 2), b_addr, a_addr, true);
    let a_accept = AcceptLoop::run(a_listener, a.clone());
    let b_accept = AcceptLoop::run(b_listener, b.clone());

    wait_for_eq!(a.fsm_state(0), Some(FsmStateKind::Active));
    wait_for_eq!(b.fsm_state(0), Some(FsmStateKind::Active));
    a.command(Command::ManualStart);

    wait_for_eq!(a.active(), Some(0));
    wait_for_eq!(b.active(), Some(0));
    let id: FsmId = 0;
    assert_eq!(a.fsm_direction(id), Some(ConnectionDirection::Outbound));
    assert_eq!(b.fsm_direction(id), Some(ConnectionDirection::Inbound));

    let update = UpdateMessage {
        nlri: vec!["203.0.113.0/24".parse().expect("prefix")],
        ..Default::default()
    };
    a.send_update(update.clone()).expect("send update");
    let ev = expect_event(&b_events, |e| {
        matches!(e, SupervisorEvent::Update { .. })
    });
    if let SupervisorEvent::Update { update: received, peer } = ev {
        assert_eq!(received, update);
        assert_eq!(peer, a_addr);
    }

    a_accept.stop();
    b_accept.stop();
    a.cleanup();
    wait_for_eq!(b.active(), None);
}
