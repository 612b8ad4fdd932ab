// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The RFC 4271 peer state machine for a single connection. Each machine runs
//! on its own thread and is driven entirely by its event inbox: commands
//! from the manager, timer expirations, connection lifecycle notices and
//! received messages. Decisions that involve the other connection to the
//! same peer are delegated to the [`crate::manager`].

use crate::config::Asn;
use crate::connection::{BgpConnection, ConnectionDirection};
use crate::error::Error;
use crate::log::fsm_log;
use crate::manager::Shared;
use crate::messages::{
    CeaseErrorSubcode, Message, MessageType, NotificationMessage,
    OpenErrorSubcode, OpenMessage, BGP4,
};
use mg_common::clock::{Clock, Timer};
use mg_common::{read_lock, write_lock};
use slog::Logger;
use std::fmt::{self, Display, Formatter};
use std::net::SocketAddr;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, RwLock};
use std::thread::Builder;
use std::time::Duration;

const UNIT_FSM: &str = "fsm";

/// Hold time used while waiting for the peer's open message.
///
/// Ref: RFC 4271 §8.2.2
pub const OPEN_HOLD_TIME: Duration = Duration::from_secs(240);

/// Identifies one of the (at most two) machines the manager runs for a peer.
pub type FsmId = u8;

/// The id a second connection to the same peer is given.
pub fn complement(id: FsmId) -> FsmId {
    (id + 1) % 2
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FsmStateKind {
    /// Refuse all incoming connections. No resources allocated to the peer.
    Idle,

    /// Waiting for an outbound TCP connection to complete.
    Connect,

    /// Listening for and accepting a TCP connection from the peer.
    Active,

    /// Waiting for an open message from the peer.
    OpenSent,

    /// Waiting for a keepalive or notification from the peer.
    OpenConfirm,

    /// Able to exchange update, notification and keepalive messages.
    Established,
}

impl Display for FsmStateKind {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            FsmStateKind::Idle => write!(f, "idle"),
            FsmStateKind::Connect => write!(f, "connect"),
            FsmStateKind::Active => write!(f, "active"),
            FsmStateKind::OpenSent => write!(f, "open sent"),
            FsmStateKind::OpenConfirm => write!(f, "open confirm"),
            FsmStateKind::Established => write!(f, "established"),
        }
    }
}

pub enum FsmEvent<Cnx: BgpConnection> {
    /// Local system administrator manually starts the peer connection.
    ManualStart,

    /// Local system administrator manually stops the peer connection.
    ManualStop,

    /// Start the peer connection, but listen for the peer to connect before
    /// trying to connect out.
    PassiveManualStart,

    ConnectRetryTimerExpires,
    HoldTimerExpires,
    KeepaliveTimerExpires,
    IdleHoldTimerExpires,

    /// The peer connected to us.
    InboundConnection(Cnx),

    /// An outbound connection attempt completed.
    Connected(Cnx),

    /// The transport failed or an outbound attempt did not complete.
    TcpConnectionFails,

    /// A message arrived from the peer.
    Message(Message),

    /// Send a message to the peer. Only honored when established.
    Transmit(Message),

    /// Tear down and exit, telling an open peer why.
    Close(CeaseErrorSubcode),
}

impl<Cnx: BgpConnection> FsmEvent<Cnx> {
    pub fn title(&self) -> &'static str {
        match self {
            Self::ManualStart => "manual start",
            Self::ManualStop => "manual stop",
            Self::PassiveManualStart => "passive manual start",
            Self::ConnectRetryTimerExpires => "connect retry timer expires",
            Self::HoldTimerExpires => "hold timer expires",
            Self::KeepaliveTimerExpires => "keepalive timer expires",
            Self::IdleHoldTimerExpires => "idle hold timer expires",
            Self::InboundConnection(_) => "inbound connection",
            Self::Connected(_) => "connected",
            Self::TcpConnectionFails => "tcp connection fails",
            Self::Message(_) => "message",
            Self::Transmit(_) => "transmit",
            Self::Close(_) => "close",
        }
    }
}

impl<Cnx: BgpConnection> fmt::Debug for FsmEvent<Cnx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message(m) => write!(f, "message {m:?}"),
            Self::Transmit(m) => write!(f, "transmit {m:?}"),
            Self::InboundConnection(c) | Self::Connected(c) => {
                write!(f, "{} {} {}", self.title(), c.direction(), c.peer())
            }
            _ => write!(f, "{}", self.title()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum FsmTimer {
    ConnectRetry,
    Hold,
    Keepalive,
    IdleHold,
}

impl<Cnx: BgpConnection> From<FsmTimer> for FsmEvent<Cnx> {
    fn from(t: FsmTimer) -> Self {
        match t {
            FsmTimer::ConnectRetry => FsmEvent::ConnectRetryTimerExpires,
            FsmTimer::Hold => FsmEvent::HoldTimerExpires,
            FsmTimer::Keepalive => FsmEvent::KeepaliveTimerExpires,
            FsmTimer::IdleHold => FsmEvent::IdleHoldTimerExpires,
        }
    }
}

/// The part of a state machine the manager looks at from other threads.
#[derive(Debug)]
pub struct FsmShared {
    state: RwLock<FsmStateKind>,
    direction: RwLock<Option<ConnectionDirection>>,
}

impl FsmShared {
    fn new(state: FsmStateKind) -> Self {
        Self {
            state: RwLock::new(state),
            direction: RwLock::new(None),
        }
    }

    pub fn state(&self) -> FsmStateKind {
        *read_lock!(self.state)
    }

    /// Direction of the connection the machine currently holds.
    pub fn direction(&self) -> Option<ConnectionDirection> {
        *read_lock!(self.direction)
    }
}

/// Negotiated hold and keepalive times. A zero hold time disables both.
///
/// Ref: RFC 4271 §4.2
pub fn negotiate(local: Duration, remote_secs: u16) -> (Duration, Duration) {
    let hold = local.min(Duration::from_secs(u64::from(remote_secs)));
    (hold, hold / 3)
}

/// How the manager reaches a running machine.
pub(crate) struct FsmHandle<Cnx: BgpConnection> {
    pub(crate) event_tx: Sender<FsmEvent<Cnx>>,
    pub(crate) shared: Arc<FsmShared>,
}

impl<Cnx: BgpConnection> FsmHandle<Cnx> {
    pub(crate) fn spawn(
        id: FsmId,
        initial: FsmStateKind,
        manager: Arc<Shared<Cnx>>,
    ) -> Result<Self, Error> {
        let (event_tx, event_rx) = channel();
        let shared = Arc::new(FsmShared::new(initial));
        let runner = FsmRunner::new(
            id,
            manager.clone(),
            shared.clone(),
            event_tx.clone(),
        );
        Builder::new()
            .name(format!("bgp-fsm-{}-{id}", manager.peer))
            .spawn(move || runner.run(event_rx, initial))?;
        Ok(Self { event_tx, shared })
    }
}

struct FsmTimers {
    connect_retry: Timer,
    hold: Timer,
    keepalive: Timer,
    idle_hold: Timer,
}

struct FsmRunner<Cnx: BgpConnection> {
    id: FsmId,
    peer: SocketAddr,
    manager: Arc<Shared<Cnx>>,
    shared: Arc<FsmShared>,
    event_tx: Sender<FsmEvent<Cnx>>,
    timers: FsmTimers,
    conn: Option<Cnx>,
    passive: bool,
    stopped: bool,
    log: Logger,
}

impl<Cnx: BgpConnection> FsmRunner<Cnx> {
    fn new(
        id: FsmId,
        manager: Arc<Shared<Cnx>>,
        shared: Arc<FsmShared>,
        event_tx: Sender<FsmEvent<Cnx>>,
    ) -> Self {
        let config = &manager.config;
        let timers = FsmTimers {
            connect_retry: Timer::one_shot(config.connect_retry()),
            hold: Timer::one_shot(OPEN_HOLD_TIME),
            keepalive: Timer::new(config.keepalive()),
            idle_hold: Timer::one_shot(config.idle_hold_time()),
        };
        Self {
            id,
            peer: manager.peer,
            passive: config.passive,
            log: manager.log.clone(),
            manager,
            shared,
            event_tx,
            timers,
            conn: None,
            stopped: false,
        }
    }

    fn run(
        mut self,
        event_rx: Receiver<FsmEvent<Cnx>>,
        initial: FsmStateKind,
    ) {
        let _clock = Clock::new(
            self.manager.config.resolution(),
            vec![
                (self.timers.connect_retry.clone(), FsmTimer::ConnectRetry),
                (self.timers.hold.clone(), FsmTimer::Hold),
                (self.timers.keepalive.clone(), FsmTimer::Keepalive),
                (self.timers.idle_hold.clone(), FsmTimer::IdleHold),
            ],
            self.event_tx.clone(),
            self.log.clone(),
        );

        fsm_log!(self, info, "starting peer state machine in {initial}");
        if initial == FsmStateKind::Active {
            self.timers.connect_retry.restart();
        }

        let mut current = initial;
        while let Ok(event) = event_rx.recv() {
            fsm_log!(self, trace, "event {:?}", event;
                "state" => current.to_string()
            );
            let next = match event {
                FsmEvent::Close(reason) => {
                    self.teardown(current, reason);
                    break;
                }
                e => self.handle(current, e),
            };
            if next != current {
                self.transition(current, next);
                current = next;
            }
        }
        fsm_log!(self, info, "peer state machine exiting");
    }

    fn handle(
        &mut self,
        current: FsmStateKind,
        event: FsmEvent<Cnx>,
    ) -> FsmStateKind {
        let event = match event {
            FsmEvent::InboundConnection(c) | FsmEvent::Connected(c) => {
                return self.on_connection(current, c);
            }
            FsmEvent::Transmit(msg) if current != FsmStateKind::Established => {
                fsm_log!(self, warn, "dropping {} in {current}", msg.title());
                return current;
            }
            e => e,
        };
        match current {
            FsmStateKind::Idle => self.on_idle(event),
            FsmStateKind::Connect => self.on_connect(event),
            FsmStateKind::Active => self.on_active(event),
            FsmStateKind::OpenSent => self.on_open_sent(event),
            FsmStateKind::OpenConfirm => self.on_open_confirm(event),
            FsmStateKind::Established => self.on_established(event),
        }
    }

    fn on_connection(
        &mut self,
        current: FsmStateKind,
        c: Cnx,
    ) -> FsmStateKind {
        match current {
            FsmStateKind::Idle => {
                fsm_log!(self, info, "refusing connection in idle";
                    "direction" => c.direction().to_string()
                );
                c.close();
                current
            }
            FsmStateKind::Connect | FsmStateKind::Active => {
                match self.open_connection(c) {
                    Ok(()) => FsmStateKind::OpenSent,
                    Err(e) => {
                        fsm_log!(self, warn, "failed to open connection: {e}");
                        self.release_connection();
                        self.timers.connect_retry.restart();
                        FsmStateKind::Active
                    }
                }
            }
            // A connection that arrives while one is already held belongs
            // to the other machine for this peer.
            _ => {
                let direction = c.direction();
                if let Err(e) =
                    self.manager.new_connection(self.id, direction, c)
                {
                    fsm_log!(self, warn, "no machine for connection: {e}";
                        "direction" => direction.to_string()
                    );
                }
                current
            }
        }
    }

    fn on_idle(&mut self, event: FsmEvent<Cnx>) -> FsmStateKind {
        match event {
            FsmEvent::ManualStart => {
                self.stopped = false;
                self.initiate_connect();
                FsmStateKind::Connect
            }
            FsmEvent::PassiveManualStart => {
                self.stopped = false;
                self.passive = true;
                self.timers.connect_retry.restart();
                FsmStateKind::Active
            }
            FsmEvent::IdleHoldTimerExpires => self.automatic_start(),
            other => {
                fsm_log!(self, debug, "{} ignored in idle", other.title());
                FsmStateKind::Idle
            }
        }
    }

    fn on_connect(&mut self, event: FsmEvent<Cnx>) -> FsmStateKind {
        match event {
            FsmEvent::ConnectRetryTimerExpires => {
                self.initiate_connect();
                FsmStateKind::Connect
            }
            FsmEvent::TcpConnectionFails => {
                self.timers.connect_retry.restart();
                self.manager.tcp_conn_failed(self.id);
                FsmStateKind::Active
            }
            FsmEvent::ManualStop => {
                self.stopped = true;
                FsmStateKind::Idle
            }
            other => {
                fsm_log!(self, debug, "{} ignored in connect", other.title());
                FsmStateKind::Connect
            }
        }
    }

    fn on_active(&mut self, event: FsmEvent<Cnx>) -> FsmStateKind {
        match event {
            FsmEvent::ManualStart => {
                self.passive = self.manager.config.passive;
                self.initiate_connect();
                FsmStateKind::Connect
            }
            FsmEvent::ConnectRetryTimerExpires => {
                if self.manager.config.passive {
                    self.timers.connect_retry.restart();
                    return FsmStateKind::Active;
                }
                self.initiate_connect();
                FsmStateKind::Connect
            }
            FsmEvent::TcpConnectionFails => {
                self.manager.tcp_conn_failed(self.id);
                FsmStateKind::Idle
            }
            FsmEvent::ManualStop => {
                self.stopped = true;
                FsmStateKind::Idle
            }
            other => {
                fsm_log!(self, debug, "{} ignored in active", other.title());
                FsmStateKind::Active
            }
        }
    }

    fn on_open_sent(&mut self, event: FsmEvent<Cnx>) -> FsmStateKind {
        match event {
            FsmEvent::Message(Message::Open(om)) => self.on_open(om),
            FsmEvent::Message(Message::Notification(n)) => {
                fsm_log!(self, warn, "notification received: {n:?}");
                FsmStateKind::Idle
            }
            FsmEvent::Message(m) => {
                fsm_log!(self, warn, "unexpected {} in open sent", m.title());
                self.send(NotificationMessage::fsm_error().into());
                FsmStateKind::Idle
            }
            FsmEvent::HoldTimerExpires => {
                self.send(NotificationMessage::hold_timer_expired().into());
                FsmStateKind::Idle
            }
            FsmEvent::TcpConnectionFails => {
                self.release_connection();
                self.timers.connect_retry.restart();
                self.manager.tcp_conn_failed(self.id);
                FsmStateKind::Active
            }
            FsmEvent::ManualStop => self.manual_stop(),
            other => {
                fsm_log!(self, debug, "{} ignored in open sent", other.title());
                FsmStateKind::OpenSent
            }
        }
    }

    fn on_open_confirm(&mut self, event: FsmEvent<Cnx>) -> FsmStateKind {
        match event {
            FsmEvent::Message(Message::KeepAlive) => {
                self.restart_hold();
                FsmStateKind::Established
            }
            FsmEvent::Message(Message::Notification(n)) => {
                fsm_log!(self, warn, "notification received: {n:?}");
                FsmStateKind::Idle
            }
            FsmEvent::KeepaliveTimerExpires => {
                self.send(Message::KeepAlive);
                FsmStateKind::OpenConfirm
            }
            FsmEvent::HoldTimerExpires => {
                self.send(NotificationMessage::hold_timer_expired().into());
                FsmStateKind::Idle
            }
            FsmEvent::TcpConnectionFails => {
                self.manager.tcp_conn_failed(self.id);
                FsmStateKind::Idle
            }
            FsmEvent::ManualStop => self.manual_stop(),
            other => {
                fsm_log!(self, debug, "{} ignored", other.title();
                    "state" => "open confirm"
                );
                FsmStateKind::OpenConfirm
            }
        }
    }

    fn on_established(&mut self, event: FsmEvent<Cnx>) -> FsmStateKind {
        match event {
            FsmEvent::Message(Message::KeepAlive) => {
                self.restart_hold();
                FsmStateKind::Established
            }
            FsmEvent::Message(Message::Update(u)) => {
                self.restart_hold();
                self.manager.received_update(self.id, u);
                FsmStateKind::Established
            }
            FsmEvent::Message(Message::Notification(n)) => {
                fsm_log!(self, warn, "notification received: {n:?}");
                FsmStateKind::Idle
            }
            FsmEvent::Message(Message::Open(_)) => {
                fsm_log!(self, warn, "open received while established");
                FsmStateKind::Established
            }
            FsmEvent::KeepaliveTimerExpires => {
                self.send(Message::KeepAlive);
                FsmStateKind::Established
            }
            FsmEvent::Transmit(msg) => {
                let Some(conn) = &self.conn else {
                    return FsmStateKind::Idle;
                };
                match conn.send(msg) {
                    Ok(()) => {
                        if self.timers.keepalive.enabled() {
                            self.timers.keepalive.reset();
                        }
                        FsmStateKind::Established
                    }
                    Err(e) => {
                        fsm_log!(self, warn, "send failed: {e}");
                        FsmStateKind::Idle
                    }
                }
            }
            FsmEvent::HoldTimerExpires => {
                fsm_log!(self, warn, "hold timer expired");
                self.send(NotificationMessage::hold_timer_expired().into());
                FsmStateKind::Idle
            }
            FsmEvent::TcpConnectionFails => {
                self.manager.tcp_conn_failed(self.id);
                FsmStateKind::Idle
            }
            FsmEvent::ManualStop => self.manual_stop(),
            other => {
                fsm_log!(self, debug, "{} ignored", other.title();
                    "state" => "established"
                );
                FsmStateKind::Established
            }
        }
    }

    fn on_open(&mut self, om: OpenMessage) -> FsmStateKind {
        if om.version != BGP4 {
            fsm_log!(self, warn, "unsupported version {}", om.version);
            self.send(
                NotificationMessage::open_error(
                    OpenErrorSubcode::UnsupportedVersionNumber,
                )
                .into(),
            );
            return FsmStateKind::Idle;
        }
        // Hold times of one and two seconds are not allowed.
        if om.hold_time == 1 || om.hold_time == 2 {
            self.send(
                NotificationMessage::open_error(
                    OpenErrorSubcode::UnacceptableHoldTime,
                )
                .into(),
            );
            return FsmStateKind::Idle;
        }

        let Some(direction) = self.shared.direction() else {
            return FsmStateKind::Idle;
        };
        let (hold, keepalive) =
            negotiate(self.manager.config.hold_time(), om.hold_time);

        match self
            .manager
            .received_open(self.id, direction, &om, hold, keepalive)
        {
            Ok(true) => {
                self.send(Message::KeepAlive);
                self.timers.hold.set_interval(hold);
                self.timers.keepalive.set_interval(keepalive);
                if hold.is_zero() {
                    self.timers.hold.disable();
                    self.timers.keepalive.disable();
                } else {
                    self.timers.hold.restart();
                    self.timers.keepalive.restart();
                }
                FsmStateKind::OpenConfirm
            }
            Ok(false) => {
                fsm_log!(self, info, "lost collision resolution";
                    "direction" => direction.to_string()
                );
                self.send(
                    NotificationMessage::cease(
                        CeaseErrorSubcode::ConnectionCollisionResolution,
                    )
                    .into(),
                );
                FsmStateKind::Idle
            }
            Err(e) => {
                fsm_log!(self, warn, "open rejected: {e}");
                self.send(
                    NotificationMessage::open_error(
                        OpenErrorSubcode::BadBgpIdentifier,
                    )
                    .into(),
                );
                FsmStateKind::Idle
            }
        }
    }

    fn manual_stop(&mut self) -> FsmStateKind {
        self.stopped = true;
        self.send(
            NotificationMessage::cease(
                CeaseErrorSubcode::AdministrativeShutdown,
            )
            .into(),
        );
        FsmStateKind::Idle
    }

    fn automatic_start(&mut self) -> FsmStateKind {
        if self.passive {
            self.timers.connect_retry.restart();
            FsmStateKind::Active
        } else {
            self.initiate_connect();
            FsmStateKind::Connect
        }
    }

    fn initiate_connect(&mut self) {
        self.timers.connect_retry.restart();
        self.manager.connector.connect(
            self.peer,
            self.manager.config.connect_retry(),
            self.event_tx.clone(),
        );
    }

    fn open_connection(&mut self, conn: Cnx) -> Result<(), Error> {
        *write_lock!(self.shared.direction) = Some(conn.direction());
        self.conn = Some(conn.clone());
        conn.start_recv(self.event_tx.clone())?;
        self.timers.connect_retry.disable();
        conn.send(self.open_message().into())?;
        self.timers.hold.set_interval(OPEN_HOLD_TIME);
        self.timers.hold.restart();
        Ok(())
    }

    fn open_message(&self) -> OpenMessage {
        let config = &self.manager.config;
        let hold = u16::try_from(config.hold_time).unwrap_or(u16::MAX);
        let id = self.manager.router.id_u32();
        match self.manager.router.asn {
            Asn::FourOctet(asn) => OpenMessage::new4(asn, hold, id),
            Asn::TwoOctet(asn) => OpenMessage::new2(asn, hold, id),
        }
    }

    fn restart_hold(&self) {
        if !self.timers.hold.interval().is_zero() {
            self.timers.hold.restart();
        }
    }

    fn send(&self, msg: Message) {
        let Some(conn) = &self.conn else {
            return;
        };
        fsm_log!(self, debug, "sending {}", msg.title();
            "message_type" => MessageType::from(&msg) as u8
        );
        if let Err(e) = conn.send(msg) {
            fsm_log!(self, warn, "send failed: {e}");
        }
    }

    fn release_connection(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.close();
        }
        *write_lock!(self.shared.direction) = None;
    }

    fn transition(&mut self, from: FsmStateKind, to: FsmStateKind) {
        *write_lock!(self.shared.state) = to;
        fsm_log!(self, info, "{from} -> {to}");

        if from == FsmStateKind::Established {
            self.manager.broken(self.id);
        }
        if to == FsmStateKind::Established {
            if let Some(conn) = &self.conn {
                self.manager.established(self.id, conn.clone());
            }
        }
        if to == FsmStateKind::Idle {
            self.release_connection();
            self.timers.connect_retry.disable();
            self.timers.hold.disable();
            self.timers.keepalive.disable();
            if !self.stopped {
                self.timers.idle_hold.restart();
            }
        }
        self.manager.state_change(self.id, to);
    }

    fn teardown(&mut self, current: FsmStateKind, reason: CeaseErrorSubcode) {
        if current >= FsmStateKind::OpenSent {
            self.send(NotificationMessage::cease(reason).into());
        }
        if current == FsmStateKind::Established {
            self.manager.broken(self.id);
        }
        self.release_connection();
    }
}
