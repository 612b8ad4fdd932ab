// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A single BFD session.
//!
//! The protocol state lives in a [`SessionStatus`] shared between two
//! threads. The receiver thread consumes the session inbox and runs the
//! RFC 5880 §6.8.6 reception rules along with the detection timer. The
//! sender thread transmits periodic control packets until it is stopped or
//! the transport fails, in which case the directory is told so it can
//! retry later.

use crate::directory::{DirectoryConfig, LifecycleEvent};
use crate::error::Error;
use crate::log::session_log;
use crate::packet::{Auth, AuthData, Control, State};
use crate::{AuthParams, Diag, Owner, OwnerSet, SessionParams, SessionState};
use chrono::{DateTime, Utc};
use mg_common::clock::{Clock, Timer};
use mg_common::lock;
use mg_common::net::MacAddr;
use rand::Rng;
use slog::Logger;
use std::net::IpAddr;
use std::sync::mpsc::{
    channel, Receiver, RecvTimeoutError, Sender, SyncSender,
};
use std::sync::{Arc, Mutex};
use std::thread::Builder;
use std::time::Duration;

const UNIT_SESSION: &str = "session";

/// Where a session's packets go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Egress {
    pub peer: IpAddr,
    pub interface: u32,

    /// Set for per-link sessions over aggregate members.
    pub local_mac: Option<MacAddr>,
    pub remote_mac: Option<MacAddr>,
}

/// Outbound half of the packet transport. Implementations own sockets; the
/// inbound half feeds [`crate::Directory::packet_sender`].
pub trait Transport: Send + Sync {
    fn send_to(&self, egress: &Egress, buf: &[u8]) -> Result<(), Error>;
}

/// Published on every session state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionNotification {
    pub id: u32,
    pub peer: IpAddr,
    pub interface: u32,
    pub owners: OwnerSet,
    pub old: SessionState,
    pub new: SessionState,
    pub diag: Diag,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    Packet(Control),
    DetectionTimeout,
    AdminUp,
    AdminDown,
    Poll,
    Stop,
}

/// Why a received packet was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Discard {
    AuthMismatch,
    UnknownState(u8),
    NoDiscriminator,
    WrongDiscriminator(u32),
    AdminDown,
}

/// Side effects the receiver must carry out for an accepted packet.
#[derive(Debug, Default)]
pub(crate) struct Accepted {
    pub transition: Option<SessionNotification>,
    pub detect: Duration,
    pub respond: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub id: u32,
    pub peer: IpAddr,
    pub interface: u32,
    pub interface_specific: bool,
    pub per_link: bool,
    pub local_mac: Option<MacAddr>,
    pub remote_mac: Option<MacAddr>,
    pub param_name: String,
    pub owners: OwnerSet,

    pub state: SessionState,
    pub diag: Diag,
    pub desired_min_tx: Duration,
    pub required_min_rx: Duration,
    pub detect_multiplier: u8,
    pub demand_mode: bool,
    pub auth: Option<AuthParams>,
    pub auth_sequence: u32,

    pub remote_discriminator: u32,
    pub remote_state: SessionState,
    pub remote_desired_min_tx: Duration,
    pub remote_required_min_rx: Duration,
    pub remote_detect_multiplier: u8,
    pub remote_demand_mode: bool,

    /// Parameters changed and the poll sequence announcing them has not
    /// been answered yet.
    pub param_changed: bool,
    pub poll_active: bool,
    pub sender_active: bool,
    pub last_transition: DateTime<Utc>,
}

impl SessionStatus {
    pub fn new(
        id: u32,
        peer: IpAddr,
        interface: u32,
        params: &SessionParams,
        owner: Owner,
    ) -> Self {
        Self {
            id,
            peer,
            interface,
            interface_specific: false,
            per_link: false,
            local_mac: None,
            remote_mac: None,
            param_name: params.name.clone(),
            owners: owner.into(),
            state: SessionState::Down,
            diag: Diag::None,
            desired_min_tx: params.desired_min_tx,
            required_min_rx: params.required_min_rx,
            detect_multiplier: params.detect_multiplier,
            demand_mode: params.demand_mode,
            auth: params.auth.clone(),
            auth_sequence: rand::thread_rng().gen(),
            remote_discriminator: 0,
            remote_state: SessionState::Down,
            remote_desired_min_tx: Duration::ZERO,
            remote_required_min_rx: Duration::from_micros(1),
            remote_detect_multiplier: 0,
            remote_demand_mode: false,
            param_changed: false,
            poll_active: false,
            sender_active: false,
            last_transition: Utc::now(),
        }
    }

    /// Take on new parameter values. The caller starts the poll sequence.
    pub(crate) fn apply(&mut self, params: &SessionParams) {
        self.desired_min_tx = params.desired_min_tx;
        self.required_min_rx = params.required_min_rx;
        self.detect_multiplier = params.detect_multiplier;
        self.demand_mode = params.demand_mode;
        self.auth = params.auth.clone();
        self.param_changed = true;
    }

    pub fn egress(&self) -> Egress {
        Egress {
            peer: self.peer,
            interface: self.interface,
            local_mac: self.local_mac,
            remote_mac: self.remote_mac,
        }
    }

    /// Detection time in asynchronous mode (RFC 5880 §6.8.4).
    pub fn detection_time(&self) -> Duration {
        let mult = match self.remote_detect_multiplier {
            0 => self.detect_multiplier,
            m => m,
        };
        self.required_min_rx.max(self.remote_desired_min_tx) * u32::from(mult)
    }

    /// Nominal interval between transmitted packets, before jitter.
    pub fn tx_interval(&self, startup: Duration) -> Duration {
        if self.state == SessionState::Up {
            self.desired_min_tx.max(self.remote_required_min_rx)
        } else {
            self.desired_min_tx.max(startup)
        }
    }

    /// Whether periodic transmission is currently allowed.
    pub fn should_transmit(&self) -> bool {
        if self.state == SessionState::AdminDown {
            return false;
        }
        if self.poll_active {
            return true;
        }
        if self.remote_required_min_rx.is_zero() {
            return false;
        }
        !(self.remote_demand_mode
            && self.state == SessionState::Up
            && self.remote_state == SessionState::Up)
    }

    /// Build the next control packet to send. Meticulous authentication
    /// consumes a sequence number.
    pub(crate) fn control(&mut self, startup: Duration, fin: bool) -> Control {
        let up = self.state == SessionState::Up;
        let tx = if up {
            self.desired_min_tx
        } else {
            self.desired_min_tx.max(startup)
        };
        let mut c = Control {
            detect_mult: self.detect_multiplier,
            my_discriminator: self.id,
            your_discriminator: self.remote_discriminator,
            desired_min_tx: micros(tx),
            required_min_rx: micros(self.required_min_rx),
            ..Default::default()
        };
        c.set_state(self.state);
        c.set_diag(self.diag);
        if fin {
            c.set_final();
        } else if self.poll_active {
            c.set_poll();
        }
        if self.demand_mode && up && self.remote_state == SessionState::Up {
            c.set_demand();
        }
        if let Some(auth) = &self.auth {
            c.set_auth(Auth::from_params(auth, self.auth_sequence));
            if auth.auth_type.meticulous() {
                self.auth_sequence = self.auth_sequence.wrapping_add(1);
            }
        }
        c
    }

    fn auth_matches(&self, pkt: &Control) -> bool {
        match (&self.auth, &pkt.auth) {
            (None, None) => !pkt.authentication_present(),
            (Some(mine), Some(theirs)) => {
                if mine.auth_type != theirs.auth_type
                    || mine.key_id != theirs.key_id
                {
                    return false;
                }
                match &theirs.data {
                    AuthData::Password(pw) => pw.as_slice() == mine.key,
                    AuthData::Keyed { .. } => true,
                }
            }
            _ => false,
        }
    }

    /// Apply the reception rules to a packet that passed decoding.
    pub(crate) fn receive(&mut self, pkt: &Control) -> Result<Accepted, Discard> {
        if !self.auth_matches(pkt) {
            return Err(Discard::AuthMismatch);
        }
        let remote = match pkt.state() {
            State::Peer(s) => s,
            State::Unknown(v) => return Err(Discard::UnknownState(v)),
        };
        if pkt.your_discriminator == 0
            && !matches!(remote, SessionState::Down | SessionState::AdminDown)
        {
            return Err(Discard::NoDiscriminator);
        }
        if pkt.your_discriminator != 0 && pkt.your_discriminator != self.id {
            return Err(Discard::WrongDiscriminator(pkt.your_discriminator));
        }

        self.remote_discriminator = pkt.my_discriminator;
        self.remote_state = remote;
        self.remote_demand_mode = pkt.demand();
        self.remote_desired_min_tx = pkt.desired_min_tx();
        self.remote_required_min_rx = pkt.required_min_rx();
        self.remote_detect_multiplier = pkt.detect_mult;

        if pkt.r#final() && self.poll_active {
            self.poll_active = false;
            self.param_changed = false;
        }

        if self.state == SessionState::AdminDown {
            return Err(Discard::AdminDown);
        }

        let next = if remote == SessionState::AdminDown {
            (self.state != SessionState::Down)
                .then_some((SessionState::Down, Diag::NeighborSignaledSessionDown))
        } else {
            match (self.state, remote) {
                (SessionState::Down, SessionState::Down) => {
                    Some((SessionState::Init, Diag::None))
                }
                (SessionState::Down, SessionState::Init)
                | (
                    SessionState::Init,
                    SessionState::Init | SessionState::Up,
                ) => Some((SessionState::Up, Diag::None)),
                (SessionState::Up, SessionState::Down) => Some((
                    SessionState::Down,
                    Diag::NeighborSignaledSessionDown,
                )),
                _ => None,
            }
        };

        Ok(Accepted {
            transition: next.and_then(|(s, d)| self.transition(s, d)),
            detect: self.detection_time(),
            respond: pkt.poll(),
        })
    }

    pub(crate) fn detection_expired(&mut self) -> Option<SessionNotification> {
        self.remote_discriminator = 0;
        self.remote_state = SessionState::Down;
        match self.state {
            SessionState::Init | SessionState::Up => self.transition(
                SessionState::Down,
                Diag::ControlDetectionTimeExpired,
            ),
            _ => None,
        }
    }

    pub(crate) fn admin_down(&mut self) -> Option<SessionNotification> {
        self.transition(SessionState::AdminDown, Diag::AdministrativelyDown)
    }

    pub(crate) fn admin_up(&mut self) -> Option<SessionNotification> {
        if self.state != SessionState::AdminDown {
            return None;
        }
        self.transition(SessionState::Down, Diag::None)
    }

    fn transition(
        &mut self,
        new: SessionState,
        diag: Diag,
    ) -> Option<SessionNotification> {
        let old = self.state;
        if old == new {
            return None;
        }
        self.state = new;
        self.diag = diag;
        self.last_transition = Utc::now();
        Some(SessionNotification {
            id: self.id,
            peer: self.peer,
            interface: self.interface,
            owners: self.owners,
            old,
            new,
            diag,
        })
    }
}

fn micros(d: Duration) -> u32 {
    u32::try_from(d.as_micros()).unwrap_or(u32::MAX)
}

/// Apply RFC 5880 §6.8.7 jitter to a transmit interval.
pub fn jitter(interval: Duration, detect_multiplier: u8) -> Duration {
    let mut rng = rand::thread_rng();
    let pct: u32 = if detect_multiplier == 1 {
        rng.gen_range(75..=90)
    } else {
        rng.gen_range(75..=100)
    };
    interval * pct / 100
}

/// Handle to a running session. Dropping it stops both threads.
pub struct Session {
    pub id: u32,
    pub peer: IpAddr,
    status: Arc<Mutex<SessionStatus>>,
    event_tx: Sender<SessionEvent>,
    sender: Mutex<Option<Sender<()>>>,
    transport: Arc<dyn Transport>,
    lifecycle: Sender<LifecycleEvent>,
    startup_tx: Duration,
    log: Logger,
}

impl Session {
    /// Start the receiver thread for a session. The sender is started
    /// separately with `start_sender`.
    pub(crate) fn new(
        status: SessionStatus,
        transport: Arc<dyn Transport>,
        lifecycle: Sender<LifecycleEvent>,
        notify: Option<SyncSender<SessionNotification>>,
        config: &DirectoryConfig,
        log: Logger,
    ) -> Result<Self, Error> {
        let id = status.id;
        let peer = status.peer;
        let status = Arc::new(Mutex::new(status));
        let (event_tx, event_rx) = channel();

        let runner = SessionRunner {
            id,
            peer,
            status: status.clone(),
            transport: transport.clone(),
            notify,
            startup_tx: config.startup_tx_interval,
            log: log.clone(),
        };
        let resolution = config.timer_resolution;
        let tx = event_tx.clone();
        Builder::new()
            .name(format!("bfd-rx-{id}"))
            .spawn(move || runner.run(event_rx, tx, resolution))?;

        Ok(Self {
            id,
            peer,
            status,
            event_tx,
            sender: Mutex::new(None),
            transport,
            lifecycle,
            startup_tx: config.startup_tx_interval,
            log,
        })
    }

    /// Launch the periodic transmit thread, replacing any running one.
    pub(crate) fn start_sender(&self) -> Result<(), Error> {
        let (stop_tx, stop_rx) = channel();
        let sender = SessionSender {
            id: self.id,
            peer: self.peer,
            status: self.status.clone(),
            transport: self.transport.clone(),
            lifecycle: self.lifecycle.clone(),
            startup_tx: self.startup_tx,
            log: self.log.clone(),
        };
        Builder::new()
            .name(format!("bfd-tx-{}", self.id))
            .spawn(move || sender.run(stop_rx))?;
        if let Some(old) = lock!(self.sender).replace(stop_tx) {
            let _ = old.send(());
        }
        lock!(self.status).sender_active = true;
        Ok(())
    }

    pub(crate) fn stop_sender(&self) {
        if let Some(tx) = lock!(self.sender).take() {
            let _ = tx.send(());
        }
    }

    /// Deliver an event to the receiver thread.
    pub(crate) fn deliver(&self, event: SessionEvent) {
        if let Err(e) = self.event_tx.send(event) {
            session_log!(self, warn, "receiver gone, event dropped: {e}");
        }
    }

    /// Bind the session to new parameter values and start a poll sequence
    /// to announce them.
    pub(crate) fn apply_params(&self, params: &SessionParams) {
        lock!(self.status).apply(params);
        self.deliver(SessionEvent::Poll);
    }

    pub fn status(&self) -> SessionStatus {
        lock!(self.status).clone()
    }

    pub(crate) fn update<F: FnOnce(&mut SessionStatus)>(&self, f: F) {
        f(&mut lock!(self.status))
    }

    pub(crate) fn stop(&self) {
        self.stop_sender();
        let _ = self.event_tx.send(SessionEvent::Stop);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

struct SessionRunner {
    id: u32,
    peer: IpAddr,
    status: Arc<Mutex<SessionStatus>>,
    transport: Arc<dyn Transport>,
    notify: Option<SyncSender<SessionNotification>>,
    startup_tx: Duration,
    log: Logger,
}

impl SessionRunner {
    fn run(
        self,
        rx: Receiver<SessionEvent>,
        tx: Sender<SessionEvent>,
        resolution: Duration,
    ) {
        let detect = Timer::one_shot(lock!(self.status).detection_time());
        // Dropped on every return path, taking the timer thread with it.
        let _clock = Clock::new(
            resolution,
            vec![(detect.clone(), SessionEvent::DetectionTimeout)],
            tx,
            self.log.clone(),
        );

        loop {
            let event = match rx.recv() {
                Ok(e) => e,
                Err(_) => break,
            };
            match event {
                SessionEvent::Packet(pkt) => self.on_packet(&pkt, &detect),
                SessionEvent::DetectionTimeout => {
                    let n = lock!(self.status).detection_expired();
                    if n.is_some() {
                        session_log!(self, info, "detection time expired");
                    }
                    self.publish(n);
                }
                SessionEvent::AdminDown => {
                    detect.disable();
                    let n = lock!(self.status).admin_down();
                    self.publish(n);
                }
                SessionEvent::AdminUp => {
                    let n = lock!(self.status).admin_up();
                    self.publish(n);
                }
                SessionEvent::Poll => {
                    lock!(self.status).poll_active = true;
                }
                SessionEvent::Stop => break,
            }
        }
        detect.disable();
        session_log!(self, debug, "receiver stopped");
    }

    fn on_packet(&self, pkt: &Control, detect: &Timer) {
        let (accepted, response) = {
            let mut st = lock!(self.status);
            match st.receive(pkt) {
                Ok(a) => {
                    let response = a
                        .respond
                        .then(|| (st.egress(), st.control(self.startup_tx, true)));
                    (a, response)
                }
                Err(reason) => {
                    session_log!(self, trace, "discarding packet";
                        "reason" => format_args!("{reason:?}")
                    );
                    return;
                }
            }
        };

        detect.set_interval(accepted.detect);
        detect.enable();

        if let Some((egress, reply)) = response {
            if let Err(e) = self.transport.send_to(&egress, &reply.to_bytes()) {
                session_log!(self, warn, "failed to answer poll: {e}");
            }
        }
        self.publish(accepted.transition);
    }

    fn publish(&self, n: Option<SessionNotification>) {
        let Some(n) = n else {
            return;
        };
        session_log!(self, info, "transition {:?} -> {:?}", n.old, n.new;
            "diag" => format_args!("{:?}", n.diag)
        );
        if let Some(notify) = &self.notify {
            if let Err(e) = notify.send(n) {
                session_log!(self, error, "notification sink gone: {e}");
            }
        }
    }
}

struct SessionSender {
    id: u32,
    peer: IpAddr,
    status: Arc<Mutex<SessionStatus>>,
    transport: Arc<dyn Transport>,
    lifecycle: Sender<LifecycleEvent>,
    startup_tx: Duration,
    log: Logger,
}

impl SessionSender {
    fn run(self, stop: Receiver<()>) {
        loop {
            let delay = {
                let st = lock!(self.status);
                jitter(st.tx_interval(self.startup_tx), st.detect_multiplier)
            };
            match stop.recv_timeout(delay) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    session_log!(self, debug, "sender stopped");
                    return;
                }
            }

            let (egress, pkt) = {
                let mut st = lock!(self.status);
                if !st.should_transmit() {
                    continue;
                }
                (st.egress(), st.control(self.startup_tx, false))
            };

            if let Err(e) = self.transport.send_to(&egress, &pkt.to_bytes()) {
                session_log!(self, warn, "send failed: {e}");
                lock!(self.status).sender_active = false;
                if self.lifecycle.send(LifecycleEvent::SenderFailed(self.id)).is_err() {
                    session_log!(self, error, "lifecycle loop gone");
                }
                return;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use mg_common::ip;
    use pretty_assertions::assert_eq;

    fn status() -> SessionStatus {
        SessionStatus::new(
            0x101,
            ip!("10.0.0.2"),
            3,
            &SessionParams::default(),
            Owner::Bgp,
        )
    }

    fn from_peer(state: SessionState, your: u32) -> Control {
        let mut c = Control {
            my_discriminator: 0x202,
            your_discriminator: your,
            desired_min_tx: 300_000,
            required_min_rx: 300_000,
            detect_mult: 4,
            ..Default::default()
        };
        c.set_state(state);
        c
    }

    #[test]
    fn three_way_handshake() {
        let mut s = status();

        let a = s
            .receive(&from_peer(SessionState::Down, 0))
            .expect("accepted");
        let n = a.transition.expect("transition");
        assert_eq!((n.old, n.new), (SessionState::Down, SessionState::Init));
        assert_eq!(s.remote_discriminator, 0x202);
        assert_eq!(a.detect, Duration::from_secs(4));

        let a = s
            .receive(&from_peer(SessionState::Up, 0x101))
            .expect("accepted");
        let n = a.transition.expect("transition");
        assert_eq!(n.new, SessionState::Up);
        assert!(n.owners.contains(Owner::Bgp));

        let a = s
            .receive(&from_peer(SessionState::Down, 0x101))
            .expect("accepted");
        let n = a.transition.expect("transition");
        assert_eq!(n.new, SessionState::Down);
        assert_eq!(n.diag, Diag::NeighborSignaledSessionDown);
    }

    #[test]
    fn discard_rules() {
        let mut s = status();
        assert_eq!(
            s.receive(&from_peer(SessionState::Init, 0)).err(),
            Some(Discard::NoDiscriminator)
        );
        assert_eq!(
            s.receive(&from_peer(SessionState::Down, 0x999)).err(),
            Some(Discard::WrongDiscriminator(0x999))
        );

        let mut authed = from_peer(SessionState::Down, 0);
        authed.set_auth(Auth {
            auth_type: crate::AuthType::SimplePassword,
            key_id: 1,
            data: AuthData::Password(b"pw".to_vec()),
        });
        assert_eq!(s.receive(&authed).err(), Some(Discard::AuthMismatch));
        assert_eq!(s.state, SessionState::Down);
        assert_eq!(s.remote_discriminator, 0);
    }

    #[test]
    fn admin_down_ignores_peer() {
        let mut s = status();
        let n = s.admin_down().expect("transition");
        assert_eq!(n.diag, Diag::AdministrativelyDown);
        assert_eq!(
            s.receive(&from_peer(SessionState::Down, 0)).err(),
            Some(Discard::AdminDown)
        );
        assert_eq!(s.state, SessionState::AdminDown);
        assert!(!s.should_transmit());

        let n = s.admin_up().expect("transition");
        assert_eq!((n.old, n.new), (SessionState::AdminDown, SessionState::Down));
        assert!(s.admin_up().is_none());
    }

    #[test]
    fn detection_expiry() {
        let mut s = status();
        assert!(s.detection_expired().is_none());
        s.receive(&from_peer(SessionState::Down, 0)).expect("accepted");
        let n = s.detection_expired().expect("transition");
        assert_eq!(n.diag, Diag::ControlDetectionTimeExpired);
        assert_eq!(s.remote_discriminator, 0);
    }

    #[test]
    fn poll_sequence() {
        let mut s = status();
        s.apply(&SessionParams {
            desired_min_tx: Duration::from_millis(100),
            ..SessionParams::defaults("fast")
        });
        s.poll_active = true;
        assert!(s.param_changed);

        let c = s.control(Duration::from_secs(1), false);
        assert!(c.poll());
        // Not up yet, so the advertised interval is held at the startup rate.
        assert_eq!(c.desired_min_tx(), Duration::from_secs(1));

        let mut fin = from_peer(SessionState::Down, 0x101);
        fin.set_final();
        s.receive(&fin).expect("accepted");
        assert!(!s.poll_active);
        assert!(!s.param_changed);

        let mut poll = from_peer(SessionState::Init, 0x101);
        poll.set_poll();
        let a = s.receive(&poll).expect("accepted");
        assert!(a.respond);
        assert!(s.control(Duration::from_secs(1), true).r#final());
    }

    #[test]
    fn intervals_and_jitter() {
        let mut s = status();
        s.state = SessionState::Up;
        s.remote_required_min_rx = Duration::from_secs(2);
        assert_eq!(s.tx_interval(Duration::from_secs(1)), Duration::from_secs(2));

        s.remote_demand_mode = true;
        s.remote_state = SessionState::Up;
        assert!(!s.should_transmit());

        for _ in 0..100 {
            let j = jitter(Duration::from_millis(1000), 1);
            assert!(j >= Duration::from_millis(750));
            assert!(j <= Duration::from_millis(900));
        }
    }

    #[test]
    fn meticulous_sequence_advances() {
        let mut s = status();
        s.auth = Some(AuthParams {
            auth_type: crate::AuthType::MeticulousKeyedSha1,
            key_id: 2,
            key: b"k".to_vec(),
        });
        let first = s.auth_sequence;
        s.control(Duration::from_secs(1), false);
        s.control(Duration::from_secs(1), false);
        assert_eq!(s.auth_sequence, first.wrapping_add(2));
    }
}
