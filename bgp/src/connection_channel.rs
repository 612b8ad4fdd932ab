// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/// This file contains code for testing purposes only. Note that it's only
/// included in `lib.rs` with a `#[cfg(test)]` guard. It implements
/// BgpConnection and BgpConnector over in-process channels so the state
/// machines and their manager can be exercised without sockets.
use crate::connection::{BgpConnection, BgpConnector, ConnectionDirection};
use crate::error::Error;
use crate::fsm::FsmEvent;
use crate::messages::Message;
use mg_common::lock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::spawn;
use std::time::Duration;

const RECV_POLL: Duration = Duration::from_millis(10);

lazy_static! {
    static ref NET: Network = Network::new();
}

/// A simulated network that maps socket addresses to listeners.
pub struct Network {
    endpoints: Mutex<HashMap<SocketAddr, Sender<BgpConnectionChannel>>>,
}

/// Receives the far side of connections made to a bound address.
pub struct Listener {
    rx: Receiver<BgpConnectionChannel>,
}

impl Listener {
    pub fn bind(addr: SocketAddr) -> Listener {
        NET.bind(addr)
    }

    pub fn accept(
        &self,
        timeout: Duration,
    ) -> Result<BgpConnectionChannel, Error> {
        self.rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => Error::Timeout,
            RecvTimeoutError::Disconnected => Error::Disconnected,
        })
    }
}

impl Network {
    fn new() -> Self {
        Self {
            endpoints: Mutex::new(HashMap::new()),
        }
    }

    fn bind(&self, addr: SocketAddr) -> Listener {
        let (tx, rx) = channel();
        lock!(self.endpoints).insert(addr, tx);
        Listener { rx }
    }

    /// Connect `from` to `to`, handing the inbound half to the listener at
    /// `to` and returning the outbound half.
    fn connect(
        &self,
        from: SocketAddr,
        to: SocketAddr,
    ) -> Result<BgpConnectionChannel, Error> {
        let (local, remote) = BgpConnectionChannel::pair(from, to);
        match lock!(self.endpoints).get(&to) {
            None => Err(Error::ChannelConnect),
            Some(listener) => {
                listener
                    .send(remote)
                    .map_err(|e| Error::ChannelSend(e.to_string()))?;
                Ok(local)
            }
        }
    }
}

/// One end of a simulated connection.
#[derive(Clone)]
pub struct BgpConnectionChannel {
    peer: SocketAddr,
    direction: ConnectionDirection,
    tx: Arc<Mutex<Option<Sender<Message>>>>,
    rx: Arc<Mutex<Option<Receiver<Message>>>>,
    closed: Arc<AtomicBool>,
}

impl BgpConnectionChannel {
    /// Create both ends of a connection opened by `from` toward `to`. The
    /// first end is the outbound side held by `from`.
    pub fn pair(from: SocketAddr, to: SocketAddr) -> (Self, Self) {
        let (a_tx, a_rx) = channel();
        let (b_tx, b_rx) = channel();
        let outbound = Self::new(to, ConnectionDirection::Outbound, a_tx, b_rx);
        let inbound = Self::new(from, ConnectionDirection::Inbound, b_tx, a_rx);
        (outbound, inbound)
    }

    fn new(
        peer: SocketAddr,
        direction: ConnectionDirection,
        tx: Sender<Message>,
        rx: Receiver<Message>,
    ) -> Self {
        Self {
            peer,
            direction,
            tx: Arc::new(Mutex::new(Some(tx))),
            rx: Arc::new(Mutex::new(Some(rx))),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Read the next message directly, for ends driven by a test rather than
    /// a state machine.
    pub fn recv(&self, timeout: Duration) -> Result<Message, Error> {
        let guard = lock!(self.rx);
        let rx = guard.as_ref().ok_or(Error::NotConnected)?;
        rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => Error::Timeout,
            RecvTimeoutError::Disconnected => Error::Disconnected,
        })
    }

    /// Read until a message with the given title shows up.
    pub fn recv_kind(
        &self,
        title: &str,
        timeout: Duration,
    ) -> Result<Message, Error> {
        loop {
            let m = self.recv(timeout)?;
            if m.title() == title {
                return Ok(m);
            }
        }
    }
}

impl BgpConnection for BgpConnectionChannel {
    fn send(&self, msg: Message) -> Result<(), Error> {
        match lock!(self.tx).as_ref() {
            None => Err(Error::NotConnected),
            Some(tx) => {
                tx.send(msg).map_err(|e| Error::ChannelSend(e.to_string()))
            }
        }
    }

    fn peer(&self) -> SocketAddr {
        self.peer
    }

    fn direction(&self) -> ConnectionDirection {
        self.direction
    }

    fn start_recv(
        &self,
        event_tx: Sender<FsmEvent<Self>>,
    ) -> Result<(), Error> {
        let rx = lock!(self.rx).take().ok_or(Error::NotConnected)?;
        let closed = self.closed.clone();
        spawn(move || loop {
            if closed.load(Ordering::Relaxed) {
                return;
            }
            match rx.recv_timeout(RECV_POLL) {
                Ok(msg) => {
                    if event_tx.send(FsmEvent::Message(msg)).is_err() {
                        return;
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    if !closed.load(Ordering::Relaxed) {
                        let _ = event_tx.send(FsmEvent::TcpConnectionFails);
                    }
                    return;
                }
            }
        });
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        lock!(self.tx).take();
    }
}

/// Opens connections across the simulated network from a fixed address.
pub struct ChannelConnector {
    pub local: SocketAddr,
}

impl BgpConnector<BgpConnectionChannel> for ChannelConnector {
    fn connect(
        &self,
        peer: SocketAddr,
        _timeout: Duration,
        event_tx: Sender<FsmEvent<BgpConnectionChannel>>,
    ) {
        let event = match NET.connect(self.local, peer) {
            Ok(conn) => FsmEvent::Connected(conn),
            Err(_) => FsmEvent::TcpConnectionFails,
        };
        let _ = event_tx.send(event);
    }
}
