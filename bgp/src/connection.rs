// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::error::Error;
use crate::fsm::FsmEvent;
use crate::messages::Message;
use std::fmt::{self, Display, Formatter};
use std::net::SocketAddr;
use std::sync::mpsc::Sender;
use std::time::Duration;

/// Which side opened the TCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConnectionDirection {
    /// We connected to the peer.
    Outbound,
    /// The peer connected to us.
    Inbound,
}

impl Display for ConnectionDirection {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Outbound => write!(f, "outbound"),
            Self::Inbound => write!(f, "inbound"),
        }
    }
}

/// An established transport to a peer. Handles are cheap to clone and all
/// clones refer to the same underlying connection.
pub trait BgpConnection: Clone + Send + 'static {
    fn send(&self, msg: Message) -> Result<(), Error>;

    fn peer(&self) -> SocketAddr;

    fn direction(&self) -> ConnectionDirection;

    /// Begin delivering messages received on this connection to `event_tx`
    /// as [`FsmEvent::Message`]. Loss of the transport is reported as
    /// [`FsmEvent::TcpConnectionFails`].
    fn start_recv(&self, event_tx: Sender<FsmEvent<Self>>)
        -> Result<(), Error>;

    /// Tear the connection down. Further sends fail.
    fn close(&self);
}

/// Opens outbound connections on behalf of a state machine.
pub trait BgpConnector<Cnx: BgpConnection>: Send + Sync + 'static {
    /// Attempt to connect to `peer`. The outcome is delivered asynchronously
    /// to `event_tx` as [`FsmEvent::Connected`] or
    /// [`FsmEvent::TcpConnectionFails`].
    fn connect(
        &self,
        peer: SocketAddr,
        timeout: Duration,
        event_tx: Sender<FsmEvent<Cnx>>,
    );
}
