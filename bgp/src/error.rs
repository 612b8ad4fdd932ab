// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::fsm::FsmId;
use crate::messages::{CeaseErrorSubcode, ErrorCode};
use num_enum::TryFromPrimitiveError;
use std::net::{Ipv4Addr, SocketAddr};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("timeout")]
    Timeout,

    #[error("disconnected")]
    Disconnected,

    #[error("channel send: {0}")]
    ChannelSend(String),

    #[error("channel connect")]
    ChannelConnect,

    #[error("not connected")]
    NotConnected,

    #[error("error code: {0}")]
    ErrorCode(#[from] TryFromPrimitiveError<ErrorCode>),

    #[error("cease subcode: {0}")]
    CeaseSubcode(#[from] TryFromPrimitiveError<CeaseErrorSubcode>),

    #[error("invalid prefix {0}")]
    InvalidPrefix(String),

    #[error("fsm {0} already exists")]
    FsmExists(FsmId),

    #[error("no fsm {0}")]
    NoFsm(FsmId),

    #[error("no established fsm")]
    NoActiveFsm,

    #[error("local and remote router id are both {0}")]
    DuplicateRouterId(Ipv4Addr),

    #[error("connection from {0} refused")]
    ConnectionRefused(SocketAddr),

    #[error("fsm manager stopped")]
    Shutdown,
}
