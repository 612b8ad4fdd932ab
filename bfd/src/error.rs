// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::AuthType;
use num_enum::TryFromPrimitiveError;
use std::net::IpAddr;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("control packet too small: {0} bytes")]
    TooSmall(usize),

    #[error("unsupported version {0}")]
    Version(u8),

    #[error("length field {field} does not fit {actual} byte packet")]
    Length { field: u8, actual: usize },

    #[error("zero detect multiplier")]
    DetectMultiplier,

    #[error("multipoint bit set")]
    Multipoint,

    #[error("zero my discriminator")]
    Discriminator,

    #[error("malformed authentication section")]
    AuthSection,

    #[error("auth type error {0}")]
    AuthType(#[from] TryFromPrimitiveError<AuthType>),

    #[error("reachability: {0}")]
    Reachability(#[from] mg_common::net::Error),

    #[error("{dest} is unreachable")]
    Unreachable { dest: IpAddr },

    #[error("next hop to {dest} is on {actual}, not {wanted}")]
    InterfaceMismatch {
        dest: IpAddr,
        wanted: String,
        actual: String,
    },

    #[error("aggregate interface {0} has no member links")]
    NoMemberLinks(u32),

    #[error("session limit of {0} reached")]
    SessionLimit(usize),

    #[error("no free discriminator after {0} attempts")]
    DiscriminatorExhausted(usize),

    #[error("no session for {0}")]
    NoSession(IpAddr),

    #[error("no parameter set named {0}")]
    NoParams(String),

    #[error("the default parameter set cannot be removed")]
    DefaultParams,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("io error {0}")]
    Io(#[from] std::io::Error),

    #[error("directory is shut down")]
    Shutdown,
}
