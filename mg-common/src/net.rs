// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Contracts for the platform services the routing daemons lean on. Route
//! reachability comes from the RIB, interface properties come from the
//! platform. Both are provided by the embedding daemon.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::num::ParseIntError;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("destination {0} is not reachable")]
    Unreachable(IpAddr),

    #[error("unknown interface index {0}")]
    UnknownInterface(u32),

    #[error("reachability service: {0}")]
    Service(String),
}

/// Whether to start or stop tracking reachability for a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackOp {
    Add,
    Remove,
}

/// The answer to a reachability query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReachabilityInfo {
    pub reachable: bool,

    /// Interface index of the next hop toward the destination.
    pub next_hop_interface: u32,
}

/// Route reachability as seen by the RIB.
pub trait Reachability: Send + Sync {
    /// Register or unregister interest in reachability changes for `dest` on
    /// behalf of `owner`.
    fn track(&self, dest: IpAddr, owner: &str, op: TrackOp);

    fn query(&self, dest: IpAddr) -> Result<ReachabilityInfo, Error>;
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
pub enum InterfaceKind {
    Normal,

    /// A link aggregate made of member links.
    Aggregate,
}

/// Interface properties from the underlying platform.
pub trait InterfaceResolver: Send + Sync {
    fn name_for(&self, ifindex: u32) -> Option<String>;

    fn mac_for(&self, name: &str) -> Option<MacAddr>;

    fn type_of(&self, ifindex: u32) -> InterfaceKind;

    /// Member link indices of an aggregate interface. Empty for normal
    /// interfaces.
    fn members(&self, ifindex: u32) -> Vec<u32>;
}

#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    JsonSchema,
)]
pub struct MacAddr(pub [u8; 6]);

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

#[derive(Debug, Error)]
pub enum MacAddrParseError {
    #[error("expected 6 octets, found {0}")]
    Length(usize),

    #[error("octet parse error: {0}")]
    Octet(#[from] ParseIntError),
}

impl FromStr for MacAddr {
    type Err = MacAddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(MacAddrParseError::Length(parts.len()));
        }
        let mut octets = [0u8; 6];
        for (o, p) in octets.iter_mut().zip(parts) {
            *o = u8::from_str_radix(p, 16)?;
        }
        Ok(MacAddr(octets))
    }
}
