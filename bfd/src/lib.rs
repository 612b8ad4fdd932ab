// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bidirectional forwarding detection sessions.
//!
//! A [`directory::Directory`] owns every liveness session on the system. It
//! hands out discriminators, keeps track of which protocols care about each
//! destination, routes received control packets to sessions and restarts
//! failed transmitters. Each [`session::Session`] runs the RFC 5880 state
//! machine on its own receiver thread and transmits from a sender thread.

use mg_common::net::MacAddr;
use num_enum::TryFromPrimitive;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub mod directory;
pub mod error;
mod log;
pub mod packet;
pub mod session;

pub use directory::{Directory, DirectoryConfig, SessionRequest};
pub use error::Error;
pub use session::{SessionNotification, SessionStatus, Transport};

const COMPONENT_BFD: &str = "bfd";
const MOD_SESSION: &str = "session";
const MOD_DIRECTORY: &str = "directory";

/// Control packets shorter than this are never handed to the decoder.
pub const MIN_CONTROL_PACKET_LEN: usize = 24;

/// Capacity of the queue between the transport receive loops and the
/// packet dispatcher.
pub const RX_QUEUE_CAPACITY: usize = 10;

/// Discriminators are drawn from `1..=MAX_DISCRIMINATOR`.
pub const MAX_DISCRIMINATOR: u32 = 0x7fff_ffff;

/// Name of the parameter set sessions fall back to.
pub const DEFAULT_PARAMS: &str = "default";

/// Destination MAC for BFD on individual members of a link aggregate
/// (RFC 7130).
pub const MICRO_BFD_MAC: MacAddr = MacAddr([0x01, 0x00, 0x5e, 0x90, 0x00, 0x01]);

/// Tag used when registering reachability interest.
pub const REACHABILITY_OWNER: &str = "BFD";

pub const DEFAULT_DESIRED_MIN_TX: Duration = Duration::from_secs(1);
pub const DEFAULT_REQUIRED_MIN_RX: Duration = Duration::from_secs(1);
pub const DEFAULT_DETECT_MULTIPLIER: u8 = 3;

/// The possible session states. See RFC 5880 §4.1.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    TryFromPrimitive,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[repr(u8)]
pub enum SessionState {
    AdminDown = 0,
    Down = 1,
    Init = 2,
    Up = 3,
}

/// The reason for the last change in local session state.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    TryFromPrimitive,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[repr(u8)]
pub enum Diag {
    #[default]
    None = 0,
    ControlDetectionTimeExpired = 1,
    EchoFunctionFailed = 2,
    NeighborSignaledSessionDown = 3,
    ForwardingPlaneReset = 4,
    PathDown = 5,
    ConcatenatedPathDown = 6,
    AdministrativelyDown = 7,
    ReverseConcatenatedPathDown = 8,
}

/// Protocols and agents that can hold an interest in a session. A session
/// lives as long as at least one owner remains.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    TryFromPrimitive,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[repr(u8)]
pub enum Owner {
    User = 0,
    Discovered = 1,
    Ospf = 2,
    Bgp = 3,
}

impl Owner {
    pub const ALL: [Owner; 4] =
        [Owner::User, Owner::Discovered, Owner::Ospf, Owner::Bgp];
}

/// A set of owners, stored as a bitmap indexed by the owner value.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    JsonSchema,
)]
pub struct OwnerSet(u8);

impl OwnerSet {
    pub fn insert(&mut self, o: Owner) {
        self.0 |= 1 << o as u8;
    }

    pub fn remove(&mut self, o: Owner) {
        self.0 &= !(1 << o as u8);
    }

    pub fn contains(&self, o: Owner) -> bool {
        self.0 & (1 << o as u8) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Owner> + '_ {
        Owner::ALL.into_iter().filter(|o| self.contains(*o))
    }
}

impl From<Owner> for OwnerSet {
    fn from(o: Owner) -> Self {
        let mut s = Self::default();
        s.insert(o);
        s
    }
}

impl fmt::Display for OwnerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> =
            self.iter().map(|o| format!("{o:?}")).collect();
        write!(f, "[{}]", names.join(","))
    }
}

/// Authentication types. See RFC 5880 §4.1.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    TryFromPrimitive,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[repr(u8)]
pub enum AuthType {
    SimplePassword = 1,
    KeyedMd5 = 2,
    MeticulousKeyedMd5 = 3,
    KeyedSha1 = 4,
    MeticulousKeyedSha1 = 5,
}

impl AuthType {
    /// Meticulous types bump the sequence number on every packet.
    pub fn meticulous(&self) -> bool {
        matches!(self, Self::MeticulousKeyedMd5 | Self::MeticulousKeyedSha1)
    }

    /// Length of the key/digest field carried on the wire, if fixed.
    pub fn digest_len(&self) -> Option<usize> {
        match self {
            Self::SimplePassword => None,
            Self::KeyedMd5 | Self::MeticulousKeyedMd5 => Some(16),
            Self::KeyedSha1 | Self::MeticulousKeyedSha1 => Some(20),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AuthParams {
    pub auth_type: AuthType,
    pub key_id: u8,
    pub key: Vec<u8>,
}

/// A named set of session timing and authentication parameters. Sessions
/// are bound to a set by name and pick up changes to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SessionParams {
    pub name: String,
    pub desired_min_tx: Duration,
    pub required_min_rx: Duration,
    pub detect_multiplier: u8,
    #[serde(default)]
    pub demand_mode: bool,
    #[serde(default)]
    pub auth: Option<AuthParams>,
}

impl SessionParams {
    /// Protocol default values under a given name.
    pub fn defaults(name: &str) -> Self {
        Self {
            name: name.to_string(),
            desired_min_tx: DEFAULT_DESIRED_MIN_TX,
            required_min_rx: DEFAULT_REQUIRED_MIN_RX,
            detect_multiplier: DEFAULT_DETECT_MULTIPLIER,
            demand_mode: false,
            auth: None,
        }
    }
}

impl Default for SessionParams {
    fn default() -> Self {
        Self::defaults(DEFAULT_PARAMS)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn owner_set_membership() {
        let mut s = OwnerSet::from(Owner::Bgp);
        s.insert(Owner::Ospf);
        assert!(s.contains(Owner::Bgp));
        assert!(!s.contains(Owner::User));
        assert_eq!(s.iter().collect::<Vec<_>>(), vec![Owner::Ospf, Owner::Bgp]);
        assert_eq!(s.to_string(), "[Ospf,Bgp]");
        s.remove(Owner::Bgp);
        s.remove(Owner::Ospf);
        assert!(s.is_empty());
    }

    #[test]
    fn session_params_json() -> anyhow::Result<()> {
        let p = SessionParams {
            auth: Some(AuthParams {
                auth_type: AuthType::MeticulousKeyedSha1,
                key_id: 4,
                key: b"secret".to_vec(),
            }),
            ..SessionParams::defaults("fast")
        };
        let s = serde_json::to_string(&p)?;
        let back: SessionParams = serde_json::from_str(&s)?;
        assert_eq!(back, p);
        Ok(())
    }
}
