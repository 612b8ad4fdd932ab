// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Autonomous system number of the local router.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema,
)]
pub enum Asn {
    TwoOctet(u16),
    FourOctet(u32),
}

impl std::fmt::Display for Asn {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Asn::TwoOctet(asn) => write!(f, "{}", asn),
            Asn::FourOctet(asn) => write!(f, "{}", asn),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, JsonSchema)]
pub struct RouterConfig {
    pub asn: Asn,
    pub id: Ipv4Addr,
}

impl RouterConfig {
    pub fn id_u32(&self) -> u32 {
        u32::from(self.id)
    }
}

/// Per-peer session parameters. Times are in seconds, the timer resolution
/// in milliseconds.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct PeerConfig {
    pub name: String,
    pub host: SocketAddr,
    pub hold_time: u64,
    pub keepalive: u64,
    pub connect_retry: u64,
    pub idle_hold_time: u64,
    pub resolution: u64,

    /// Only wait for the peer to connect, never connect out.
    #[serde(default)]
    pub passive: bool,

    /// Accept inbound connections from this peer.
    #[serde(default = "accept_default")]
    pub accept: bool,
}

fn accept_default() -> bool {
    true
}

impl PeerConfig {
    pub fn hold_time(&self) -> Duration {
        Duration::from_secs(self.hold_time)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive)
    }

    pub fn connect_retry(&self) -> Duration {
        Duration::from_secs(self.connect_retry)
    }

    pub fn idle_hold_time(&self) -> Duration {
        Duration::from_secs(self.idle_hold_time)
    }

    pub fn resolution(&self) -> Duration {
        Duration::from_millis(self.resolution)
    }
}
