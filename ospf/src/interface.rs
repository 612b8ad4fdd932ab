// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::net::Ipv4Addr;
use std::time::Duration;

pub const DEFAULT_HELLO_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_DEAD_INTERVAL: Duration = Duration::from_secs(40);

/// Interface states, numbered as the OSPF MIB numbers them. The ordering is
/// significant: election only runs for broadcast interfaces that are past
/// `Waiting`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    TryFromPrimitive,
    IntoPrimitive,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[repr(u8)]
pub enum IfState {
    Down = 1,
    Loopback,
    Waiting,
    PointToPoint,
    DesignatedRouter,
    BackupDesignatedRouter,
    OtherDesignatedRouter,
}

impl Display for IfState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            IfState::Down => write!(f, "down"),
            IfState::Loopback => write!(f, "loopback"),
            IfState::Waiting => write!(f, "waiting"),
            IfState::PointToPoint => write!(f, "point-to-point"),
            IfState::DesignatedRouter => write!(f, "dr"),
            IfState::BackupDesignatedRouter => write!(f, "bdr"),
            IfState::OtherDesignatedRouter => write!(f, "dr-other"),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceType {
    PointToPoint,
    Broadcast,
}

fn hello_interval_default() -> Duration {
    DEFAULT_HELLO_INTERVAL
}

fn dead_interval_default() -> Duration {
    DEFAULT_DEAD_INTERVAL
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct InterfaceConfig {
    pub name: String,

    /// Address of the interface on its attached network.
    pub address: Ipv4Addr,

    pub area: Ipv4Addr,

    pub if_type: InterfaceType,

    /// Router priority. Zero makes the interface ineligible to become DR or
    /// BDR.
    pub priority: u8,

    #[serde(default = "hello_interval_default")]
    pub hello_interval: Duration,

    /// Also the length of the wait timer on broadcast interfaces.
    #[serde(default = "dead_interval_default")]
    pub dead_interval: Duration,
}

/// What the neighbor state machine reports about a neighbor each time it
/// processes a hello from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeighborMessage {
    pub router_id: Ipv4Addr,
    pub address: Ipv4Addr,
    pub priority: u8,
    pub two_way: bool,
    pub dr: Ipv4Addr,
    pub bdr: Ipv4Addr,
}

/// The interface's view of one neighbor, keyed by router id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
pub struct NeighborEntry {
    pub address: Ipv4Addr,
    pub priority: u8,
    pub two_way: bool,
    pub full: bool,

    /// The DR address advertised in the neighbor's hellos.
    pub dr: Ipv4Addr,

    /// The BDR address advertised in the neighbor's hellos.
    pub bdr: Ipv4Addr,
}

impl NeighborEntry {
    /// Whether this neighbor may take part in an election at all.
    pub fn eligible(&self) -> bool {
        self.two_way && self.priority > 0 && !self.address.is_unspecified()
    }

    pub fn claims_dr(&self) -> bool {
        self.dr == self.address
    }

    pub fn claims_bdr(&self) -> bool {
        self.bdr == self.address
    }
}

impl From<NeighborMessage> for NeighborEntry {
    fn from(m: NeighborMessage) -> Self {
        Self {
            address: m.address,
            priority: m.priority,
            two_way: m.two_way,
            full: false,
            dr: m.dr,
            bdr: m.bdr,
        }
    }
}

/// Everything an interface knows. The state machine thread is the only
/// writer; everyone else reads snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct InterfaceStatus {
    pub name: String,
    pub if_type: InterfaceType,
    pub state: IfState,
    pub router_id: Ipv4Addr,
    pub address: Ipv4Addr,
    pub area: Ipv4Addr,
    pub priority: u8,
    pub dr: Ipv4Addr,
    pub dr_id: Ipv4Addr,
    pub bdr: Ipv4Addr,
    pub bdr_id: Ipv4Addr,

    /// Number of elections this interface has run.
    pub events: u32,

    pub neighbors: BTreeMap<Ipv4Addr, NeighborEntry>,
}

impl InterfaceStatus {
    pub fn new(config: &InterfaceConfig, router_id: Ipv4Addr) -> Self {
        Self {
            name: config.name.clone(),
            if_type: config.if_type,
            state: IfState::Down,
            router_id,
            address: config.address,
            area: config.area,
            priority: config.priority,
            dr: Ipv4Addr::UNSPECIFIED,
            dr_id: Ipv4Addr::UNSPECIFIED,
            bdr: Ipv4Addr::UNSPECIFIED,
            bdr_id: Ipv4Addr::UNSPECIFIED,
            events: 0,
            neighbors: BTreeMap::new(),
        }
    }
}

/// The content of a hello as the interface sees it. Encoding is left to the
/// transmitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub destination: Ipv4Addr,
    pub router_id: Ipv4Addr,
    pub area: Ipv4Addr,
    pub address: Ipv4Addr,
    pub priority: u8,
    pub hello_interval: Duration,
    pub dead_interval: Duration,
    pub dr: Ipv4Addr,
    pub bdr: Ipv4Addr,

    /// Router ids of every neighbor heard from on this interface.
    pub neighbors: Vec<Ipv4Addr>,
}
