// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interface state machines for a link-state routing protocol.
//!
//! Each interface runs on its own thread and elects a designated router and
//! backup designated router from the neighbors it has two-way adjacency
//! with. Hello transmission is delegated to a [`fsm::HelloTransmitter`] and
//! link-state advertisement work is requested through [`fsm::LsaRequest`]
//! notifications. An [`Instance`] owns every running interface by name.

use std::net::Ipv4Addr;
use std::time::Duration;

pub mod election;
pub mod error;
pub mod fsm;
pub mod instance;
pub mod interface;
mod log;

pub use error::Error;
pub use instance::{Instance, InstanceConfig};

pub const COMPONENT_OSPF: &str = "ospf";
pub const MOD_INTERFACE: &str = "interface";
pub const MOD_INSTANCE: &str = "instance";

/// Multicast destination for hellos on every interface.
pub const ALL_SPF_ROUTERS: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 5);

/// How long a stopping interface has to acknowledge before it is abandoned.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(1);
