// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

pub mod config;
pub mod connection;
pub mod error;
pub mod fsm;
mod log;
pub mod manager;
pub mod messages;

#[cfg(test)]
#[macro_use]
extern crate lazy_static;

#[cfg(test)]
pub mod connection_channel;

#[cfg(test)]
mod test;

pub use error::Error;
pub use manager::{FsmManager, SupervisorEvent};

pub const BGP_PORT: u16 = 179;
pub const COMPONENT_BGP: &str = "bgp";
pub const MOD_FSM: &str = "fsm";
pub const MOD_MANAGER: &str = "manager";
