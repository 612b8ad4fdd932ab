// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Designated router election.
//!
//! These are pure functions over an [`InterfaceStatus`] snapshot. The
//! interface state machine runs them on its own thread and acts on the
//! resulting [`Outcome`].

use crate::interface::{IfState, InterfaceStatus};
use std::net::Ipv4Addr;

/// A router chosen by an election.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elected {
    pub address: Ipv4Addr,
    pub router_id: Ipv4Addr,
}

impl Elected {
    pub const NONE: Elected = Elected {
        address: Ipv4Addr::UNSPECIFIED,
        router_id: Ipv4Addr::UNSPECIFIED,
    };
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    priority: u8,
    router_id: Ipv4Addr,
    address: Ipv4Addr,
}

impl From<Candidate> for Elected {
    fn from(c: Candidate) -> Self {
        Self {
            address: c.address,
            router_id: c.router_id,
        }
    }
}

/// Keep `c` in `best` if it has a higher priority, or the same priority and
/// a higher router id.
fn consider(best: &mut Option<Candidate>, c: Candidate) {
    let better = match best {
        None => true,
        Some(b) => {
            c.priority > b.priority
                || (c.priority == b.priority && c.router_id > b.router_id)
        }
    };
    if better {
        *best = Some(c);
    }
}

fn local(st: &InterfaceStatus) -> Option<Candidate> {
    if st.priority == 0 || st.address.is_unspecified() {
        return None;
    }
    Some(Candidate {
        priority: st.priority,
        router_id: st.router_id,
        address: st.address,
    })
}

/// Elect the backup designated router. Routers claiming to be DR are not
/// considered. Among the rest, routers claiming to be BDR win over routers
/// that do not. When nobody claims BDR, the best router overall is chosen.
pub fn elect_bdr(st: &InterfaceStatus) -> Elected {
    let mut claimed = None;
    let mut fallback = None;

    for (id, n) in &st.neighbors {
        if !n.eligible() || n.claims_dr() {
            continue;
        }
        let c = Candidate {
            priority: n.priority,
            router_id: *id,
            address: n.address,
        };
        if n.claims_bdr() {
            consider(&mut claimed, c);
        }
        consider(&mut fallback, c);
    }

    if let Some(c) = local(st) {
        if st.dr != st.address {
            if st.bdr == st.address {
                consider(&mut claimed, c);
            }
            consider(&mut fallback, c);
        }
    }

    claimed.or(fallback).map(Elected::from).unwrap_or(Elected::NONE)
}

/// Elect the designated router from the routers claiming to be DR. When
/// nobody does, the freshly elected `bdr` is promoted.
pub fn elect_dr(st: &InterfaceStatus, bdr: Elected) -> Elected {
    let mut claimed = None;

    for (id, n) in &st.neighbors {
        if !n.eligible() || !n.claims_dr() {
            continue;
        }
        consider(
            &mut claimed,
            Candidate {
                priority: n.priority,
                router_id: *id,
                address: n.address,
            },
        );
    }

    if let Some(c) = local(st) {
        if st.dr == st.address {
            consider(&mut claimed, c);
        }
    }

    claimed.map(Elected::from).unwrap_or(bdr)
}

/// The state an interface is in given the election result.
pub fn state_for(st: &InterfaceStatus, dr: Elected, bdr: Elected) -> IfState {
    if dr.address == st.address {
        IfState::DesignatedRouter
    } else if bdr.address == st.address {
        IfState::BackupDesignatedRouter
    } else {
        IfState::OtherDesignatedRouter
    }
}

/// The result of a complete election.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub old_state: IfState,
    pub new_state: IfState,
    pub dr: Elected,
    pub bdr: Elected,
}

impl Outcome {
    pub fn changed(&self) -> bool {
        self.old_state != self.new_state
    }

    pub fn became_dr(&self) -> bool {
        self.changed() && self.new_state == IfState::DesignatedRouter
    }

    pub fn lost_dr(&self) -> bool {
        self.changed() && self.old_state == IfState::DesignatedRouter
    }
}

fn pass(st: &mut InterfaceStatus) -> IfState {
    let bdr = elect_bdr(st);
    let dr = elect_dr(st, bdr);
    st.bdr = bdr.address;
    st.bdr_id = bdr.router_id;
    st.dr = dr.address;
    st.dr_id = dr.router_id;
    state_for(st, dr, bdr)
}

/// Run the BDR and DR elections and record the result in `st`.
///
/// If the local router's own role changed, the election is run exactly once
/// more so that its new view of itself is taken into account. Moving into
/// `OtherDesignatedRouter` from a lower state does not count as a change.
pub fn elect_bdr_and_dr(st: &mut InterfaceStatus) -> Outcome {
    let old_state = st.state;
    let mut new_state = pass(st);
    if new_state != old_state
        && !(new_state == IfState::OtherDesignatedRouter
            && old_state < IfState::OtherDesignatedRouter)
    {
        new_state = pass(st);
    }
    st.state = new_state;
    st.events = st.events.wrapping_add(1);
    Outcome {
        old_state,
        new_state,
        dr: Elected {
            address: st.dr,
            router_id: st.dr_id,
        },
        bdr: Elected {
            address: st.bdr,
            router_id: st.bdr_id,
        },
    }
}
