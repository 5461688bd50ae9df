// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The routing information base (RIB).
//!
//! Route sources ("clients") announce per-VRF routes with an admin distance.
//! The RIB keeps every client's opinion for every prefix, selects the best
//! one, recursively resolves next hops down to egress interfaces, and hands
//! the resulting forwarding state to a FIB programming callback.

pub mod bestpath;
pub mod config;
pub mod ecmp;
pub mod entry;
pub mod error;
pub mod log;
pub mod nexthop;
pub mod resolver;
pub mod rib;
pub mod route;
pub mod table;
pub mod warmboot;

pub use config::{EcmpConfig, RibConfig};
pub use entry::{ForwardAction, ForwardActionKind, RouteNextHopEntry};
pub use error::Error;
pub use nexthop::*;
pub use rib::{
    FibError, RoutingInformationBase, UpdateHandle, UpdateStatistics,
};
pub use rib_types::*;
pub use route::*;
pub use table::{
    FibRoute, ForwardingMap, RouteDetails, RouteEntry, RouteTable, VrfTables,
};

#[cfg(test)]
mod proptest;

pub const COMPONENT_RIB: &str = "rib";
pub const MOD_COORDINATOR: &str = "coordinator";
pub const MOD_RESOLVER: &str = "resolver";
pub const MOD_ECMP: &str = "ecmp";
pub const MOD_WARMBOOT: &str = "warmboot";
