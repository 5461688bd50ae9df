// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Route descriptions as handed to the RIB by clients and configuration.

use crate::entry::ForwardActionKind;
use crate::nexthop::{LabelForwardingAction, NextHop, NextHopWeight};
use rib_types::{
    AdminDistance, InterfaceId, Prefix, RouteCounterId, RouterId,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

/// A next hop as a client describes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NextHopSpec {
    pub address: IpAddr,
    #[serde(default)]
    pub weight: NextHopWeight,
    /// Binds the next hop to an interface up front. Required for IPv6
    /// link-local gateways.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<InterfaceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_action: Option<LabelForwardingAction>,
}

impl NextHopSpec {
    pub fn new(address: IpAddr) -> Self {
        Self {
            address,
            weight: 0,
            interface: None,
            label_action: None,
        }
    }
}

impl From<&NextHopSpec> for NextHop {
    fn from(hop: &NextHopSpec) -> Self {
        let nh = match hop.interface {
            Some(intf) => NextHop::resolved(hop.address, intf, hop.weight),
            None => NextHop::unresolved(hop.address, hop.weight),
        };
        nh.with_label_action(hop.label_action.clone())
    }
}

/// A route announced by a client through `update`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct UnicastRoute {
    pub dest: Prefix,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ForwardActionKind>,
    /// Full next hop descriptions. Take precedence over `next_hop_addrs`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub next_hops: Vec<NextHopSpec>,
    /// Bare gateway addresses, each becoming an ECMP next hop.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub next_hop_addrs: Vec<IpAddr>,
    /// Overrides the distance passed to `update` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_distance: Option<AdminDistance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter_id: Option<RouteCounterId>,
}

impl UnicastRoute {
    pub fn new(dest: Prefix) -> Self {
        Self {
            dest,
            action: None,
            next_hops: Vec::new(),
            next_hop_addrs: Vec::new(),
            admin_distance: None,
            counter_id: None,
        }
    }

    pub fn via(mut self, addr: IpAddr) -> Self {
        self.next_hop_addrs.push(addr);
        self
    }

    pub fn with_next_hop(mut self, nh: NextHopSpec) -> Self {
        self.next_hops.push(nh);
        self
    }

    pub fn with_action(mut self, action: ForwardActionKind) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_admin_distance(mut self, distance: AdminDistance) -> Self {
        self.admin_distance = Some(distance);
        self
    }

    pub fn with_counter_id(mut self, counter: RouteCounterId) -> Self {
        self.counter_id = Some(counter);
        self
    }
}

/// Configured static route with gateway next hops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StaticRouteWithNextHops {
    #[serde(default)]
    pub router_id: RouterId,
    pub prefix: Prefix,
    pub nexthops: Vec<IpAddr>,
}

/// Configured static route that drops or punts its traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StaticRouteNoNextHops {
    #[serde(default)]
    pub router_id: RouterId,
    pub prefix: Prefix,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MplsNextHop {
    pub nexthop: IpAddr,
    pub label_action: LabelForwardingAction,
}

/// Configured static route that pushes an MPLS label stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StaticIp2MplsRoute {
    #[serde(default)]
    pub router_id: RouterId,
    pub prefix: Prefix,
    pub nexthops: Vec<MplsNextHop>,
}

/// A configured interface subnet and the interface's own address in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct InterfaceRoute {
    #[serde(default)]
    pub router_id: RouterId,
    pub prefix: Prefix,
    pub interface: InterfaceId,
    pub address: IpAddr,
}

/// Interface subnets per VRF, each mapped to its interface and local address.
pub type InterfaceRoutes =
    BTreeMap<RouterId, BTreeMap<Prefix, (InterfaceId, IpAddr)>>;

/// Everything `reconfigure` derives routes from.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
#[serde(default)]
pub struct RibReconfig {
    pub interface_routes: Vec<InterfaceRoute>,
    pub static_routes_with_next_hops: Vec<StaticRouteWithNextHops>,
    pub static_routes_to_null: Vec<StaticRouteNoNextHops>,
    pub static_routes_to_cpu: Vec<StaticRouteNoNextHops>,
    pub static_ip2mpls_routes: Vec<StaticIp2MplsRoute>,
}

impl RibReconfig {
    pub fn interface_route_map(&self) -> InterfaceRoutes {
        let mut map = InterfaceRoutes::new();
        for r in &self.interface_routes {
            let mut prefix = r.prefix;
            prefix.unset_host_bits();
            map.entry(r.router_id)
                .or_default()
                .insert(prefix, (r.interface, r.address));
        }
        map
    }
}
