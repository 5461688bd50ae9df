// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A single client's opinion about how to forward a prefix.

use crate::config::EcmpConfig;
use crate::ecmp;
use crate::error::Error;
use crate::nexthop::{
    MplsActionCode, NextHop, NextHopSet, NextHopWeight, UCMP_DEFAULT_WEIGHT,
};
use crate::route::{StaticIp2MplsRoute, StaticRouteWithNextHops, UnicastRoute};
use rib_types::{AdminDistance, RouteCounterId};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use slog::Logger;
use std::cmp::Ordering;
use std::fmt::{self, Formatter};
use std::hash::{Hash, Hasher};
use std::net::IpAddr;

#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ForwardActionKind {
    Drop,
    ToCpu,
    Nexthops,
}

impl fmt::Display for ForwardActionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Drop => "DROP",
            Self::ToCpu => "TO_CPU",
            Self::Nexthops => "NEXTHOPS",
        };
        f.write_str(s)
    }
}

/// What happens to packets matching a route. Only the `NextHops` variant
/// carries next hops, and it never carries an empty set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ForwardAction {
    Drop,
    ToCpu,
    NextHops(NextHopSet),
}

impl ForwardAction {
    pub fn kind(&self) -> ForwardActionKind {
        match self {
            Self::Drop => ForwardActionKind::Drop,
            Self::ToCpu => ForwardActionKind::ToCpu,
            Self::NextHops(_) => ForwardActionKind::Nexthops,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouteNextHopEntry {
    action: ForwardAction,
    admin_distance: AdminDistance,
    counter_id: Option<RouteCounterId>,
}

// The counter is bookkeeping and takes no part in comparisons.
impl PartialEq for RouteNextHopEntry {
    fn eq(&self, other: &Self) -> bool {
        self.admin_distance == other.admin_distance
            && self.action == other.action
    }
}

impl Eq for RouteNextHopEntry {}

impl Hash for RouteNextHopEntry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.admin_distance.hash(state);
        self.action.hash(state);
    }
}

impl PartialOrd for RouteNextHopEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RouteNextHopEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.admin_distance
            .cmp(&other.admin_distance)
            .then_with(|| self.action.cmp(&other.action))
    }
}

impl RouteNextHopEntry {
    pub fn new(
        next_hops: NextHopSet,
        admin_distance: AdminDistance,
    ) -> Result<Self, Error> {
        if next_hops.is_empty() {
            return Err(Error::InvalidRoute(
                "NEXTHOPS action with an empty next-hop set".into(),
            ));
        }
        Ok(Self {
            action: ForwardAction::NextHops(next_hops),
            admin_distance,
            counter_id: None,
        })
    }

    pub fn new_drop(admin_distance: AdminDistance) -> Self {
        Self {
            action: ForwardAction::Drop,
            admin_distance,
            counter_id: None,
        }
    }

    pub fn new_to_cpu(admin_distance: AdminDistance) -> Self {
        Self {
            action: ForwardAction::ToCpu,
            admin_distance,
            counter_id: None,
        }
    }

    pub fn with_counter_id(
        mut self,
        counter_id: Option<RouteCounterId>,
    ) -> Self {
        self.counter_id = counter_id;
        self
    }

    pub fn action(&self) -> &ForwardAction {
        &self.action
    }

    pub fn kind(&self) -> ForwardActionKind {
        self.action.kind()
    }

    pub fn admin_distance(&self) -> AdminDistance {
        self.admin_distance
    }

    pub fn counter_id(&self) -> Option<&RouteCounterId> {
        self.counter_id.as_ref()
    }

    pub fn next_hops(&self) -> Option<&NextHopSet> {
        match &self.action {
            ForwardAction::NextHops(set) => Some(set),
            _ => None,
        }
    }

    pub fn total_weight(&self) -> NextHopWeight {
        self.next_hops().map(NextHopSet::total_weight).unwrap_or(0)
    }

    pub fn is_ucmp(&self) -> bool {
        self.next_hops().map(NextHopSet::is_ucmp).unwrap_or(false)
    }

    /// The next hops as they should be programmed. Empty unless the action
    /// is `NextHops`.
    pub fn normalized_next_hops(
        &self,
        cfg: &EcmpConfig,
        log: &Logger,
    ) -> NextHopSet {
        match &self.action {
            ForwardAction::NextHops(set) => ecmp::normalize(set, cfg, log),
            _ => NextHopSet::new(),
        }
    }

    /// Check label actions. Only MPLS routes may swap, pop or pass labels
    /// through, plain IP routes may at most push.
    pub fn validate(&self, for_mpls_route: bool) -> Result<(), Error> {
        let Some(set) = self.next_hops() else {
            return Ok(());
        };
        for nh in set.iter() {
            let Some(label) = nh.label_action() else {
                continue;
            };
            label.validate()?;
            if !for_mpls_route && label.action != MplsActionCode::Push {
                return Err(Error::InvalidRoute(format!(
                    "next hop {nh} has label action {} on an ip route",
                    label.action
                )));
            }
        }
        Ok(())
    }

    pub fn is_valid(&self, for_mpls_route: bool) -> bool {
        self.validate(for_mpls_route).is_ok()
    }

    /// Build the entry a client's route describes, using `default_distance`
    /// unless the route names its own.
    pub fn from_unicast_route(
        route: &UnicastRoute,
        default_distance: AdminDistance,
    ) -> Result<Self, Error> {
        let distance = route.admin_distance.unwrap_or(default_distance);
        let hops: NextHopSet = if route.next_hops.is_empty() {
            route
                .next_hop_addrs
                .iter()
                .map(|addr| NextHop::unresolved(*addr, 0))
                .collect()
        } else {
            route.next_hops.iter().map(NextHop::from).collect()
        };

        for nh in hops.iter() {
            if is_v6_link_local(nh.addr()) && nh.intf().is_none() {
                return Err(Error::InvalidRoute(format!(
                    "{}: link-local next hop {} needs an interface",
                    route.dest,
                    nh.addr()
                )));
            }
        }

        let entry = if !hops.is_empty() {
            match route.action {
                None | Some(ForwardActionKind::Nexthops) => {
                    Self::new(hops, distance)?
                }
                Some(action) => {
                    return Err(Error::InvalidRoute(format!(
                        "{}: next hops given with action {action}",
                        route.dest
                    )))
                }
            }
        } else {
            match route.action {
                None | Some(ForwardActionKind::Drop) => {
                    Self::new_drop(distance)
                }
                Some(ForwardActionKind::ToCpu) => Self::new_to_cpu(distance),
                Some(ForwardActionKind::Nexthops) => {
                    return Err(Error::InvalidRoute(format!(
                        "{}: NEXTHOPS action without next hops",
                        route.dest
                    )))
                }
            }
        };
        Ok(entry.with_counter_id(route.counter_id.clone()))
    }

    pub fn from_static_route(
        route: &StaticRouteWithNextHops,
    ) -> Result<Self, Error> {
        let hops: NextHopSet = route
            .nexthops
            .iter()
            .map(|addr| NextHop::unresolved(*addr, UCMP_DEFAULT_WEIGHT))
            .collect();
        Self::new(hops, AdminDistance::STATIC_ROUTE).map_err(|_| {
            Error::InvalidRoute(format!(
                "static route {} has no next hops",
                route.prefix
            ))
        })
    }

    pub fn from_static_ip2mpls_route(
        route: &StaticIp2MplsRoute,
    ) -> Result<Self, Error> {
        let mut hops = NextHopSet::new();
        for nh in &route.nexthops {
            if nh.label_action.action != MplsActionCode::Push {
                return Err(Error::InvalidRoute(format!(
                    "static ip2mpls route {} has non push label action {}",
                    route.prefix, nh.label_action
                )));
            }
            hops.insert(
                NextHop::unresolved(nh.nexthop, UCMP_DEFAULT_WEIGHT)
                    .with_label_action(Some(nh.label_action.clone())),
            );
        }
        let entry = Self::new(hops, AdminDistance::STATIC_ROUTE).map_err(|_| {
            Error::InvalidRoute(format!(
                "static ip2mpls route {} has no next hops",
                route.prefix
            ))
        })?;
        entry.validate(false)?;
        Ok(entry)
    }

    pub fn to_dynamic(&self) -> Result<serde_json::Value, Error> {
        Ok(serde_json::to_value(EntryRepr::from(self))?)
    }

    /// Inverse of [`Self::to_dynamic`]. A missing admin distance reads as
    /// the maximum distance.
    pub fn from_dynamic(value: &serde_json::Value) -> Result<Self, Error> {
        let repr = EntryRepr::deserialize(value)?;
        Self::try_from(repr)
    }
}

fn is_v6_link_local(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V6(a) => (a.segments()[0] & 0xffc0) == 0xfe80,
        IpAddr::V4(_) => false,
    }
}

impl fmt::Display for RouteNextHopEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind())?;
        if let ForwardAction::NextHops(set) = &self.action {
            write!(f, " {set}")?;
        }
        write!(f, " distance {}", self.admin_distance)?;
        if let Some(counter) = &self.counter_id {
            write!(f, " counter {counter}")?;
        }
        Ok(())
    }
}

fn max_admin_distance() -> AdminDistance {
    AdminDistance::MAX_ADMIN_DISTANCE
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryRepr {
    action: ForwardActionKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    nexthops: Vec<NextHop>,
    #[serde(default = "max_admin_distance")]
    admin_distance: AdminDistance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    counter_id: Option<RouteCounterId>,
}

impl From<&RouteNextHopEntry> for EntryRepr {
    fn from(e: &RouteNextHopEntry) -> Self {
        Self {
            action: e.kind(),
            nexthops: e
                .next_hops()
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default(),
            admin_distance: e.admin_distance,
            counter_id: e.counter_id.clone(),
        }
    }
}

impl TryFrom<EntryRepr> for RouteNextHopEntry {
    type Error = Error;

    fn try_from(r: EntryRepr) -> Result<Self, Error> {
        let entry = match r.action {
            ForwardActionKind::Nexthops => {
                Self::new(r.nexthops.into(), r.admin_distance)?
            }
            kind if !r.nexthops.is_empty() => {
                return Err(Error::InvalidRoute(format!(
                    "{kind} entry carries next hops"
                )))
            }
            ForwardActionKind::Drop => Self::new_drop(r.admin_distance),
            ForwardActionKind::ToCpu => Self::new_to_cpu(r.admin_distance),
        };
        Ok(entry.with_counter_id(r.counter_id))
    }
}

impl Serialize for RouteNextHopEntry {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        EntryRepr::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RouteNextHopEntry {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Self, D::Error> {
        let repr = EntryRepr::deserialize(deserializer)?;
        Self::try_from(repr).map_err(serde::de::Error::custom)
    }
}
