// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Next hops and next-hop sets.
//!
//! A next hop starts out [`NextHop::Unresolved`] when a client only names a
//! gateway address. The resolver turns it into [`NextHop::Resolved`] once the
//! address has been bound to an egress interface through a connected route.

use crate::error::Error;
use rib_types::InterfaceId;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Formatter};
use std::net::IpAddr;

pub type NextHopWeight = u64;
pub type MplsLabel = u32;

/// Weight 0 marks a next hop as plain ECMP.
pub const ECMP_WEIGHT: NextHopWeight = 0;

/// Default weight for next hops of UCMP capable route sources.
pub const UCMP_DEFAULT_WEIGHT: NextHopWeight = 1;

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
pub enum MplsActionCode {
    Push,
    Swap,
    Php,
    PopAndLookup,
    Noop,
}

impl fmt::Display for MplsActionCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Push => "PUSH",
            Self::Swap => "SWAP",
            Self::Php => "PHP",
            Self::PopAndLookup => "POP_AND_LOOKUP",
            Self::Noop => "NOOP",
        };
        f.write_str(s)
    }
}

/// MPLS label operation applied when forwarding through a next hop.
#[derive(
    Debug,
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
pub struct LabelForwardingAction {
    pub action: MplsActionCode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub push_labels: Vec<MplsLabel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swap_with: Option<MplsLabel>,
}

impl LabelForwardingAction {
    pub fn push(labels: Vec<MplsLabel>) -> Self {
        Self {
            action: MplsActionCode::Push,
            push_labels: labels,
            swap_with: None,
        }
    }

    pub fn swap(label: MplsLabel) -> Self {
        Self {
            action: MplsActionCode::Swap,
            push_labels: Vec::new(),
            swap_with: Some(label),
        }
    }

    pub fn simple(action: MplsActionCode) -> Self {
        Self {
            action,
            push_labels: Vec::new(),
            swap_with: None,
        }
    }

    /// Check that the action carries exactly the labels it needs.
    pub fn validate(&self) -> Result<(), Error> {
        let ok = match self.action {
            MplsActionCode::Push => {
                !self.push_labels.is_empty() && self.swap_with.is_none()
            }
            MplsActionCode::Swap => {
                self.swap_with.is_some() && self.push_labels.is_empty()
            }
            MplsActionCode::Php
            | MplsActionCode::PopAndLookup
            | MplsActionCode::Noop => {
                self.swap_with.is_none() && self.push_labels.is_empty()
            }
        };
        if ok {
            Ok(())
        } else {
            Err(Error::InvalidRoute(format!(
                "malformed label action {self}"
            )))
        }
    }
}

impl fmt::Display for LabelForwardingAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.action)?;
        if !self.push_labels.is_empty() {
            write!(f, " {:?}", self.push_labels)?;
        }
        if let Some(label) = self.swap_with {
            write!(f, " {label}")?;
        }
        Ok(())
    }
}

#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct UnresolvedNextHop {
    pub addr: IpAddr,
    pub weight: NextHopWeight,
    pub label_action: Option<LabelForwardingAction>,
}

#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ResolvedNextHop {
    pub addr: IpAddr,
    pub intf: InterfaceId,
    pub weight: NextHopWeight,
    pub label_action: Option<LabelForwardingAction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NextHop {
    Unresolved(UnresolvedNextHop),
    Resolved(ResolvedNextHop),
}

impl NextHop {
    pub fn unresolved(addr: IpAddr, weight: NextHopWeight) -> Self {
        Self::Unresolved(UnresolvedNextHop {
            addr,
            weight,
            label_action: None,
        })
    }

    pub fn resolved(
        addr: IpAddr,
        intf: InterfaceId,
        weight: NextHopWeight,
    ) -> Self {
        Self::Resolved(ResolvedNextHop {
            addr,
            intf,
            weight,
            label_action: None,
        })
    }

    pub fn with_label_action(
        mut self,
        action: Option<LabelForwardingAction>,
    ) -> Self {
        match &mut self {
            Self::Unresolved(nh) => nh.label_action = action,
            Self::Resolved(nh) => nh.label_action = action,
        }
        self
    }

    pub fn with_weight(mut self, weight: NextHopWeight) -> Self {
        match &mut self {
            Self::Unresolved(nh) => nh.weight = weight,
            Self::Resolved(nh) => nh.weight = weight,
        }
        self
    }

    pub fn addr(&self) -> IpAddr {
        match self {
            Self::Unresolved(nh) => nh.addr,
            Self::Resolved(nh) => nh.addr,
        }
    }

    pub fn weight(&self) -> NextHopWeight {
        match self {
            Self::Unresolved(nh) => nh.weight,
            Self::Resolved(nh) => nh.weight,
        }
    }

    pub fn label_action(&self) -> Option<&LabelForwardingAction> {
        match self {
            Self::Unresolved(nh) => nh.label_action.as_ref(),
            Self::Resolved(nh) => nh.label_action.as_ref(),
        }
    }

    pub fn intf(&self) -> Option<InterfaceId> {
        match self {
            Self::Unresolved(_) => None,
            Self::Resolved(nh) => Some(nh.intf),
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }
}

impl From<ResolvedNextHop> for NextHop {
    fn from(value: ResolvedNextHop) -> Self {
        Self::Resolved(value)
    }
}

impl From<UnresolvedNextHop> for NextHop {
    fn from(value: UnresolvedNextHop) -> Self {
        Self::Unresolved(value)
    }
}

impl fmt::Display for NextHop {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr())?;
        if let Some(intf) = self.intf() {
            write!(f, "@I{intf}")?;
        }
        if self.weight() != ECMP_WEIGHT {
            write!(f, " x{}", self.weight())?;
        }
        if let Some(label) = self.label_action() {
            write!(f, " [{label}]")?;
        }
        Ok(())
    }
}

/// Flat wire form of a next hop. A present interface means resolved.
#[derive(Serialize, Deserialize)]
struct NextHopRepr {
    addr: IpAddr,
    #[serde(default)]
    weight: NextHopWeight,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    intf: Option<InterfaceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label_action: Option<LabelForwardingAction>,
}

impl Serialize for NextHop {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        NextHopRepr {
            addr: self.addr(),
            weight: self.weight(),
            intf: self.intf(),
            label_action: self.label_action().cloned(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for NextHop {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Self, D::Error> {
        let r = NextHopRepr::deserialize(deserializer)?;
        let nh = match r.intf {
            Some(intf) => NextHop::resolved(r.addr, intf, r.weight),
            None => NextHop::unresolved(r.addr, r.weight),
        };
        Ok(nh.with_label_action(r.label_action))
    }
}

/// A set of next hops keyed by address. No two members share an address.
#[derive(
    Debug,
    Clone,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
#[serde(into = "Vec<NextHop>", from = "Vec<NextHop>")]
pub struct NextHopSet(BTreeMap<IpAddr, NextHop>);

impl NextHopSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `nh`, replacing any member with the same address.
    pub fn insert(&mut self, nh: NextHop) -> Option<NextHop> {
        self.0.insert(nh.addr(), nh)
    }

    /// Insert `nh`, folding it into an existing member with the same
    /// address by summing weights.
    pub fn merge(&mut self, nh: NextHop) {
        match self.0.get_mut(&nh.addr()) {
            Some(existing) => {
                let weight = existing.weight().saturating_add(nh.weight());
                *existing = existing.clone().with_weight(weight);
            }
            None => {
                self.0.insert(nh.addr(), nh);
            }
        }
    }

    pub fn get(&self, addr: &IpAddr) -> Option<&NextHop> {
        self.0.get(addr)
    }

    pub fn contains(&self, addr: &IpAddr) -> bool {
        self.0.contains_key(addr)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NextHop> {
        self.0.values()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn total_weight(&self) -> NextHopWeight {
        self.iter()
            .map(NextHop::weight)
            .fold(0, NextHopWeight::saturating_add)
    }

    /// A set is UCMP when any member carries a weight, ECMP otherwise.
    pub fn is_ucmp(&self) -> bool {
        self.iter().any(|nh| nh.weight() != ECMP_WEIGHT)
    }

    pub fn all_resolved(&self) -> bool {
        self.iter().all(NextHop::is_resolved)
    }
}

impl FromIterator<NextHop> for NextHopSet {
    fn from_iter<T: IntoIterator<Item = NextHop>>(iter: T) -> Self {
        let mut set = NextHopSet::new();
        for nh in iter {
            set.insert(nh);
        }
        set
    }
}

impl IntoIterator for NextHopSet {
    type Item = NextHop;
    type IntoIter = std::collections::btree_map::IntoValues<IpAddr, NextHop>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_values()
    }
}

impl From<Vec<NextHop>> for NextHopSet {
    fn from(value: Vec<NextHop>) -> Self {
        value.into_iter().collect()
    }
}

impl From<NextHopSet> for Vec<NextHop> {
    fn from(value: NextHopSet) -> Self {
        value.into_iter().collect()
    }
}

impl fmt::Display for NextHopSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let hops: Vec<String> = self.iter().map(|nh| nh.to_string()).collect();
        write!(f, "{}", hops.join(", "))
    }
}
