// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Formatter};

/// Identifies a virtual routing and forwarding instance.
#[derive(
    Debug,
    Default,
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
#[serde(transparent)]
pub struct RouterId(pub u32);

impl RouterId {
    pub const DEFAULT: RouterId = RouterId(0);
}

impl fmt::Display for RouterId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for RouterId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Identifies a route source. Each client holds an independent opinion
/// about any prefix it announces.
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
#[serde(transparent)]
pub struct ClientId(pub u32);

impl ClientId {
    pub const BGPD: ClientId = ClientId(0);
    pub const STATIC_ROUTE: ClientId = ClientId(1);
    pub const INTERFACE_ROUTE: ClientId = ClientId(2);
    pub const LINKLOCAL_ROUTE: ClientId = ClientId(3);
    pub const STATIC_INTERNAL: ClientId = ClientId(700);
    pub const OPENR: ClientId = ClientId(786);
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ClientId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// An egress layer 3 interface.
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
#[serde(transparent)]
pub struct InterfaceId(pub u32);

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Route source priority. Lower always wins.
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
#[serde(transparent)]
pub struct AdminDistance(pub u8);

impl AdminDistance {
    pub const DIRECTLY_CONNECTED: AdminDistance = AdminDistance(0);
    pub const STATIC_ROUTE: AdminDistance = AdminDistance(1);
    pub const OPENR: AdminDistance = AdminDistance(10);
    pub const EBGP: AdminDistance = AdminDistance(20);
    pub const IBGP: AdminDistance = AdminDistance(200);
    pub const MAX_ADMIN_DISTANCE: AdminDistance = AdminDistance(255);
}

impl Default for AdminDistance {
    fn default() -> Self {
        Self::MAX_ADMIN_DISTANCE
    }
}

impl fmt::Display for AdminDistance {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// ACL lookup class a route can be tagged with. Tagging never changes
/// forwarding.
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
#[serde(transparent)]
pub struct AclLookupClass(pub u32);

impl fmt::Display for AclLookupClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "class{}", self.0)
    }
}

/// Names the hardware counter a route's packets are accounted against.
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
#[serde(transparent)]
pub struct RouteCounterId(pub String);

impl fmt::Display for RouteCounterId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RouteCounterId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
