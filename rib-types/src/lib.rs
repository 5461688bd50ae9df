// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Core types for the routing information base, shared with its clients.
//!
//! This crate provides the canonical prefix types, the family-generic
//! [`RoutePrefix`] trait the route tables are built on, and the small
//! identifier types (VRFs, clients, interfaces, admin distances) that flow
//! through route announcements. It has minimal dependencies and can be used
//! by clients without pulling in the full RIB implementation.

#[cfg(feature = "clap")]
use clap::ValueEnum;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{self, Formatter};
use std::hash::Hash;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

mod id;
pub use id::*;

#[cfg(test)]
mod proptest;

#[derive(
    Debug, Copy, Clone, Serialize, Deserialize, Hash, Eq, PartialEq, JsonSchema,
)]
pub struct Prefix4 {
    pub value: Ipv4Addr,
    pub length: u8,
}

impl PartialOrd for Prefix4 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Prefix4 {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.value != other.value {
            return self.value.cmp(&other.value);
        }
        self.length.cmp(&other.length)
    }
}

impl Prefix4 {
    pub const HOST_MASK: u8 = 32;

    /// Create a new `Prefix4` from an IP address and net mask.
    /// The newly created `Prefix4` will have its host bits zeroed upon creation
    /// e.g.
    /// ```
    /// use rib_types::Prefix4;
    /// use std::net::Ipv4Addr;
    /// use std::str::FromStr;
    /// let p4 = Prefix4::new(Ipv4Addr::from_str("10.0.0.10").unwrap(), 24);
    /// assert_eq!(p4.value, Ipv4Addr::from_str("10.0.0.0").unwrap());
    /// ```
    pub fn new(ip: Ipv4Addr, length: u8) -> Self {
        let mut new = Self {
            value: ip,
            length: length.min(Self::HOST_MASK),
        };
        new.unset_host_bits();
        new
    }

    /// The /32 host route for `ip`.
    pub fn host(ip: Ipv4Addr) -> Self {
        Self::new(ip, Self::HOST_MASK)
    }

    fn mask(&self) -> u32 {
        match self.length {
            0 => 0,
            _ => (!0u32) << (32 - self.length),
        }
    }

    pub fn host_bits_are_unset(&self) -> bool {
        self.value.to_bits() & self.mask() == self.value.to_bits()
    }

    pub fn unset_host_bits(&mut self) {
        self.value = Ipv4Addr::from_bits(self.value.to_bits() & self.mask())
    }

    /// Check if this prefix is contained within another prefix.
    /// Returns true if this prefix is equal to or more specific than the other.
    pub fn within(&self, other: &Prefix4) -> bool {
        // A less specific prefix cannot be within a more specific one
        if self.length < other.length {
            return false;
        }

        if other.length == 0 {
            // /0 contains everything
            return true;
        }

        let mask = other.mask();
        self.value.to_bits() & mask == other.value.to_bits() & mask
    }

    /// Check if `addr` falls inside this prefix.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        Self::host(addr).within(self)
    }
}

impl fmt::Display for Prefix4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.value, self.length)
    }
}

impl FromStr for Prefix4 {
    type Err = String;

    /// Parse `a.b.c.d/len`. Host bits are zeroed, so `10.1.2.3/8` parses to
    /// `10.0.0.0/8`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (value, length) =
            s.split_once('/').ok_or("malformed prefix".to_string())?;

        let value: Ipv4Addr =
            value.parse().map_err(|_| "malformed ip addr".to_string())?;
        let length: u8 =
            length.parse().map_err(|_| "malformed length".to_string())?;
        if length > Self::HOST_MASK {
            return Err(format!("prefix length {length} exceeds 32"));
        }

        Ok(Self::new(value, length))
    }
}

#[derive(
    Debug, Copy, Clone, Serialize, Deserialize, Hash, Eq, PartialEq, JsonSchema,
)]
pub struct Prefix6 {
    pub value: Ipv6Addr,
    pub length: u8,
}

impl PartialOrd for Prefix6 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Prefix6 {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.value != other.value {
            return self.value.cmp(&other.value);
        }
        self.length.cmp(&other.length)
    }
}

impl fmt::Display for Prefix6 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.value, self.length)
    }
}

impl Prefix6 {
    pub const HOST_MASK: u8 = 128;

    /// Create a new `Prefix6` from an IP address and net mask.
    /// The newly created `Prefix6` will have its host bits zeroed upon creation
    /// e.g.
    /// ```
    /// use rib_types::Prefix6;
    /// use std::net::Ipv6Addr;
    /// use std::str::FromStr;
    /// let p6 = Prefix6::new(Ipv6Addr::from_str("2001:db8::1").unwrap(), 64);
    /// assert_eq!(p6.value, Ipv6Addr::from_str("2001:db8::").unwrap());
    /// ```
    pub fn new(ip: Ipv6Addr, length: u8) -> Self {
        let mut new = Self {
            value: ip,
            length: length.min(Self::HOST_MASK),
        };
        new.unset_host_bits();
        new
    }

    /// The /128 host route for `ip`.
    pub fn host(ip: Ipv6Addr) -> Self {
        Self::new(ip, Self::HOST_MASK)
    }

    fn mask(&self) -> u128 {
        match self.length {
            0 => 0,
            _ => (!0u128) << (128 - self.length),
        }
    }

    pub fn host_bits_are_unset(&self) -> bool {
        self.value.to_bits() & self.mask() == self.value.to_bits()
    }

    pub fn unset_host_bits(&mut self) {
        self.value = Ipv6Addr::from_bits(self.value.to_bits() & self.mask())
    }

    /// Check if this prefix is contained within another prefix.
    /// Returns true if this prefix is equal to or more specific than the other.
    pub fn within(&self, other: &Prefix6) -> bool {
        // A less  specific prefix cannot be within a more specific one
        if self.length < other.length {
            return false;
        }

        if other.length == 0 {
            // /0 contains everything
            return true;
        }

        let mask = other.mask();
        self.value.to_bits() & mask == other.value.to_bits() & mask
    }

    /// Check if `addr` falls inside this prefix.
    pub fn contains(&self, addr: Ipv6Addr) -> bool {
        Self::host(addr).within(self)
    }

    /// The link-local unicast block, `fe80::/64`.
    pub fn link_local() -> Self {
        Self::new(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0), 64)
    }
}

impl FromStr for Prefix6 {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (value, length) =
            s.split_once('/').ok_or("malformed prefix".to_string())?;

        let value: Ipv6Addr =
            value.parse().map_err(|_| "malformed ip addr".to_string())?;
        let length: u8 =
            length.parse().map_err(|_| "malformed length".to_string())?;
        if length > Self::HOST_MASK {
            return Err(format!("prefix length {length} exceeds 128"));
        }

        Ok(Self::new(value, length))
    }
}

#[derive(
    Debug,
    Copy,
    Clone,
    Serialize,
    Deserialize,
    Eq,
    Hash,
    PartialEq,
    JsonSchema,
    PartialOrd,
    Ord,
)]
pub enum Prefix {
    V4(Prefix4),
    V6(Prefix6),
}

impl std::fmt::Display for Prefix {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            Prefix::V4(p) => p.fmt(f),
            Prefix::V6(p) => p.fmt(f),
        }
    }
}

impl From<Prefix4> for Prefix {
    fn from(value: Prefix4) -> Self {
        Self::V4(value)
    }
}

impl From<Prefix6> for Prefix {
    fn from(value: Prefix6) -> Self {
        Self::V6(value)
    }
}

impl FromStr for Prefix {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(prefix4) = s.parse::<Prefix4>() {
            Ok(Self::V4(prefix4))
        } else if let Ok(prefix6) = s.parse::<Prefix6>() {
            Ok(Self::V6(prefix6))
        } else {
            Err(format!("malformed prefix {s}"))
        }
    }
}

impl Prefix {
    pub fn new(ip: IpAddr, length: u8) -> Self {
        match ip {
            IpAddr::V4(ip4) => Self::V4(Prefix4::new(ip4, length)),
            IpAddr::V6(ip6) => Self::V6(Prefix6::new(ip6, length)),
        }
    }

    pub fn host_bits_are_unset(&self) -> bool {
        match self {
            Self::V4(p4) => p4.host_bits_are_unset(),
            Self::V6(p6) => p6.host_bits_are_unset(),
        }
    }

    pub fn unset_host_bits(&mut self) {
        match self {
            Self::V4(p4) => p4.unset_host_bits(),
            Self::V6(p6) => p6.unset_host_bits(),
        }
    }

    /// Check if this prefix is contained within another prefix.
    /// Returns true if this prefix is equal to or more specific than the other.
    /// Returns false for cross-family comparisons.
    pub fn within(&self, other: &Prefix) -> bool {
        match (self, other) {
            (Prefix::V4(a), Prefix::V4(b)) => a.within(b),
            (Prefix::V6(a), Prefix::V6(b)) => a.within(b),
            _ => false, // Cross-family always false
        }
    }

    pub fn family(&self) -> AddressFamily {
        match self {
            Prefix::V4(_) => AddressFamily::Ipv4,
            Prefix::V6(_) => AddressFamily::Ipv6,
        }
    }

    /// Check if this prefix is IPv4.
    pub fn is_v4(&self) -> bool {
        matches!(self, Prefix::V4(_))
    }
}

/// Canonical-prefix operations shared by [`Prefix4`] and [`Prefix6`].
///
/// Route tables are generic over this trait so that a single implementation
/// of exact match, longest-prefix match and recursive resolution serves both
/// address families, while keeping v4 and v6 routes in distinct key spaces.
pub trait RoutePrefix:
    Copy
    + Ord
    + Hash
    + fmt::Debug
    + fmt::Display
    + FromStr<Err = String>
    + Into<Prefix>
    + Send
    + Sync
    + 'static
{
    type Addr: Copy + Ord + Hash + fmt::Debug + fmt::Display + Send + Sync;

    const FAMILY: AddressFamily;
    const HOST_MASK: u8;

    /// Build a canonical prefix (host bits zeroed).
    fn with_length(addr: Self::Addr, length: u8) -> Self;
    fn addr(&self) -> Self::Addr;
    fn length(&self) -> u8;
    fn contains_addr(&self, addr: Self::Addr) -> bool;

    /// Narrow a generic address to this family, `None` on a family mismatch.
    fn family_addr(addr: IpAddr) -> Option<Self::Addr>;
}

impl RoutePrefix for Prefix4 {
    type Addr = Ipv4Addr;

    const FAMILY: AddressFamily = AddressFamily::Ipv4;
    const HOST_MASK: u8 = Prefix4::HOST_MASK;

    fn with_length(addr: Ipv4Addr, length: u8) -> Self {
        Prefix4::new(addr, length)
    }

    fn addr(&self) -> Ipv4Addr {
        self.value
    }

    fn length(&self) -> u8 {
        self.length
    }

    fn contains_addr(&self, addr: Ipv4Addr) -> bool {
        self.contains(addr)
    }

    fn family_addr(addr: IpAddr) -> Option<Ipv4Addr> {
        match addr {
            IpAddr::V4(a) => Some(a),
            IpAddr::V6(_) => None,
        }
    }
}

impl RoutePrefix for Prefix6 {
    type Addr = Ipv6Addr;

    const FAMILY: AddressFamily = AddressFamily::Ipv6;
    const HOST_MASK: u8 = Prefix6::HOST_MASK;

    fn with_length(addr: Ipv6Addr, length: u8) -> Self {
        Prefix6::new(addr, length)
    }

    fn addr(&self) -> Ipv6Addr {
        self.value
    }

    fn length(&self) -> u8 {
        self.length
    }

    fn contains_addr(&self, addr: Ipv6Addr) -> bool {
        self.contains(addr)
    }

    fn family_addr(addr: IpAddr) -> Option<Ipv6Addr> {
        match addr {
            IpAddr::V6(a) => Some(a),
            IpAddr::V4(_) => None,
        }
    }
}

/// Represents the address family (protocol version) for network routes.
///
/// When used in filtering contexts `Option<AddressFamily>` is preferred:
/// - `None` = no filter (match all address families)
/// - `Some(Ipv4)` = IPv4 routes only
/// - `Some(Ipv6)` = IPv6 routes only
///
/// # Examples
///
/// ```
/// use rib_types::AddressFamily;
///
/// let filter: Option<AddressFamily> = Some(AddressFamily::Ipv4);
/// let no_filter: Option<AddressFamily> = None; // matches all families
/// ```
#[derive(
    Clone,
    Copy,
    Eq,
    Debug,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[cfg_attr(feature = "clap", derive(ValueEnum))]
pub enum AddressFamily {
    /// Internet Protocol Version 4 (IPv4)
    Ipv4,
    /// Internet Protocol Version 6 (IPv6)
    Ipv6,
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ipv4 => write!(f, "ipv4"),
            Self::Ipv6 => write!(f, "ipv6"),
        }
    }
}
