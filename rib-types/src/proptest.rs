// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Property-based tests for the prefix types.

use crate::{Prefix, Prefix4, Prefix6, RoutePrefix};
use proptest::prelude::*;
use std::net::{Ipv4Addr, Ipv6Addr};

fn ipv4_prefix_strategy() -> impl Strategy<Value = Prefix4> {
    (any::<u32>(), 0u8..=32u8).prop_map(|(addr_bits, length)| {
        Prefix4::new(Ipv4Addr::from(addr_bits), length)
    })
}

fn ipv6_prefix_strategy() -> impl Strategy<Value = Prefix6> {
    (any::<u128>(), 0u8..=128u8).prop_map(|(addr_bits, length)| {
        Prefix6::new(Ipv6Addr::from(addr_bits), length)
    })
}

proptest! {
    /// Property: IPv4 host bits are always unset after construction
    #[test]
    fn prop_ipv4_host_bits_always_unset(prefix in ipv4_prefix_strategy()) {
        prop_assert!(
            prefix.host_bits_are_unset(),
            "IPv4 prefix {prefix} should have host bits unset"
        );
    }

    /// Property: IPv6 host bits are always unset after construction
    #[test]
    fn prop_ipv6_host_bits_always_unset(prefix in ipv6_prefix_strategy()) {
        prop_assert!(
            prefix.host_bits_are_unset(),
            "IPv6 prefix {prefix} should have host bits unset"
        );
    }

    /// Property: a prefix is always within itself
    #[test]
    fn prop_ipv4_within_self(prefix in ipv4_prefix_strategy()) {
        prop_assert!(prefix.within(&prefix));
    }

    /// Property: IPv4 default route (0.0.0.0/0) contains all IPv4 prefixes
    #[test]
    fn prop_ipv4_default_contains_all(prefix in ipv4_prefix_strategy()) {
        let default = Prefix4::new(Ipv4Addr::UNSPECIFIED, 0);
        prop_assert!(prefix.within(&default));
    }

    /// Property: IPv6 default route (::/0) contains all IPv6 prefixes
    #[test]
    fn prop_ipv6_default_contains_all(prefix in ipv6_prefix_strategy()) {
        let default = Prefix6::new(Ipv6Addr::UNSPECIFIED, 0);
        prop_assert!(prefix.within(&default));
    }

    /// Property: Prefix enum V4 is never within V6 and vice versa, and the
    /// two never compare equal
    #[test]
    fn prop_prefix_enum_no_cross_family(
        p4 in ipv4_prefix_strategy(),
        p6 in ipv6_prefix_strategy(),
    ) {
        let v4 = Prefix::V4(p4);
        let v6 = Prefix::V6(p6);

        prop_assert!(!v4.within(&v6));
        prop_assert!(!v6.within(&v4));
        prop_assert_ne!(v4, v6);
    }

    /// Property: parsing the display form yields the same canonical prefix
    #[test]
    fn prop_ipv4_display_parse_stable(prefix in ipv4_prefix_strategy()) {
        let parsed: Prefix4 = prefix.to_string().parse().unwrap();
        prop_assert_eq!(parsed, prefix);
    }

    /// Property: parsing a prefix with host bits set canonicalizes it
    #[test]
    fn prop_ipv6_parse_canonicalizes(bits in any::<u128>(), length in 0u8..=128u8) {
        let raw = format!("{}/{}", Ipv6Addr::from(bits), length);
        let parsed: Prefix6 = raw.parse().unwrap();
        prop_assert!(parsed.host_bits_are_unset());
        prop_assert_eq!(parsed, Prefix6::new(Ipv6Addr::from(bits), length));
    }

    /// Property: an address is contained in a prefix exactly when masking
    /// the address to the prefix length reproduces the prefix
    #[test]
    fn prop_ipv4_contains_matches_masking(
        prefix in ipv4_prefix_strategy(),
        addr in any::<u32>(),
    ) {
        let addr = Ipv4Addr::from(addr);
        let masked = Prefix4::with_length(addr, prefix.length);
        prop_assert_eq!(prefix.contains_addr(addr), masked == prefix);
    }

    /// Property: every prefix contains its own network address
    #[test]
    fn prop_ipv6_contains_own_network(prefix in ipv6_prefix_strategy()) {
        prop_assert!(prefix.contains_addr(prefix.addr()));
    }
}
