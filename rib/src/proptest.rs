// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Property-based tests for route selection, next-hop normalization,
//! resolution and warm boot.

use crate::bestpath::best_entry;
use crate::config::EcmpConfig;
use crate::ecmp::normalize;
use crate::entry::RouteNextHopEntry;
use crate::nexthop::{NextHop, NextHopSet, NextHopWeight};
use crate::resolver::Resolver;
use crate::table::{RouteTable, VrfTables};
use crate::warmboot;
use proptest::prelude::*;
use rib_common::log::discard_logger;
use rib_types::{
    AclLookupClass, AdminDistance, ClientId, InterfaceId, Prefix4, RouterId,
};
use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

// Strategy for a single gateway entry with an arbitrary admin distance
fn entry_strategy() -> impl Strategy<Value = RouteNextHopEntry> {
    (any::<u8>(), 1u8..=254u8).prop_map(|(distance, host)| {
        let set: NextHopSet = vec![NextHop::unresolved(
            Ipv4Addr::new(10, 0, 0, host).into(),
            0,
        )]
        .into();
        RouteNextHopEntry::new(set, AdminDistance(distance))
            .expect("non-empty next hops")
    })
}

// Strategy for client entries plus a shuffled presentation order
fn candidates_strategy() -> impl Strategy<
    Value = (
        Vec<(ClientId, RouteNextHopEntry)>,
        Vec<(ClientId, RouteNextHopEntry)>,
    ),
> {
    prop::collection::btree_map(0u32..64, entry_strategy(), 1..8)
        .prop_flat_map(|m| {
            let v: Vec<(ClientId, RouteNextHopEntry)> =
                m.into_iter().map(|(c, e)| (ClientId(c), e)).collect();
            (Just(v.clone()), Just(v).prop_shuffle())
        })
}

fn group(weights: &[NextHopWeight]) -> NextHopSet {
    weights
        .iter()
        .enumerate()
        .map(|(i, w)| {
            let addr = Ipv4Addr::from(0x0a00_0000u32 + i as u32 + 1);
            NextHop::unresolved(addr.into(), *w)
        })
        .collect()
}

fn connected(k: u8) -> (Prefix4, ClientId, RouteNextHopEntry) {
    let local: IpAddr = Ipv4Addr::new(10, 0, k, 1).into();
    let set: NextHopSet =
        vec![NextHop::resolved(local, InterfaceId(u32::from(k) + 1), 0)]
            .into();
    (
        Prefix4::new(Ipv4Addr::new(10, 0, k, 0), 24),
        ClientId::INTERFACE_ROUTE,
        RouteNextHopEntry::new(set, AdminDistance::DIRECTLY_CONNECTED)
            .expect("non-empty next hops"),
    )
}

// A recursive route 20.k.0.0/16. A next hop either lands in a connected
// subnet or in a recursive route with a lower index, so dependencies never
// form a cycle.
fn recursive(
    k: u8,
    gws: &[(bool, u8, NextHopWeight)],
) -> (Prefix4, ClientId, RouteNextHopEntry) {
    let set: NextHopSet = gws
        .iter()
        .map(|(recurse, n, w)| {
            let addr = if *recurse && *n < k {
                Ipv4Addr::new(20, *n, 1, 1)
            } else {
                Ipv4Addr::new(10, 0, n % 8, 5)
            };
            NextHop::unresolved(addr.into(), *w)
        })
        .collect();
    (
        Prefix4::new(Ipv4Addr::new(20, k, 0, 0), 16),
        ClientId::BGPD,
        RouteNextHopEntry::new(set, AdminDistance::EBGP)
            .expect("non-empty next hops"),
    )
}

type Op = (Prefix4, ClientId, RouteNextHopEntry);

// Strategy for an acyclic route set: connected subnets, recursive routes,
// and a subset of the connected subnets to withdraw later
fn route_set_strategy() -> impl Strategy<Value = (Vec<Op>, BTreeSet<u8>)> {
    (
        prop::collection::btree_set(0u8..8, 0..6),
        prop::collection::btree_map(
            0u8..16,
            prop::collection::vec((any::<bool>(), 0u8..16, 0u64..4), 1..4),
            0..10,
        ),
        prop::collection::btree_set(0u8..8, 0..3),
    )
        .prop_map(|(subnets, routes, withdraw)| {
            let mut ops: Vec<Op> =
                subnets.iter().map(|k| connected(*k)).collect();
            ops.extend(routes.iter().map(|(k, gws)| recursive(*k, gws)));
            let withdraw = withdraw.intersection(&subnets).copied().collect();
            (ops, withdraw)
        })
}

fn build(ops: &[Op]) -> RouteTable<Prefix4> {
    let mut table = RouteTable::new();
    for (prefix, client, entry) in ops {
        table.upsert_client_route(*prefix, *client, entry.clone());
    }
    table
}

fn resolver() -> Resolver {
    Resolver::new(64, discard_logger())
}

proptest! {
    /// Property: the best entry depends only on the set of candidates,
    /// and is the lowest distance with ties going to the lowest client
    #[test]
    fn prop_best_entry_order_independent(
        (ordered, shuffled) in candidates_strategy()
    ) {
        let a = best_entry(ordered.iter().map(|(c, e)| (c, e)));
        let b = best_entry(shuffled.iter().map(|(c, e)| (c, e)));
        prop_assert_eq!(a.map(|(c, _)| c), b.map(|(c, _)| c));

        let min = ordered
            .iter()
            .map(|(_, e)| e.admin_distance())
            .min()
            .expect("candidates");
        let expected = ordered
            .iter()
            .filter(|(_, e)| e.admin_distance() == min)
            .map(|(c, _)| *c)
            .min();
        prop_assert_eq!(a.map(|(c, _)| c), expected);
    }

    /// Property: a normalized group never exceeds the ecmp width, never
    /// has a zero weight, and fills the width exactly when it was scaled
    #[test]
    fn prop_normalized_group_fits_width(
        weights in prop::collection::vec(0u64..1000, 1..40),
        width in 1u64..=256,
        wide in any::<bool>(),
    ) {
        let cfg = EcmpConfig { max_ecmp_width: width, wide_ecmp: wide };
        let floored: NextHopWeight = weights.iter().map(|w| (*w).max(1)).sum();
        let out = normalize(&group(&weights), &cfg, &discard_logger());

        prop_assert!(!out.is_empty());
        prop_assert!(out.total_weight() <= width);
        prop_assert!(out.iter().all(|nh| nh.weight() >= 1));
        if floored > width || (wide && floored > 128) {
            prop_assert_eq!(out.total_weight(), width);
        } else {
            prop_assert_eq!(out.total_weight(), floored);
        }
    }

    /// Property: syncing a client to the same routes twice changes
    /// nothing the second time
    #[test]
    fn prop_sync_is_idempotent(
        routes in prop::collection::btree_map(
            (any::<u32>(), 8u8..=32u8),
            entry_strategy(),
            0..16,
        ),
    ) {
        let desired: BTreeMap<Prefix4, RouteNextHopEntry> = routes
            .into_iter()
            .map(|((bits, len), e)| {
                (Prefix4::new(Ipv4Addr::from(bits), len), e)
            })
            .collect();
        let mut table = RouteTable::<Prefix4>::new();
        table.sync_client(ClientId(500), desired.clone());
        let once = table.clone();
        prop_assert_eq!(table.sync_client(ClientId(500), desired), (0, 0));
        prop_assert!(table == once);
    }

    /// Property: resolving incrementally, in any insertion order, reaches
    /// the same state as resolving everything at once
    #[test]
    fn prop_incremental_resolution_matches_full(
        (ops, withdraw) in route_set_strategy(),
        split in any::<prop::sample::Index>(),
    ) {
        let r = resolver();

        let mut full = build(&ops);
        prop_assert!(r.resolve(&mut full).converged);

        let mut reversed: Vec<Op> = ops.clone();
        reversed.reverse();
        let mut reversed = build(&reversed);
        r.resolve(&mut reversed);
        prop_assert!(full == reversed);

        let at = split.index(ops.len() + 1);
        let mut incremental = build(&ops[..at]);
        r.resolve(&mut incremental);
        for (prefix, client, entry) in &ops[at..] {
            incremental.upsert_client_route(*prefix, *client, entry.clone());
        }
        r.resolve(&mut incremental);
        prop_assert!(full == incremental);

        // Withdrawing connected subnets matches never having had them.
        for k in &withdraw {
            let (prefix, client, _) = connected(*k);
            full.remove_client_route(prefix, client);
        }
        r.resolve(&mut full);
        let remaining: Vec<Op> = ops
            .iter()
            .filter(|(p, c, _)| {
                !(*c == ClientId::INTERFACE_ROUTE
                    && withdraw.iter().any(|k| connected(*k).0 == *p))
            })
            .cloned()
            .collect();
        let mut scratch = build(&remaining);
        r.resolve(&mut scratch);
        prop_assert!(full == scratch);
    }

    /// Property: a restored VRF resolves to the same state it was saved in
    #[test]
    fn prop_warm_boot_restores_state(
        (ops, _) in route_set_strategy(),
        class in prop::option::of(0u32..4),
    ) {
        let r = resolver();
        let mut vrf = VrfTables { v4: build(&ops), ..Default::default() };
        if let (Some(c), Some((prefix, _, _))) = (class, ops.first()) {
            vrf.v4.set_class_id(*prefix, Some(AclLookupClass(c)));
        }
        r.resolve(&mut vrf.v4);

        let mut saved = BTreeMap::new();
        saved.insert(RouterId::DEFAULT, Arc::new(vrf));
        let doc = warmboot::to_dynamic(&saved).expect("to dynamic");
        let mut restored =
            warmboot::from_dynamic(&doc, &discard_logger()).expect("restore");

        let vrf = restored.get_mut(&RouterId::DEFAULT).expect("vrf");
        vrf.v4.mark_all_dirty();
        r.resolve(&mut vrf.v4);
        prop_assert!(*vrf == *saved[&RouterId::DEFAULT]);
    }
}
