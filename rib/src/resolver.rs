// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Recursive next-hop resolution.
//!
//! Every route's best entry is resolved down to next hops bound to egress
//! interfaces. An unresolved next hop is looked up by longest prefix match
//! in the same table:
//!
//! - a match on a connected route, an interface subnet installed by
//!   reconfiguration, binds the gateway to that route's interface.
//! - a match on any other resolved route inherits that route's resolved
//!   next hops, recursively.
//! - a match on a DROP or TO_CPU route contributes that action.
//!
//! Only routes touched by the pending changes are recomputed. A change to a
//! prefix affects the prefix itself, routes that resolved through it, routes
//! with a next hop it now covers, and transitively everything depending on
//! those. Affected routes are reset and recomputed in passes until nothing
//! changes or the pass limit is hit.

use crate::entry::{ForwardAction, RouteNextHopEntry};
use crate::log::rib_log;
use crate::nexthop::{
    LabelForwardingAction, MplsActionCode, NextHop, NextHopSet,
    NextHopWeight, ResolvedNextHop, ECMP_WEIGHT,
};
use crate::table::RouteTable;
use crate::MOD_RESOLVER;
use rib_types::{ClientId, RoutePrefix};
use slog::Logger;
use std::collections::BTreeSet;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionStats {
    /// Routes recomputed.
    pub affected: usize,
    pub passes: usize,
    /// Affected routes left unresolved.
    pub unresolved: usize,
    /// Affected routes with a next hop that would resolve through itself.
    pub cyclic: usize,
    /// False if the pass limit cut resolution short.
    pub converged: bool,
}

pub struct Resolver {
    max_passes: usize,
    log: Logger,
}

struct Outcome<P: RoutePrefix> {
    forward: Option<RouteNextHopEntry>,
    connected: bool,
    nexthop_routes: BTreeSet<P>,
    resolved_via: BTreeSet<P>,
    cyclic: bool,
}

impl<P: RoutePrefix> Outcome<P> {
    fn new(forward: Option<RouteNextHopEntry>) -> Self {
        Self {
            forward,
            connected: false,
            nexthop_routes: BTreeSet::new(),
            resolved_via: BTreeSet::new(),
            cyclic: false,
        }
    }
}

impl Resolver {
    pub fn new(max_passes: usize, log: Logger) -> Self {
        Self { max_passes, log }
    }

    /// Bring the resolved state of `table` up to date with its pending
    /// changes.
    pub fn resolve<P: RoutePrefix>(
        &self,
        table: &mut RouteTable<P>,
    ) -> ResolutionStats {
        let mut stats = ResolutionStats {
            converged: true,
            ..Default::default()
        };
        let dirty = table.take_dirty();
        if dirty.is_empty() {
            return stats;
        }

        let affected = affected_routes(table, &dirty);
        stats.affected = affected.len();
        for prefix in &affected {
            if let Some(route) = table.routes.get_mut(prefix) {
                route.forward = None;
                route.connected = false;
                route.nexthop_routes.clear();
                route.resolved_via.clear();
            }
        }

        let mut cyclic = BTreeSet::new();
        let mut work = affected.clone();
        while !work.is_empty() {
            if stats.passes >= self.max_passes {
                rib_log!(self.log, warn, MOD_RESOLVER,
                    "resolution did not converge, giving up";
                    "family" => P::FAMILY.to_string(),
                    "passes" => stats.passes,
                    "pending" => work.len()
                );
                stats.converged = false;
                break;
            }
            stats.passes += 1;

            let mut changed = BTreeSet::new();
            for prefix in &work {
                let Some(outcome) = self.compute(table, *prefix) else {
                    continue;
                };
                if outcome.cyclic {
                    cyclic.insert(*prefix);
                } else {
                    cyclic.remove(prefix);
                }
                let Some(route) = table.routes.get_mut(prefix) else {
                    continue;
                };
                route.nexthop_routes = outcome.nexthop_routes;
                if route.forward != outcome.forward
                    || route.connected != outcome.connected
                    || route.resolved_via != outcome.resolved_via
                {
                    route.forward = outcome.forward;
                    route.connected = outcome.connected;
                    route.resolved_via = outcome.resolved_via;
                    changed.insert(*prefix);
                }
            }
            work = dependents(table, &changed);
        }

        stats.cyclic = cyclic.len();
        stats.unresolved = affected
            .iter()
            .filter_map(|p| table.routes.get(p))
            .filter(|r| !r.is_resolved())
            .count();

        rib_log!(self.log, debug, MOD_RESOLVER, "resolution complete";
            "family" => P::FAMILY.to_string(),
            "affected" => stats.affected,
            "passes" => stats.passes,
            "unresolved" => stats.unresolved
        );
        stats
    }

    fn compute<P: RoutePrefix>(
        &self,
        table: &RouteTable<P>,
        prefix: P,
    ) -> Option<Outcome<P>> {
        let route = table.routes.get(&prefix)?;
        let (client, best) = route.best()?;

        let set = match best.action() {
            ForwardAction::Drop | ForwardAction::ToCpu => {
                return Some(Outcome::new(Some(best.clone())));
            }
            ForwardAction::NextHops(set) => set,
        };

        // Only interface subnets are connected. A client route with every
        // next hop bound to an interface is resolved but not connected.
        if set.all_resolved() {
            let mut outcome = Outcome::new(Some(best.clone()));
            outcome.connected = client == ClientId::INTERFACE_ROUTE;
            return Some(outcome);
        }

        let mut outcome = Outcome::new(None);
        let mut hops = NextHopSet::new();
        let mut to_cpu = false;
        let mut drop = false;

        for nh in set.iter() {
            let gw = match nh {
                NextHop::Resolved(_) => {
                    hops.merge(nh.clone());
                    continue;
                }
                NextHop::Unresolved(gw) => gw,
            };
            let Some(addr) = P::family_addr(gw.addr) else {
                rib_log!(self.log, debug, MOD_RESOLVER,
                    "next hop family differs from route, unresolvable";
                    "prefix" => prefix.to_string(),
                    "nexthop" => gw.addr.to_string()
                );
                continue;
            };
            let Some(target) = table.longest_match(addr) else {
                continue;
            };
            let via = target.prefix();
            outcome.nexthop_routes.insert(via);

            if via == prefix || target.resolved_via.contains(&prefix) {
                rib_log!(self.log, warn, MOD_RESOLVER,
                    "next hop resolves through the route itself";
                    "prefix" => prefix.to_string(),
                    "nexthop" => gw.addr.to_string(),
                    "via" => via.to_string()
                );
                outcome.cyclic = true;
                continue;
            }

            let Some(fwd) = target.forward() else {
                continue;
            };
            outcome.resolved_via.insert(via);
            outcome
                .resolved_via
                .extend(target.resolved_via.iter().copied());

            match fwd.action() {
                ForwardAction::Drop => drop = true,
                ForwardAction::ToCpu => to_cpu = true,
                ForwardAction::NextHops(resolved) if target.is_connected() => {
                    if let Some(intf) = resolved.iter().find_map(NextHop::intf)
                    {
                        hops.merge(NextHop::Resolved(ResolvedNextHop {
                            addr: gw.addr,
                            intf,
                            weight: gw.weight,
                            label_action: gw.label_action.clone(),
                        }));
                    }
                }
                ForwardAction::NextHops(resolved) => {
                    for child in resolved.iter() {
                        let Some(intf) = child.intf() else {
                            continue;
                        };
                        hops.merge(NextHop::Resolved(ResolvedNextHop {
                            addr: child.addr(),
                            intf,
                            weight: inherit_weight(gw.weight, child.weight()),
                            label_action: stack_labels(
                                gw.label_action.as_ref(),
                                child.label_action(),
                            ),
                        }));
                    }
                }
            }
        }

        let distance = best.admin_distance();
        let counter = best.counter_id().cloned();
        outcome.forward = if !hops.is_empty() {
            RouteNextHopEntry::new(hops, distance)
                .ok()
                .map(|e| e.with_counter_id(counter))
        } else if to_cpu {
            Some(
                RouteNextHopEntry::new_to_cpu(distance)
                    .with_counter_id(counter),
            )
        } else if drop {
            Some(RouteNextHopEntry::new_drop(distance).with_counter_id(counter))
        } else {
            None
        };
        Some(outcome)
    }
}

/// Weight of a next hop inherited through a recursive route. A weighted
/// parent scales its child's weights, an ECMP parent passes them through.
fn inherit_weight(
    parent: NextHopWeight,
    child: NextHopWeight,
) -> NextHopWeight {
    if parent == ECMP_WEIGHT {
        child
    } else {
        parent.saturating_mul(child.max(1))
    }
}

/// Label action of a next hop inherited through a recursive route.
///
/// Two PUSH actions stack: the parent's labels sit below the child's, so
/// the child's transport labels end up on top. Push stacks are listed bottom
/// first. With any other combination the parent's action wins.
fn stack_labels(
    parent: Option<&LabelForwardingAction>,
    child: Option<&LabelForwardingAction>,
) -> Option<LabelForwardingAction> {
    match (parent, child) {
        (Some(p), Some(c))
            if p.action == MplsActionCode::Push
                && c.action == MplsActionCode::Push =>
        {
            let labels =
                p.push_labels.iter().chain(&c.push_labels).copied().collect();
            Some(LabelForwardingAction::push(labels))
        }
        (Some(p), _) => Some(p.clone()),
        (None, c) => c.cloned(),
    }
}

fn covered_by<P: RoutePrefix>(dirty: &BTreeSet<P>, addr: P::Addr) -> bool {
    (0..=P::HOST_MASK).any(|len| dirty.contains(&P::with_length(addr, len)))
}

fn affected_routes<P: RoutePrefix>(
    table: &RouteTable<P>,
    dirty: &BTreeSet<P>,
) -> BTreeSet<P> {
    let mut affected: BTreeSet<P> = dirty
        .iter()
        .filter(|p| table.routes.contains_key(p))
        .copied()
        .collect();

    for (prefix, route) in &table.routes {
        if affected.contains(prefix) {
            continue;
        }
        if !route.nexthop_routes.is_disjoint(dirty) {
            affected.insert(*prefix);
            continue;
        }
        let covered = route
            .best()
            .and_then(|(_, e)| e.next_hops())
            .map(|set| {
                set.iter()
                    .filter(|nh| !nh.is_resolved())
                    .filter_map(|nh| P::family_addr(nh.addr()))
                    .any(|addr| covered_by(dirty, addr))
            })
            .unwrap_or(false);
        if covered {
            affected.insert(*prefix);
        }
    }

    loop {
        let more = dependents(table, &affected);
        let before = affected.len();
        affected.extend(more);
        if affected.len() == before {
            break;
        }
    }
    affected
}

/// Routes that looked a next hop up in any of `changed`.
fn dependents<P: RoutePrefix>(
    table: &RouteTable<P>,
    changed: &BTreeSet<P>,
) -> BTreeSet<P> {
    if changed.is_empty() {
        return BTreeSet::new();
    }
    table
        .routes
        .iter()
        .filter(|(_, r)| !r.nexthop_routes.is_disjoint(changed))
        .map(|(p, _)| *p)
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::entry::ForwardActionKind;
    use pretty_assertions::assert_eq;
    use rib_common::log::init_file_logger;
    use rib_common::{cidr, ip};
    use rib_types::{AdminDistance, InterfaceId, Prefix4, Prefix6};
    use std::net::IpAddr;

    fn resolver(name: &str) -> Resolver {
        Resolver::new(64, init_file_logger(name))
    }

    fn via(gws: &[(&str, NextHopWeight)]) -> RouteNextHopEntry {
        let set: NextHopSet = gws
            .iter()
            .map(|(gw, w)| NextHop::unresolved(gw.parse().expect("ip"), *w))
            .collect();
        RouteNextHopEntry::new(set, AdminDistance::EBGP).expect("entry")
    }

    fn connected(local: &str, intf: u32) -> RouteNextHopEntry {
        let addr: IpAddr = local.parse().expect("ip");
        let set: NextHopSet =
            vec![NextHop::resolved(addr, InterfaceId(intf), 0)].into();
        RouteNextHopEntry::new(set, AdminDistance::DIRECTLY_CONNECTED)
            .expect("entry")
    }

    fn forward_hops<P: RoutePrefix>(
        t: &RouteTable<P>,
        p: &str,
    ) -> Vec<(String, Option<u32>, NextHopWeight)> {
        let p: P = p.parse().expect("prefix");
        t.get(&p)
            .and_then(|r| r.forward())
            .and_then(|f| f.next_hops())
            .map(|set| {
                set.iter()
                    .map(|nh| {
                        let intf = nh.intf().map(|i| i.0);
                        (nh.addr().to_string(), intf, nh.weight())
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    #[test]
    fn test_resolve_through_connected() {
        let r = resolver("resolve_connected.log");
        let mut t = RouteTable::<Prefix4>::new();
        t.upsert_client_route(
            cidr!("192.0.2.0/24"),
            ClientId::INTERFACE_ROUTE,
            connected("192.0.2.1", 10),
        );
        t.upsert_client_route(
            cidr!("10.10.0.0/16"),
            ClientId::BGPD,
            via(&[("192.0.2.5", 0)]),
        );
        let stats = r.resolve(&mut t);
        assert!(stats.converged);
        assert_eq!(stats.unresolved, 0);

        let p: Prefix4 = cidr!("192.0.2.0/24");
        assert!(t.get(&p).expect("route").is_connected());
        assert_eq!(
            forward_hops(&t, "10.10.0.0/16"),
            vec![("192.0.2.5".to_string(), Some(10), 0)]
        );
    }

    #[test]
    fn test_resolve_recursively() {
        let r = resolver("resolve_recursive.log");
        let mut t = RouteTable::<Prefix4>::new();
        t.upsert_client_route(
            cidr!("10.0.0.0/24"),
            ClientId::INTERFACE_ROUTE,
            connected("10.0.0.1", 1),
        );
        t.upsert_client_route(
            cidr!("10.1.0.0/16"),
            ClientId::BGPD,
            via(&[("10.0.0.11", 0), ("10.0.0.12", 0)]),
        );
        t.upsert_client_route(
            cidr!("20.0.0.0/8"),
            ClientId::BGPD,
            via(&[("10.1.2.3", 3)]),
        );
        r.resolve(&mut t);
        assert_eq!(
            forward_hops(&t, "20.0.0.0/8"),
            vec![
                ("10.0.0.11".to_string(), Some(1), 3),
                ("10.0.0.12".to_string(), Some(1), 3),
            ]
        );
        let p: Prefix4 = cidr!("20.0.0.0/8");
        let route = t.get(&p).expect("route");
        assert!(!route.is_connected());
        assert_eq!(route.resolved_via.len(), 2);
    }

    #[test]
    fn test_unresolvable_without_match() {
        let r = resolver("resolve_unresolvable.log");
        let mut t = RouteTable::<Prefix6>::new();
        t.upsert_client_route(
            cidr!("2001:db8::/32"),
            ClientId::BGPD,
            via(&[("fd00::1", 0)]),
        );
        let stats = r.resolve(&mut t);
        assert_eq!(stats.unresolved, 1);
        let p: Prefix6 = cidr!("2001:db8::/32");
        assert!(!t.get(&p).expect("route").is_resolved());
    }

    #[test]
    fn test_cross_family_next_hop_unresolvable() {
        let r = resolver("resolve_cross_family.log");
        let mut t = RouteTable::<Prefix4>::new();
        t.upsert_client_route(
            cidr!("0.0.0.0/0"),
            ClientId::BGPD,
            via(&[("fd00::1", 0)]),
        );
        let stats = r.resolve(&mut t);
        assert_eq!(stats.unresolved, 1);
    }

    #[test]
    fn test_self_reference_is_cyclic() {
        let r = resolver("resolve_self.log");
        let mut t = RouteTable::<Prefix4>::new();
        t.upsert_client_route(
            cidr!("10.0.0.0/8"),
            ClientId::BGPD,
            via(&[("10.1.1.1", 0)]),
        );
        let stats = r.resolve(&mut t);
        assert!(stats.converged);
        assert_eq!(stats.cyclic, 1);
        assert_eq!(stats.unresolved, 1);
    }

    #[test]
    fn test_mutual_recursion_terminates() {
        let r = resolver("resolve_cycle.log");
        let mut t = RouteTable::<Prefix4>::new();
        t.upsert_client_route(
            cidr!("10.1.0.0/16"),
            ClientId::BGPD,
            via(&[("10.2.0.1", 0)]),
        );
        t.upsert_client_route(
            cidr!("10.2.0.0/16"),
            ClientId::BGPD,
            via(&[("10.1.0.1", 0)]),
        );
        let stats = r.resolve(&mut t);
        assert!(stats.converged);
        assert_eq!(stats.unresolved, 2);

        // Anchoring one side through a connected route resolves both, and
        // the other side's next hop back into the first is dropped.
        t.upsert_client_route(
            cidr!("192.0.2.0/24"),
            ClientId::INTERFACE_ROUTE,
            connected("192.0.2.1", 7),
        );
        t.upsert_client_route(
            cidr!("10.1.0.0/16"),
            ClientId::BGPD,
            via(&[("10.2.0.1", 0), ("192.0.2.9", 0)]),
        );
        let stats = r.resolve(&mut t);
        assert!(stats.converged);
        assert_eq!(stats.unresolved, 0);
        assert_eq!(
            forward_hops(&t, "10.1.0.0/16"),
            vec![("192.0.2.9".to_string(), Some(7), 0)]
        );
        assert_eq!(
            forward_hops(&t, "10.2.0.0/16"),
            vec![("192.0.2.9".to_string(), Some(7), 0)]
        );
    }

    #[test]
    fn test_drop_and_cpu_propagate() {
        let r = resolver("resolve_actions.log");
        let mut t = RouteTable::<Prefix4>::new();
        t.upsert_client_route(
            cidr!("10.0.0.0/8"),
            ClientId::STATIC_ROUTE,
            RouteNextHopEntry::new_to_cpu(AdminDistance::STATIC_ROUTE),
        );
        t.upsert_client_route(
            cidr!("20.0.0.0/8"),
            ClientId::BGPD,
            via(&[("10.1.1.1", 0)]),
        );
        r.resolve(&mut t);
        let p: Prefix4 = cidr!("20.0.0.0/8");
        let fwd = t.get(&p).and_then(|r| r.forward()).expect("resolved");
        assert_eq!(fwd.kind(), ForwardActionKind::ToCpu);
        assert_eq!(fwd.admin_distance(), AdminDistance::EBGP);
    }

    #[test]
    fn test_incremental_update_on_connected_change() {
        let r = resolver("resolve_incremental.log");
        let mut t = RouteTable::<Prefix4>::new();
        t.upsert_client_route(
            cidr!("10.10.0.0/16"),
            ClientId::BGPD,
            via(&[("192.0.2.5", 0)]),
        );
        r.resolve(&mut t);
        assert!(forward_hops(&t, "10.10.0.0/16").is_empty());

        t.upsert_client_route(
            cidr!("192.0.2.0/24"),
            ClientId::INTERFACE_ROUTE,
            connected("192.0.2.1", 10),
        );
        let stats = r.resolve(&mut t);
        assert_eq!(stats.affected, 2);
        assert_eq!(forward_hops(&t, "10.10.0.0/16").len(), 1);

        t.remove_client_route(cidr!("192.0.2.0/24"), ClientId::INTERFACE_ROUTE);
        r.resolve(&mut t);
        assert!(forward_hops(&t, "10.10.0.0/16").is_empty());

        // Nothing pending, nothing recomputed.
        assert_eq!(r.resolve(&mut t).affected, 0);
    }

    #[test]
    fn test_label_inherited_from_parent() {
        let r = resolver("resolve_labels.log");
        let mut t = RouteTable::<Prefix4>::new();
        t.upsert_client_route(
            cidr!("10.0.0.0/24"),
            ClientId::INTERFACE_ROUTE,
            connected("10.0.0.1", 1),
        );
        let set: NextHopSet = vec![NextHop::unresolved(ip!("10.0.0.9"), 0)
            .with_label_action(Some(LabelForwardingAction::push(vec![100])))]
        .into();
        t.upsert_client_route(
            cidr!("30.0.0.0/8"),
            ClientId::BGPD,
            RouteNextHopEntry::new(set, AdminDistance::EBGP).expect("entry"),
        );
        r.resolve(&mut t);
        let p: Prefix4 = cidr!("30.0.0.0/8");
        let fwd = t.get(&p).and_then(|r| r.forward()).expect("resolved");
        let nh = fwd.next_hops().and_then(|s| s.iter().next()).expect("nh");
        assert_eq!(
            nh.label_action(),
            Some(&LabelForwardingAction::push(vec![100]))
        );
    }

    #[test]
    fn test_push_labels_stack_through_recursion() {
        let r = resolver("resolve_label_stack.log");
        let mut t = RouteTable::<Prefix4>::new();
        t.upsert_client_route(
            cidr!("10.0.0.0/24"),
            ClientId::INTERFACE_ROUTE,
            connected("10.0.0.1", 1),
        );
        let transport: NextHopSet = vec![NextHop::unresolved(
            ip!("10.0.0.9"),
            0,
        )
        .with_label_action(Some(LabelForwardingAction::push(vec![200])))]
        .into();
        t.upsert_client_route(
            cidr!("1.1.1.1/32"),
            ClientId::BGPD,
            RouteNextHopEntry::new(transport, AdminDistance::EBGP)
                .expect("entry"),
        );
        let service: NextHopSet = vec![NextHop::unresolved(
            ip!("1.1.1.1"),
            0,
        )
        .with_label_action(Some(LabelForwardingAction::push(vec![100])))]
        .into();
        t.upsert_client_route(
            cidr!("40.0.0.0/8"),
            ClientId::BGPD,
            RouteNextHopEntry::new(service, AdminDistance::EBGP)
                .expect("entry"),
        );
        r.resolve(&mut t);

        let p: Prefix4 = cidr!("40.0.0.0/8");
        let fwd = t.get(&p).and_then(|r| r.forward()).expect("resolved");
        let nh = fwd.next_hops().and_then(|s| s.iter().next()).expect("nh");
        let gw: IpAddr = ip!("10.0.0.9");
        assert_eq!(nh.addr(), gw);
        assert_eq!(
            nh.label_action(),
            Some(&LabelForwardingAction::push(vec![100, 200]))
        );
    }

    #[test]
    fn test_interface_bound_client_route_is_not_connected() {
        let r = resolver("resolve_interface_bound.log");
        let mut t = RouteTable::<Prefix6>::new();
        let set: NextHopSet = vec![
            NextHop::resolved(ip!("fe80::1"), InterfaceId(4), 0),
            NextHop::resolved(ip!("fe80::2"), InterfaceId(5), 0),
        ]
        .into();
        t.upsert_client_route(
            cidr!("2001:db8::/32"),
            ClientId::BGPD,
            RouteNextHopEntry::new(set, AdminDistance::EBGP).expect("entry"),
        );
        t.upsert_client_route(
            cidr!("2001:db9::/32"),
            ClientId::BGPD,
            via(&[("2001:db8::7", 0)]),
        );
        let stats = r.resolve(&mut t);
        assert_eq!(stats.unresolved, 0);

        let p: Prefix6 = cidr!("2001:db8::/32");
        let bgp = t.get(&p).expect("route");
        assert!(bgp.is_resolved());
        assert!(!bgp.is_connected());

        // The recursive route takes every path of the route it resolves
        // through, not the gateway bound to the first interface.
        assert_eq!(
            forward_hops(&t, "2001:db9::/32"),
            vec![
                ("fe80::1".to_string(), Some(4), 0),
                ("fe80::2".to_string(), Some(5), 0),
            ]
        );
    }

    #[test]
    fn test_pass_limit() {
        let r = Resolver::new(1, init_file_logger("resolve_limit.log"));
        let mut t = RouteTable::<Prefix4>::new();
        t.upsert_client_route(
            cidr!("10.10.0.0/16"),
            ClientId::BGPD,
            via(&[("192.0.2.5", 0)]),
        );
        t.upsert_client_route(
            cidr!("192.0.2.0/24"),
            ClientId::INTERFACE_ROUTE,
            connected("192.0.2.1", 10),
        );
        // The recursive route sorts first and needs a second pass.
        let stats = r.resolve(&mut t);
        assert!(!stats.converged);
        assert_eq!(stats.unresolved, 1);
    }
}
