// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per family route tables and the per VRF pair of them.

use crate::bestpath::best_entry;
use crate::config::EcmpConfig;
use crate::entry::{ForwardActionKind, RouteNextHopEntry};
use crate::nexthop::{NextHop, NextHopSet};
use rib_types::{
    AclLookupClass, AdminDistance, ClientId, Prefix, Prefix4, Prefix6,
    RouteCounterId, RoutePrefix,
};
use serde::Serialize;
use slog::Logger;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

/// Everything the RIB knows about one prefix.
#[derive(Debug, Clone)]
pub struct RouteEntry<P: RoutePrefix> {
    prefix: P,
    clients: BTreeMap<ClientId, RouteNextHopEntry>,
    class_id: Option<AclLookupClass>,

    /// Resolved forwarding state, `None` while unresolved.
    pub(crate) forward: Option<RouteNextHopEntry>,
    pub(crate) connected: bool,

    /// Routes the last resolution looked next hops up in.
    pub(crate) nexthop_routes: BTreeSet<P>,
    /// Every route the resolved forwarding state transitively came from.
    pub(crate) resolved_via: BTreeSet<P>,
}

// Resolution bookkeeping is derived state and not compared.
impl<P: RoutePrefix> PartialEq for RouteEntry<P> {
    fn eq(&self, other: &Self) -> bool {
        self.prefix == other.prefix
            && self.clients == other.clients
            && self.class_id == other.class_id
            && self.forward == other.forward
            && self.connected == other.connected
    }
}

impl<P: RoutePrefix> Eq for RouteEntry<P> {}

impl<P: RoutePrefix> RouteEntry<P> {
    pub fn new(prefix: P) -> Self {
        Self {
            prefix,
            clients: BTreeMap::new(),
            class_id: None,
            forward: None,
            connected: false,
            nexthop_routes: BTreeSet::new(),
            resolved_via: BTreeSet::new(),
        }
    }

    pub fn prefix(&self) -> P {
        self.prefix
    }

    pub fn clients(&self) -> &BTreeMap<ClientId, RouteNextHopEntry> {
        &self.clients
    }

    pub fn entry_for(&self, client: ClientId) -> Option<&RouteNextHopEntry> {
        self.clients.get(&client)
    }

    pub fn has_client(&self, client: ClientId) -> bool {
        self.clients.contains_key(&client)
    }

    /// The winning client entry.
    pub fn best(&self) -> Option<(ClientId, &RouteNextHopEntry)> {
        best_entry(&self.clients)
    }

    pub fn forward(&self) -> Option<&RouteNextHopEntry> {
        self.forward.as_ref()
    }

    pub fn is_resolved(&self) -> bool {
        self.forward.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn class_id(&self) -> Option<AclLookupClass> {
        self.class_id
    }

    pub fn details(&self, cfg: &EcmpConfig, log: &Logger) -> RouteDetails {
        let best = self.best();
        RouteDetails {
            prefix: self.prefix.into(),
            resolved: self.is_resolved(),
            connected: self.connected,
            best_client: best.map(|(c, _)| c),
            admin_distance: best.map(|(_, e)| e.admin_distance()),
            action: self.forward.as_ref().map(RouteNextHopEntry::kind),
            next_hops: self
                .forward
                .as_ref()
                .map(|f| f.normalized_next_hops(cfg, log).into())
                .unwrap_or_default(),
            clients: self.clients.clone(),
            class_id: self.class_id,
            counter_id: self
                .forward
                .as_ref()
                .and_then(|f| f.counter_id().cloned()),
        }
    }
}

/// Programmable state of one resolved prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FibRoute {
    pub action: ForwardActionKind,
    pub next_hops: NextHopSet,
    pub admin_distance: AdminDistance,
    pub connected: bool,
    pub class_id: Option<AclLookupClass>,
    pub counter_id: Option<RouteCounterId>,
}

/// The resolved routes of one family, as handed to the FIB callback.
pub type ForwardingMap<P> = BTreeMap<P, FibRoute>;

/// A route as shown to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteDetails {
    pub prefix: Prefix,
    pub resolved: bool,
    pub connected: bool,
    pub best_client: Option<ClientId>,
    pub admin_distance: Option<AdminDistance>,
    pub action: Option<ForwardActionKind>,
    /// Normalized forwarding next hops.
    pub next_hops: Vec<NextHop>,
    pub clients: BTreeMap<ClientId, RouteNextHopEntry>,
    pub class_id: Option<AclLookupClass>,
    pub counter_id: Option<RouteCounterId>,
}

/// Routes of one address family keyed by canonical prefix.
#[derive(Debug, Clone)]
pub struct RouteTable<P: RoutePrefix> {
    pub(crate) routes: BTreeMap<P, RouteEntry<P>>,
    /// Number of routes per prefix length, so lookups only probe lengths
    /// that exist.
    lengths: BTreeMap<u8, usize>,
    /// Prefixes added, changed or removed since the last resolution.
    dirty: BTreeSet<P>,
}

impl<P: RoutePrefix> Default for RouteTable<P> {
    fn default() -> Self {
        Self {
            routes: BTreeMap::new(),
            lengths: BTreeMap::new(),
            dirty: BTreeSet::new(),
        }
    }
}

impl<P: RoutePrefix> PartialEq for RouteTable<P> {
    fn eq(&self, other: &Self) -> bool {
        self.routes == other.routes
    }
}

impl<P: RoutePrefix> Eq for RouteTable<P> {}

fn canonical<P: RoutePrefix>(prefix: P) -> P {
    P::with_length(prefix.addr(), prefix.length())
}

fn same_entry(a: &RouteNextHopEntry, b: &RouteNextHopEntry) -> bool {
    a == b && a.counter_id() == b.counter_id()
}

impl<P: RoutePrefix> RouteTable<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RouteEntry<P>> {
        self.routes.values()
    }

    pub fn get(&self, prefix: &P) -> Option<&RouteEntry<P>> {
        self.routes.get(&canonical(*prefix))
    }

    /// The most specific route covering `addr`, resolved or not.
    pub fn longest_match(&self, addr: P::Addr) -> Option<&RouteEntry<P>> {
        self.lengths
            .keys()
            .rev()
            .find_map(|len| self.routes.get(&P::with_length(addr, *len)))
    }

    /// Set `client`'s opinion about `prefix`. Returns whether anything
    /// changed.
    pub fn upsert_client_route(
        &mut self,
        prefix: P,
        client: ClientId,
        entry: RouteNextHopEntry,
    ) -> bool {
        let prefix = canonical(prefix);
        let route = match self.routes.entry(prefix) {
            Entry::Vacant(v) => {
                *self.lengths.entry(prefix.length()).or_default() += 1;
                v.insert(RouteEntry::new(prefix))
            }
            Entry::Occupied(o) => o.into_mut(),
        };
        let changed = match route.clients.get(&client) {
            Some(existing) => !same_entry(existing, &entry),
            None => true,
        };
        if changed {
            route.clients.insert(client, entry);
            self.dirty.insert(prefix);
        }
        changed
    }

    /// Withdraw `client`'s opinion about `prefix`. The prefix disappears
    /// with its last client.
    pub fn remove_client_route(
        &mut self,
        prefix: P,
        client: ClientId,
    ) -> Option<RouteNextHopEntry> {
        let prefix = canonical(prefix);
        let route = self.routes.get_mut(&prefix)?;
        let removed = route.clients.remove(&client)?;
        if route.clients.is_empty() {
            self.routes.remove(&prefix);
            if let Entry::Occupied(mut count) =
                self.lengths.entry(prefix.length())
            {
                *count.get_mut() -= 1;
                if *count.get() == 0 {
                    count.remove();
                }
            }
        }
        self.dirty.insert(prefix);
        Some(removed)
    }

    pub fn prefixes_of(&self, client: ClientId) -> Vec<P> {
        self.routes
            .values()
            .filter(|r| r.has_client(client))
            .map(|r| r.prefix)
            .collect()
    }

    /// Make `client`'s routes exactly `desired`. Returns how many routes
    /// were upserted and how many removed.
    pub fn sync_client(
        &mut self,
        client: ClientId,
        desired: BTreeMap<P, RouteNextHopEntry>,
    ) -> (usize, usize) {
        let desired: BTreeMap<P, RouteNextHopEntry> = desired
            .into_iter()
            .map(|(p, e)| (canonical(p), e))
            .collect();
        let mut removed = 0;
        for prefix in self.prefixes_of(client) {
            if !desired.contains_key(&prefix)
                && self.remove_client_route(prefix, client).is_some()
            {
                removed += 1;
            }
        }
        let mut upserted = 0;
        for (prefix, entry) in desired {
            if self.upsert_client_route(prefix, client, entry) {
                upserted += 1;
            }
        }
        (upserted, removed)
    }

    /// Tag a route with an ACL lookup class. Returns false if the prefix is
    /// not in the table.
    pub fn set_class_id(
        &mut self,
        prefix: P,
        class_id: Option<AclLookupClass>,
    ) -> bool {
        match self.routes.get_mut(&canonical(prefix)) {
            Some(route) => {
                route.class_id = class_id;
                true
            }
            None => false,
        }
    }

    pub(crate) fn take_dirty(&mut self) -> BTreeSet<P> {
        std::mem::take(&mut self.dirty)
    }

    pub(crate) fn mark_all_dirty(&mut self) {
        self.dirty.extend(self.routes.keys().copied());
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn forwarding_map(
        &self,
        cfg: &EcmpConfig,
        log: &Logger,
    ) -> ForwardingMap<P> {
        self.routes
            .values()
            .filter_map(|route| {
                let fwd = route.forward.as_ref()?;
                Some((
                    route.prefix,
                    FibRoute {
                        action: fwd.kind(),
                        next_hops: fwd.normalized_next_hops(cfg, log),
                        admin_distance: fwd.admin_distance(),
                        connected: route.connected,
                        class_id: route.class_id,
                        counter_id: fwd.counter_id().cloned(),
                    },
                ))
            })
            .collect()
    }
}

/// The IPv4 and IPv6 tables of one VRF.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VrfTables {
    pub v4: RouteTable<Prefix4>,
    pub v6: RouteTable<Prefix6>,
}

impl VrfTables {
    pub fn len(&self) -> usize {
        self.v4.len() + self.v6.len()
    }

    pub fn is_empty(&self) -> bool {
        self.v4.is_empty() && self.v6.is_empty()
    }

    pub fn upsert_client_route(
        &mut self,
        prefix: Prefix,
        client: ClientId,
        entry: RouteNextHopEntry,
    ) -> bool {
        match prefix {
            Prefix::V4(p) => self.v4.upsert_client_route(p, client, entry),
            Prefix::V6(p) => self.v6.upsert_client_route(p, client, entry),
        }
    }

    pub fn remove_client_route(
        &mut self,
        prefix: Prefix,
        client: ClientId,
    ) -> Option<RouteNextHopEntry> {
        match prefix {
            Prefix::V4(p) => self.v4.remove_client_route(p, client),
            Prefix::V6(p) => self.v6.remove_client_route(p, client),
        }
    }

    pub fn set_class_id(
        &mut self,
        prefix: Prefix,
        class_id: Option<AclLookupClass>,
    ) -> bool {
        match prefix {
            Prefix::V4(p) => self.v4.set_class_id(p, class_id),
            Prefix::V6(p) => self.v6.set_class_id(p, class_id),
        }
    }

    pub fn route_details(
        &self,
        prefix: Prefix,
        cfg: &EcmpConfig,
        log: &Logger,
    ) -> Option<RouteDetails> {
        match prefix {
            Prefix::V4(p) => self.v4.get(&p).map(|r| r.details(cfg, log)),
            Prefix::V6(p) => self.v6.get(&p).map(|r| r.details(cfg, log)),
        }
    }

    /// Details of the most specific route covering `addr`.
    pub fn longest_match(
        &self,
        addr: IpAddr,
        cfg: &EcmpConfig,
        log: &Logger,
    ) -> Option<RouteDetails> {
        match addr {
            IpAddr::V4(a) => {
                self.v4.longest_match(a).map(|r| r.details(cfg, log))
            }
            IpAddr::V6(a) => {
                self.v6.longest_match(a).map(|r| r.details(cfg, log))
            }
        }
    }

    pub fn details(
        &self,
        cfg: &EcmpConfig,
        log: &Logger,
    ) -> Vec<RouteDetails> {
        self.v4
            .iter()
            .map(|r| r.details(cfg, log))
            .chain(self.v6.iter().map(|r| r.details(cfg, log)))
            .collect()
    }
}
