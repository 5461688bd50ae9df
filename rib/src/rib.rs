// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The RIB coordinator.
//!
//! All mutations run on a single `rib-update` thread, one at a time and in
//! submission order. A mutation takes the write lock, edits a copy of the
//! VRF's tables, resolves, and then invokes the FIB callback with the
//! forwarding maps while still holding the lock. Readers take the read lock
//! just long enough to clone the `Arc` of a VRF and then work on that
//! snapshot, so they never observe a half applied update.
//!
//! The FIB callback runs on the update thread with the write lock held. It
//! must not call back into the RIB. Any context the callback needs is
//! captured by the closure.

use crate::config::RibConfig;
use crate::entry::RouteNextHopEntry;
use crate::error::Error;
use crate::log::rib_log;
use crate::nexthop::{NextHop, NextHopSet, ECMP_WEIGHT};
use crate::resolver::Resolver;
use crate::route::{
    InterfaceRoutes, RibReconfig, StaticIp2MplsRoute,
    StaticRouteNoNextHops, StaticRouteWithNextHops, UnicastRoute,
};
use crate::table::{ForwardingMap, RouteDetails, VrfTables};
use crate::warmboot;
use crate::MOD_COORDINATOR;
use rib_common::thread::ManagedThread;
use rib_common::{lock, read_lock, write_lock};
use rib_types::{
    AclLookupClass, AdminDistance, ClientId, Prefix, Prefix4, Prefix6,
    RouterId,
};
use serde::Serialize;
use slog::Logger;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

/// Failure reported by a FIB callback. The RIB keeps its state, it is the
/// caller's job to reconcile.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct FibError {
    pub failed: Vec<Prefix>,
    pub reason: String,
}

/// Programs the forwarding state of one VRF, as seen by the update thread.
type FibFn<'a> = dyn FnMut(
        RouterId,
        &ForwardingMap<Prefix4>,
        &ForwardingMap<Prefix6>,
    ) -> Result<(), FibError>
    + Send
    + 'a;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpdateStatistics {
    pub v4_routes_added: usize,
    pub v4_routes_deleted: usize,
    pub v6_routes_added: usize,
    pub v6_routes_deleted: usize,
    pub duration: Duration,
}

impl UpdateStatistics {
    fn count(&mut self, prefix: &Prefix, added: bool) {
        match (prefix.is_v4(), added) {
            (true, true) => self.v4_routes_added += 1,
            (true, false) => self.v4_routes_deleted += 1,
            (false, true) => self.v6_routes_added += 1,
            (false, false) => self.v6_routes_deleted += 1,
        }
    }
}

/// Completion of a mutation submitted without waiting for it.
pub struct UpdateHandle {
    rx: Receiver<Result<(), Error>>,
}

impl UpdateHandle {
    pub fn wait(self) -> Result<(), Error> {
        self.rx.recv().map_err(|_| {
            Error::UpdateThread("update dropped before completion".into())
        })?
    }
}

type VrfMap = BTreeMap<RouterId, Arc<VrfTables>>;
type Job = Box<dyn FnOnce(&mut Updater) + Send>;

pub struct RoutingInformationBase {
    tables: Arc<RwLock<VrfMap>>,
    config: RibConfig,
    log: Logger,
    jobs: Mutex<Sender<Job>>,
    // Declared after `jobs` so the channel is closed before the join.
    _updater: ManagedThread,
}

impl RoutingInformationBase {
    pub fn new(config: RibConfig, log: Logger) -> Result<Self, Error> {
        config.validate()?;
        let tables = Arc::new(RwLock::new(VrfMap::new()));
        let (tx, rx) = channel::<Job>();
        let mut updater = Updater {
            tables: tables.clone(),
            resolver: Resolver::new(
                config.max_resolution_passes,
                log.clone(),
            ),
            config: config.clone(),
            log: log.clone(),
        };
        let thread = ManagedThread::spawn("rib-update", move |dropped| {
            for job in rx.iter() {
                // Jobs still queued when the RIB goes away are abandoned,
                // their callers see the completion channel close.
                if dropped.load(Ordering::Relaxed) {
                    break;
                }
                job(&mut updater);
            }
        })?;
        rib_log!(log, info, MOD_COORDINATOR, "rib started";
            "max_ecmp_width" => config.ecmp.max_ecmp_width,
            "wide_ecmp" => config.ecmp.wide_ecmp
        );
        Ok(Self {
            tables,
            config,
            log,
            jobs: Mutex::new(tx),
            _updater: thread,
        })
    }

    pub fn config(&self) -> &RibConfig {
        &self.config
    }

    fn submit<T, F>(&self, f: F) -> Result<Receiver<T>, Error>
    where
        T: Send + 'static,
        F: FnOnce(&mut Updater) -> T + Send + 'static,
    {
        let (tx, rx) = channel();
        let job: Job = Box::new(move |u| {
            let _ = tx.send(f(u));
        });
        lock!(self.jobs).send(job).map_err(|_| {
            rib_log!(self.log, error, MOD_COORDINATOR,
                "update thread has exited, dropping job"
            );
            Error::UpdateThread("update thread has exited".into())
        })?;
        Ok(rx)
    }

    fn run<T, F>(&self, f: F) -> Result<T, Error>
    where
        T: Send + 'static,
        F: FnOnce(&mut Updater) -> T + Send + 'static,
    {
        self.submit(f)?.recv().map_err(|_| {
            rib_log!(self.log, error, MOD_COORDINATOR,
                "update job dropped before completion"
            );
            Error::UpdateThread("update dropped before completion".into())
        })
    }

    /// Apply a batch of route changes from one client to one VRF.
    ///
    /// The whole batch is validated before anything is applied. With
    /// `reset_client_routes` the client's routes not in `to_add` are
    /// withdrawn, making `to_add` the client's complete set. `fib` is
    /// invoked once with the VRF's resolved routes.
    #[allow(clippy::too_many_arguments)]
    pub fn update<F>(
        &self,
        router_id: RouterId,
        client_id: ClientId,
        admin_distance: AdminDistance,
        to_add: &[UnicastRoute],
        to_delete: &[Prefix],
        reset_client_routes: bool,
        update_type: &str,
        mut fib: F,
    ) -> Result<UpdateStatistics, Error>
    where
        F: FnMut(
                RouterId,
                &ForwardingMap<Prefix4>,
                &ForwardingMap<Prefix6>,
            ) -> Result<(), FibError>
            + Send
            + 'static,
    {
        let to_add = to_add.to_vec();
        let to_delete = to_delete.to_vec();
        let update_type = update_type.to_string();
        self.run(move |u| {
            u.update(
                UpdateRequest {
                    router_id,
                    client_id,
                    admin_distance,
                    to_add,
                    to_delete,
                    reset_client_routes,
                    update_type,
                },
                &mut fib,
            )
        })?
    }

    /// Replace the configuration derived routes: interface subnets, the
    /// IPv6 link-local route and static routes. VRFs that no longer appear
    /// in the configuration lose these routes but are kept.
    pub fn reconfigure<F>(
        &self,
        interface_routes: &InterfaceRoutes,
        static_routes_with_next_hops: &[StaticRouteWithNextHops],
        static_routes_to_null: &[StaticRouteNoNextHops],
        static_routes_to_cpu: &[StaticRouteNoNextHops],
        fib: F,
    ) -> Result<(), Error>
    where
        F: FnMut(
                RouterId,
                &ForwardingMap<Prefix4>,
                &ForwardingMap<Prefix6>,
            ) -> Result<(), FibError>
            + Send
            + 'static,
    {
        self.reconfigure_with(
            ReconfigRequest {
                interface_routes: interface_routes.clone(),
                with_next_hops: static_routes_with_next_hops.to_vec(),
                to_null: static_routes_to_null.to_vec(),
                to_cpu: static_routes_to_cpu.to_vec(),
                ip2mpls: Vec::new(),
            },
            fib,
        )
    }

    /// [`Self::reconfigure`] from a configuration document, including
    /// static MPLS push routes.
    pub fn reconfigure_from<F>(
        &self,
        cfg: &RibReconfig,
        fib: F,
    ) -> Result<(), Error>
    where
        F: FnMut(
                RouterId,
                &ForwardingMap<Prefix4>,
                &ForwardingMap<Prefix6>,
            ) -> Result<(), FibError>
            + Send
            + 'static,
    {
        self.reconfigure_with(
            ReconfigRequest {
                interface_routes: cfg.interface_route_map(),
                with_next_hops: cfg.static_routes_with_next_hops.clone(),
                to_null: cfg.static_routes_to_null.clone(),
                to_cpu: cfg.static_routes_to_cpu.clone(),
                ip2mpls: cfg.static_ip2mpls_routes.clone(),
            },
            fib,
        )
    }

    fn reconfigure_with<F>(
        &self,
        req: ReconfigRequest,
        mut fib: F,
    ) -> Result<(), Error>
    where
        F: FnMut(
                RouterId,
                &ForwardingMap<Prefix4>,
                &ForwardingMap<Prefix6>,
            ) -> Result<(), FibError>
            + Send
            + 'static,
    {
        self.run(move |u| u.reconfigure(req, &mut fib))?
    }

    /// Tag routes with an ACL lookup class, or clear the tag with `None`.
    /// Prefixes not in the VRF are skipped.
    pub fn set_class_id<F>(
        &self,
        router_id: RouterId,
        prefixes: &[Prefix],
        class_id: Option<AclLookupClass>,
        fib: F,
    ) -> Result<(), Error>
    where
        F: FnMut(
                RouterId,
                &ForwardingMap<Prefix4>,
                &ForwardingMap<Prefix6>,
            ) -> Result<(), FibError>
            + Send
            + 'static,
    {
        self.set_class_id_async(router_id, prefixes, class_id, fib)?
            .wait()
    }

    pub fn set_class_id_async<F>(
        &self,
        router_id: RouterId,
        prefixes: &[Prefix],
        class_id: Option<AclLookupClass>,
        mut fib: F,
    ) -> Result<UpdateHandle, Error>
    where
        F: FnMut(
                RouterId,
                &ForwardingMap<Prefix4>,
                &ForwardingMap<Prefix6>,
            ) -> Result<(), FibError>
            + Send
            + 'static,
    {
        let prefixes = prefixes.to_vec();
        let rx = self.submit(move |u| {
            u.set_class_id(router_id, prefixes, class_id, &mut fib)
        })?;
        Ok(UpdateHandle { rx })
    }

    /// Create an empty VRF if it does not exist yet. Returns whether it was
    /// created.
    pub fn ensure_vrf(&self, router_id: RouterId) -> Result<bool, Error> {
        self.run(move |u| u.ensure_vrf(router_id))
    }

    /// Block until every mutation submitted so far has completed.
    pub fn wait_for_rib_updates(&self) -> Result<(), Error> {
        self.run(|_| ())
    }

    pub fn get_vrf_list(&self) -> Vec<RouterId> {
        read_lock!(self.tables).keys().copied().collect()
    }

    /// A consistent snapshot of one VRF's tables.
    pub fn snapshot(&self, router_id: RouterId) -> Option<Arc<VrfTables>> {
        read_lock!(self.tables).get(&router_id).cloned()
    }

    pub fn get_route_table_details(
        &self,
        router_id: RouterId,
    ) -> Option<Vec<RouteDetails>> {
        let vrf = self.snapshot(router_id)?;
        Some(vrf.details(&self.config.ecmp, &self.log))
    }

    pub fn get_route_details(
        &self,
        router_id: RouterId,
        prefix: Prefix,
    ) -> Option<RouteDetails> {
        let mut prefix = prefix;
        prefix.unset_host_bits();
        self.snapshot(router_id)?.route_details(
            prefix,
            &self.config.ecmp,
            &self.log,
        )
    }

    pub fn longest_match(
        &self,
        router_id: RouterId,
        addr: IpAddr,
    ) -> Option<RouteDetails> {
        self.snapshot(router_id)?
            .longest_match(addr, &self.config.ecmp, &self.log)
    }

    /// Serialize every VRF for warm boot.
    pub fn to_dynamic(&self) -> Result<serde_json::Value, Error> {
        warmboot::to_dynamic(&read_lock!(self.tables))
    }

    /// Rebuild a RIB from [`Self::to_dynamic`] output and resolve it. The
    /// FIB is not programmed, the next mutation of a VRF does that.
    pub fn from_dynamic(
        doc: &serde_json::Value,
        config: RibConfig,
        log: Logger,
    ) -> Result<Self, Error> {
        let restored = warmboot::from_dynamic(doc, &log)?;
        let rib = Self::new(config, log)?;
        rib.run(move |u| u.restore(restored))?;
        Ok(rib)
    }
}

impl PartialEq for RoutingInformationBase {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.tables, &other.tables) {
            return true;
        }
        *read_lock!(self.tables) == *read_lock!(other.tables)
    }
}

struct UpdateRequest {
    router_id: RouterId,
    client_id: ClientId,
    admin_distance: AdminDistance,
    to_add: Vec<UnicastRoute>,
    to_delete: Vec<Prefix>,
    reset_client_routes: bool,
    update_type: String,
}

struct ReconfigRequest {
    interface_routes: InterfaceRoutes,
    with_next_hops: Vec<StaticRouteWithNextHops>,
    to_null: Vec<StaticRouteNoNextHops>,
    to_cpu: Vec<StaticRouteNoNextHops>,
    ip2mpls: Vec<StaticIp2MplsRoute>,
}

/// One client's desired routes in one VRF.
#[derive(Default)]
struct ClientRoutes {
    v4: BTreeMap<Prefix4, RouteNextHopEntry>,
    v6: BTreeMap<Prefix6, RouteNextHopEntry>,
}

impl ClientRoutes {
    fn insert(&mut self, prefix: Prefix, entry: RouteNextHopEntry) {
        match prefix {
            Prefix::V4(p) => {
                self.v4.insert(p, entry);
            }
            Prefix::V6(p) => {
                self.v6.insert(p, entry);
            }
        }
    }
}

/// Configuration derived routes of one VRF, by client.
#[derive(Default)]
struct ConfigRoutes {
    interface: ClientRoutes,
    link_local: ClientRoutes,
    statics: ClientRoutes,
}

impl ReconfigRequest {
    fn config_routes(
        &self,
    ) -> Result<BTreeMap<RouterId, ConfigRoutes>, Error> {
        let mut out: BTreeMap<RouterId, ConfigRoutes> = BTreeMap::new();

        for (router_id, routes) in &self.interface_routes {
            let vrf = out.entry(*router_id).or_default();
            for (prefix, (intf, addr)) in routes {
                if prefix.is_v4() != addr.is_ipv4() {
                    return Err(Error::InvalidRoute(format!(
                        "interface route {prefix} with address {addr}"
                    )));
                }
                let set: NextHopSet =
                    vec![NextHop::resolved(*addr, *intf, ECMP_WEIGHT)].into();
                let entry = RouteNextHopEntry::new(
                    set,
                    AdminDistance::DIRECTLY_CONNECTED,
                )?;
                let mut prefix = *prefix;
                prefix.unset_host_bits();
                vrf.interface.insert(prefix, entry);
            }
            if !routes.is_empty() {
                vrf.link_local.insert(
                    Prefix6::link_local().into(),
                    RouteNextHopEntry::new_to_cpu(
                        AdminDistance::DIRECTLY_CONNECTED,
                    ),
                );
            }
        }

        for route in &self.with_next_hops {
            let entry = RouteNextHopEntry::from_static_route(route)?;
            out.entry(route.router_id)
                .or_default()
                .statics
                .insert(route.prefix, entry);
        }
        for route in &self.to_null {
            out.entry(route.router_id).or_default().statics.insert(
                route.prefix,
                RouteNextHopEntry::new_drop(AdminDistance::STATIC_ROUTE),
            );
        }
        for route in &self.to_cpu {
            out.entry(route.router_id).or_default().statics.insert(
                route.prefix,
                RouteNextHopEntry::new_to_cpu(AdminDistance::STATIC_ROUTE),
            );
        }
        for route in &self.ip2mpls {
            let entry = RouteNextHopEntry::from_static_ip2mpls_route(route)?;
            out.entry(route.router_id)
                .or_default()
                .statics
                .insert(route.prefix, entry);
        }
        Ok(out)
    }
}

/// State owned by the update thread.
struct Updater {
    tables: Arc<RwLock<VrfMap>>,
    config: RibConfig,
    resolver: Resolver,
    log: Logger,
}

impl Updater {
    fn update(
        &mut self,
        req: UpdateRequest,
        fib: &mut FibFn<'_>,
    ) -> Result<UpdateStatistics, Error> {
        let start = Instant::now();
        let client = req.client_id;

        let mut adds = Vec::with_capacity(req.to_add.len());
        for route in &req.to_add {
            let entry = RouteNextHopEntry::from_unicast_route(
                route,
                req.admin_distance,
            )?;
            entry.validate(false)?;
            let mut prefix = route.dest;
            prefix.unset_host_bits();
            adds.push((prefix, entry));
        }

        let mut tables = write_lock!(self.tables);
        let vrf = tables.get_mut(&req.router_id).ok_or_else(|| {
            Error::NotFound(format!("vrf {} not configured", req.router_id))
        })?;
        let vrf = Arc::make_mut(vrf);
        let mut stats = UpdateStatistics::default();

        if req.reset_client_routes {
            let keep: BTreeSet<Prefix> =
                adds.iter().map(|(p, _)| *p).collect();
            let stale: Vec<Prefix> = vrf
                .v4
                .prefixes_of(client)
                .into_iter()
                .map(Prefix::from)
                .chain(
                    vrf.v6.prefixes_of(client).into_iter().map(Prefix::from),
                )
                .filter(|p| !keep.contains(p))
                .collect();
            for prefix in stale {
                if vrf.remove_client_route(prefix, client).is_some() {
                    stats.count(&prefix, false);
                }
            }
        }

        for prefix in &req.to_delete {
            let mut prefix = *prefix;
            prefix.unset_host_bits();
            if vrf.remove_client_route(prefix, client).is_some() {
                stats.count(&prefix, false);
            } else {
                rib_log!(self.log, debug, MOD_COORDINATOR,
                    "delete of route the client does not have";
                    "vrf" => req.router_id.0,
                    "client" => client.0,
                    "prefix" => prefix.to_string()
                );
            }
        }

        for (prefix, entry) in adds {
            vrf.upsert_client_route(prefix, client, entry);
            stats.count(&prefix, true);
        }

        self.resolve(req.router_id, vrf);
        self.program(req.router_id, vrf, fib)?;

        stats.duration = start.elapsed();
        rib_log!(self.log, debug, MOD_COORDINATOR, "rib update";
            "vrf" => req.router_id.0,
            "client" => client.0,
            "update_type" => req.update_type,
            "v4_added" => stats.v4_routes_added,
            "v4_deleted" => stats.v4_routes_deleted,
            "v6_added" => stats.v6_routes_added,
            "v6_deleted" => stats.v6_routes_deleted,
            "duration_us" => stats.duration.as_micros() as u64
        );
        Ok(stats)
    }

    fn reconfigure(
        &mut self,
        req: ReconfigRequest,
        fib: &mut FibFn<'_>,
    ) -> Result<(), Error> {
        let mut desired = req.config_routes()?;

        let mut tables = write_lock!(self.tables);
        let vrfs: BTreeSet<RouterId> =
            tables.keys().chain(desired.keys()).copied().collect();

        for router_id in vrfs {
            let routes = desired.remove(&router_id).unwrap_or_default();
            let vrf = Arc::make_mut(tables.entry(router_id).or_default());

            for (client, routes) in [
                (ClientId::INTERFACE_ROUTE, routes.interface),
                (ClientId::LINKLOCAL_ROUTE, routes.link_local),
                (ClientId::STATIC_ROUTE, routes.statics),
            ] {
                let (a4, r4) = vrf.v4.sync_client(client, routes.v4);
                let (a6, r6) = vrf.v6.sync_client(client, routes.v6);
                rib_log!(self.log, debug, MOD_COORDINATOR,
                    "synced config routes";
                    "vrf" => router_id.0,
                    "client" => client.0,
                    "upserted" => a4 + a6,
                    "removed" => r4 + r6
                );
            }

            self.resolve(router_id, vrf);
            self.program(router_id, vrf, fib)?;
        }
        rib_log!(self.log, info, MOD_COORDINATOR, "rib reconfigured";
            "vrfs" => tables.len()
        );
        Ok(())
    }

    fn set_class_id(
        &mut self,
        router_id: RouterId,
        prefixes: Vec<Prefix>,
        class_id: Option<AclLookupClass>,
        fib: &mut FibFn<'_>,
    ) -> Result<(), Error> {
        let mut tables = write_lock!(self.tables);
        let vrf = tables.get_mut(&router_id).ok_or_else(|| {
            Error::NotFound(format!("vrf {router_id} not configured"))
        })?;
        let vrf = Arc::make_mut(vrf);
        for prefix in prefixes {
            let mut prefix = prefix;
            prefix.unset_host_bits();
            if !vrf.set_class_id(prefix, class_id) {
                rib_log!(self.log, debug, MOD_COORDINATOR,
                    "class id for unknown route";
                    "vrf" => router_id.0,
                    "prefix" => prefix.to_string()
                );
            }
        }
        self.program(router_id, vrf, fib)
    }

    fn ensure_vrf(&mut self, router_id: RouterId) -> bool {
        let mut tables = write_lock!(self.tables);
        if tables.contains_key(&router_id) {
            return false;
        }
        tables.insert(router_id, Arc::new(VrfTables::default()));
        rib_log!(self.log, info, MOD_COORDINATOR, "created vrf";
            "vrf" => router_id.0
        );
        true
    }

    fn restore(&mut self, restored: BTreeMap<RouterId, VrfTables>) {
        let mut tables = write_lock!(self.tables);
        tables.clear();
        for (router_id, mut vrf) in restored {
            vrf.v4.mark_all_dirty();
            vrf.v6.mark_all_dirty();
            self.resolve(router_id, &mut vrf);
            tables.insert(router_id, Arc::new(vrf));
        }
    }

    fn resolve(&self, router_id: RouterId, vrf: &mut VrfTables) {
        let v4 = self.resolver.resolve(&mut vrf.v4);
        let v6 = self.resolver.resolve(&mut vrf.v6);
        if !v4.converged || !v6.converged {
            rib_log!(self.log, warn, MOD_COORDINATOR,
                "resolution hit the pass limit, some routes left unresolved";
                "vrf" => router_id.0,
                "v4_unresolved" => v4.unresolved,
                "v6_unresolved" => v6.unresolved
            );
        }
        if v4.cyclic + v6.cyclic > 0 {
            rib_log!(self.log, warn, MOD_COORDINATOR,
                "routes with next hops resolving through themselves";
                "vrf" => router_id.0,
                "count" => v4.cyclic + v6.cyclic
            );
        }
    }

    fn program(
        &self,
        router_id: RouterId,
        vrf: &VrfTables,
        fib: &mut FibFn<'_>,
    ) -> Result<(), Error> {
        let v4 = vrf.v4.forwarding_map(&self.config.ecmp, &self.log);
        let v6 = vrf.v6.forwarding_map(&self.config.ecmp, &self.log);
        fib(router_id, &v4, &v6).map_err(|e| {
            rib_log!(self.log, warn, MOD_COORDINATOR,
                "fib programming failed";
                "vrf" => router_id.0,
                "failed" => e.failed.len(),
                "reason" => e.reason.clone()
            );
            Error::HwProgrammingFailure {
                vrf: router_id,
                failed: e.failed,
                reason: e.reason,
            }
        })
    }
}
