// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Warm boot state document.
//!
//! Only client entries and class IDs are persisted. Forwarding state is
//! derived, it is recomputed by resolution after a restore.

use crate::entry::RouteNextHopEntry;
use crate::error::Error;
use crate::log::rib_log;
use crate::table::{RouteTable, VrfTables};
use crate::MOD_WARMBOOT;
use rib_types::{AclLookupClass, ClientId, RoutePrefix, RouterId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use slog::Logger;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RibDoc {
    vrfs: Vec<VrfDoc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VrfDoc {
    router_id: RouterId,
    #[serde(default)]
    v4: Vec<RouteDoc>,
    #[serde(default)]
    v6: Vec<RouteDoc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RouteDoc {
    prefix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    class_id: Option<AclLookupClass>,
    clients: BTreeMap<ClientId, Value>,
}

pub fn to_dynamic(
    tables: &BTreeMap<RouterId, Arc<VrfTables>>,
) -> Result<Value, Error> {
    let mut vrfs = Vec::with_capacity(tables.len());
    for (router_id, vrf) in tables {
        vrfs.push(VrfDoc {
            router_id: *router_id,
            v4: table_to_doc(&vrf.v4)?,
            v6: table_to_doc(&vrf.v6)?,
        });
    }
    Ok(serde_json::to_value(RibDoc { vrfs })?)
}

/// Rebuild client entries and class IDs from a document produced by
/// [`to_dynamic`]. Every restored prefix is left pending resolution.
pub fn from_dynamic(
    doc: &Value,
    log: &Logger,
) -> Result<BTreeMap<RouterId, VrfTables>, Error> {
    let doc = RibDoc::deserialize(doc)?;
    let mut tables = BTreeMap::new();
    for vrf in doc.vrfs {
        let mut restored = VrfTables::default();
        doc_to_table(vrf.v4, &mut restored.v4, log)?;
        doc_to_table(vrf.v6, &mut restored.v6, log)?;
        rib_log!(log, info, MOD_WARMBOOT, "restored vrf";
            "vrf" => vrf.router_id.0,
            "routes" => restored.len()
        );
        tables.insert(vrf.router_id, restored);
    }
    Ok(tables)
}

fn table_to_doc<P: RoutePrefix>(
    table: &RouteTable<P>,
) -> Result<Vec<RouteDoc>, Error> {
    let mut routes = Vec::with_capacity(table.len());
    for route in table.iter() {
        let mut clients = BTreeMap::new();
        for (client, entry) in route.clients() {
            clients.insert(*client, entry.to_dynamic()?);
        }
        routes.push(RouteDoc {
            prefix: route.prefix().to_string(),
            class_id: route.class_id(),
            clients,
        });
    }
    Ok(routes)
}

fn doc_to_table<P: RoutePrefix>(
    routes: Vec<RouteDoc>,
    table: &mut RouteTable<P>,
    log: &Logger,
) -> Result<(), Error> {
    for route in routes {
        let prefix: P = route.prefix.parse().map_err(|e| {
            Error::InvalidRoute(format!("prefix {}: {e}", route.prefix))
        })?;
        if route.clients.is_empty() {
            rib_log!(log, warn, MOD_WARMBOOT,
                "skipping route without clients";
                "prefix" => route.prefix
            );
            continue;
        }
        for (client, value) in &route.clients {
            let entry = RouteNextHopEntry::from_dynamic(value)?;
            table.upsert_client_route(prefix, *client, entry);
        }
        table.set_class_id(prefix, route.class_id);
    }
    Ok(())
}
