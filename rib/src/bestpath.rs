// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::entry::RouteNextHopEntry;
use itertools::Itertools;
use rib_types::ClientId;

/// Choose the entry that forwards a prefix from the opinions of every
/// client announcing it.
///
/// - filter the candidates to the set with the smallest admin distance.
/// - among those, pick the entry of the numerically lowest client.
///
/// The result depends only on the set of candidates, never on the order
/// in which clients announced them.
pub fn best_entry<'a, I>(
    candidates: I,
) -> Option<(ClientId, &'a RouteNextHopEntry)>
where
    I: IntoIterator<Item = (&'a ClientId, &'a RouteNextHopEntry)>,
{
    // Lowest admin distance wins outright, much like rib priority
    // separates protocols.
    let candidates = candidates
        .into_iter()
        .min_set_by_key(|(_, entry)| entry.admin_distance());

    candidates
        .into_iter()
        .min_by_key(|(client, _)| **client)
        .map(|(client, entry)| (*client, entry))
}
