// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use rib_types::{Prefix, RouterId};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid route: {0}")]
    InvalidRoute(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(
        "hw programming failure in vrf {vrf} ({} prefixes): {reason}",
        .failed.len()
    )]
    HwProgrammingFailure {
        vrf: RouterId,
        failed: Vec<Prefix>,
        reason: String,
    },

    #[error("serialization error {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error {0}")]
    Io(#[from] std::io::Error),

    #[error("config error {0}")]
    Config(String),

    #[error("rib update thread: {0}")]
    UpdateThread(String),
}
