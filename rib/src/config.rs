// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::error::Error;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settings consulted when next hops are normalized for the FIB.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct EcmpConfig {
    /// Upper bound on the total weight of a normalized next-hop set.
    pub max_ecmp_width: u64,

    /// Rescale UCMP groups whose total weight falls between the wide ECMP
    /// threshold and `max_ecmp_width` onto exactly `max_ecmp_width` paths.
    pub wide_ecmp: bool,
}

impl Default for EcmpConfig {
    fn default() -> Self {
        Self {
            max_ecmp_width: 64,
            wide_ecmp: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RibConfig {
    pub ecmp: EcmpConfig,

    /// Bound on resolver passes per update. Hitting it leaves the remaining
    /// routes unresolved and is logged.
    pub max_resolution_passes: usize,
}

impl Default for RibConfig {
    fn default() -> Self {
        Self {
            ecmp: EcmpConfig::default(),
            max_resolution_passes: 64,
        }
    }
}

impl RibConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path)?;
        let cfg: RibConfig = serde_json::from_str(&raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.ecmp.max_ecmp_width == 0 {
            return Err(Error::Config(
                "max_ecmp_width must be at least 1".into(),
            ));
        }
        if self.max_resolution_passes == 0 {
            return Err(Error::Config(
                "max_resolution_passes must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
