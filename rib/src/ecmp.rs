// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fitting weighted next-hop groups onto a fixed number of hardware paths.

use crate::config::EcmpConfig;
use crate::log::rib_log;
use crate::nexthop::{NextHopSet, NextHopWeight};
use crate::MOD_ECMP;
use slog::Logger;
use std::collections::BTreeMap;
use std::net::IpAddr;

/// UCMP groups whose total weight is at or below this are never rescaled
/// for wide ECMP.
pub const MIN_SIZE_FOR_WIDE_ECMP: NextHopWeight = 128;

/// Normalize a next-hop set for programming.
///
/// Weights are floored at 1. A group heavier than `max_ecmp_width` is
/// scaled down to exactly that width, dropping members as needed. With wide
/// ECMP enabled a group heavier than [`MIN_SIZE_FOR_WIDE_ECMP`] but within
/// the width is scaled up onto exactly `max_ecmp_width` paths. Any other
/// group keeps its floored weights.
pub fn normalize(
    hops: &NextHopSet,
    cfg: &EcmpConfig,
    log: &Logger,
) -> NextHopSet {
    let weights: BTreeMap<IpAddr, NextHopWeight> = hops
        .iter()
        .map(|nh| (nh.addr(), nh.weight().max(1)))
        .collect();
    // Client weights span all of u64, their sum does not fit.
    let total: u128 = weights.values().map(|w| u128::from(*w)).sum();
    let width = cfg.max_ecmp_width;

    let scaled = if total > u128::from(width) {
        rib_log!(log, debug, MOD_ECMP,
            "next-hop group over ecmp width, scaling down";
            "total" => total.to_string(),
            "width" => width
        );
        scale_to_width(&weights, width)
    } else if cfg.wide_ecmp && total > u128::from(MIN_SIZE_FOR_WIDE_ECMP) {
        rib_log!(log, debug, MOD_ECMP,
            "wide ecmp group, scaling onto full width";
            "total" => total.to_string(),
            "width" => width
        );
        scale_to_width(&weights, width)
    } else {
        weights.clone()
    };
    if scaled.len() < weights.len() {
        rib_log!(log, warn, MOD_ECMP,
            "ecmp rounding dropped next hops";
            "members" => weights.len(),
            "kept" => scaled.len(),
            "width" => width
        );
    }

    hops.iter()
        .filter_map(|nh| {
            scaled.get(&nh.addr()).map(|w| nh.clone().with_weight(*w))
        })
        .collect()
}

/// Scale `weights` proportionally so they sum to exactly `width`.
///
/// Each member gets `floor(w * width / total)`, raised to 1 if that is 0.
/// A shortfall is made up one unit at a time in order of largest discarded
/// remainder (lowest key first on ties). An excess left by the raise to 1
/// is removed one unit at a time from the currently heaviest member (lowest
/// key first on ties); a member that reaches 0 is dropped.
pub fn scale_to_width<K: Ord + Clone>(
    weights: &BTreeMap<K, NextHopWeight>,
    width: NextHopWeight,
) -> BTreeMap<K, NextHopWeight> {
    let total: u128 = weights.values().map(|w| u128::from(*w)).sum();
    if total == 0 || width == 0 {
        return BTreeMap::new();
    }

    let mut scaled = BTreeMap::new();
    let mut remainders = Vec::new();
    for (key, w) in weights {
        let exact = u128::from(*w) * u128::from(width);
        let quotient = (exact / total) as NextHopWeight;
        if quotient == 0 {
            scaled.insert(key.clone(), 1);
        } else {
            scaled.insert(key.clone(), quotient);
            remainders.push((exact % total, key.clone()));
        }
    }

    let sum: u128 = scaled.values().map(|w| u128::from(*w)).sum();
    let width = u128::from(width);
    if sum < width {
        // Larger remainder first, then lower key.
        remainders.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        let deficit = (width - sum) as usize;
        for (_, key) in remainders.iter().cycle().take(deficit) {
            if let Some(w) = scaled.get_mut(key) {
                *w += 1;
            }
        }
    } else {
        for _ in 0..(sum - width) {
            let heaviest = scaled
                .iter()
                .fold(None, |best: Option<(&K, NextHopWeight)>, (k, w)| {
                    match best {
                        Some((_, bw)) if bw >= *w => best,
                        _ => Some((k, *w)),
                    }
                })
                .map(|(k, _)| k.clone());
            let Some(key) = heaviest else {
                break;
            };
            let drop_it = match scaled.get_mut(&key) {
                Some(w) => {
                    *w -= 1;
                    *w == 0
                }
                None => false,
            };
            if drop_it {
                scaled.remove(&key);
            }
        }
    }

    scaled
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::nexthop::NextHop;
    use pretty_assertions::assert_eq;
    use rib_common::log::discard_logger;
    use std::net::Ipv4Addr;

    fn ecmp(width: NextHopWeight, wide: bool) -> EcmpConfig {
        EcmpConfig {
            max_ecmp_width: width,
            wide_ecmp: wide,
        }
    }

    fn group(weights: &[NextHopWeight]) -> NextHopSet {
        weights
            .iter()
            .enumerate()
            .map(|(i, w)| {
                NextHop::unresolved(
                    Ipv4Addr::new(10, 0, 0, i as u8 + 1).into(),
                    *w,
                )
            })
            .collect()
    }

    #[test]
    fn test_five_unit_hops_onto_width_four() {
        let out = normalize(
            &group(&[1, 1, 1, 1, 1]),
            &ecmp(4, false),
            &discard_logger(),
        );
        assert_eq!(out.total_weight(), 4);
        assert_eq!(out.len(), 4);
        assert!(out.iter().all(|nh| nh.weight() == 1));
        // The first heaviest member is the one dropped.
        assert!(!out.contains(&Ipv4Addr::new(10, 0, 0, 1).into()));
    }

    #[test]
    fn test_zero_weights_floored() {
        let out = normalize(
            &group(&[0, 0, 0]),
            &ecmp(64, false),
            &discard_logger(),
        );
        assert_eq!(out.total_weight(), 3);
        assert!(out.iter().all(|nh| nh.weight() == 1));
    }

    #[test]
    fn test_within_width_untouched() {
        let out = normalize(
            &group(&[3, 5, 7]),
            &ecmp(64, true),
            &discard_logger(),
        );
        let weights: Vec<_> = out.iter().map(NextHop::weight).collect();
        assert_eq!(weights, vec![3, 5, 7]);
    }

    #[test]
    fn test_scale_down_is_exact() {
        let out = normalize(
            &group(&[50, 30, 20, 1]),
            &ecmp(64, false),
            &discard_logger(),
        );
        assert_eq!(out.total_weight(), 64);
        assert!(out.iter().all(|nh| nh.weight() >= 1));
        let weights: Vec<_> = out.iter().map(NextHop::weight).collect();
        // 50*64/101=31.68, 30*64/101=19.01, 20*64/101=12.67, raised 1
        // leaves 63, topped up by the largest remainder.
        assert_eq!(weights, vec![32, 19, 12, 1]);
    }

    #[test]
    fn test_wide_ecmp_scales_up() {
        let out = normalize(
            &group(&[100, 50]),
            &ecmp(512, true),
            &discard_logger(),
        );
        assert_eq!(out.total_weight(), 512);
        let weights: Vec<_> = out.iter().map(NextHop::weight).collect();
        assert_eq!(weights, vec![341, 171]);
    }

    #[test]
    fn test_wide_ecmp_small_group_untouched() {
        let out = normalize(
            &group(&[60, 40]),
            &ecmp(512, true),
            &discard_logger(),
        );
        assert_eq!(out.total_weight(), 100);
    }

    #[test]
    fn test_weights_near_max_do_not_overflow() {
        let out = normalize(
            &group(&[u64::MAX, u64::MAX, 1]),
            &ecmp(64, false),
            &discard_logger(),
        );
        assert_eq!(out.total_weight(), 64);
        let weights: Vec<_> = out.iter().map(NextHop::weight).collect();
        assert_eq!(weights, vec![32, 31, 1]);
    }

    #[test]
    fn test_more_members_than_width() {
        let weights: BTreeMap<u32, NextHopWeight> =
            (0..10).map(|k| (k, 1)).collect();
        let out = scale_to_width(&weights, 3);
        assert_eq!(out.values().sum::<NextHopWeight>(), 3);
        assert_eq!(out.len(), 3);
        assert!(out.values().all(|w| *w == 1));
    }
}
