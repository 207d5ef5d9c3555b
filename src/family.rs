//! The family predicate: geographic kinship between two gazetteer entries.

use std::collections::BTreeMap;

use geo::{Distance, Haversine};

use crate::config::NEAR_DISTANCE;
use crate::location::{LocationKind, Place};

/// Knobs for [`is_family`]. The defaults match the most permissive use:
/// siblings allowed, the toponym-length gate on, the town population gate
/// off.
#[derive(Clone, Copy, Debug)]
pub struct FamilyOptions {
    /// Allow same-kind pairs (two towns, two adm1s, ...) to be family.
    pub siblings: bool,
    /// For adm1/town pairs, only accept a strict parent-child link when
    /// both surface forms are at least 7 characters. Short names collide
    /// too often between levels.
    pub consider_toponym_length: bool,
    /// For town/town pairs, require both populations to be at least 5000.
    pub consider_population: bool,
}

impl Default for FamilyOptions {
    fn default() -> Self {
        FamilyOptions {
            siblings: true,
            consider_toponym_length: true,
            consider_population: false,
        }
    }
}

/// Are two towns within [`NEAR_DISTANCE`] of each other?
///
/// Only towns have a point coordinate, so everything else is never "near".
pub fn is_near(a: &Place, b: &Place) -> bool {
    if a.kind != LocationKind::Town || b.kind != LocationKind::Town {
        return false;
    }
    match (a.coordinate, b.coordinate) {
        (Some(ca), Some(cb)) => {
            Haversine::distance(ca.to_point(), cb.to_point()) < NEAR_DISTANCE
        }
        _ => false,
    }
}

/// Decide whether two locations are "family": parent/child across
/// administrative levels, or siblings within one (same country, or nearby
/// towns).
///
/// The predicate is symmetric in `(a, surface_a)` / `(b, surface_b)`.
/// `country_to_continents` maps a country's geoname id to the continents
/// it is on; a country missing from the map is on no continent.
pub fn is_family(
    a: &Place,
    b: &Place,
    surface_a: &str,
    surface_b: &str,
    options: FamilyOptions,
    country_to_continents: &BTreeMap<i64, Vec<i64>>,
) -> bool {
    if a.kind == b.kind {
        if !options.siblings {
            return false;
        }
        return match a.kind {
            LocationKind::Town => {
                let min_population = if options.consider_population { 5000 } else { 1 };
                if a.population >= min_population && b.population >= min_population {
                    is_near(a, b)
                } else {
                    false
                }
            }
            LocationKind::Adm1 => same_country(a, b),
            LocationKind::Country | LocationKind::Continent => true,
        };
    }

    // Sort from big to small; the remaining checks are parent/child.
    let (big, small) = if a.kind.size_rank() <= b.kind.size_rank() {
        (a, b)
    } else {
        (b, a)
    };
    match (big.kind, small.kind) {
        (LocationKind::Continent, LocationKind::Country) => {
            let country_id = small.country_geoname_id.unwrap_or(small.geoname_id);
            country_to_continents
                .get(&country_id)
                .map_or(false, |continents| continents.contains(&big.geoname_id))
        }
        // Too small to relate to a continent.
        (LocationKind::Continent, _) => false,
        (LocationKind::Country, _) => same_country(big, small),
        (LocationKind::Adm1, LocationKind::Town) => {
            if options.consider_toponym_length {
                if surface_a.chars().count() >= 7 && surface_b.chars().count() >= 7 {
                    small.adm1_geoname_id == Some(big.geoname_id)
                } else {
                    false
                }
            } else {
                // The second disjunct handles gazetteers whose "adm1"
                // entry is really an adm2 sharing the town's adm1 parent.
                small.adm1_geoname_id == Some(big.geoname_id)
                    || (big.adm1_geoname_id.is_some()
                        && big.adm1_geoname_id == small.adm1_geoname_id)
            }
        }
        _ => unreachable!("kinds are distinct and sorted by size"),
    }
}

fn same_country(a: &Place, b: &Place) -> bool {
    match (a.country_geoname_id, b.country_geoname_id) {
        (Some(ca), Some(cb)) => ca == cb,
        _ => false,
    }
}
