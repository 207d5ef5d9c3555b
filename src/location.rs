//! Gazetteer entries and the location-kind sum type.

use std::collections::BTreeSet;

use geo::Point;
use serde::{Deserialize, Serialize};

/// A longitude/latitude pair, in that order (x, y).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LonLat {
    pub lon: f64,
    pub lat: f64,
}

impl LonLat {
    pub fn new(lon: f64, lat: f64) -> LonLat {
        LonLat { lon, lat }
    }

    /// This coordinate as a `geo` point for distance and containment math.
    pub fn to_point(self) -> Point<f64> {
        Point::new(self.lon, self.lat)
    }
}

/// The administrative kind of a gazetteer entry.
///
/// Everything the pipeline resolves is one of these four. Entries with
/// other feature codes are dropped during typing.
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LocationKind {
    Town,
    Adm1,
    Country,
    Continent,
}

impl LocationKind {
    /// Size rank for sorting from big to small: continents first, towns
    /// last.
    pub fn size_rank(self) -> u8 {
        match self {
            LocationKind::Continent => 0,
            LocationKind::Country => 1,
            LocationKind::Adm1 => 2,
            LocationKind::Town => 3,
        }
    }
}

/// Feature codes that map to [`LocationKind::Town`].
const TOWN_CODES: &[&str] = &[
    "PPL", "PPLA", "PPLA2", "PPLA3", "PPLA4", "PPLC", "PPLG", "PPLR", "PPLS", "STLMT",
];

/// Feature codes that map to [`LocationKind::Adm1`].
const ADM1_CODES: &[&str] = &["ADM1", "ADM1H", "ADM2", "ADM2H"];

/// A raw gazetteer entry, as returned by the gazetteer index for one
/// surface form.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GazetteerEntry {
    pub geoname_id: i64,
    /// GeoNames feature code, e.g. `PPLC` or `ADM1`.
    pub feature_code: String,
    /// GeoNames feature class. Carried through from the index but not
    /// consulted; the feature code is what decides the kind.
    #[serde(default)]
    pub feature_class: Option<String>,
    /// ISO language codes this name is known in, plus the pseudo-languages
    /// `general` (language-independent) and `abbr` (abbreviation).
    #[serde(default)]
    pub languages: BTreeSet<String>,
    #[serde(default)]
    pub coordinate: Option<LonLat>,
    /// Canonical timezone name, for towns.
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub population: u64,
    #[serde(default)]
    pub country_geoname_id: Option<i64>,
    #[serde(default)]
    pub adm1_geoname_id: Option<i64>,
    /// Number of alternate-name translations in GeoNames. A proxy for how
    /// important the location is.
    #[serde(default)]
    pub translation_count: u32,
    /// Expansions this name abbreviates, original-case.
    #[serde(default)]
    pub abbreviations: Vec<String>,
}

/// A typed gazetteer entry: the static candidate fields that scoring and
/// resolution work with.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub geoname_id: i64,
    pub kind: LocationKind,
    pub population: u64,
    pub coordinate: Option<LonLat>,
    pub timezone: Option<String>,
    pub country_geoname_id: Option<i64>,
    pub adm1_geoname_id: Option<i64>,
    pub languages: BTreeSet<String>,
    pub abbreviations: Vec<String>,
    pub translation_count: u32,
}

impl Place {
    /// Classify a raw entry, returning `None` for entries of no
    /// recognized kind.
    ///
    /// `adm1_ids` is the set of geoname ids known to be first-level
    /// subdivisions; some gazetteers record those under feature codes the
    /// code list alone would miss.
    pub fn from_entry(entry: &GazetteerEntry, adm1_ids: &BTreeSet<i64>) -> Option<Place> {
        let kind = if TOWN_CODES.contains(&entry.feature_code.as_str()) {
            LocationKind::Town
        } else if ADM1_CODES.contains(&entry.feature_code.as_str())
            || adm1_ids.contains(&entry.geoname_id)
        {
            LocationKind::Adm1
        } else if entry.feature_code == "PCLI" {
            LocationKind::Country
        } else if entry.feature_code == "CONT" {
            LocationKind::Continent
        } else {
            return None;
        };
        Some(Place {
            geoname_id: entry.geoname_id,
            kind,
            population: entry.population,
            coordinate: entry.coordinate,
            timezone: entry.timezone.clone(),
            country_geoname_id: entry.country_geoname_id,
            adm1_geoname_id: entry.adm1_geoname_id,
            languages: entry.languages.clone(),
            abbreviations: entry.abbreviations.clone(),
            translation_count: entry.translation_count,
        })
    }

    /// Does this entry's name set include the given message language,
    /// either directly or via the `general` pseudo-language?
    pub fn language_matches(&self, language: &str) -> bool {
        self.languages.contains("general") || self.languages.contains(language)
    }
}
