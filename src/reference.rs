//! Reference data the scorer consults on every message: topic tags,
//! most-common words, administrative names, timezone sets and continent
//! membership.
//!
//! All of this is derived offline from the gazetteer database and loaded
//! once at startup; nothing here changes while the pipeline runs.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::location::{LocationKind, Place};
use crate::Result;

/// A country or first-level subdivision known under an alternative name.
///
/// These are the "parents" the user-home parser matches against; they
/// carry just enough of the gazetteer record to act as a [`Place`].
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct AdmEntry {
    pub geoname_id: i64,
    /// `country` or `adm1`.
    pub kind: LocationKind,
    #[serde(default)]
    pub population: u64,
    #[serde(default)]
    pub country_geoname_id: Option<i64>,
    #[serde(default)]
    pub adm1_geoname_id: Option<i64>,
    /// Original-case expansions if this name is an abbreviation.
    #[serde(default)]
    pub abbreviations: Vec<String>,
}

impl AdmEntry {
    pub fn to_place(&self) -> Place {
        Place {
            geoname_id: self.geoname_id,
            kind: self.kind,
            population: self.population,
            coordinate: None,
            timezone: None,
            country_geoname_id: self.country_geoname_id,
            adm1_geoname_id: self.adm1_geoname_id,
            languages: BTreeSet::new(),
            abbreviations: self.abbreviations.clone(),
            translation_count: 0,
        }
    }
}

/// On-disk shape of the reference bundle. Most-common words are
/// frequency-ordered lists so the word count can be configured at load
/// time.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawReferenceData {
    #[serde(default)]
    tags: BTreeMap<String, BTreeSet<String>>,
    #[serde(default)]
    toponym_capitalization: BTreeSet<String>,
    #[serde(default)]
    most_common_words: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    country_alternative_names: BTreeSet<String>,
    #[serde(default)]
    adm_names: BTreeMap<String, Vec<AdmEntry>>,
    #[serde(default)]
    adm1_geoname_ids: BTreeSet<i64>,
    #[serde(default)]
    timezones_per_country: BTreeMap<i64, BTreeSet<String>>,
    #[serde(default)]
    timezones_per_continent: BTreeMap<i64, BTreeSet<String>>,
    #[serde(default)]
    country_to_continents: BTreeMap<i64, Vec<i64>>,
}

/// The loaded reference bundle.
#[derive(Debug, Default)]
pub struct ReferenceData {
    /// Per language, the topic tags that brought messages into the
    /// corpus. A message whose language has no tag list is dropped.
    pub tags: BTreeMap<String, BTreeSet<String>>,
    /// Languages in which toponyms are conventionally capitalized.
    pub toponym_capitalization: BTreeSet<String>,
    /// Per language, the most common words (minus names of big places),
    /// lower-cased.
    pub most_common_words: BTreeMap<String, BTreeSet<String>>,
    /// Every alternative name of every country, lower-cased. Grams on
    /// this list bypass the minimum-length and common-word filters.
    pub country_alternative_names: BTreeSet<String>,
    /// Alternative names of countries and adm1 areas, for user-home
    /// parsing.
    pub adm_names: BTreeMap<String, Vec<AdmEntry>>,
    /// Geoname ids known to be first-level subdivisions regardless of
    /// their feature code.
    pub adm1_geoname_ids: BTreeSet<i64>,
    /// Timezones observed in each country.
    pub timezones_per_country: BTreeMap<i64, BTreeSet<String>>,
    /// Timezones observed on each continent.
    pub timezones_per_continent: BTreeMap<i64, BTreeSet<String>>,
    /// The continent(s) each country is on.
    pub country_to_continents: BTreeMap<i64, Vec<i64>>,
}

impl ReferenceData {
    /// Load the bundle from a JSON file, keeping the `n_words` most
    /// common words per language.
    pub fn from_path(path: &Path, n_words: usize) -> Result<ReferenceData> {
        let f = File::open(path)
            .with_context(|| format!("could not open reference file {}", path.display()))?;
        let raw: RawReferenceData = serde_json::from_reader(f)
            .with_context(|| format!("could not parse reference file {}", path.display()))?;
        Ok(Self::build(raw, n_words))
    }

    fn build(raw: RawReferenceData, n_words: usize) -> ReferenceData {
        let most_common_words = raw
            .most_common_words
            .into_iter()
            .map(|(language, words)| {
                let words: BTreeSet<String> = words
                    .into_iter()
                    .take(n_words)
                    .map(|word| word.to_lowercase())
                    .collect();
                (language, words)
            })
            .collect();
        let tags = raw
            .tags
            .into_iter()
            .map(|(language, tags)| {
                let tags = tags.into_iter().map(|tag| tag.to_lowercase()).collect();
                (language, tags)
            })
            .collect();
        ReferenceData {
            tags,
            toponym_capitalization: raw.toponym_capitalization,
            most_common_words,
            country_alternative_names: raw.country_alternative_names,
            adm_names: raw.adm_names,
            adm1_geoname_ids: raw.adm1_geoname_ids,
            timezones_per_country: raw.timezones_per_country,
            timezones_per_continent: raw.timezones_per_continent,
            country_to_continents: raw.country_to_continents,
        }
    }

    /// The common-word set for a language, empty if we know none.
    pub fn common_words(&self, language: &str) -> &BTreeSet<String> {
        static EMPTY: BTreeSet<String> = BTreeSet::new();
        self.most_common_words.get(language).unwrap_or(&EMPTY)
    }

    pub fn language_capitalizes_toponyms(&self, language: &str) -> bool {
        self.toponym_capitalization.contains(language)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_word_lists_are_truncated_and_lowercased() {
        let raw: RawReferenceData = serde_json::from_str(
            r#"{
                "most_common_words": { "en": ["The", "and", "storm"] }
            }"#,
        )
        .unwrap();
        let reference = ReferenceData::build(raw, 2);
        let words = reference.common_words("en");
        assert!(words.contains("the"));
        assert!(words.contains("and"));
        assert!(!words.contains("storm"));
        assert!(reference.common_words("xx").is_empty());
    }

    #[test]
    fn integer_keys_round_trip_from_json() {
        let raw: RawReferenceData = serde_json::from_str(
            r#"{
                "country_to_continents": { "2750405": [6255148] }
            }"#,
        )
        .unwrap();
        let reference = ReferenceData::build(raw, 10);
        assert_eq!(
            reference.country_to_continents.get(&2750405),
            Some(&vec![6255148])
        );
    }
}
