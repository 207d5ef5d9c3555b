//! Parsing the free-text "home location" users put on their profile.
//!
//! People write anything in that field: "Amsterdam", "NYC", "Utrecht, the
//! Netherlands", "Paris / London", "somewhere over the rainbow". We parse
//! it into zero or more gazetteer entries with a recursive child/parent
//! strategy: split on separators, match the tail against administrative
//! names, then try to pin the remainder down to a town inside that parent.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use crate::family::{is_family, FamilyOptions};
use crate::gazetteer::Gazetteer;
use crate::location::Place;
use crate::reference::ReferenceData;
use crate::Result;

/// Population a bare town name needs before we believe it is where
/// someone lives.
const MIN_TOWN_POPULATION: u64 = 10_000;

/// A resolved user-home location: the gazetteer entry plus the surface
/// form it was recognized under.
#[derive(Clone, Debug, PartialEq)]
pub struct HomeLocation {
    pub surface: String,
    pub place: Place,
}

/// Parser for user-home strings. Stateless; memoization lives with the
/// scorer.
pub struct UserHomeParser {
    gazetteer: Arc<dyn Gazetteer>,
    reference: Arc<ReferenceData>,
}

impl UserHomeParser {
    pub fn new(gazetteer: Arc<dyn Gazetteer>, reference: Arc<ReferenceData>) -> UserHomeParser {
        UserHomeParser {
            gazetteer,
            reference,
        }
    }

    /// Parse a free-text home field into resolved locations.
    ///
    /// Split rules, in order: `/`, ` and `, `&`, each parsed recursively
    /// with the results concatenated. A two-comma string "a, b, c"
    /// re-parses as "a c"; more commas than that parse to nothing.
    pub async fn parse(&self, raw: &str) -> Result<Vec<HomeLocation>> {
        self.parse_recursive(raw.to_owned()).await
    }

    fn parse_recursive(&self, raw: String) -> BoxFuture<'_, Result<Vec<HomeLocation>>> {
        async move {
            if raw.trim().is_empty() {
                return Ok(Vec::new());
            }

            for separator in ["/", " and ", "&"] {
                if raw.contains(separator) {
                    let mut locations = Vec::new();
                    let parts: Vec<String> =
                        raw.split(separator).map(|part| part.to_owned()).collect();
                    for part in parts {
                        locations.extend(self.parse_recursive(part).await?);
                    }
                    return Ok(locations);
                }
            }

            let original = raw.trim().replace('.', "");
            let lower = original.to_lowercase();
            let comma_count = lower.matches(',').count();
            match comma_count {
                0 => self.parse_without_comma(&original, &lower).await,
                1 => self.parse_child_parent(&original, &lower).await,
                2 => {
                    // "a, b, c" collapses to "a c". A deliberate
                    // heuristic: the middle element is usually a region
                    // we'd mis-match more often than the country.
                    let parts: Vec<&str> = original.split(',').collect();
                    let collapsed =
                        format!("{} {}", parts[0].trim(), parts[parts.len() - 1].trim());
                    self.parse_recursive(collapsed).await
                }
                _ => Ok(Vec::new()),
            }
        }
        .boxed()
    }

    /// No comma: greedy longest-suffix match against administrative
    /// names, with a plain town lookup as fallback.
    async fn parse_without_comma(
        &self,
        original: &str,
        lower: &str,
    ) -> Result<Vec<HomeLocation>> {
        let words: Vec<&str> = lower.split(' ').collect();
        let original_words: Vec<&str> = original.split(' ').collect();

        for i in 1..=words.len() {
            let suffix = words[words.len() - i..].join(" ");
            let entries = match self.reference.adm_names.get(&suffix) {
                Some(entries) => entries,
                None => continue,
            };
            let original_suffix = original_words[original_words.len() - i..].join(" ");
            let parents: Vec<_> = entries
                .iter()
                .filter(|entry| {
                    entry.abbreviations.is_empty()
                        || entry.abbreviations.contains(&original_suffix)
                })
                .collect();
            if parents.is_empty() {
                continue;
            }

            let child = lower[..lower.len() - suffix.len()].trim().to_owned();
            if child.is_empty() {
                return Ok(parents
                    .into_iter()
                    .map(|entry| HomeLocation {
                        surface: suffix.clone(),
                        place: entry.to_place(),
                    })
                    .collect());
            }

            // Recover the child's original-case form by position.
            let child_original = lower
                .find(&child)
                .and_then(|at| original.get(at..at + child.len()))
                .unwrap_or(&child)
                .to_owned();
            let mut locations = Vec::new();
            for entry in parents {
                locations.extend(
                    self.extract_child(&child, &child_original, &suffix, &entry.to_place())
                        .await?,
                );
            }
            return Ok(locations);
        }

        self.find_town(lower, original).await
    }

    /// One comma: "child, parent".
    async fn parse_child_parent(
        &self,
        original: &str,
        lower: &str,
    ) -> Result<Vec<HomeLocation>> {
        let (child, parent) = lower.split_once(',').expect("caller counted one comma");
        let (child, parent) = (child.trim(), parent.trim());
        let original_child = original.split(',').next().unwrap_or("").trim();
        let original_parent = original.split(',').last().unwrap_or("").trim();

        let entries = match self.reference.adm_names.get(parent) {
            Some(entries) => entries,
            None => return self.find_town(parent, original_parent).await,
        };
        let parents: Vec<_> = entries
            .iter()
            .filter(|entry| {
                entry.abbreviations.is_empty()
                    || entry.abbreviations.iter().any(|abbr| abbr == original_parent)
            })
            .collect();
        if parents.is_empty() {
            return self.find_town(parent, original_parent).await;
        }

        let mut locations = Vec::new();
        for entry in parents {
            locations.extend(
                self.extract_child(child, original_child, parent, &entry.to_place())
                    .await?,
            );
        }
        Ok(locations)
    }

    /// Try to resolve `child` to a location inside `parent`; fall back to
    /// the parent itself.
    async fn extract_child(
        &self,
        child: &str,
        child_original: &str,
        parent_surface: &str,
        parent: &Place,
    ) -> Result<Vec<HomeLocation>> {
        let parent_location = HomeLocation {
            surface: parent_surface.to_owned(),
            place: parent.clone(),
        };

        let mut forms = BTreeSet::new();
        forms.insert(child.to_owned());
        let found = self.gazetteer.lookup(&forms).await?;
        let entries = match found.get(child) {
            Some(entries) if !entries.is_empty() => entries,
            _ => return Ok(vec![parent_location]),
        };

        let mut entries = entries.clone();
        entries.sort_by(|a, b| b.population.cmp(&a.population));
        if entries[0].population == 0 {
            return Ok(vec![parent_location]);
        }

        for entry in &entries {
            let place = match Place::from_entry(entry, &self.reference.adm1_geoname_ids) {
                Some(place) => place,
                None => continue,
            };
            let abbreviation_ok = !place.languages.contains("abbr")
                || place.abbreviations.iter().any(|abbr| abbr == child_original);
            if !abbreviation_ok {
                continue;
            }
            let related = is_family(
                &place,
                parent,
                child,
                parent_surface,
                FamilyOptions {
                    siblings: false,
                    ..FamilyOptions::default()
                },
                &self.reference.country_to_continents,
            );
            if related {
                return Ok(vec![HomeLocation {
                    surface: child.to_owned(),
                    place,
                }]);
            }
        }
        Ok(vec![parent_location])
    }

    /// Direct town lookup for strings that match no administrative name.
    async fn find_town(&self, lower: &str, original: &str) -> Result<Vec<HomeLocation>> {
        let mut forms = BTreeSet::new();
        forms.insert(lower.to_owned());
        let found = self.gazetteer.lookup(&forms).await?;
        let entries = match found.get(lower) {
            Some(entries) if !entries.is_empty() => entries,
            _ => return Ok(Vec::new()),
        };

        let mut entries = entries.clone();
        entries.sort_by(|a, b| b.population.cmp(&a.population));
        if entries[0].population < MIN_TOWN_POPULATION {
            return Ok(Vec::new());
        }

        for entry in &entries {
            let abbreviation_ok = !entry.languages.contains("abbr")
                || entry.abbreviations.iter().any(|abbr| abbr == original);
            if !abbreviation_ok {
                continue;
            }
            if let Some(place) = Place::from_entry(entry, &self.reference.adm1_geoname_ids) {
                return Ok(vec![HomeLocation {
                    surface: lower.to_owned(),
                    place,
                }]);
            }
        }
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gazetteer::MemoryGazetteer;
    use crate::location::{GazetteerEntry, LocationKind, LonLat};
    use crate::reference::AdmEntry;

    const NETHERLANDS: i64 = 2750405;

    fn town_entry(geoname_id: i64, population: u64, lon: f64, lat: f64) -> GazetteerEntry {
        GazetteerEntry {
            geoname_id,
            feature_code: "PPL".to_owned(),
            feature_class: None,
            languages: BTreeSet::new(),
            coordinate: Some(LonLat::new(lon, lat)),
            timezone: Some("Europe/Amsterdam".to_owned()),
            population,
            country_geoname_id: Some(NETHERLANDS),
            adm1_geoname_id: Some(2749879),
            translation_count: 10,
            abbreviations: Vec::new(),
        }
    }

    fn netherlands_adm_entry() -> AdmEntry {
        AdmEntry {
            geoname_id: NETHERLANDS,
            kind: LocationKind::Country,
            population: 17_000_000,
            country_geoname_id: Some(NETHERLANDS),
            adm1_geoname_id: None,
            abbreviations: Vec::new(),
        }
    }

    fn parser_with(
        gazetteer: MemoryGazetteer,
        mut reference: ReferenceData,
    ) -> UserHomeParser {
        reference
            .adm_names
            .entry("netherlands".to_owned())
            .or_default()
            .push(netherlands_adm_entry());
        UserHomeParser::new(Arc::new(gazetteer), Arc::new(reference))
    }

    #[tokio::test]
    async fn bare_country_name_resolves_to_the_country() {
        let parser = parser_with(MemoryGazetteer::new(), ReferenceData::default());
        let homes = parser.parse("Netherlands").await.unwrap();
        assert_eq!(homes.len(), 1);
        assert_eq!(homes[0].place.geoname_id, NETHERLANDS);
        assert_eq!(homes[0].surface, "netherlands");
    }

    #[tokio::test]
    async fn child_comma_parent_resolves_to_the_child_town() {
        let mut gazetteer = MemoryGazetteer::new();
        gazetteer.insert("amsterdam", town_entry(2759794, 800_000, 4.89, 52.37));
        let parser = parser_with(gazetteer, ReferenceData::default());

        let homes = parser.parse("Amsterdam, Netherlands").await.unwrap();
        assert_eq!(homes.len(), 1);
        assert_eq!(homes[0].place.geoname_id, 2759794);
        assert_eq!(homes[0].surface, "amsterdam");
    }

    #[tokio::test]
    async fn unrelated_child_falls_back_to_the_parent() {
        let mut gazetteer = MemoryGazetteer::new();
        // A "tokyo" with a different country: not family of the parent.
        let mut tokyo = town_entry(1850144, 9_000_000, 139.77, 35.68);
        tokyo.country_geoname_id = Some(1861060);
        gazetteer.insert("tokyo", tokyo);
        let parser = parser_with(gazetteer, ReferenceData::default());

        let homes = parser.parse("Tokyo, Netherlands").await.unwrap();
        assert_eq!(homes.len(), 1);
        assert_eq!(homes[0].place.geoname_id, NETHERLANDS);
    }

    #[tokio::test]
    async fn slash_splits_into_multiple_homes() {
        let mut gazetteer = MemoryGazetteer::new();
        gazetteer.insert("amsterdam", town_entry(2759794, 800_000, 4.89, 52.37));
        let parser = parser_with(gazetteer, ReferenceData::default());

        let homes = parser.parse("Amsterdam / Netherlands").await.unwrap();
        let ids: Vec<i64> = homes.iter().map(|home| home.place.geoname_id).collect();
        assert_eq!(ids, vec![2759794, NETHERLANDS]);
    }

    #[tokio::test]
    async fn two_commas_collapse_to_first_and_last() {
        let mut gazetteer = MemoryGazetteer::new();
        gazetteer.insert("utrecht", town_entry(2745912, 350_000, 5.12, 52.09));
        let parser = parser_with(gazetteer, ReferenceData::default());

        let homes = parser.parse("Utrecht, UT, Netherlands").await.unwrap();
        assert_eq!(homes.len(), 1);
        assert_eq!(homes[0].place.geoname_id, 2745912);
    }

    #[tokio::test]
    async fn too_many_commas_parse_to_nothing() {
        let parser = parser_with(MemoryGazetteer::new(), ReferenceData::default());
        let homes = parser.parse("a, b, c, d").await.unwrap();
        assert!(homes.is_empty());
    }

    #[tokio::test]
    async fn small_town_fallback_is_rejected() {
        let mut gazetteer = MemoryGazetteer::new();
        gazetteer.insert("loppersum", town_entry(2751792, 2500, 6.74, 53.33));
        let parser = parser_with(gazetteer, ReferenceData::default());

        let homes = parser.parse("Loppersum").await.unwrap();
        assert!(homes.is_empty());
    }

    #[tokio::test]
    async fn abbreviation_entries_need_a_matching_original_case_form() {
        let mut gazetteer = MemoryGazetteer::new();
        let mut nyc = town_entry(5128581, 8_000_000, -74.0, 40.7);
        nyc.country_geoname_id = Some(6252001);
        nyc.languages = ["abbr".to_owned()].into_iter().collect();
        nyc.abbreviations = vec!["NYC".to_owned()];
        gazetteer.insert("nyc", nyc);
        let parser = parser_with(gazetteer, ReferenceData::default());

        // Upper-case matches the abbreviation list...
        let homes = parser.parse("NYC").await.unwrap();
        assert_eq!(homes.len(), 1);
        // ...lower-case does not.
        let homes = parser.parse("nyc").await.unwrap();
        assert!(homes.is_empty());
    }
}
