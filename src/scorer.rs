//! Per-message toponym candidate generation and evidence scoring.
//!
//! One message goes in; for every surface form that matches a gazetteer
//! entry, a set of candidate locations comes out, each annotated with the
//! five evidence scores (coordinate, bounding box, UTC offset, user home,
//! family). The resolver later aggregates these across the window.

use std::collections::{BTreeMap, BTreeSet};
use std::num::NonZeroUsize;
use std::sync::Arc;

use anyhow::Context;
use geo::{Distance, Haversine};
use lru::LruCache;
use metrics::{counter, describe_counter};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, trace};

use crate::config::{Config, ScoreWeights, MAX_DISTANCE_BBOX_CENTER, MAX_DISTANCE_CITY_COORDINATE, MAX_NGRAM_LENGTH, MINIMUM_GRAM_LENGTH};
use crate::errors::GeotagError;
use crate::family::{is_family, FamilyOptions};
use crate::gazetteer::Gazetteer;
use crate::geometry::AreaIndex;
use crate::location::{LocationKind, LonLat, Place};
use crate::message::{EvidenceScores, Message, ScoredCandidate, ScoredMessage};
use crate::normalize::clean_text;
use crate::reference::ReferenceData;
use crate::timezones::OffsetZoneCache;
use crate::tokenize::{is_punctuation_token, ngrams, tokenize};
use crate::user_home::{HomeLocation, UserHomeParser};
use crate::Result;

// A word at the start of the text, or following sentence-ending
// punctuation plus whitespace.
static FIRST_WORD_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[.!?:]\s)(\w+)").unwrap());

static WHITESPACE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Scores one message at a time against the gazetteer.
///
/// Owns the two process-wide caches: the bounded user-home memo and the
/// offset→timezone interval cache.
pub struct Scorer {
    gazetteer: Arc<dyn Gazetteer>,
    reference: Arc<ReferenceData>,
    areas: Arc<AreaIndex>,
    home_parser: UserHomeParser,
    timezones: OffsetZoneCache,
    home_cache: LruCache<String, Vec<HomeLocation>>,
    weights: ScoreWeights,
    min_population_capitalized: u64,
    min_population_non_capitalized: u64,
}

impl Scorer {
    pub fn new(
        gazetteer: Arc<dyn Gazetteer>,
        reference: Arc<ReferenceData>,
        areas: Arc<AreaIndex>,
        config: &Config,
    ) -> Scorer {
        describe_counter!(
            "geotagtweets.messages_scored.total",
            "Messages that produced at least one toponym candidate"
        );
        describe_counter!(
            "geotagtweets.messages_skipped.total",
            "Messages dropped before scoring, by reason"
        );
        describe_counter!(
            "geotagtweets.gazetteer_lookups.total",
            "Batched gazetteer lookups issued"
        );

        let cache_size = NonZeroUsize::new(config.user_home_cache_size.max(1))
            .expect("cache size is at least 1");
        Scorer {
            home_parser: UserHomeParser::new(gazetteer.clone(), reference.clone()),
            gazetteer,
            reference,
            areas,
            timezones: OffsetZoneCache::new(),
            home_cache: LruCache::new(cache_size),
            weights: config.score_weights,
            min_population_capitalized: config.min_population_capitalized,
            min_population_non_capitalized: config.min_population_non_capitalized,
        }
    }

    /// Analyze one message. `None` means the message contributes nothing:
    /// a retweet, an untagged language, or no surviving surface form.
    pub async fn score(&mut self, message: &Message) -> Result<Option<ScoredMessage>> {
        if message.retweet {
            counter!("geotagtweets.messages_skipped.total", 1, "reason" => "retweet");
            return Ok(None);
        }
        let reference = self.reference.clone();
        let tags = match reference.tags.get(&message.language) {
            Some(tags) => tags,
            None => {
                counter!("geotagtweets.messages_skipped.total", 1, "reason" => "language");
                return Ok(None);
            }
        };

        let clean = clean_text(&message.text, true);
        let tokens: Vec<String> = tokenize(&clean)
            .into_iter()
            .filter(|token| !is_punctuation_token(token))
            .collect();
        let grams = ngrams(&tokens, 1, MAX_NGRAM_LENGTH);

        // Strip the topic tags that brought the message into the corpus;
        // longest tags first so "storm surge" wins over "storm".
        let mut sorted_tags: Vec<&str> = tags.iter().map(String::as_str).collect();
        sorted_tags.sort_unstable();
        sorted_tags.reverse();
        let (grams, subsetted_ngrams) = strip_tags(&grams, &sorted_tags);

        // Remember the first original-case form of each gram, preferring
        // a non-title-case variant: "nice" as a plain word is stronger
        // evidence against the toponym reading than "Nice" is for it.
        let mut original_ngrams: BTreeMap<String, String> = BTreeMap::new();
        let mut lower_grams: Vec<String> = Vec::new();
        for gram in &grams {
            let lower = gram.to_lowercase();
            match original_ngrams.get(&lower) {
                None => {
                    original_ngrams.insert(lower.clone(), gram.clone());
                }
                Some(existing) if is_title_case(existing) && !is_title_case(gram) => {
                    original_ngrams.insert(lower.clone(), gram.clone());
                }
                Some(_) => {}
            }
            lower_grams.push(lower);
        }

        // Keep a gram if it is a country alternative name, or long enough
        // and not just a common word of the language.
        let common_words = reference.common_words(&message.language);
        let candidates: BTreeSet<String> = lower_grams
            .iter()
            .filter(|gram| {
                reference.country_alternative_names.contains(gram.as_str())
                    || (gram.chars().count() >= MINIMUM_GRAM_LENGTH
                        && !common_words.contains(gram.as_str()))
            })
            .cloned()
            .collect();
        if candidates.is_empty() {
            counter!("geotagtweets.messages_skipped.total", 1, "reason" => "no_candidates");
            return Ok(None);
        }

        counter!("geotagtweets.gazetteer_lookups.total", 1);
        // A failed lookup is transient by definition; the driver re-runs
        // the whole window on it.
        let found = self.gazetteer.lookup(&candidates).await.with_context(|| {
            GeotagError::GazetteerTransient("batched surface-form lookup failed".to_owned())
        })?;
        if found.is_empty() {
            counter!("geotagtweets.messages_skipped.total", 1, "reason" => "no_match");
            return Ok(None);
        }

        let suppressed = suppress_nested_toponyms(&found, &original_ngrams);

        let capitalization = reference.language_capitalizes_toponyms(&message.language);
        let sentence_first_words: BTreeSet<String> = if capitalization {
            FIRST_WORD_PATTERN
                .captures_iter(&clean)
                .map(|captures| captures[1].to_lowercase())
                .collect()
        } else {
            BTreeSet::new()
        };

        // Message-level context, computed at most once.
        let mut zones: Option<BTreeSet<String>> = None;
        let mut best_home: Option<Option<HomeLocation>> = None;

        let mut toponyms: BTreeMap<String, BTreeMap<i64, ScoredCandidate>> = BTreeMap::new();
        for (toponym, entries) in &found {
            if suppressed.contains(toponym) || tags.contains(toponym) {
                continue;
            }
            let original = original_ngrams
                .get(toponym)
                .expect("every surface form has an original-case form");

            // Mid-sentence title-case in a capitalizing language is strong
            // enough evidence to accept tiny places; anything else needs a
            // real population.
            let min_population = if capitalization
                && !sentence_first_words.contains(toponym)
                && is_title_case(original)
            {
                self.min_population_capitalized
            } else {
                self.min_population_non_capitalized
            };

            let mut places: Vec<Place> = entries
                .iter()
                .filter(|entry| entry.population >= min_population)
                .filter_map(|entry| Place::from_entry(entry, &reference.adm1_geoname_ids))
                .collect();
            if places.is_empty() {
                continue;
            }
            if places.len() > 1 {
                discard_same_name_family(&mut places, toponym, &reference);
            }

            // Evidence scores for each surviving candidate.
            let mut scored: BTreeMap<i64, ScoredCandidate> = BTreeMap::new();
            for place in places {
                let mut scores = EvidenceScores::default();

                if let Some(coordinate) = message.coordinate {
                    if self.matches_coordinate(&place, coordinate) {
                        scores.coordinates = self.weights.coordinates;
                    }
                } else if let Some(bbox) = message.bbox {
                    if self.matches_area_center(&place, bbox.center()) {
                        scores.bbox = self.weights.bbox;
                    }
                }

                if let Some(offset) = message.user.utc_offset_seconds {
                    let zones = zones.get_or_insert_with(|| {
                        self.timezones.zones_for(offset, message.timestamp)
                    });
                    if !zones.is_empty() && self.matches_offset(&place, zones) {
                        scores.utc_offset = self.weights.utc_offset;
                    }
                }

                if let Some(home_text) = message.user.home_text.as_deref() {
                    if best_home.is_none() {
                        best_home = Some(self.best_home_location(home_text).await?);
                    }
                    if let Some(Some(home)) = &best_home {
                        scores.user_home =
                            self.weights.user_home * home_match_fraction(&place, toponym, home, &reference);
                    }
                }

                scored.insert(place.geoname_id, ScoredCandidate { place, scores });
            }

            // Family: check the new candidates against everything already
            // added for this message; a hit flags both sides.
            for (other_toponym, other_candidates) in toponyms.iter_mut() {
                for other in other_candidates.values_mut() {
                    for candidate in scored.values_mut() {
                        let related = is_family(
                            &other.place,
                            &candidate.place,
                            other_toponym,
                            toponym,
                            FamilyOptions {
                                siblings: false,
                                consider_population: true,
                                ..FamilyOptions::default()
                            },
                            &reference.country_to_continents,
                        );
                        if related {
                            other.scores.family = self.weights.family;
                            candidate.scores.family = self.weights.family;
                        }
                    }
                }
            }

            toponyms.insert(toponym.clone(), scored);
        }

        if toponyms.is_empty() {
            counter!("geotagtweets.messages_skipped.total", 1, "reason" => "no_survivors");
            return Ok(None);
        }
        counter!("geotagtweets.messages_scored.total", 1);
        trace!(
            "message {} yielded {} surface forms",
            message.id,
            toponyms.len()
        );

        let original_ngrams = toponyms
            .keys()
            .map(|toponym| (toponym.clone(), original_ngrams[toponym].clone()))
            .collect();
        Ok(Some(ScoredMessage {
            timestamp: message.timestamp,
            language: message.language.clone(),
            user_id: message.user.id.clone(),
            text: clean,
            original_ngrams,
            subsetted_ngrams,
            toponyms,
            locations: None,
        }))
    }

    /// Parse a user-home string, memoized through the LRU cache, and keep
    /// the highest-population result.
    async fn best_home_location(&mut self, home_text: &str) -> Result<Option<HomeLocation>> {
        let homes = match self.home_cache.get(home_text) {
            Some(cached) => cached.clone(),
            None => {
                let parsed =
                    self.home_parser.parse(home_text).await.with_context(|| {
                        GeotagError::GazetteerTransient(format!(
                            "user-home lookup failed for {:?}",
                            home_text
                        ))
                    })?;
                self.home_cache.put(home_text.to_owned(), parsed.clone());
                parsed
            }
        };
        let mut best: Option<HomeLocation> = None;
        for home in homes {
            match &best {
                Some(current) if current.place.population >= home.place.population => {}
                _ => best = Some(home),
            }
        }
        Ok(best)
    }

    /// Was the message sent from within (or near) the candidate?
    fn matches_coordinate(&self, place: &Place, coordinate: LonLat) -> bool {
        match place.kind {
            LocationKind::Continent => self.areas.contains(place.geoname_id, coordinate),
            LocationKind::Town => match place.coordinate {
                Some(town) => {
                    Haversine::distance(coordinate.to_point(), town.to_point())
                        < MAX_DISTANCE_CITY_COORDINATE
                }
                None => false,
            },
            _ => match place.country_geoname_id {
                Some(country) => self.areas.contains(country, coordinate),
                None => false,
            },
        }
    }

    /// Same test as [`Self::matches_coordinate`] but for a bounding-box
    /// center, with its own distance threshold for towns.
    fn matches_area_center(&self, place: &Place, center: LonLat) -> bool {
        match place.kind {
            LocationKind::Continent => self.areas.contains(place.geoname_id, center),
            LocationKind::Town => match place.coordinate {
                Some(town) => {
                    Haversine::distance(center.to_point(), town.to_point())
                        < MAX_DISTANCE_BBOX_CENTER
                }
                None => false,
            },
            _ => match place.country_geoname_id {
                Some(country) => self.areas.contains(country, center),
                None => false,
            },
        }
    }

    /// Does the author's UTC offset fit the candidate?
    fn matches_offset(&self, place: &Place, zones: &BTreeSet<String>) -> bool {
        match place.kind {
            LocationKind::Continent => self
                .reference
                .timezones_per_continent
                .get(&place.geoname_id)
                .map_or(false, |continent| !continent.is_disjoint(zones)),
            LocationKind::Country => match self.reference.timezones_per_country.get(&place.geoname_id) {
                Some(country) => !country.is_disjoint(zones),
                None => {
                    debug!("no timezone list for country {}", place.geoname_id);
                    false
                }
            },
            _ => place
                .timezone
                .as_ref()
                .map_or(false, |timezone| zones.contains(timezone)),
        }
    }
}

/// How strongly the candidate matches the user's home, in `[0, 1]`.
///
/// Family of the home scores 1, except that a whole country as home only
/// vouches for a sub-country candidate in proportion to its population.
fn home_match_fraction(
    place: &Place,
    toponym: &str,
    home: &HomeLocation,
    reference: &ReferenceData,
) -> f64 {
    let related = is_family(
        place,
        &home.place,
        toponym,
        &home.surface,
        FamilyOptions::default(),
        &reference.country_to_continents,
    );
    if !related {
        return 0.0;
    }
    if home.place.kind == LocationKind::Country && place.kind != LocationKind::Country {
        (place.population as f64 / home.place.population as f64).min(1.0)
    } else {
        1.0
    }
}

/// Remove tag substrings from each gram. Returns the surviving grams plus
/// the set of (lower-cased) forms that were created by stripping.
fn strip_tags(grams: &[String], sorted_tags: &[&str]) -> (Vec<String>, BTreeSet<String>) {
    let mut stripped_grams = Vec::new();
    let mut subsetted = BTreeSet::new();
    for gram in grams {
        let lower = gram.to_lowercase();
        let mut replaced = false;
        for tag in sorted_tags {
            if let Some(at) = lower.find(tag) {
                let end = at + tag.len();
                // Byte offsets into the lower-cased copy are only safe on
                // the original if lowering didn't change its length.
                if gram.len() == lower.len()
                    && gram.is_char_boundary(at)
                    && gram.is_char_boundary(end)
                {
                    let remainder = format!("{}{}", &gram[..at], &gram[end..]);
                    let remainder = WHITESPACE_PATTERN
                        .replace_all(remainder.trim(), " ")
                        .into_owned();
                    subsetted.insert(remainder.to_lowercase());
                    stripped_grams.push(remainder);
                    replaced = true;
                }
                break;
            }
        }
        if !replaced {
            stripped_grams.push(gram.clone());
        }
    }
    let stripped_grams = stripped_grams
        .into_iter()
        .filter(|gram| !gram.is_empty())
        .collect();
    subsetted.remove("");
    (stripped_grams, subsetted)
}

/// Title case over the whole string: every cased run starts with an
/// upper-case letter and continues in lower case.
fn is_title_case(text: &str) -> bool {
    let mut any_cased = false;
    let mut previous_cased = false;
    for c in text.chars() {
        if c.is_uppercase() {
            if previous_cased {
                return false;
            }
            any_cased = true;
            previous_cased = true;
        } else if c.is_lowercase() {
            if !previous_cased {
                return false;
            }
            any_cased = true;
            previous_cased = true;
        } else {
            previous_cased = false;
        }
    }
    any_cased
}

/// Find surface forms to drop because they sit inside another found form
/// ("york" inside "new york").
///
/// Normally the substring loses; but a capitalized substring of a longer
/// form whose words are *not* all title-cased keeps its place and the
/// longer form is dropped instead.
fn suppress_nested_toponyms<V>(
    found: &BTreeMap<String, V>,
    original_ngrams: &BTreeMap<String, String>,
) -> BTreeSet<String> {
    let mut suppressed = BTreeSet::new();
    for inner in found.keys() {
        for outer in found.keys() {
            if inner == outer {
                continue;
            }
            let padded_inner = format!(" {} ", inner);
            let padded_outer = format!(" {} ", outer);
            if !padded_outer.contains(&padded_inner) {
                continue;
            }
            let inner_capitalized = original_ngrams
                .get(inner)
                .and_then(|original| original.chars().next())
                .map_or(false, char::is_uppercase);
            if inner_capitalized {
                let outer_all_title = original_ngrams.get(outer).map_or(false, |original| {
                    original.split(' ').all(|part| {
                        part.chars().next().map_or(false, char::is_uppercase)
                    })
                });
                if outer_all_title {
                    suppressed.insert(inner.clone());
                } else {
                    suppressed.insert(outer.clone());
                }
            } else {
                suppressed.insert(inner.clone());
            }
        }
    }
    suppressed
}

/// Drop the lesser of any two same-name candidates that are family of
/// each other, keeping the one with more translations (the more important
/// place), with the bigger kind winning ties.
fn discard_same_name_family(places: &mut Vec<Place>, toponym: &str, reference: &ReferenceData) {
    let mut discard: BTreeSet<i64> = BTreeSet::new();
    for i in 0..places.len() {
        for j in (i + 1)..places.len() {
            let (a, b) = (&places[i], &places[j]);
            let related = is_family(
                a,
                b,
                toponym,
                toponym,
                FamilyOptions {
                    siblings: false,
                    consider_toponym_length: false,
                    ..FamilyOptions::default()
                },
                &reference.country_to_continents,
            );
            if !related {
                continue;
            }
            let drop_first = match b.translation_count.cmp(&a.translation_count) {
                std::cmp::Ordering::Greater => true,
                std::cmp::Ordering::Less => false,
                std::cmp::Ordering::Equal => b.kind.size_rank() < a.kind.size_rank(),
            };
            discard.insert(if drop_first { a.geoname_id } else { b.geoname_id });
        }
    }
    if !discard.is_empty() {
        places.retain(|place| !discard.contains(&place.geoname_id));
    }
}
