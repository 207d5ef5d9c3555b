//! End-to-end window scenarios, driven through the library with
//! in-memory collaborators and a small seeded gazetteer.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use geotag_tweets::config::Config;
use geotag_tweets::driver::Driver;
use geotag_tweets::errors::GeotagError;
use geotag_tweets::gazetteer::{Gazetteer, MemoryGazetteer};
use geotag_tweets::geometry::AreaIndex;
use geotag_tweets::location::{GazetteerEntry, LocationKind, LonLat};
use geotag_tweets::message::{Message, MessageUser};
use geotag_tweets::reference::{AdmEntry, ReferenceData};
use geotag_tweets::resolver::resolve_window;
use geotag_tweets::scorer::Scorer;
use geotag_tweets::sink::MemorySink;
use geotag_tweets::store::MemoryStore;
use geotag_tweets::window::WindowCache;

const JAPAN: i64 = 1861060;
const TOKYO: i64 = 1850144;
const MEXICO_COUNTRY: i64 = 3996063;
const MEXICO_CITY: i64 = 3530597;
const NEW_YORK: i64 = 5128581;
const YORK: i64 = 2633352;
const UNITED_KINGDOM: i64 = 2635167;
const UNITED_STATES: i64 = 6252001;
const NETHERLANDS: i64 = 2750405;
const UTRECHT: i64 = 2745912;
const AMSTERDAM: i64 = 2759794;
const FRANCE: i64 = 3017382;
const PARIS: i64 = 2988507;
const TINY_PARIS: i64 = 4046255;

fn town(
    geoname_id: i64,
    population: u64,
    lon: f64,
    lat: f64,
    country: i64,
) -> GazetteerEntry {
    GazetteerEntry {
        geoname_id,
        feature_code: "PPL".to_owned(),
        feature_class: Some("P".to_owned()),
        languages: ["general".to_owned()].into_iter().collect(),
        coordinate: Some(LonLat::new(lon, lat)),
        timezone: None,
        population,
        country_geoname_id: Some(country),
        adm1_geoname_id: None,
        translation_count: 10,
        abbreviations: Vec::new(),
    }
}

fn country(geoname_id: i64, population: u64) -> GazetteerEntry {
    GazetteerEntry {
        geoname_id,
        feature_code: "PCLI".to_owned(),
        feature_class: Some("A".to_owned()),
        languages: ["general".to_owned()].into_iter().collect(),
        coordinate: None,
        timezone: None,
        population,
        country_geoname_id: Some(geoname_id),
        adm1_geoname_id: None,
        translation_count: 50,
        abbreviations: Vec::new(),
    }
}

fn gazetteer() -> MemoryGazetteer {
    let mut gazetteer = MemoryGazetteer::new();
    gazetteer.insert("tokyo", town(TOKYO, 9_000_000, 139.77, 35.68, JAPAN));
    gazetteer.insert("mexico", country(MEXICO_COUNTRY, 130_000_000));
    gazetteer.insert("mexico", town(MEXICO_CITY, 9_000_000, -99.13, 19.43, MEXICO_COUNTRY));
    gazetteer.insert(
        "new york",
        town(NEW_YORK, 8_500_000, -74.0, 40.71, UNITED_STATES),
    );
    gazetteer.insert("york", town(YORK, 200_000, -1.08, 53.96, UNITED_KINGDOM));
    gazetteer.insert("utrecht", town(UTRECHT, 350_000, 5.12, 52.09, NETHERLANDS));
    gazetteer.insert(
        "amsterdam",
        town(AMSTERDAM, 800_000, 4.89, 52.37, NETHERLANDS),
    );
    gazetteer.insert("france", country(FRANCE, 67_000_000));
    gazetteer.insert("paris", town(PARIS, 2_200_000, 2.35, 48.85, FRANCE));
    gazetteer.insert("paris", {
        let mut tiny = town(TINY_PARIS, 200, -95.55, 33.66, UNITED_STATES);
        tiny.translation_count = 0;
        tiny
    });
    gazetteer
}

fn reference() -> ReferenceData {
    let mut reference = ReferenceData::default();
    reference
        .tags
        .insert("en".to_owned(), ["storm".to_owned()].into_iter().collect());
    reference
        .tags
        .insert("nl".to_owned(), ["rains".to_owned()].into_iter().collect());
    reference.toponym_capitalization =
        ["en".to_owned(), "nl".to_owned()].into_iter().collect();
    reference.adm_names.insert(
        "netherlands".to_owned(),
        vec![AdmEntry {
            geoname_id: NETHERLANDS,
            kind: LocationKind::Country,
            population: 17_000_000,
            country_geoname_id: Some(NETHERLANDS),
            adm1_geoname_id: None,
            abbreviations: Vec::new(),
        }],
    );
    reference
}

fn scorer() -> Scorer {
    scorer_with_config(&Config::default())
}

fn scorer_with_config(config: &Config) -> Scorer {
    let gazetteer: Arc<dyn Gazetteer> = Arc::new(gazetteer());
    Scorer::new(
        gazetteer,
        Arc::new(reference()),
        Arc::new(AreaIndex::new()),
        config,
    )
}

fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2016, 1, 1, 12, minute, 0).unwrap()
}

fn message(id: &str, text: &str, language: &str, minute: u32, user: &str) -> Message {
    Message {
        id: id.to_owned(),
        text: text.to_owned(),
        language: language.to_owned(),
        timestamp: at(minute),
        retweet: false,
        user: MessageUser {
            id: user.to_owned(),
            home_text: None,
            utc_offset_seconds: None,
        },
        coordinate: None,
        bbox: None,
    }
}

/// Scenario: a coordinate right on the capital resolves the mention, end
/// to end through the driver.
#[tokio::test]
async fn capital_city_coordinate_match_resolves_tokyo() {
    let mut config = Config::default();
    config.analysis_length_secs = 6 * 3600;
    config.timestep_length_secs = 3600;

    let mut tokyo_message = message("t1", "Big storm in Tokyo", "en", 30, "u1");
    tokyo_message.coordinate = Some(LonLat::new(139.77, 35.68));

    let sink = MemorySink::new();
    let mut driver = Driver::new(
        scorer_with_config(&config),
        Box::new(MemoryStore::new(vec![tokyo_message])),
        Box::new(sink.clone()),
        &config,
        4,
    );
    let start = Utc.with_ymd_and_hms(2016, 1, 1, 12, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2016, 1, 1, 14, 0, 0).unwrap();
    driver.run(start, Some(end), false).await.unwrap();

    let state = sink.state();
    let locations = &state.assignments["t1"];
    assert_eq!(locations.len(), 1);
    let location = &locations[0];
    assert_eq!(location.surface_form, "tokyo");
    assert_eq!(location.geoname_id, TOKYO);
    assert_eq!(location.scores["coordinates"].type_score, 2.0);
    assert_eq!(location.scores["bbox"].type_score, 0.0);
    assert_eq!(location.scores["family"].type_score, 0.0);
    assert_eq!(location.scores["user_home"].type_score, 0.0);
    assert_eq!(location.scores["utc_offset"].type_score, 0.0);
    assert!(location.avg_score >= config.threshold);
}

/// Scenario: with no evidence at all, the country "Mexico" outranks the
/// same-named city.
#[tokio::test]
async fn country_mention_outranks_same_name_city() {
    let mut scorer = scorer();
    let scored = scorer
        .score(&message("m1", "storm in Mexico", "en", 0, "u1"))
        .await
        .unwrap()
        .expect("the mention should score");
    // The city is family of its own country, so the same-name collapse
    // already keeps only the better-known country reading.
    assert!(scored.toponyms["mexico"].contains_key(&MEXICO_COUNTRY));
    assert!(!scored.toponyms["mexico"].contains_key(&MEXICO_CITY));

    let mut cache = WindowCache::new();
    cache.update_bulk(vec![("m1".to_owned(), scored)]);
    let resolved = resolve_window(&cache, 0.2);
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].location.geoname_id, MEXICO_COUNTRY);
    assert_eq!(resolved[0].location.kind, LocationKind::Country);
    assert_eq!(resolved[0].location.avg_score, 0.0);
}

/// Scenario: "york" disappears inside the fully title-cased "New York".
#[tokio::test]
async fn substring_suppression_resolves_new_york() {
    let mut scorer = scorer();
    // A coordinate in Manhattan supplies the evidence that lifts the
    // mention over the resolution threshold.
    let mut flooding = message("n1", "storm New York flooding", "en", 0, "u1");
    flooding.coordinate = Some(LonLat::new(-74.0, 40.71));
    let scored = scorer
        .score(&flooding)
        .await
        .unwrap()
        .expect("the mention should score");
    assert!(scored.toponyms.contains_key("new york"));
    assert!(!scored.toponyms.contains_key("york"));

    let mut cache = WindowCache::new();
    cache.update_bulk(vec![("n1".to_owned(), scored)]);
    let resolved = resolve_window(&cache, 0.2);
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].location.geoname_id, NEW_YORK);
}

/// Scenario: the author's declared home in Amsterdam vouches for the
/// nearby Utrecht reading.
#[tokio::test]
async fn user_home_family_boost_resolves_utrecht() {
    let mut scorer = scorer();
    let mut rains = message("u1", "Heavy rains in Utrecht", "nl", 0, "user-nl");
    rains.user.home_text = Some("Amsterdam, Netherlands".to_owned());
    let scored = scorer.score(&rains).await.unwrap().expect("should score");
    let candidate = &scored.toponyms["utrecht"][&UTRECHT];
    assert_eq!(candidate.scores.user_home, 1.0);

    let mut cache = WindowCache::new();
    cache.update_bulk(vec![("u1".to_owned(), scored)]);
    let resolved = resolve_window(&cache, 0.2);
    assert_eq!(resolved.len(), 1);
    let location = &resolved[0].location;
    assert_eq!(location.geoname_id, UTRECHT);
    assert_eq!(location.scores["user_home"].type_score, 1.0);
    assert!(location.avg_score >= 0.2);
}

/// Scenario: three users co-mention Paris and France; the family
/// evidence aggregates to the full weight on both sides.
#[tokio::test]
async fn cross_message_family_aggregation() {
    let mut scorer = scorer();
    let texts = [
        ("p1", "ua", "storm alert flood warning paris france rain coming wind rising"),
        ("p2", "ub", "storm damage flood waters paris france power out metro shut"),
        ("p3", "uc", "rain falling wind howling paris france power cut metro dark"),
    ];
    let mut cache = WindowCache::new();
    for (index, (id, user, text)) in texts.into_iter().enumerate() {
        let scored = scorer
            .score(&message(id, text, "en", index as u32 * 10, user))
            .await
            .unwrap()
            .expect("should score");
        // The scorer flags the pair as family within each message.
        assert_eq!(scored.toponyms["paris"][&PARIS].scores.family, 3.0);
        assert_eq!(scored.toponyms["france"][&FRANCE].scores.family, 3.0);
        cache.update_bulk(vec![(id.to_owned(), scored)]);
    }

    let resolved = resolve_window(&cache, 0.2);
    let paris = resolved
        .iter()
        .find(|toponym| toponym.surface_form == "paris")
        .expect("paris resolves");
    let france = resolved
        .iter()
        .find(|toponym| toponym.surface_form == "france")
        .expect("france resolves");
    assert_eq!(paris.location.geoname_id, PARIS);
    assert_eq!(france.location.geoname_id, FRANCE);
    assert_eq!(paris.location.scores["family"].type_score, 9.0);
    assert_eq!(paris.location.scores["family"].avg_type_score, 3.0);
    assert!(paris.location.avg_score >= 0.2);
    assert!(france.location.avg_score >= 0.2);
    assert_eq!(paris.message_ids.len(), 3);
}

/// Scenario: a lower-case mid-sentence "paris" needs the non-capitalized
/// population floor, which excludes the 200-person namesake.
#[tokio::test]
async fn capitalization_filter_in_mid_sentence() {
    let mut scorer = scorer();
    let scored = scorer
        .score(&message("c1", "storm i love paris", "en", 0, "u1"))
        .await
        .unwrap()
        .expect("should score");
    let candidates = &scored.toponyms["paris"];
    assert!(candidates.contains_key(&PARIS));
    assert!(!candidates.contains_key(&TINY_PARIS));
}

/// A title-cased mid-sentence mention accepts tiny places instead.
#[tokio::test]
async fn capitalized_mention_accepts_tiny_places() {
    let mut scorer = scorer();
    let scored = scorer
        .score(&message("c2", "storm hits Paris again", "en", 0, "u1"))
        .await
        .unwrap()
        .expect("should score");
    let candidates = &scored.toponyms["paris"];
    assert!(candidates.contains_key(&PARIS));
    assert!(candidates.contains_key(&TINY_PARIS));
}

#[tokio::test]
async fn boundary_cases_score_to_nothing() {
    let mut scorer = scorer();
    // Empty message.
    assert!(scorer
        .score(&message("b1", "", "en", 0, "u1"))
        .await
        .unwrap()
        .is_none());
    // No tag list for the language.
    assert!(scorer
        .score(&message("b2", "storm in Tokyo", "xx", 0, "u1"))
        .await
        .unwrap()
        .is_none());
    // Retweets are never scored.
    let mut retweet = message("b3", "storm in Tokyo", "en", 0, "u1");
    retweet.retweet = true;
    assert!(scorer.score(&retweet).await.unwrap().is_none());
}

#[tokio::test]
async fn common_words_never_become_toponyms() {
    let gazetteer_arc: Arc<dyn Gazetteer> = Arc::new(gazetteer());
    let mut reference = reference();
    reference
        .most_common_words
        .insert("en".to_owned(), ["tokyo".to_owned()].into_iter().collect());
    let mut scorer = Scorer::new(
        gazetteer_arc,
        Arc::new(reference),
        Arc::new(AreaIndex::new()),
        &Config::default(),
    );
    // Every candidate gram is a common word, so nothing survives.
    assert!(scorer
        .score(&message("w1", "storm in tokyo", "en", 0, "u1"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn scored_surface_forms_always_carry_original_ngrams() {
    let mut scorer = scorer();
    let scored = scorer
        .score(&message("i1", "storm in Mexico and Tokyo", "en", 0, "u1"))
        .await
        .unwrap()
        .expect("should score");
    let keys: BTreeSet<&String> = scored.toponyms.keys().collect();
    for key in keys {
        assert!(
            scored.original_ngrams.contains_key(key),
            "missing original n-gram for {:?}",
            key
        );
    }
    // The corpus tag itself never becomes a toponym.
    assert!(!scored.toponyms.contains_key("storm"));
}

/// Running the same window twice yields identical assignments.
#[tokio::test]
async fn driver_runs_are_deterministic() {
    let mut config = Config::default();
    config.analysis_length_secs = 6 * 3600;
    config.timestep_length_secs = 3600;
    let start = Utc.with_ymd_and_hms(2016, 1, 1, 12, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2016, 1, 1, 14, 0, 0).unwrap();

    let run = || async {
        let mut tokyo_message = message("t1", "Big storm in Tokyo", "en", 30, "u1");
        tokyo_message.coordinate = Some(LonLat::new(139.77, 35.68));
        let messages = vec![
            tokyo_message,
            message("m1", "storm in Mexico", "en", 40, "u2"),
        ];
        let sink = MemorySink::new();
        let mut driver = Driver::new(
            scorer_with_config(&config),
            Box::new(MemoryStore::new(messages)),
            Box::new(sink.clone()),
            &config,
            4,
        );
        driver.run(start, Some(end), false).await.unwrap();
        let state = sink.state();
        state.assignments.clone()
    };
    let first = run().await;
    let second = run().await;
    assert_eq!(first, second);
    assert!(first.contains_key("t1"));
    assert!(first.contains_key("m1"));
}

/// A second timestep with an unchanged window produces no further
/// writes.
#[tokio::test]
async fn unchanged_window_commits_once() {
    let mut config = Config::default();
    config.analysis_length_secs = 6 * 3600;
    config.timestep_length_secs = 3600;

    let mut tokyo_message = message("t1", "Big storm in Tokyo", "en", 30, "u1");
    tokyo_message.coordinate = Some(LonLat::new(139.77, 35.68));

    let sink = MemorySink::new();
    let mut driver = Driver::new(
        scorer_with_config(&config),
        Box::new(MemoryStore::new(vec![tokyo_message])),
        Box::new(sink.clone()),
        &config,
        4,
    );
    let start = Utc.with_ymd_and_hms(2016, 1, 1, 12, 0, 0).unwrap();
    // Two timesteps; the message only arrives in the first.
    let end = Utc.with_ymd_and_hms(2016, 1, 1, 14, 0, 0).unwrap();
    driver.run(start, Some(end), false).await.unwrap();

    assert_eq!(sink.state().commits, 1);
}

/// A gazetteer that fails transiently a fixed number of times before
/// answering normally.
struct FlakyGazetteer {
    inner: MemoryGazetteer,
    remaining_failures: AtomicUsize,
}

#[async_trait]
impl Gazetteer for FlakyGazetteer {
    async fn lookup(
        &self,
        surface_forms: &BTreeSet<String>,
    ) -> geotag_tweets::Result<BTreeMap<String, Vec<GazetteerEntry>>> {
        let failed = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(
                GeotagError::GazetteerTransient("gazetteer offline".to_owned()).into(),
            );
        }
        self.inner.lookup(surface_forms).await
    }
}

/// A transient gazetteer failure re-runs the window instead of killing
/// the whole analysis.
#[tokio::test]
async fn transient_gazetteer_failures_retry_the_window() {
    let mut config = Config::default();
    config.analysis_length_secs = 6 * 3600;
    config.timestep_length_secs = 3600;

    let flaky: Arc<dyn Gazetteer> = Arc::new(FlakyGazetteer {
        inner: gazetteer(),
        remaining_failures: AtomicUsize::new(1),
    });
    let scorer = Scorer::new(
        flaky,
        Arc::new(reference()),
        Arc::new(AreaIndex::new()),
        &config,
    );

    let mut tokyo_message = message("t1", "Big storm in Tokyo", "en", 30, "u1");
    tokyo_message.coordinate = Some(LonLat::new(139.77, 35.68));

    let sink = MemorySink::new();
    let mut driver = Driver::new(
        scorer,
        Box::new(MemoryStore::new(vec![tokyo_message])),
        Box::new(sink.clone()),
        &config,
        4,
    );
    let start = Utc.with_ymd_and_hms(2016, 1, 1, 12, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2016, 1, 1, 13, 0, 0).unwrap();
    driver.run(start, Some(end), false).await.unwrap();

    let state = sink.state();
    assert_eq!(state.assignments["t1"][0].geoname_id, TOKYO);
}
