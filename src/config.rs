//! Runtime configuration for the geotagging pipeline.

use std::fs::File;
use std::path::Path;

use anyhow::Context;
use chrono::Duration;
use serde::Deserialize;

use crate::Result;

/// Maximum n-gram length considered for toponym recognition.
pub const MAX_NGRAM_LENGTH: usize = 3;

/// Minimum length (in characters) of a surface form, unless it is a
/// country alternative name.
pub const MINIMUM_GRAM_LENGTH: usize = 4;

/// Two towns are considered "near" if closer than this (meters).
pub const NEAR_DISTANCE: f64 = 200_000.0;

/// A message coordinate and a town are considered a match if closer than
/// this (meters).
pub const MAX_DISTANCE_CITY_COORDINATE: f64 = 200_000.0;

/// A message bounding-box center and a town are considered a match if
/// closer than this (meters).
pub const MAX_DISTANCE_BBOX_CENTER: f64 = 200_000.0;

/// Relative importance of each evidence type. These weights are baked into
/// the per-message evidence scores; the resolver only averages them.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ScoreWeights {
    /// Weight of an exact coordinate match.
    #[serde(default = "default_coordinates_weight")]
    pub coordinates: f64,
    /// Weight of a bounding-box center match.
    #[serde(default = "default_bbox_weight")]
    pub bbox: f64,
    /// Weight of a UTC-offset/timezone match.
    #[serde(default = "default_utc_offset_weight")]
    pub utc_offset: f64,
    /// Weight of a match against the user's declared home.
    #[serde(default = "default_user_home_weight")]
    pub user_home: f64,
    /// Weight of a family (geographic kinship) co-mention.
    #[serde(default = "default_family_weight")]
    pub family: f64,
}

fn default_coordinates_weight() -> f64 {
    2.0
}
fn default_bbox_weight() -> f64 {
    2.0
}
fn default_utc_offset_weight() -> f64 {
    0.5
}
fn default_user_home_weight() -> f64 {
    1.0
}
fn default_family_weight() -> f64 {
    3.0
}

impl Default for ScoreWeights {
    fn default() -> Self {
        ScoreWeights {
            coordinates: default_coordinates_weight(),
            bbox: default_bbox_weight(),
            utc_offset: default_utc_offset_weight(),
            user_home: default_user_home_weight(),
            family: default_family_weight(),
        }
    }
}

/// Tuning knobs for scoring and resolution, typically loaded from a JSON
/// file next to the data.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Minimum average score a candidate needs to be resolved, unless it
    /// is a country or continent.
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Population floor for title-cased surface forms (in languages that
    /// capitalize toponyms).
    #[serde(default = "default_min_population_capitalized")]
    pub min_population_capitalized: u64,

    /// Population floor for everything else.
    #[serde(default = "default_min_population_non_capitalized")]
    pub min_population_non_capitalized: u64,

    /// Length of the sliding analysis window, in seconds.
    #[serde(default = "default_analysis_length_secs")]
    pub analysis_length_secs: i64,

    /// Cadence at which resolution is recomputed, in seconds.
    #[serde(default = "default_timestep_length_secs")]
    pub timestep_length_secs: i64,

    /// How many most-common words to load per language. Capped at 10,000.
    #[serde(default = "default_n_most_common_words")]
    pub n_most_common_words: usize,

    /// Evidence weights.
    #[serde(default)]
    pub score_weights: ScoreWeights,

    /// Size of the LRU cache memoizing parsed user-home strings.
    #[serde(default = "default_user_home_cache_size")]
    pub user_home_cache_size: usize,

    /// Refresh period of the real-time tagging loop, in seconds.
    #[serde(default = "default_realtime_refresh_secs")]
    pub realtime_refresh_secs: u64,
}

fn default_threshold() -> f64 {
    0.2
}
fn default_min_population_capitalized() -> u64 {
    1
}
fn default_min_population_non_capitalized() -> u64 {
    5000
}
fn default_analysis_length_secs() -> i64 {
    24 * 60 * 60
}
fn default_timestep_length_secs() -> i64 {
    60 * 60
}
fn default_n_most_common_words() -> usize {
    10_000
}
fn default_user_home_cache_size() -> usize {
    10_000
}
fn default_realtime_refresh_secs() -> u64 {
    300
}

impl Default for Config {
    fn default() -> Self {
        // An empty JSON object deserializes to all defaults.
        serde_json::from_str("{}").expect("default config must deserialize")
    }
}

impl Config {
    /// Load a configuration from a JSON file, applying defaults for any
    /// missing field.
    pub fn from_path(path: &Path) -> Result<Config> {
        let f = File::open(path)
            .with_context(|| format!("could not open config file {}", path.display()))?;
        let mut config: Config = serde_json::from_reader(f)
            .with_context(|| format!("could not parse config file {}", path.display()))?;
        config.n_most_common_words = config.n_most_common_words.min(10_000);
        Ok(config)
    }

    /// The analysis window as a `chrono` duration.
    pub fn analysis_length(&self) -> Duration {
        Duration::seconds(self.analysis_length_secs)
    }

    /// The timestep as a `chrono` duration.
    pub fn timestep_length(&self) -> Duration {
        Duration::seconds(self.timestep_length_secs)
    }
}
