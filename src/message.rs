//! The message data model: raw input records, per-message scoring output,
//! and resolved location assignments.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::location::{LocationKind, LonLat, Place};

/// Opaque message identifier. Twitter ids fit, but nothing here depends on
/// their shape.
pub type MessageId = String;

/// One of the five evidence types.
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    strum_macros::Display,
    strum_macros::EnumIter,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum ScoreKind {
    Coordinates,
    Bbox,
    UtcOffset,
    UserHome,
    Family,
}

/// Evidence attached to one candidate for one message. Values are already
/// weighted: a coordinate match stores the coordinate weight, not `1`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceScores {
    pub coordinates: f64,
    pub bbox: f64,
    pub utc_offset: f64,
    pub user_home: f64,
    pub family: f64,
}

impl EvidenceScores {
    pub fn get(&self, kind: ScoreKind) -> f64 {
        match kind {
            ScoreKind::Coordinates => self.coordinates,
            ScoreKind::Bbox => self.bbox,
            ScoreKind::UtcOffset => self.utc_offset,
            ScoreKind::UserHome => self.user_home,
            ScoreKind::Family => self.family,
        }
    }
}

/// The author metadata we use as evidence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageUser {
    pub id: String,
    /// Free-text declared home location ("Amsterdam, Netherlands").
    #[serde(default)]
    pub home_text: Option<String>,
    /// The author's UTC offset at posting time, in seconds.
    #[serde(default)]
    pub utc_offset_seconds: Option<i32>,
}

/// A geotagged bounding box attached to a message: (west, south, east,
/// north) in degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BoundingBox {
    /// The box's center point, which stands in for a coordinate when no
    /// exact coordinate is present.
    pub fn center(&self) -> LonLat {
        LonLat::new((self.west + self.east) / 2.0, (self.south + self.north) / 2.0)
    }
}

/// One raw input message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub text: String,
    /// ISO language code the message was written in.
    pub language: String,
    pub timestamp: DateTime<Utc>,
    /// Retweets are never scored; their text belongs to someone else.
    #[serde(default)]
    pub retweet: bool,
    pub user: MessageUser,
    #[serde(default)]
    pub coordinate: Option<LonLat>,
    #[serde(default)]
    pub bbox: Option<BoundingBox>,
}

/// One candidate location for one surface form in one message: the static
/// gazetteer fields plus the evidence collected from this message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub place: Place,
    pub scores: EvidenceScores,
}

/// The scorer's output for one message, as cached in the analysis window.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoredMessage {
    pub timestamp: DateTime<Utc>,
    pub language: String,
    pub user_id: String,
    /// Normalized, case-preserved text.
    pub text: String,
    /// For each lower-cased surface form, the first original-case form we
    /// saw (preferring a non-title-case variant).
    pub original_ngrams: BTreeMap<String, String>,
    /// Surface forms created by stripping a topic tag out of an n-gram.
    pub subsetted_ngrams: BTreeSet<String>,
    /// `surface form → geoname id → candidate`.
    pub toponyms: BTreeMap<String, BTreeMap<i64, ScoredCandidate>>,
    /// Locations committed downstream for this message, if any. Used to
    /// decide whether a later window's resolution needs a new write.
    #[serde(default)]
    pub locations: Option<Vec<ResolvedLocation>>,
}

/// Aggregate score of one candidate for one evidence type, across the
/// window.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TypeScore {
    /// Sum of the (weighted) per-message scores.
    pub type_score: f64,
    /// That sum divided by the number of contributing messages.
    pub avg_type_score: f64,
}

/// A surface form resolved to a single gazetteer entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResolvedLocation {
    pub surface_form: String,
    pub geoname_id: i64,
    pub kind: LocationKind,
    pub population: u64,
    #[serde(default)]
    pub country_geoname_id: Option<i64>,
    #[serde(default)]
    pub adm1_geoname_id: Option<i64>,
    #[serde(default)]
    pub coordinate: Option<LonLat>,
    /// Sum over evidence types of `type_score / contributing messages`,
    /// rounded to 3 decimals.
    pub avg_score: f64,
    /// Per-evidence-type breakdown, keyed by the evidence type's
    /// snake_case name.
    pub scores: BTreeMap<String, TypeScore>,
}
