//! Windowed toponym resolution.
//!
//! The resolver flips the window cache inside out — from per-message
//! candidates to per-surface-form candidates — aggregates the evidence
//! each candidate collected across messages, and picks one gazetteer
//! entry per surface form. Message-level assignments are then
//! reconciled so a capitalized toponym can evict lower-case noise from
//! the same message.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use strum::IntoEnumIterator;
use tracing::trace;

use crate::dedup::{eliminate_near_duplicates, DedupTweet};
use crate::location::{LocationKind, Place};
use crate::message::{
    EvidenceScores, MessageId, ResolvedLocation, ScoreKind, TypeScore,
};
use crate::window::WindowCache;

/// One message's contribution to one candidate.
#[derive(Clone, Debug)]
struct TweetEvidence {
    id: MessageId,
    text: String,
    date: DateTime<Utc>,
    user_id: String,
    language: String,
    /// Original-case n-gram of the surface form in this message.
    original: String,
    scores: EvidenceScores,
}

/// All evidence one candidate collected across the window.
#[derive(Clone, Debug)]
struct CandidateAggregate {
    place: Place,
    tweets: Vec<TweetEvidence>,
}

/// A surface form resolved to one location, with the messages that
/// support it.
#[derive(Clone, Debug)]
pub struct ResolvedToponym {
    pub surface_form: String,
    pub message_ids: Vec<MessageId>,
    pub location: ResolvedLocation,
}

/// A candidate with its aggregate scores, pre-selection.
struct RankedCandidate {
    aggregate: CandidateAggregate,
    scores: BTreeMap<String, TypeScore>,
    avg_score: f64,
}

/// Resolve every surface form in the window to at most one location.
pub fn resolve_window(cache: &WindowCache, threshold: f64) -> Vec<ResolvedToponym> {
    let toponyms = transpose(cache);
    let mut resolved = Vec::new();
    for (surface_form, candidates) in toponyms {
        let mut ranked: Vec<RankedCandidate> = candidates
            .into_values()
            .map(score_candidate)
            .collect();

        // Keep candidates over the threshold; countries and continents
        // are exempt, they get a say below even with no evidence.
        ranked.retain(|candidate| {
            candidate.avg_score >= threshold
                || matches!(
                    candidate.aggregate.place.kind,
                    LocationKind::Country | LocationKind::Continent
                )
        });
        if ranked.is_empty() {
            continue;
        }

        // Highest score first, population as the tie-breaker.
        ranked.sort_by(|a, b| {
            b.aggregate
                .place
                .population
                .cmp(&a.aggregate.place.population)
        });
        ranked.sort_by(|a, b| {
            b.avg_score
                .partial_cmp(&a.avg_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut selected = 0;
        if ranked[selected].avg_score == 0.0 {
            // Nothing has evidence; fall back to sheer size.
            for (index, candidate) in ranked.iter().enumerate() {
                if candidate.aggregate.place.population
                    > ranked[selected].aggregate.place.population
                {
                    selected = index;
                }
            }
        }

        let big_admin: Vec<usize> = ranked
            .iter()
            .enumerate()
            .filter(|(_, candidate)| {
                matches!(
                    candidate.aggregate.place.kind,
                    LocationKind::Country | LocationKind::Continent
                )
            })
            .map(|(index, _)| index)
            .collect();
        if !big_admin.is_empty() {
            // A country or continent reading beats same-named towns;
            // among several, the most populous wins.
            selected = big_admin
                .iter()
                .copied()
                .reduce(|best, index| {
                    if ranked[index].aggregate.place.population
                        > ranked[best].aggregate.place.population
                    {
                        index
                    } else {
                        best
                    }
                })
                .expect("big_admin is non-empty");
        } else if ranked[selected].aggregate.place.kind != LocationKind::Adm1 {
            // Prefer the subdivision over a town of the same name in the
            // same country.
            let country = ranked[selected].aggregate.place.country_geoname_id;
            if let Some(index) = ranked.iter().position(|candidate| {
                candidate.aggregate.place.kind == LocationKind::Adm1
                    && candidate.aggregate.place.country_geoname_id.is_some()
                    && candidate.aggregate.place.country_geoname_id == country
            }) {
                selected = index;
            }
        }

        let winner = &ranked[selected];
        let place = &winner.aggregate.place;
        let message_ids: Vec<MessageId> = winner
            .aggregate
            .tweets
            .iter()
            .filter(|tweet| {
                place.languages.contains("general")
                    || (place.languages.contains("abbr")
                        && place.abbreviations.contains(&tweet.original))
                    || place.languages.contains(&tweet.language)
            })
            .map(|tweet| tweet.id.clone())
            .collect();

        trace!(
            "resolved {:?} to {} ({} supporting messages)",
            surface_form,
            place.geoname_id,
            message_ids.len()
        );
        resolved.push(ResolvedToponym {
            location: ResolvedLocation {
                surface_form: surface_form.clone(),
                geoname_id: place.geoname_id,
                kind: place.kind,
                population: place.population,
                country_geoname_id: place.country_geoname_id,
                adm1_geoname_id: place.adm1_geoname_id,
                coordinate: place.coordinate,
                avg_score: winner.avg_score,
                scores: winner.scores.clone(),
            },
            surface_form,
            message_ids,
        });
    }
    resolved
}

/// Reassemble per-message assignments from the resolved toponyms,
/// dropping lower-case surface forms from messages that also carry
/// capitalized ones (unless they came from tag stripping).
pub fn assign_messages(
    resolved: &[ResolvedToponym],
    cache: &WindowCache,
) -> BTreeMap<MessageId, Vec<ResolvedLocation>> {
    let mut by_message: BTreeMap<MessageId, Vec<ResolvedLocation>> = BTreeMap::new();
    for toponym in resolved {
        for id in &toponym.message_ids {
            by_message
                .entry(id.clone())
                .or_default()
                .push(toponym.location.clone());
        }
    }

    let mut assignments = BTreeMap::new();
    for (id, locations) in by_message {
        let message = match cache.get(&id) {
            Some(message) => message,
            None => continue,
        };
        let capitalized: BTreeSet<String> = locations
            .iter()
            .filter(|location| {
                message
                    .original_ngrams
                    .get(&location.surface_form)
                    .and_then(|original| original.chars().next())
                    .map_or(false, char::is_uppercase)
            })
            .map(|location| location.surface_form.clone())
            .collect();

        let locations: Vec<ResolvedLocation> =
            if !capitalized.is_empty() && capitalized.len() != locations.len() {
                locations
                    .into_iter()
                    .filter(|location| {
                        capitalized.contains(&location.surface_form)
                            || message.subsetted_ngrams.contains(&location.surface_form)
                    })
                    .collect()
            } else {
                locations
            };

        if !locations.is_empty() {
            assignments.insert(id, locations);
        }
    }
    assignments
}

/// Flip the cache from per-message to per-surface-form.
fn transpose(cache: &WindowCache) -> BTreeMap<String, BTreeMap<i64, CandidateAggregate>> {
    let mut toponyms: BTreeMap<String, BTreeMap<i64, CandidateAggregate>> = BTreeMap::new();
    for (id, message) in cache.iter() {
        for (surface_form, candidates) in &message.toponyms {
            let by_geoname = toponyms.entry(surface_form.clone()).or_default();
            for (geoname_id, candidate) in candidates {
                let aggregate =
                    by_geoname
                        .entry(*geoname_id)
                        .or_insert_with(|| CandidateAggregate {
                            place: candidate.place.clone(),
                            tweets: Vec::new(),
                        });
                aggregate.tweets.push(TweetEvidence {
                    id: id.clone(),
                    text: message.text.clone(),
                    date: message.timestamp,
                    user_id: message.user_id.clone(),
                    language: message.language.clone(),
                    original: message
                        .original_ngrams
                        .get(surface_form)
                        .cloned()
                        .unwrap_or_default(),
                    scores: candidate.scores,
                });
            }
        }
    }
    toponyms
}

/// Aggregate one candidate's evidence across the window.
fn score_candidate(aggregate: CandidateAggregate) -> RankedCandidate {
    let one_per_user = one_per_user(&aggregate.tweets);
    let place = &aggregate.place;

    let mut scores = BTreeMap::new();
    let mut avg_score = 0.0;
    for kind in ScoreKind::iter() {
        let score = if kind == ScoreKind::Family {
            family_score(&aggregate.tweets, place)
        } else {
            let sum: f64 = one_per_user
                .iter()
                .filter(|tweet| place.language_matches(&tweet.language))
                .map(|tweet| tweet.scores.get(kind))
                .sum();
            TypeScore {
                type_score: sum,
                avg_type_score: sum / one_per_user.len() as f64,
            }
        };
        avg_score += score.avg_type_score;
        scores.insert(kind.to_string(), score);
    }

    RankedCandidate {
        aggregate,
        scores,
        avg_score: (avg_score * 1000.0).round() / 1000.0,
    }
}

/// Family evidence needs duplicate protection: one viral text re-posted
/// ten times is one co-mention, not ten.
fn family_score(tweets: &[TweetEvidence], place: &Place) -> TypeScore {
    let total: f64 = tweets.iter().map(|tweet| tweet.scores.family).sum();
    if total <= 0.0 {
        return TypeScore {
            type_score: 0.0,
            avg_type_score: 0.0,
        };
    }

    let with_family: Vec<&TweetEvidence> = tweets
        .iter()
        .filter(|tweet| tweet.scores.family > 0.0)
        .collect();
    let surviving: Vec<&TweetEvidence> = if with_family.len() > 1 {
        let dedup_input: Vec<DedupTweet> = tweets
            .iter()
            .map(|tweet| DedupTweet {
                id: tweet.id.clone(),
                text: tweet.text.clone(),
                date: tweet.date,
            })
            .collect();
        let kept = eliminate_near_duplicates(&dedup_input);
        with_family
            .into_iter()
            .filter(|tweet| kept.contains(&tweet.id))
            .collect()
    } else {
        with_family
    };
    if surviving.is_empty() {
        return TypeScore {
            type_score: 0.0,
            avg_type_score: 0.0,
        };
    }

    let sum: f64 = surviving
        .iter()
        .filter(|tweet| place.language_matches(&tweet.language))
        .map(|tweet| tweet.scores.family)
        .sum();
    TypeScore {
        type_score: sum,
        avg_type_score: sum / surviving.len() as f64,
    }
}

/// Keep only the most recent message per user (first seen wins a tie).
fn one_per_user(tweets: &[TweetEvidence]) -> Vec<&TweetEvidence> {
    let mut by_user: BTreeMap<&str, &TweetEvidence> = BTreeMap::new();
    for tweet in tweets {
        match by_user.get(tweet.user_id.as_str()) {
            Some(existing) if existing.date >= tweet.date => {}
            _ => {
                by_user.insert(&tweet.user_id, tweet);
            }
        }
    }
    by_user.into_values().collect()
}
