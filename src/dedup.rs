//! Near-duplicate tweet removal.
//!
//! Retweets-by-hand and bot floods repeat the same text with tiny edits,
//! which would let one event inflate the family evidence. We collapse
//! exact duplicates to the earliest copy, then vectorize what remains
//! (TF-IDF over word 1–2-grams) and cluster anything closer than a cosine
//! distance of 0.2, keeping the earliest tweet per cluster.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

/// Cosine distance under which two tweets count as the same message.
const SIMILARITY_THRESHOLD: f64 = 0.20;

/// Document-frequency floor for short inputs.
const DEFAULT_FREQUENCY_CUTOFF: usize = 2;

// Word-ish tokens for vectorization: hyphenated words, numbers, words with
// an optional #/@ sigil, emoji, and runs of punctuation. No single
// punctuation characters.
static DEDUP_TOKEN_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\w+(?:-\w+)+|[-+]?\d+[.,]?\d+|[#@]?\w+|[\u{2600}-\u{26FF}\u{2700}-\u{27BF}\u{10000}-\u{10FFFF}]|[.:()\[\],;?!*]{2,4}",
    )
    .unwrap()
});

/// The slice of a tweet the deduplicator needs.
#[derive(Clone, Debug)]
pub struct DedupTweet {
    pub id: String,
    pub text: String,
    pub date: DateTime<Utc>,
}

/// Collapse exact and near-duplicate tweets, returning the ids that
/// survive.
///
/// Per duplicate group, the earliest-dated tweet survives (the most
/// likely original); tweets outside any group always survive.
pub fn eliminate_near_duplicates(tweets: &[DedupTweet]) -> BTreeSet<String> {
    // Exact-text collapse first: cheapest, and it keeps the vectorizer's
    // document frequencies honest.
    let mut earliest_by_text: BTreeMap<&str, usize> = BTreeMap::new();
    for (index, tweet) in tweets.iter().enumerate() {
        match earliest_by_text.get(tweet.text.as_str()) {
            Some(&kept) if tweets[kept].date <= tweet.date => {}
            _ => {
                earliest_by_text.insert(&tweet.text, index);
            }
        }
    }
    let mut survivors: Vec<usize> = earliest_by_text.into_values().collect();
    survivors.sort_unstable();

    if survivors.len() > 1 {
        let clusters = cluster_similar(tweets, &survivors);
        let mut clustered: BTreeSet<usize> = BTreeSet::new();
        let mut kept_of_clusters: Vec<usize> = Vec::new();
        for cluster in &clusters {
            clustered.extend(cluster.iter().copied());
            let earliest = cluster
                .iter()
                .copied()
                .min_by_key(|&index| (tweets[index].date, index))
                .expect("clusters are never empty");
            kept_of_clusters.push(earliest);
        }
        survivors.retain(|index| !clustered.contains(index));
        survivors.extend(kept_of_clusters);
    }

    survivors
        .into_iter()
        .map(|index| tweets[index].id.clone())
        .collect()
}

/// Group near-identical survivors into disjoint clusters of indices into
/// `tweets`.
fn cluster_similar(tweets: &[DedupTweet], survivors: &[usize]) -> Vec<Vec<usize>> {
    let n = survivors.len();
    let min_df = if n > 1000 {
        (n as f64).ln().floor() as usize
    } else {
        DEFAULT_FREQUENCY_CUTOFF
    };

    // Term counts per document.
    let counts: Vec<BTreeMap<String, usize>> = survivors
        .iter()
        .map(|&index| term_counts(&tweets[index].text))
        .collect();

    // Document frequencies, then the vocabulary that clears `min_df`.
    let mut document_frequency: BTreeMap<&str, usize> = BTreeMap::new();
    for doc in &counts {
        for term in doc.keys() {
            *document_frequency.entry(term).or_insert(0) += 1;
        }
    }
    let idf: BTreeMap<&str, f64> = document_frequency
        .iter()
        .filter(|(_, &df)| df >= min_df)
        .map(|(&term, &df)| {
            let idf = ((1.0 + n as f64) / (1.0 + df as f64)).ln() + 1.0;
            (term, idf)
        })
        .collect();
    if idf.is_empty() {
        return Vec::new();
    }

    // Sub-linear TF-IDF, L2-normalized, kept sparse.
    let vectors: Vec<BTreeMap<&str, f64>> = counts
        .iter()
        .map(|doc| {
            let mut vector: BTreeMap<&str, f64> = doc
                .iter()
                .filter_map(|(term, &tf)| {
                    idf.get(term.as_str())
                        .map(|idf| (term.as_str(), (1.0 + (tf as f64).ln()) * idf))
                })
                .collect();
            let norm = vector.values().map(|w| w * w).sum::<f64>().sqrt();
            if norm > 0.0 {
                for weight in vector.values_mut() {
                    *weight /= norm;
                }
            }
            vector
        })
        .collect();

    // All close pairs, grouped by their first member.
    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for a in 0..n {
        for b in 0..n {
            if a == b {
                continue;
            }
            if cosine_distance(&vectors[a], &vectors[b]) < SIMILARITY_THRESHOLD {
                groups
                    .entry(survivors[a])
                    .or_insert_with(|| vec![survivors[a]])
                    .push(survivors[b]);
            }
        }
    }

    // Unique clusters, biggest first, then greedily keep disjoint ones.
    let mut clusters: Vec<Vec<usize>> = groups
        .into_values()
        .map(|mut members| {
            members.sort_unstable();
            members.dedup();
            members
        })
        .collect();
    clusters.sort();
    clusters.dedup();
    clusters.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

    let mut accepted: Vec<Vec<usize>> = Vec::new();
    let mut taken: BTreeSet<usize> = BTreeSet::new();
    for cluster in clusters {
        if cluster.iter().any(|member| taken.contains(member)) {
            continue;
        }
        taken.extend(cluster.iter().copied());
        accepted.push(cluster);
    }
    accepted
}

/// Counts of word 1- and 2-grams in a text. Case is kept as-is; duplicate
/// tweets rarely differ only by case, and case differences are a signal.
fn term_counts(text: &str) -> BTreeMap<String, usize> {
    let tokens: Vec<&str> = DEDUP_TOKEN_PATTERN
        .find_iter(text)
        .map(|m| m.as_str())
        .collect();
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for token in &tokens {
        *counts.entry((*token).to_owned()).or_insert(0) += 1;
    }
    for pair in tokens.windows(2) {
        *counts.entry(pair.join(" ")).or_insert(0) += 1;
    }
    counts
}

fn cosine_distance(a: &BTreeMap<&str, f64>, b: &BTreeMap<&str, f64>) -> f64 {
    // Vectors are L2-normalized, so cosine similarity is the dot product.
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let dot: f64 = small
        .iter()
        .filter_map(|(term, weight)| large.get(term).map(|other| weight * other))
        .sum();
    1.0 - dot
}
