//! The sliding-window cache of scored messages.

use std::collections::btree_map::{self, BTreeMap};

use chrono::{DateTime, Utc};

use crate::message::{MessageId, ScoredMessage};

/// Scored messages currently inside the analysis window, keyed by message
/// id.
///
/// The one invariant: every cached message's timestamp is at or after the
/// last eviction cutoff. Inserting older messages is a driver bug, and we
/// panic rather than let a stale message quietly skew resolution.
#[derive(Debug, Default)]
pub struct WindowCache {
    messages: BTreeMap<MessageId, ScoredMessage>,
    /// The most recent `delete_older_than` cutoff.
    floor: Option<DateTime<Utc>>,
}

impl WindowCache {
    pub fn new() -> WindowCache {
        WindowCache::default()
    }

    /// Evict every message with a timestamp strictly before `cutoff`.
    pub fn delete_older_than(&mut self, cutoff: DateTime<Utc>) {
        self.messages
            .retain(|_, message| message.timestamp >= cutoff);
        self.floor = Some(cutoff);
    }

    /// Insert (or replace) a batch of scored messages.
    pub fn update_bulk<I>(&mut self, scored: I)
    where
        I: IntoIterator<Item = (MessageId, ScoredMessage)>,
    {
        for (id, message) in scored {
            if let Some(floor) = self.floor {
                if message.timestamp < floor {
                    panic!(
                        "message {} predates the window floor ({} < {})",
                        id, message.timestamp, floor
                    );
                }
            }
            self.messages.insert(id, message);
        }
    }

    pub fn get(&self, id: &str) -> Option<&ScoredMessage> {
        self.messages.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut ScoredMessage> {
        self.messages.get_mut(id)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, MessageId, ScoredMessage> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::{BTreeMap, BTreeSet};

    fn scored(minute: u32) -> ScoredMessage {
        ScoredMessage {
            timestamp: Utc.with_ymd_and_hms(2016, 1, 1, 12, minute, 0).unwrap(),
            language: "en".to_owned(),
            user_id: "u1".to_owned(),
            text: "storm".to_owned(),
            original_ngrams: BTreeMap::new(),
            subsetted_ngrams: BTreeSet::new(),
            toponyms: BTreeMap::new(),
            locations: None,
        }
    }

    #[test]
    fn eviction_removes_everything_before_the_cutoff() {
        let mut cache = WindowCache::new();
        cache.update_bulk(vec![
            ("a".to_owned(), scored(0)),
            ("b".to_owned(), scored(30)),
        ]);
        let cutoff = Utc.with_ymd_and_hms(2016, 1, 1, 12, 15, 0).unwrap();
        cache.delete_older_than(cutoff);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.iter().all(|(_, message)| message.timestamp >= cutoff));
    }

    #[test]
    fn update_replaces_existing_entries() {
        let mut cache = WindowCache::new();
        cache.update_bulk(vec![("a".to_owned(), scored(0))]);
        cache.update_bulk(vec![("a".to_owned(), scored(5))]);
        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.get("a").unwrap().timestamp,
            Utc.with_ymd_and_hms(2016, 1, 1, 12, 5, 0).unwrap()
        );
    }

    #[test]
    #[should_panic(expected = "predates the window floor")]
    fn inserting_below_the_floor_panics() {
        let mut cache = WindowCache::new();
        let cutoff = Utc.with_ymd_and_hms(2016, 1, 1, 12, 15, 0).unwrap();
        cache.delete_older_than(cutoff);
        cache.update_bulk(vec![("late".to_owned(), scored(0))]);
    }
}
