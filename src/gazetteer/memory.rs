//! An in-memory gazetteer backed by a serialized index file.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;

use super::Gazetteer;
use crate::location::GazetteerEntry;
use crate::Result;

/// The whole unique-name index held in memory.
///
/// The index file is a JSON object mapping each lower-cased name to its
/// candidate entries. A few hundred MB of gazetteer fits comfortably; for
/// anything bigger, put a real index behind the [`Gazetteer`] trait.
#[derive(Debug, Default)]
pub struct MemoryGazetteer {
    index: BTreeMap<String, Vec<GazetteerEntry>>,
}

impl MemoryGazetteer {
    pub fn new() -> MemoryGazetteer {
        MemoryGazetteer::default()
    }

    /// Load an index from a JSON file.
    pub fn from_path(path: &Path) -> Result<MemoryGazetteer> {
        let f = File::open(path).with_context(|| {
            format!("could not open gazetteer index {}", path.display())
        })?;
        let index: BTreeMap<String, Vec<GazetteerEntry>> = serde_json::from_reader(f)
            .with_context(|| {
                format!("could not parse gazetteer index {}", path.display())
            })?;
        Ok(MemoryGazetteer { index })
    }

    /// Register an entry under a name. Mostly useful for building small
    /// test gazetteers.
    pub fn insert(&mut self, surface_form: &str, entry: GazetteerEntry) {
        self.index
            .entry(surface_form.to_lowercase())
            .or_default()
            .push(entry);
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[async_trait]
impl Gazetteer for MemoryGazetteer {
    async fn lookup(
        &self,
        surface_forms: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, Vec<GazetteerEntry>>> {
        let mut found = BTreeMap::new();
        for surface_form in surface_forms {
            if let Some(entries) = self.index.get(surface_form) {
                found.insert(surface_form.clone(), entries.clone());
            }
        }
        Ok(found)
    }
}
