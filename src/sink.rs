//! Commit sinks: where resolved assignments go.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use crate::message::{MessageId, ResolvedLocation};
use crate::Result;

/// Downstream writer for resolution output.
///
/// `commit` receives only messages whose location set actually changed
/// (the driver applies the upsert rule against its cache first), and must
/// replace those messages' rows wholesale — committing the same batch
/// twice is a no-op downstream. `replace_resolution_table` truncates and
/// repopulates the `surface form → geoname id` table used by real-time
/// tagging.
#[async_trait]
pub trait CommitSink: Send + Sync + 'static {
    async fn commit(
        &mut self,
        assignments: &BTreeMap<MessageId, Vec<ResolvedLocation>>,
    ) -> Result<()>;

    async fn replace_resolution_table(&mut self, table: &BTreeMap<String, i64>) -> Result<()>;
}

/// Everything an in-memory sink has accepted so far.
#[derive(Debug, Default)]
pub struct MemorySinkState {
    pub assignments: BTreeMap<MessageId, Vec<ResolvedLocation>>,
    pub resolution_table: BTreeMap<String, i64>,
    /// Number of `commit` calls that carried at least one message.
    pub commits: usize,
}

/// An in-memory sink. Clones share state, so tests can keep a handle
/// while the driver owns the boxed sink.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemorySinkState>>,
}

impl MemorySink {
    pub fn new() -> MemorySink {
        MemorySink::default()
    }

    pub fn state(&self) -> MutexGuard<'_, MemorySinkState> {
        self.state.lock().expect("sink state poisoned")
    }
}

#[async_trait]
impl CommitSink for MemorySink {
    async fn commit(
        &mut self,
        assignments: &BTreeMap<MessageId, Vec<ResolvedLocation>>,
    ) -> Result<()> {
        if assignments.is_empty() {
            return Ok(());
        }
        let mut state = self.state();
        for (id, locations) in assignments {
            state.assignments.insert(id.clone(), locations.clone());
        }
        state.commits += 1;
        Ok(())
    }

    async fn replace_resolution_table(&mut self, table: &BTreeMap<String, i64>) -> Result<()> {
        self.state().resolution_table = table.clone();
        Ok(())
    }
}

/// One output line per committed message.
#[derive(Serialize)]
struct AssignmentRecord<'a> {
    id: &'a str,
    locations: &'a [ResolvedLocation],
}

/// A sink writing assignments as JSON lines, with the resolution table in
/// a sibling file that is rewritten on every export.
pub struct JsonLinesSink {
    assignments_path: PathBuf,
    resolution_table_path: Option<PathBuf>,
}

impl JsonLinesSink {
    pub fn new(assignments_path: PathBuf, resolution_table_path: Option<PathBuf>) -> JsonLinesSink {
        JsonLinesSink {
            assignments_path,
            resolution_table_path,
        }
    }
}

#[async_trait]
impl CommitSink for JsonLinesSink {
    async fn commit(
        &mut self,
        assignments: &BTreeMap<MessageId, Vec<ResolvedLocation>>,
    ) -> Result<()> {
        if assignments.is_empty() {
            return Ok(());
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.assignments_path)
            .await?;
        let mut buffer = String::new();
        for (id, locations) in assignments {
            let record = AssignmentRecord { id, locations };
            buffer.push_str(&serde_json::to_string(&record)?);
            buffer.push('\n');
        }
        file.write_all(buffer.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn replace_resolution_table(&mut self, table: &BTreeMap<String, i64>) -> Result<()> {
        let path = match &self.resolution_table_path {
            Some(path) => path,
            None => return Ok(()),
        };
        // Write-then-rename, so a crashed export never leaves a
        // half-written table behind.
        let staging = path.with_extension("tmp");
        let body = serde_json::to_string_pretty(table)?;
        tokio::fs::write(&staging, body).await?;
        tokio::fs::rename(&staging, path).await?;
        Ok(())
    }
}
