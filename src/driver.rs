//! The sliding time window driver.
//!
//! Walks a time range one timestep at a time: score the newly arrived
//! messages, evict what fell out of the analysis window, resolve, commit.
//! Optionally keeps going in real time once the historic range is done.

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use futures::StreamExt;
use metrics::{counter, describe_counter};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::errors::GeotagError;
use crate::message::{MessageId, ResolvedLocation, ScoredMessage};
use crate::resolver::{assign_messages, resolve_window};
use crate::scorer::Scorer;
use crate::sink::CommitSink;
use crate::store::MessageStore;
use crate::window::WindowCache;
use crate::Result;
use std::collections::BTreeMap;

/// Drives scoring and resolution over a message store.
pub struct Driver {
    scorer: Scorer,
    store: Box<dyn MessageStore>,
    sink: Box<dyn CommitSink>,
    cache: WindowCache,
    threshold: f64,
    analysis_length: Duration,
    timestep_length: Duration,
    realtime_refresh: std::time::Duration,
    max_retries: u8,
}

impl Driver {
    pub fn new(
        scorer: Scorer,
        store: Box<dyn MessageStore>,
        sink: Box<dyn CommitSink>,
        config: &Config,
        max_retries: u8,
    ) -> Driver {
        describe_counter!("geotagtweets.windows.total", "Analysis windows resolved");
        describe_counter!(
            "geotagtweets.commits.total",
            "Commit batches accepted downstream"
        );
        describe_counter!(
            "geotagtweets.commits_retried.total",
            "Commit batches retried after a failure"
        );
        describe_counter!(
            "geotagtweets.windows_retried.total",
            "Windows re-run after a transient gazetteer failure"
        );
        describe_counter!(
            "geotagtweets.messages_invalid.total",
            "Malformed message records skipped"
        );
        Driver {
            scorer,
            store,
            sink,
            cache: WindowCache::new(),
            threshold: config.threshold,
            analysis_length: config.analysis_length(),
            timestep_length: config.timestep_length(),
            realtime_refresh: std::time::Duration::from_secs(config.realtime_refresh_secs),
            max_retries,
        }
    }

    /// The current window cache (mainly for inspection in tests).
    pub fn cache(&self) -> &WindowCache {
        &self.cache
    }

    /// Run the historic analysis from `start`, stopping at `end` (or at
    /// the wall clock), then optionally keep tagging in real time.
    pub async fn run(
        &mut self,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
        realtime: bool,
    ) -> Result<()> {
        let spinup_start = start - self.analysis_length + self.timestep_length;
        info!("building spinup window {} → {}", spinup_start, start);
        let scored = self.score_range(spinup_start, start).await?;
        self.cache.update_bulk(scored);

        let mut step = 1;
        let mut window_end = start + self.timestep_length;
        while !(window_end > Utc::now() || end.map_or(false, |end| window_end > end)) {
            let query_start = window_end - self.timestep_length;
            self.analyze_timestep_with_retry(window_end, query_start, false)
                .await?;
            step += 1;
            window_end = start + self.timestep_length * step;
        }

        if realtime && end.is_none() {
            let last_window_end = window_end - self.timestep_length;
            self.run_realtime(last_window_end).await?;
        }
        Ok(())
    }

    /// Keep re-running the window against the wall clock, exporting the
    /// resolution table for real-time tagging on each pass.
    async fn run_realtime(&mut self, last_window_end: DateTime<Utc>) -> Result<()> {
        info!("entering real-time mode");
        let mut last_window_end = last_window_end;
        loop {
            let window_end = Utc::now();
            self.analyze_timestep_with_retry(window_end, last_window_end, true)
                .await?;
            last_window_end = window_end;
            tokio::time::sleep(self.realtime_refresh).await;
        }
    }

    /// Re-run a window whose gazetteer lookups failed transiently. A
    /// failed step never mutates the cache, so re-running is safe;
    /// anything non-transient propagates immediately.
    async fn analyze_timestep_with_retry(
        &mut self,
        window_end: DateTime<Utc>,
        query_start: DateTime<Utc>,
        export_resolution_table: bool,
    ) -> Result<()> {
        let mut failures: u8 = 0;
        let mut retry_wait = std::time::Duration::from_secs(2);
        loop {
            match self
                .analyze_timestep(window_end, query_start, export_resolution_table)
                .await
            {
                Ok(()) => return Ok(()),
                Err(err) if failures < self.max_retries && is_transient(&err) => {
                    failures += 1;
                    counter!("geotagtweets.windows_retried.total", 1);
                    debug!(
                        "retrying window ending {} (waiting {} secs): {:?}",
                        window_end,
                        retry_wait.as_secs(),
                        err
                    );
                    tokio::time::sleep(retry_wait).await;
                    retry_wait *= 2;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// One timestep: score new messages, evict old ones, resolve, commit.
    ///
    /// Scoring happens before any cache mutation, so a failed step leaves
    /// the cache exactly as it was.
    async fn analyze_timestep(
        &mut self,
        window_end: DateTime<Utc>,
        query_start: DateTime<Utc>,
        export_resolution_table: bool,
    ) -> Result<()> {
        info!("analyzing window ending {}", window_end);
        counter!("geotagtweets.windows.total", 1);

        let scored = self.score_range(query_start, window_end).await?;
        self.cache.delete_older_than(window_end - self.analysis_length);
        self.cache.update_bulk(scored);

        let resolved = resolve_window(&self.cache, self.threshold);
        if export_resolution_table {
            let table: BTreeMap<String, i64> = resolved
                .iter()
                .map(|toponym| (toponym.surface_form.clone(), toponym.location.geoname_id))
                .collect();
            self.sink
                .replace_resolution_table(&table)
                .await
                .context("could not export the resolution table")?;
        }

        let assignments = assign_messages(&resolved, &self.cache);
        self.commit_assignments(assignments).await
    }

    /// Fetch and score every message in `[start, end]`.
    async fn score_range(
        &mut self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<(MessageId, ScoredMessage)>> {
        let mut stream = self.store.fetch(start, end).await?;
        let mut scored = Vec::new();
        while let Some(message) = stream.next().await {
            let message = match message {
                Ok(message) => message,
                Err(err) => {
                    counter!("geotagtweets.messages_invalid.total", 1);
                    warn!("skipping unreadable message: {:#}", err);
                    continue;
                }
            };
            if let Some(scored_message) = self.scorer.score(&message).await? {
                scored.push((message.id, scored_message));
            }
        }
        debug!(
            "scored {} messages between {} and {}",
            scored.len(),
            start,
            end
        );
        Ok(scored)
    }

    /// Apply the upsert rule against the cached assignments and push the
    /// messages that changed, retrying transient failures with backoff.
    async fn commit_assignments(
        &mut self,
        assignments: BTreeMap<MessageId, Vec<ResolvedLocation>>,
    ) -> Result<()> {
        let mut updates: BTreeMap<MessageId, Vec<ResolvedLocation>> = BTreeMap::new();
        for (id, mut locations) in assignments {
            locations.sort_by(|a, b| a.surface_form.cmp(&b.surface_form));
            let existing = self
                .cache
                .get(&id)
                .and_then(|message| message.locations.clone());
            let merged = match &existing {
                None => locations,
                Some(committed) => merge_locations(committed, &locations),
            };
            if existing.as_ref() != Some(&merged) {
                updates.insert(id, merged);
            }
        }
        if updates.is_empty() {
            return Ok(());
        }

        let mut failures: u8 = 0;
        let mut retry_wait = std::time::Duration::from_secs(2);
        loop {
            match self.sink.commit(&updates).await {
                Ok(()) => break,
                Err(err) if failures < self.max_retries => {
                    failures += 1;
                    counter!("geotagtweets.commits_retried.total", 1);
                    debug!(
                        "retrying commit (waiting {} secs): {:?}",
                        retry_wait.as_secs(),
                        err
                    );
                    tokio::time::sleep(retry_wait).await;
                    retry_wait *= 2;
                }
                Err(err) => {
                    return Err(err.context(GeotagError::CommitFailure(
                        "downstream sink rejected the batch after retries".to_owned(),
                    )));
                }
            }
        }
        counter!("geotagtweets.commits.total", 1);

        // Only remember the new assignments once the sink accepted them,
        // so a retried window re-emits exactly the same updates.
        for (id, locations) in updates {
            if let Some(message) = self.cache.get_mut(&id) {
                message.locations = Some(locations);
            }
        }
        Ok(())
    }
}

/// Is this failure worth re-running the window for? Only transient
/// gazetteer trouble qualifies; a commit that failed after its own
/// retries must surface.
fn is_transient(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<GeotagError>(),
        Some(GeotagError::GazetteerTransient(_))
    )
}

/// The upsert rule: keep each committed surface form unless the new
/// resolution beats its score, and append surface forms we haven't
/// committed before.
fn merge_locations(
    committed: &[ResolvedLocation],
    new_locations: &[ResolvedLocation],
) -> Vec<ResolvedLocation> {
    let mut merged: Vec<ResolvedLocation> = committed
        .iter()
        .map(|old| {
            new_locations
                .iter()
                .find(|new| {
                    new.surface_form == old.surface_form && new.avg_score > old.avg_score
                })
                .unwrap_or(old)
                .clone()
        })
        .collect();
    for new in new_locations {
        if !committed
            .iter()
            .any(|old| old.surface_form == new.surface_form)
        {
            merged.push(new.clone());
        }
    }
    merged
}
