//! Message stores: where the driver pulls timestamped messages from.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use metrics::counter;
use tracing::warn;

use crate::errors::GeotagError;
use crate::message::Message;
use crate::Result;

/// A source of messages, queried one window at a time.
///
/// The result is a lazy stream so the scorer can pull one message at a
/// time; messages arrive ordered by timestamp. Both range ends are
/// inclusive — re-querying an overlapping range just re-scores the same
/// messages into the same cache slots.
#[async_trait]
pub trait MessageStore: Send + Sync + 'static {
    async fn fetch(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<BoxStream<'static, Result<Message>>>;
}

/// A store backed by a JSON-lines file, one message per line.
///
/// Malformed lines are counted and skipped; they must not take the whole
/// window down.
pub struct JsonLinesStore {
    path: PathBuf,
}

impl JsonLinesStore {
    pub fn new(path: PathBuf) -> JsonLinesStore {
        JsonLinesStore { path }
    }
}

#[async_trait]
impl MessageStore for JsonLinesStore {
    async fn fetch(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<BoxStream<'static, Result<Message>>> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        let mut messages: Vec<Message> = Vec::new();
        for (line_number, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Message>(line) {
                Ok(message) => {
                    if message.timestamp >= start && message.timestamp <= end {
                        messages.push(message);
                    }
                }
                Err(err) => {
                    counter!("geotagtweets.messages_invalid.total", 1);
                    let err = GeotagError::InputInvalid(format!(
                        "line {} of {}: {}",
                        line_number + 1,
                        self.path.display(),
                        err
                    ));
                    warn!("skipping malformed message: {}", err);
                }
            }
        }
        messages.sort_by_key(|message| message.timestamp);
        Ok(stream::iter(messages.into_iter().map(Ok)).boxed())
    }
}

/// An in-memory store for tests and small replays.
#[derive(Debug, Default)]
pub struct MemoryStore {
    messages: Vec<Message>,
}

impl MemoryStore {
    pub fn new(mut messages: Vec<Message>) -> MemoryStore {
        messages.sort_by_key(|message| message.timestamp);
        MemoryStore { messages }
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn fetch(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<BoxStream<'static, Result<Message>>> {
        let selected: Vec<Message> = self
            .messages
            .iter()
            .filter(|message| message.timestamp >= start && message.timestamp <= end)
            .cloned()
            .collect();
        Ok(stream::iter(selected.into_iter().map(Ok)).boxed())
    }
}
