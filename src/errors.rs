//! Error-handling utilities.

use anyhow::Error;

/// Error kinds produced by the geotagging pipeline.
///
/// Most of these are recoverable and handled close to where they occur
/// (skipped messages, zero-score evidence). The transient and commit
/// variants propagate to the driver, which may retry the current window.
#[derive(Debug, thiserror::Error)]
pub enum GeotagError {
    /// A message is missing required fields and cannot be scored.
    #[error("invalid message record: {0}")]
    InputInvalid(String),

    /// The gazetteer index could not be reached or answered garbage.
    /// The driver retries the whole window on this.
    #[error("transient gazetteer failure: {0}")]
    GazetteerTransient(String),

    /// A downstream write failed after retries.
    #[error("commit to downstream store failed: {0}")]
    CommitFailure(String),
}

/// Print an error to stderr, followed by every underlying cause and the
/// captured backtrace. The binary calls this on the way out so operators
/// see the whole chain, not just the outermost context.
pub fn display_causes_and_backtrace(err: &Error) {
    eprintln!("Error: {}", err);
    for cause in err.chain().skip(1) {
        eprintln!("  caused by: {}", cause);
    }
    eprintln!("{}", err.backtrace());
}
