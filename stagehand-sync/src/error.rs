//! Error types for stagehand-sync.

use thiserror::Error;

use stagehand_core::{ConfigError, QueueError, StoreError};

/// Errors that abort a whole sync run. Per-file failures never surface here;
/// they are collected in [`SyncReport`](crate::SyncReport).
#[derive(Debug, Error)]
pub enum SyncError {
    /// Listing either tree failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Publishing status to the queue failed.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// An exclude pattern that does not compile.
    #[error("invalid exclude pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
