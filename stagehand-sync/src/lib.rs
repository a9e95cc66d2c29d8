//! # stagehand-sync
//!
//! Tree diff and batched, failure-tolerant sync between object stores.
//!
//! Call [`pipeline::run`] to reconcile one [`SyncRoute`] end to end, or
//! combine [`list_tree`], [`diff_trees`] and [`Syncer::execute`] directly
//! when the stores are not the configured local directories.

pub mod content_type;
pub mod diff;
pub mod error;
pub mod listing;
pub mod pipeline;
pub mod syncer;

pub use content_type::{content_type_for, CachePolicy};
pub use diff::{diff_trees, SyncPlan};
pub use error::SyncError;
pub use listing::{list_tree, Tree, TreeFilter};
pub use pipeline::{SyncOptions, SyncRoute, SyncRun};
pub use syncer::{
    FailedTransfer, LogObserver, SyncObserver, SyncReport, Syncer, SyncerConfig, TransferEvent,
    TransferKind, DEFAULT_BATCH_SIZE,
};
