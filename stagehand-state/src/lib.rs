//! # stagehand-state
//!
//! The state side of publishing: the advisory lease, the queue drain that
//! folds delta messages into the state document, fingerprinted reads, the
//! client poll cadence and the daemon that ties them to the sync pipeline.

pub mod aggregator;
mod error;
pub mod fold;
pub mod lease;
pub mod paths;
pub mod polling;
pub mod protocol;
pub mod reader;
mod runtime;
pub mod snapshots;

pub use aggregator::{AggregatorConfig, DrainReport, StateAggregator};
pub use error::{DaemonError, StateError};
pub use lease::{LeaseConfig, LeaseLock, LockStatus, LEASE_RENEW_INTERVAL};
pub use polling::{PollCadence, PollSession};
pub use protocol::{
    request_drain, request_status, request_stop, request_sync, send_request, DaemonRequest,
    DaemonResponse,
};
pub use reader::{init_state, read_logs, read_state, StateCache, StateRead};
pub use runtime::{init_tracing_with, run, start_blocking, Engine, SyncSummary};
pub use snapshots::{SnapshotPolicy, SnapshotReport};
