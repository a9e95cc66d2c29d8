//! Stagehand core library: domain types, collaborator ports, backends,
//! configuration, errors.
//!
//! - [`types`]: file entries, lease, state document, delta messages
//! - [`ports`]: [`ObjectStore`] and [`MessageQueue`]
//! - [`memory`], [`local`]: in-process and local-filesystem backends
//! - [`config`]: YAML configuration under `~/.stagehand/`
//! - [`error`]: error enums

pub mod config;
pub mod digest;
pub mod error;
pub mod local;
pub mod memory;
pub mod ports;
pub mod types;

pub use config::Config;
pub use error::{ConfigError, DeltaParseError, QueueError, StoreError};
pub use local::{DirQueue, LocalDirStore};
pub use memory::{MemoryQueue, MemoryStore};
pub use ports::{
    BatchDeleteOutcome, FailedDelete, ListPage, MessageQueue, MessageReceipt, ObjectEntry,
    ObjectStore, PutOptions, QueueMessage,
};
pub use types::{
    DeltaMessage, DisplayValue, Domain, Domains, FileEntry, Lease, LogFileRef, LogMessage,
    StateDocument,
};
