//! Error types for stagehand-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by [`ObjectStore`](crate::ports::ObjectStore) backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure in a local backend, with the offending path.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A key that cannot be mapped onto the backend (e.g. `..` segments).
    #[error("invalid object key '{0}'")]
    InvalidKey(String),

    /// A continuation token the backend did not issue.
    #[error("invalid continuation token '{0}'")]
    InvalidContinuation(String),

    /// Any other backend failure.
    #[error("object store error: {0}")]
    Backend(String),
}

/// Errors raised by [`MessageQueue`](crate::ports::MessageQueue) backends.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("queue error: {0}")]
    Backend(String),
}

/// Errors from loading or saving the YAML configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load, with the file path.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    #[error("config not found at {path}; run `stagehand init` first")]
    NotFound { path: PathBuf },

    /// A value that parses but makes no sense (zero batch size, …).
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// A queue body that does not match the versioned delta schema.
#[derive(Debug, Error)]
pub enum DeltaParseError {
    #[error("malformed delta message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported delta schema version {0}")]
    UnsupportedVersion(u32),
}

pub(crate) fn store_io(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn queue_io(path: impl Into<PathBuf>, source: std::io::Error) -> QueueError {
    QueueError::Io {
        path: path.into(),
        source,
    }
}
