//! YAML configuration.
//!
//! # Storage layout
//!
//! ```text
//! ~/.stagehand/
//!   config.yaml   (mode 0600)
//!   state/        (default state store: state document, logs, lock, snapshots)
//!   queue/        (default directory queue)
//!   test/, prod/  (default test and production stores)
//! ```
//!
//! # API pattern
//!
//! Every function has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Where the three trees live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Rendered site output on local disk.
    pub source_dir: PathBuf,
    pub test_store: PathBuf,
    pub prod_store: PathBuf,
    #[serde(default)]
    pub test_prefix: String,
    #[serde(default)]
    pub prod_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub batch_size: usize,
    pub browser_max_age_secs: u64,
    pub shared_max_age_secs: u64,
    /// Glob patterns matched against tree-relative paths.
    pub exclude: Vec<String>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: 32,
            browser_max_age_secs: 300,
            shared_max_age_secs: 86_400,
            exclude: vec![".DS_Store".to_string(), "**/.DS_Store".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSettings {
    pub store_root: PathBuf,
    pub queue_dir: PathBuf,
    #[serde(default = "default_state_key")]
    pub state_key: String,
    /// `None` keeps logs inside the state document.
    #[serde(default = "default_log_key")]
    pub log_key: Option<String>,
    #[serde(default = "default_lock_key")]
    pub lock_key: String,
    #[serde(default = "default_snapshot_prefix")]
    pub snapshot_prefix: String,
    #[serde(default = "default_receive_batch")]
    pub receive_batch: usize,
    #[serde(default = "default_log_retention_secs")]
    pub log_retention_secs: u64,
    #[serde(default = "default_snapshot_clear_secs")]
    pub snapshot_clear_secs: u64,
    #[serde(default = "default_snapshot_delete_secs")]
    pub snapshot_delete_secs: u64,
    /// `false` leaves unparseable messages on the queue for an external
    /// dead-letter policy; only safe on queues that have one.
    #[serde(default = "default_delete_malformed")]
    pub delete_malformed: bool,
}

fn default_delete_malformed() -> bool {
    true
}
fn default_state_key() -> String {
    "state/state.json".to_string()
}
fn default_log_key() -> Option<String> {
    Some("state/logs.json".to_string())
}
fn default_lock_key() -> String {
    "state/lock".to_string()
}
fn default_snapshot_prefix() -> String {
    "logs/captured/".to_string()
}
fn default_receive_batch() -> usize {
    10
}
fn default_log_retention_secs() -> u64 {
    24 * 60 * 60
}
fn default_snapshot_clear_secs() -> u64 {
    60 * 60
}
fn default_snapshot_delete_secs() -> u64 {
    24 * 60 * 60
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseSettings {
    pub timeout_secs: u64,
    pub renew_interval_secs: u64,
}

impl Default for LeaseSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 5 * 60,
            renew_interval_secs: 4 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    pub fast_interval_secs: u64,
    pub slow_interval_secs: u64,
    pub max_fast_secs: u64,
    pub active_operations: Vec<String>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            fast_interval_secs: 2,
            slow_interval_secs: 30,
            max_fast_secs: 10 * 60,
            active_operations: vec![
                "building".to_string(),
                "deploying".to_string(),
                "preparing".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    pub drain_interval_secs: u64,
    /// Publish to the test store when the source directory changes.
    pub watch_source: bool,
    pub debounce_ms: u64,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            drain_interval_secs: 10,
            watch_source: true,
            debounce_ms: 500,
        }
    }
}

/// Root of `config.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub site: SiteConfig,
    pub state: StateSettings,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub lease: LeaseSettings,
    #[serde(default)]
    pub poll: PollSettings,
    #[serde(default)]
    pub daemon: DaemonSettings,
}

impl Config {
    /// Defaults rooted under `<home>/.stagehand/`, publishing from `source_dir`.
    pub fn default_at(home: &Path, source_dir: PathBuf) -> Self {
        let root = stagehand_root(home);
        Self {
            site: SiteConfig {
                source_dir,
                test_store: root.join("test"),
                prod_store: root.join("prod"),
                test_prefix: String::new(),
                prod_prefix: String::new(),
            },
            state: StateSettings {
                store_root: root.join("state"),
                queue_dir: root.join("queue"),
                state_key: default_state_key(),
                log_key: default_log_key(),
                lock_key: default_lock_key(),
                snapshot_prefix: default_snapshot_prefix(),
                receive_batch: default_receive_batch(),
                log_retention_secs: default_log_retention_secs(),
                snapshot_clear_secs: default_snapshot_clear_secs(),
                snapshot_delete_secs: default_snapshot_delete_secs(),
                delete_malformed: default_delete_malformed(),
            },
            sync: SyncSettings::default(),
            lease: LeaseSettings::default(),
            poll: PollSettings::default(),
            daemon: DaemonSettings::default(),
        }
    }

    /// Reject values that parse but cannot work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync.batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "sync.batch_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.state.receive_batch == 0 {
            return Err(ConfigError::Invalid {
                field: "state.receive_batch",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.state.snapshot_delete_secs < self.state.snapshot_clear_secs {
            return Err(ConfigError::Invalid {
                field: "state.snapshot_delete_secs",
                reason: "must not be shorter than state.snapshot_clear_secs".to_string(),
            });
        }
        if self.lease.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "lease.timeout_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        self.validate_disjoint_roots()
    }

    /// A sync deletes everything in its destination tree that the source
    /// lacks, so no tree may contain another.
    fn validate_disjoint_roots(&self) -> Result<(), ConfigError> {
        let roots: [(&'static str, PathBuf); 5] = [
            ("site.source_dir", self.site.source_dir.clone()),
            (
                "site.test_store",
                tree_root(&self.site.test_store, &self.site.test_prefix),
            ),
            (
                "site.prod_store",
                tree_root(&self.site.prod_store, &self.site.prod_prefix),
            ),
            ("state.store_root", self.state.store_root.clone()),
            ("state.queue_dir", self.state.queue_dir.clone()),
        ];
        for (i, (field, root)) in roots.iter().enumerate() {
            for (other_field, other) in &roots[..i] {
                if root.starts_with(other) || other.starts_with(root) {
                    return Err(ConfigError::Invalid {
                        field: *field,
                        reason: format!(
                            "{} overlaps {other_field} ({})",
                            root.display(),
                            other.display()
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.daemon.drain_interval_secs.max(1))
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// `store` narrowed to `prefix`, ignoring empty and `/` segments.
fn tree_root(store: &Path, prefix: &str) -> PathBuf {
    prefix
        .split('/')
        .filter(|segment| !segment.is_empty())
        .fold(store.to_path_buf(), |root, segment| root.join(segment))
}

/// `<home>/.stagehand/`
pub fn stagehand_root(home: &Path) -> PathBuf {
    home.join(".stagehand")
}

/// `<home>/.stagehand/config.yaml`: pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    stagehand_root(home).join("config.yaml")
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// Load and validate `<home>/.stagehand/config.yaml`.
///
/// Returns `ConfigError::NotFound` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(home: &Path) -> Result<Config, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Err(ConfigError::NotFound { path });
    }
    let contents = std::fs::read_to_string(&path)?;
    let config: Config =
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })?;
    config.validate()?;
    Ok(config)
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Config, ConfigError> {
    load_at(&home()?)
}

/// Atomically save the config: serialize → `.yaml.tmp` → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, config: &Config) -> Result<(), ConfigError> {
    let root = stagehand_root(home);
    if !root.exists() {
        std::fs::create_dir_all(&root)?;
        set_dir_permissions(&root)?;
    }
    let path = config_path_at(home);
    let tmp_path = path.with_file_name("config.yaml.tmp");

    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// Write a default config publishing from `source_dir`.
///
/// Idempotent: an existing config is loaded and returned unchanged.
pub fn init_at(home: &Path, source_dir: PathBuf) -> Result<Config, ConfigError> {
    if config_path_at(home).exists() {
        return load_at(home);
    }
    let config = Config::default_at(home, source_dir);
    save_at(home, &config)?;
    Ok(config)
}

/// `init_at` convenience wrapper.
pub fn init(source_dir: PathBuf) -> Result<Config, ConfigError> {
    init_at(&home()?, source_dir)
}

/// The user's home directory.
pub fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
