//! Advisory administrative lock.
//!
//! One lease record lives in the state store as `"<owner> <acquired_at_ms>"`.
//! The record is read, checked and overwritten without a conditional write,
//! so two clients racing inside the same instant can both win. The lock only
//! keeps cooperating clients from stepping on each other.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde::Serialize;

use stagehand_core::config::LeaseSettings;
use stagehand_core::{Lease, ObjectStore, PutOptions};

use crate::StateError;

pub const DEFAULT_LEASE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// How often a holder should call [`LeaseLock::try_acquire`] again to keep
/// its lease alive.
pub const LEASE_RENEW_INTERVAL: Duration = Duration::from_secs(4 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseConfig {
    pub key: String,
    pub timeout: Duration,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            key: "state/lock".to_string(),
            timeout: DEFAULT_LEASE_TIMEOUT,
        }
    }
}

impl LeaseConfig {
    pub fn from_settings(key: impl Into<String>, settings: &LeaseSettings) -> Self {
        Self {
            key: key.into(),
            timeout: Duration::from_secs(settings.timeout_secs),
        }
    }

    fn timeout_ms(&self) -> i64 {
        i64::try_from(self.timeout.as_millis()).unwrap_or(i64::MAX)
    }
}

/// Result of an acquisition attempt.
///
/// `Unlocked` means the caller now holds the lease; `Locked` names the
/// current holder and nothing was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum LockStatus {
    Unlocked,
    Locked {
        owner: String,
        acquired_at_ms: i64,
    },
}

impl LockStatus {
    pub fn is_held_by_caller(&self) -> bool {
        matches!(self, LockStatus::Unlocked)
    }
}

impl fmt::Display for LockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockStatus::Unlocked => write!(f, "unlocked"),
            LockStatus::Locked {
                owner,
                acquired_at_ms,
            } => match Utc.timestamp_millis_opt(*acquired_at_ms).single() {
                Some(at) => write!(f, "locked by {owner} at {}", at.to_rfc3339()),
                None => write!(f, "locked by {owner} at {acquired_at_ms}ms"),
            },
        }
    }
}

pub struct LeaseLock {
    store: Arc<dyn ObjectStore>,
    config: LeaseConfig,
}

impl LeaseLock {
    pub fn new(store: Arc<dyn ObjectStore>, config: LeaseConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &LeaseConfig {
        &self.config
    }

    /// Claim the lease for `owner` at the current wall-clock time.
    pub async fn try_acquire(&self, owner: &str) -> Result<LockStatus, StateError> {
        self.try_acquire_at(owner, Utc::now().timestamp_millis())
            .await
    }

    /// Claim the lease for `owner` as of `now_ms`.
    ///
    /// Succeeds when no lease exists, the current lease is stale, or `owner`
    /// already holds it (renewal). Otherwise reports the holder.
    pub async fn try_acquire_at(&self, owner: &str, now_ms: i64) -> Result<LockStatus, StateError> {
        if owner.is_empty() || owner.chars().any(char::is_whitespace) {
            return Err(StateError::InvalidOwner(owner.to_string()));
        }

        if let Some(current) = self.current().await? {
            if current.owner_id != owner && !current.is_stale_at(now_ms) {
                tracing::debug!(
                    owner = %current.owner_id,
                    acquired_at_ms = current.acquired_at_ms,
                    "lease held by another owner",
                );
                return Ok(LockStatus::Locked {
                    owner: current.owner_id,
                    acquired_at_ms: current.acquired_at_ms,
                });
            }
        }

        let lease = Lease {
            owner_id: owner.to_string(),
            acquired_at_ms: now_ms,
            timeout_ms: self.config.timeout_ms(),
        };
        self.store
            .put(
                &self.config.key,
                lease.to_record().into_bytes(),
                PutOptions::text(),
            )
            .await?;
        tracing::info!(owner, acquired_at_ms = now_ms, "lease acquired");
        Ok(LockStatus::Unlocked)
    }

    /// The stored lease, if any. An unparseable record counts as absent.
    pub async fn current(&self) -> Result<Option<Lease>, StateError> {
        let Some(bytes) = self.store.get(&self.config.key).await? else {
            return Ok(None);
        };
        let record = String::from_utf8_lossy(&bytes);
        let lease = Lease::parse_record(&record, self.config.timeout_ms());
        if lease.is_none() {
            tracing::warn!(
                key = %self.config.key,
                record = %record.trim(),
                "ignoring unparseable lock record",
            );
        }
        Ok(lease)
    }
}

#[cfg(test)]
mod tests {
    use stagehand_core::MemoryStore;

    use super::*;

    const T: i64 = 5 * 60 * 1000;

    fn lock_on(store: Arc<MemoryStore>) -> LeaseLock {
        LeaseLock::new(store, LeaseConfig::default())
    }

    #[tokio::test]
    async fn alice_then_bob_then_stale_takeover() {
        let store = Arc::new(MemoryStore::new());
        let lock = lock_on(store.clone());
        let t0 = 1_700_000_000_000;

        assert_eq!(
            lock.try_acquire_at("alice", t0).await.expect("alice"),
            LockStatus::Unlocked
        );

        let bob = lock.try_acquire_at("bob", t0 + 60_000).await.expect("bob");
        assert_eq!(
            bob,
            LockStatus::Locked {
                owner: "alice".to_string(),
                acquired_at_ms: t0,
            }
        );

        let later = lock
            .try_acquire_at("bob", t0 + 6 * 60_000)
            .await
            .expect("bob later");
        assert_eq!(later, LockStatus::Unlocked);
        let record = store.object("state/lock").await.expect("record").body;
        assert_eq!(record, format!("bob {}", t0 + 6 * 60_000).into_bytes());
    }

    #[tokio::test]
    async fn exclusive_inside_the_window_and_stale_at_the_boundary() {
        let lock = lock_on(Arc::new(MemoryStore::new()));
        let t0 = 10_000;
        lock.try_acquire_at("a", t0).await.expect("a");

        let inside = lock.try_acquire_at("b", t0 + T - 1).await.expect("inside");
        assert!(!inside.is_held_by_caller());

        let stale = lock.try_acquire_at("b", t0 + T + 1).await.expect("stale");
        assert!(stale.is_held_by_caller());
    }

    #[tokio::test]
    async fn same_owner_renews() {
        let store = Arc::new(MemoryStore::new());
        let lock = lock_on(store.clone());
        lock.try_acquire_at("alice", 1_000).await.expect("first");
        let renewed = lock.try_acquire_at("alice", 2_000).await.expect("renew");
        assert_eq!(renewed, LockStatus::Unlocked);
        assert_eq!(
            lock.current().await.expect("current").expect("lease").acquired_at_ms,
            2_000
        );
    }

    #[tokio::test]
    async fn garbage_record_is_treated_as_absent() {
        let store = Arc::new(MemoryStore::new());
        store.insert("state/lock", "not a lease at all").await;
        let lock = lock_on(store);
        assert_eq!(
            lock.try_acquire_at("alice", 5).await.expect("acquire"),
            LockStatus::Unlocked
        );
    }

    #[tokio::test]
    async fn whitespace_owner_is_rejected() {
        let lock = lock_on(Arc::new(MemoryStore::new()));
        let err = lock.try_acquire_at("al ice", 0).await.unwrap_err();
        assert!(matches!(err, StateError::InvalidOwner(_)));
    }

    #[test]
    fn locked_status_renders_rfc3339() {
        let status = LockStatus::Locked {
            owner: "alice".to_string(),
            acquired_at_ms: 0,
        };
        assert_eq!(
            status.to_string(),
            "locked by alice at 1970-01-01T00:00:00+00:00"
        );
        assert_eq!(LockStatus::Unlocked.to_string(), "unlocked");
    }
}
