//! Captured-log artifact lifecycle.
//!
//! Artifacts are named `<prefix><created_at_ms>-<token>[.<ext>]`. Their age
//! decides their stage:
//!
//! ```text
//! age < clear_after                   listed in `capturedLogs`
//! clear_after <= age < delete_after   body replaced by the placeholder, unlisted
//! delete_after <= age                 deleted
//! ```

use std::time::Duration;

use serde::Serialize;

use stagehand_core::config::StateSettings;
use stagehand_core::{LogFileRef, ObjectEntry, ObjectStore, PutOptions};

use crate::StateError;

/// Body written over an artifact once it is no longer listed.
pub const EXPIRED_PLACEHOLDER: &[u8] = b"expired";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPolicy {
    pub prefix: String,
    pub clear_after: Duration,
    pub delete_after: Duration,
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self {
            prefix: "logs/captured/".to_string(),
            clear_after: Duration::from_secs(60 * 60),
            delete_after: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl SnapshotPolicy {
    pub fn from_settings(settings: &StateSettings) -> Self {
        Self {
            prefix: settings.snapshot_prefix.clone(),
            clear_after: Duration::from_secs(settings.snapshot_clear_secs),
            delete_after: Duration::from_secs(settings.snapshot_delete_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotReport {
    pub listed: usize,
    pub expired: usize,
    pub deleted: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Visible,
    Expired,
    Doomed,
}

/// Creation time encoded in an artifact key, if the key follows the scheme.
pub fn parse_snapshot_key(prefix: &str, key: &str) -> Option<i64> {
    let name = key.strip_prefix(prefix)?;
    let (millis, rest) = name.split_once('-')?;
    if millis.is_empty() || !millis.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let token = rest.split('.').next().unwrap_or_default();
    if token.is_empty() {
        return None;
    }
    millis.parse().ok()
}

/// Walk every artifact once, moving it to the stage its age calls for.
///
/// Returns the freshly built visible list, newest first. Placeholder writes
/// and deletions that fail are logged and retried on the next run.
pub async fn maintain_snapshots(
    store: &dyn ObjectStore,
    policy: &SnapshotPolicy,
    now_ms: i64,
) -> Result<(Vec<LogFileRef>, SnapshotReport), StateError> {
    let clear_ms = duration_ms(policy.clear_after);
    let delete_ms = duration_ms(policy.delete_after);
    let entries = store.list_all(&policy.prefix).await?;

    let mut visible = Vec::new();
    let mut report = SnapshotReport::default();
    for entry in entries {
        let Some(created_at_ms) = parse_snapshot_key(&policy.prefix, &entry.key) else {
            tracing::debug!(key = %entry.key, "skipping artifact with unparseable key");
            continue;
        };
        let age = now_ms.saturating_sub(created_at_ms);
        let stage = if age < clear_ms {
            Stage::Visible
        } else if age < delete_ms {
            Stage::Expired
        } else {
            Stage::Doomed
        };

        match stage {
            Stage::Visible => {
                visible.push(LogFileRef {
                    key: entry.key,
                    created_at_ms,
                });
                report.listed += 1;
            }
            Stage::Expired => {
                if write_placeholder(store, &entry).await {
                    report.expired += 1;
                }
            }
            Stage::Doomed => match store.delete(&entry.key).await {
                Ok(()) => report.deleted += 1,
                Err(err) => {
                    tracing::warn!(key = %entry.key, error = %err, "artifact delete failed");
                }
            },
        }
    }

    visible.sort_by(|a, b| {
        b.created_at_ms
            .cmp(&a.created_at_ms)
            .then_with(|| a.key.cmp(&b.key))
    });
    Ok((visible, report))
}

/// Overwrite with the placeholder unless the artifact already holds it.
/// Returns whether a write happened.
async fn write_placeholder(store: &dyn ObjectStore, entry: &ObjectEntry) -> bool {
    if entry.size == EXPIRED_PLACEHOLDER.len() as u64 {
        match store.get(&entry.key).await {
            Ok(Some(body)) if body == EXPIRED_PLACEHOLDER => return false,
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(key = %entry.key, error = %err, "artifact read failed");
                return false;
            }
        }
    }
    match store
        .put(&entry.key, EXPIRED_PLACEHOLDER.to_vec(), PutOptions::text())
        .await
    {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(key = %entry.key, error = %err, "artifact expiry failed");
            false
        }
    }
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
