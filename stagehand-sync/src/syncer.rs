//! Plan execution.
//!
//! Adds and updates run in fixed-size batches: batches are sequential, items
//! inside a batch run concurrently. Deletes run as one concurrent wave after
//! the transfers. A failed item is logged and recorded; it never stops the
//! rest of the run, and nothing is retried here. Re-running the whole sync is
//! safe because the diff of an already-synced pair is empty.

use futures::future::join_all;
use serde::Serialize;

use stagehand_core::types::join_key;
use stagehand_core::{FileEntry, ObjectStore, PutOptions};

use crate::content_type::{content_type_for, CachePolicy};
use crate::diff::SyncPlan;
use crate::listing::Tree;

pub const DEFAULT_BATCH_SIZE: usize = 32;

// ---------------------------------------------------------------------------
// Events and results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    Added,
    Updated,
    Deleted,
    Unchanged,
}

/// Progress/audit record for one entry of the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferEvent {
    pub kind: TransferKind,
    /// `None` for deletions.
    pub source_path: Option<String>,
    pub dest_path: String,
    pub total_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedTransfer {
    pub kind: TransferKind,
    pub source_path: Option<String>,
    pub dest_path: String,
    pub error: String,
}

/// Counts per outcome plus every per-item failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub failures: Vec<FailedTransfer>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, kind: TransferKind) {
        match kind {
            TransferKind::Added => self.added += 1,
            TransferKind::Updated => self.updated += 1,
            TransferKind::Deleted => self.deleted += 1,
            TransferKind::Unchanged => self.unchanged += 1,
        }
    }
}

/// Receives every event of a run, in completion order.
pub trait SyncObserver: Send + Sync {
    fn on_event(&self, event: &TransferEvent);

    fn on_failure(&self, _failure: &FailedTransfer) {}
}

impl<F> SyncObserver for F
where
    F: Fn(&TransferEvent) + Send + Sync,
{
    fn on_event(&self, event: &TransferEvent) {
        self(event)
    }
}

/// Observer that only logs at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl SyncObserver for LogObserver {
    fn on_event(&self, event: &TransferEvent) {
        tracing::debug!(
            kind = ?event.kind,
            dest = %event.dest_path,
            total = event.total_count,
            "sync event",
        );
    }
}

// ---------------------------------------------------------------------------
// Syncer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncerConfig {
    pub batch_size: usize,
    pub cache_policy: CachePolicy,
}

impl Default for SyncerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            cache_policy: CachePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Syncer {
    config: SyncerConfig,
}

enum Transfer<'p> {
    Add(&'p FileEntry),
    Update(&'p FileEntry, &'p FileEntry),
}

impl Syncer {
    pub fn new(config: SyncerConfig) -> Self {
        let batch_size = config.batch_size.max(1);
        Self {
            config: SyncerConfig {
                batch_size,
                ..config
            },
        }
    }

    pub fn config(&self) -> &SyncerConfig {
        &self.config
    }

    /// Execute `plan` from `source` into `dest` with the configured cache policy.
    pub async fn execute(
        &self,
        plan: &SyncPlan,
        source: &dyn ObjectStore,
        dest: Tree<'_>,
        observer: &dyn SyncObserver,
    ) -> SyncReport {
        let policy = self.config.cache_policy;
        self.execute_with_policy(plan, source, dest, observer, &policy)
            .await
    }

    /// Like [`Syncer::execute`] with a per-call cache policy.
    pub async fn execute_with_policy(
        &self,
        plan: &SyncPlan,
        source: &dyn ObjectStore,
        dest: Tree<'_>,
        observer: &dyn SyncObserver,
        policy: &CachePolicy,
    ) -> SyncReport {
        let total = plan.total_count();
        let cache_control = policy.header_value();
        let mut report = SyncReport::default();

        for entry in &plan.unchanged {
            report.record(TransferKind::Unchanged);
            observer.on_event(&TransferEvent {
                kind: TransferKind::Unchanged,
                source_path: Some(entry.path.clone()),
                dest_path: join_key(dest.prefix, &entry.rel_path),
                total_count: total,
            });
        }

        let transfers: Vec<Transfer<'_>> = plan
            .to_add
            .iter()
            .map(Transfer::Add)
            .chain(plan.to_update.iter().map(|(s, d)| Transfer::Update(s, d)))
            .collect();

        for (index, batch) in transfers.chunks(self.config.batch_size).enumerate() {
            tracing::debug!(batch = index, size = batch.len(), "transferring batch");
            let outcomes = join_all(
                batch
                    .iter()
                    .map(|transfer| transfer_one(transfer, source, dest, &cache_control, total)),
            )
            .await;
            for outcome in outcomes {
                apply_outcome(outcome, &mut report, observer);
            }
        }

        let deletions = join_all(
            plan.to_delete
                .iter()
                .map(|entry| delete_one(entry, dest.store, total)),
        )
        .await;
        for outcome in deletions {
            apply_outcome(outcome, &mut report, observer);
        }

        if report.is_clean() {
            tracing::info!(
                added = report.added,
                updated = report.updated,
                deleted = report.deleted,
                unchanged = report.unchanged,
                "sync completed",
            );
        } else {
            tracing::warn!(
                added = report.added,
                updated = report.updated,
                deleted = report.deleted,
                failed = report.failures.len(),
                "sync completed with failures",
            );
        }
        report
    }
}

fn apply_outcome(
    outcome: Result<TransferEvent, FailedTransfer>,
    report: &mut SyncReport,
    observer: &dyn SyncObserver,
) {
    match outcome {
        Ok(event) => {
            report.record(event.kind);
            observer.on_event(&event);
        }
        Err(failure) => {
            tracing::warn!(
                kind = ?failure.kind,
                dest = %failure.dest_path,
                error = %failure.error,
                "transfer failed; continuing",
            );
            observer.on_failure(&failure);
            report.failures.push(failure);
        }
    }
}

async fn transfer_one(
    transfer: &Transfer<'_>,
    source: &dyn ObjectStore,
    dest: Tree<'_>,
    cache_control: &str,
    total: usize,
) -> Result<TransferEvent, FailedTransfer> {
    let (kind, entry, dest_path) = match transfer {
        Transfer::Add(entry) => (
            TransferKind::Added,
            *entry,
            join_key(dest.prefix, &entry.rel_path),
        ),
        Transfer::Update(entry, existing) => (TransferKind::Updated, *entry, existing.path.clone()),
    };
    let fail = |error: String| FailedTransfer {
        kind,
        source_path: Some(entry.path.clone()),
        dest_path: dest_path.clone(),
        error,
    };

    let body = match source.get(&entry.path).await {
        Ok(Some(body)) => body,
        Ok(None) => return Err(fail("source object vanished before transfer".to_string())),
        Err(err) => return Err(fail(err.to_string())),
    };
    let options = PutOptions {
        content_type: content_type_for(&entry.rel_path).to_string(),
        cache_control: Some(cache_control.to_string()),
    };
    dest.store
        .put(&dest_path, body, options)
        .await
        .map_err(|err| fail(err.to_string()))?;

    Ok(TransferEvent {
        kind,
        source_path: Some(entry.path.clone()),
        dest_path,
        total_count: total,
    })
}

async fn delete_one(
    entry: &FileEntry,
    dest: &dyn ObjectStore,
    total: usize,
) -> Result<TransferEvent, FailedTransfer> {
    match dest.delete(&entry.path).await {
        Ok(()) => Ok(TransferEvent {
            kind: TransferKind::Deleted,
            source_path: None,
            dest_path: entry.path.clone(),
            total_count: total,
        }),
        Err(err) => Err(FailedTransfer {
            kind: TransferKind::Deleted,
            source_path: None,
            dest_path: entry.path.clone(),
            error: err.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use stagehand_core::MemoryStore;

    use super::*;
    use crate::diff::diff_trees;
    use crate::listing::{list_tree, TreeFilter};

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<TransferEvent>>,
        failures: Mutex<Vec<FailedTransfer>>,
    }

    impl SyncObserver for Recorder {
        fn on_event(&self, event: &TransferEvent) {
            self.events.lock().unwrap().push(event.clone());
        }

        fn on_failure(&self, failure: &FailedTransfer) {
            self.failures.lock().unwrap().push(failure.clone());
        }
    }

    #[tokio::test]
    async fn writes_content_type_and_cache_control() {
        let source = MemoryStore::new();
        source.insert("out/css/site.css", "body{}").await;
        source.insert("out/about", "<p>about</p>").await;
        let dest = MemoryStore::new();

        let src_tree = list_tree(Tree::new(&source, "out"), &TreeFilter::default())
            .await
            .unwrap();
        let plan = diff_trees(&src_tree, &[]);
        let recorder = Recorder::default();
        let report = Syncer::default()
            .execute(&plan, &source, Tree::new(&dest, "www"), &recorder)
            .await;

        assert_eq!(report.added, 2);
        let css = dest.object("www/css/site.css").await.expect("css copied");
        assert_eq!(css.content_type, "text/css");
        assert_eq!(
            css.cache_control.as_deref(),
            Some("public, max-age=300, s-maxage=86400")
        );
        let about = dest.object("www/about").await.expect("page copied");
        assert_eq!(about.content_type, "text/html");
        assert_eq!(recorder.events.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn per_call_policy_overrides_default() {
        let source = MemoryStore::new();
        source.insert("a.txt", "a").await;
        let dest = MemoryStore::new();
        let plan = diff_trees(&[FileEntry::new("a.txt", "/a.txt", "h")], &[]);

        let policy = CachePolicy {
            browser_max_age: 0,
            shared_max_age: 60,
        };
        Syncer::default()
            .execute_with_policy(&plan, &source, Tree::new(&dest, ""), &LogObserver, &policy)
            .await;

        let object = dest.object("a.txt").await.expect("copied");
        assert_eq!(
            object.cache_control.as_deref(),
            Some("public, max-age=0, s-maxage=60")
        );
    }

    #[tokio::test]
    async fn vanished_source_is_a_recorded_failure() {
        let source = MemoryStore::new();
        let dest = MemoryStore::new();
        let plan = diff_trees(&[FileEntry::new("ghost.html", "/ghost.html", "h")], &[]);
        let recorder = Recorder::default();

        let report = Syncer::default()
            .execute(&plan, &source, Tree::new(&dest, ""), &recorder)
            .await;
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].kind, TransferKind::Added);
        assert_eq!(recorder.failures.lock().unwrap().len(), 1);
        assert!(dest.keys().await.is_empty());
    }

    #[tokio::test]
    async fn unchanged_entries_emit_events_without_writes() {
        let store = MemoryStore::new();
        store.insert("same.html", "x").await;
        let tree = list_tree(Tree::new(&store, ""), &TreeFilter::default())
            .await
            .unwrap();
        let plan = diff_trees(&tree, &tree);
        let recorder = Recorder::default();

        let dest = MemoryStore::new();
        let report = Syncer::default()
            .execute(&plan, &store, Tree::new(&dest, ""), &recorder)
            .await;
        assert_eq!(report.unchanged, 1);
        assert_eq!(
            recorder.events.lock().unwrap()[0].kind,
            TransferKind::Unchanged
        );
        assert!(dest.keys().await.is_empty());
    }

    #[test]
    fn zero_batch_size_is_clamped() {
        let syncer = Syncer::new(SyncerConfig {
            batch_size: 0,
            ..SyncerConfig::default()
        });
        assert_eq!(syncer.config().batch_size, 1);
    }
}
