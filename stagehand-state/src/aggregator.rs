//! Queue drain: the only writer of the state document.
//!
//! One cycle reads the current documents, folds a batch of delta messages in
//! arrival order, applies log retention and snapshot maintenance, writes back
//! only what changed and finally deletes the folded messages. If a cycle dies
//! before the delete, the messages are redelivered and folded again, which
//! the fold rules tolerate.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use stagehand_core::config::StateSettings;
use stagehand_core::{
    DeltaMessage, LogMessage, MessageQueue, MessageReceipt, ObjectStore, PutOptions,
    StateDocument,
};

use crate::fold::{apply_retention, fold_delta, Dirty};
use crate::reader::{load_document, read_logs};
use crate::snapshots::{maintain_snapshots, SnapshotPolicy, SnapshotReport};
use crate::StateError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatorConfig {
    pub state_key: String,
    /// Separate log array object; `None` keeps logs in the state document.
    pub log_key: Option<String>,
    pub receive_batch: usize,
    pub log_retention: Duration,
    pub snapshots: SnapshotPolicy,
    /// Delete messages that fail to parse. When `false` they are left for
    /// redelivery and can fill the receive window.
    pub delete_malformed: bool,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            state_key: "state/state.json".to_string(),
            log_key: Some("state/logs.json".to_string()),
            receive_batch: 10,
            log_retention: Duration::from_secs(24 * 60 * 60),
            snapshots: SnapshotPolicy::default(),
            delete_malformed: true,
        }
    }
}

impl AggregatorConfig {
    pub fn from_settings(settings: &StateSettings) -> Self {
        Self {
            state_key: settings.state_key.clone(),
            log_key: settings.log_key.clone(),
            receive_batch: settings.receive_batch.max(1),
            log_retention: Duration::from_secs(settings.log_retention_secs),
            snapshots: SnapshotPolicy::from_settings(settings),
            delete_malformed: settings.delete_malformed,
        }
    }
}

/// What one drain cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    pub received: usize,
    pub folded: usize,
    pub malformed: usize,
    pub logs_written: bool,
    pub state_written: bool,
    pub delete_failures: usize,
    pub snapshots: SnapshotReport,
}

pub struct StateAggregator {
    store: Arc<dyn ObjectStore>,
    queue: Arc<dyn MessageQueue>,
    config: AggregatorConfig,
}

impl StateAggregator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        queue: Arc<dyn MessageQueue>,
        config: AggregatorConfig,
    ) -> Self {
        Self {
            store,
            queue,
            config,
        }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub async fn drain_and_fold(&self) -> Result<DrainReport, StateError> {
        self.drain_and_fold_at(Utc::now().timestamp_millis()).await
    }

    /// Run one cycle with `now_ms` as the aggregator clock.
    pub async fn drain_and_fold_at(&self, now_ms: i64) -> Result<DrainReport, StateError> {
        let store = self.store.as_ref();
        let mut state = load_document(store, &self.config.state_key).await?;
        let mut logs = match &self.config.log_key {
            Some(key) => read_logs(store, key).await?,
            None => std::mem::take(&mut state.logs),
        };

        let messages = self.queue.receive(self.config.receive_batch).await?;
        let mut report = DrainReport {
            received: messages.len(),
            ..DrainReport::default()
        };
        let mut dirty = Dirty::default();
        let mut processed: Vec<MessageReceipt> = Vec::with_capacity(messages.len());

        for message in &messages {
            match DeltaMessage::parse_body(&message.body) {
                Ok(delta) => {
                    dirty.merge(fold_delta(&mut state, &mut logs, delta, now_ms));
                    processed.push(message.receipt());
                    report.folded += 1;
                }
                Err(err) => {
                    tracing::warn!(id = %message.id, error = %err, "skipping malformed message");
                    report.malformed += 1;
                    if self.config.delete_malformed {
                        processed.push(message.receipt());
                    }
                }
            }
        }

        let retention_ms = i64::try_from(self.config.log_retention.as_millis()).unwrap_or(i64::MAX);
        if apply_retention(&mut logs, now_ms, retention_ms) {
            dirty.logs = true;
        }

        match maintain_snapshots(store, &self.config.snapshots, now_ms).await {
            Ok((visible, snapshots)) => {
                report.snapshots = snapshots;
                if visible != state.captured_logs {
                    state.captured_logs = visible;
                    dirty.state = true;
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "snapshot maintenance skipped this cycle");
            }
        }

        self.write_back(state, logs, dirty, &mut report).await?;
        report.delete_failures = self.delete_processed(&processed).await;

        tracing::info!(
            received = report.received,
            folded = report.folded,
            malformed = report.malformed,
            state_written = report.state_written,
            logs_written = report.logs_written,
            "drain cycle finished",
        );
        Ok(report)
    }

    async fn write_back(
        &self,
        mut state: StateDocument,
        logs: Vec<LogMessage>,
        mut dirty: Dirty,
        report: &mut DrainReport,
    ) -> Result<(), StateError> {
        match &self.config.log_key {
            Some(key) => {
                if dirty.logs {
                    let body = serde_json::to_vec(&logs)?;
                    self.store.put(key, body, PutOptions::json()).await?;
                    report.logs_written = true;
                }
            }
            None => {
                if dirty.logs {
                    dirty.state = true;
                    report.logs_written = true;
                }
                state.logs = logs;
            }
        }

        if dirty.state {
            let body = serde_json::to_vec_pretty(&state)?;
            self.store
                .put(&self.config.state_key, body, PutOptions::json())
                .await?;
            report.state_written = true;
        }
        Ok(())
    }

    /// Returns how many deletions failed. Failures are only logged; those
    /// messages come back and fold again harmlessly.
    async fn delete_processed(&self, receipts: &[MessageReceipt]) -> usize {
        if receipts.is_empty() {
            return 0;
        }
        match self.queue.delete_batch(receipts).await {
            Ok(outcome) => {
                for failed in &outcome.failed {
                    tracing::warn!(id = %failed.id, reason = %failed.reason, "message delete failed");
                }
                outcome.failed.len()
            }
            Err(err) => {
                tracing::warn!(error = %err, count = receipts.len(), "batch delete failed");
                receipts.len()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use stagehand_core::{DisplayValue, MemoryQueue, MemoryStore};

    use super::*;
    use crate::reader::init_state;

    const NOW: i64 = 1_700_000_000_000;

    async fn setup(config: AggregatorConfig) -> (Arc<MemoryStore>, Arc<MemoryQueue>, StateAggregator) {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        init_state(store.as_ref(), &config.state_key, config.log_key.as_deref())
            .await
            .expect("init");
        let aggregator = StateAggregator::new(store.clone(), queue.clone(), config);
        (store, queue, aggregator)
    }

    async fn stored_state(store: &MemoryStore) -> StateDocument {
        let body = store.object("state/state.json").await.expect("state").body;
        serde_json::from_slice(&body).expect("decode")
    }

    #[tokio::test]
    async fn folds_display_and_logs_then_deletes_messages() {
        let (store, queue, aggregator) = setup(AggregatorConfig::default()).await;
        queue
            .send(DeltaMessage::with_display("building", true).to_body().expect("body"))
            .await
            .expect("send");
        queue
            .send(
                DeltaMessage::with_log(LogMessage::new(NOW - 10, "info", "built"))
                    .to_body()
                    .expect("body"),
            )
            .await
            .expect("send");

        let report = aggregator.drain_and_fold_at(NOW).await.expect("drain");
        assert_eq!(report.received, 2);
        assert_eq!(report.folded, 2);
        assert!(report.state_written);
        assert!(report.logs_written);
        assert!(queue.is_empty().await);

        let state = stored_state(&store).await;
        assert_eq!(state.display["building"], DisplayValue::Flag(true));
        let logs: Vec<LogMessage> = serde_json::from_slice(
            &store.object("state/logs.json").await.expect("logs").body,
        )
        .expect("decode logs");
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].rcpt_time, NOW);
    }

    #[tokio::test]
    async fn empty_queue_writes_nothing() {
        let (_store, _queue, aggregator) = setup(AggregatorConfig::default()).await;
        let report = aggregator.drain_and_fold_at(NOW).await.expect("drain");
        assert!(!report.state_written);
        assert!(!report.logs_written);
    }

    #[tokio::test]
    async fn malformed_messages_can_be_kept_for_redelivery() {
        let config = AggregatorConfig {
            delete_malformed: false,
            ..AggregatorConfig::default()
        };
        let (_store, queue, aggregator) = setup(config).await;
        queue.send("{not json".to_string()).await.expect("send");
        queue
            .send(r#"{"version":7,"display":{"x":true}}"#.to_string())
            .await
            .expect("send");
        queue
            .send(DeltaMessage::with_display("ok", true).to_body().expect("body"))
            .await
            .expect("send");

        let report = aggregator.drain_and_fold_at(NOW).await.expect("drain");
        assert_eq!(report.malformed, 2);
        assert_eq!(report.folded, 1);
        assert_eq!(queue.len().await, 2);
    }

    #[tokio::test]
    async fn malformed_messages_are_discarded_by_default() {
        let (_store, queue, aggregator) = setup(AggregatorConfig::default()).await;
        queue.send("[]".to_string()).await.expect("send");

        let report = aggregator.drain_and_fold_at(NOW).await.expect("drain");
        assert_eq!(report.malformed, 1);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn missing_state_document_fails_the_cycle() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let aggregator = StateAggregator::new(store, queue, AggregatorConfig::default());
        let err = aggregator.drain_and_fold_at(NOW).await.unwrap_err();
        assert!(matches!(err, StateError::StateMissing { .. }));
    }

    #[tokio::test]
    async fn inline_logs_live_in_the_state_document() {
        let config = AggregatorConfig {
            log_key: None,
            ..AggregatorConfig::default()
        };
        let (store, queue, aggregator) = setup(config).await;
        queue
            .send(
                DeltaMessage::with_log(LogMessage::new(NOW, "info", "hello"))
                    .to_body()
                    .expect("body"),
            )
            .await
            .expect("send");

        let report = aggregator.drain_and_fold_at(NOW).await.expect("drain");
        assert!(report.state_written);
        assert!(store.object("state/logs.json").await.is_none());
        assert_eq!(stored_state(&store).await.logs[0].msg, "hello");
    }

    #[tokio::test]
    async fn expired_logs_are_pruned_without_new_messages() {
        let (store, _queue, aggregator) = setup(AggregatorConfig::default()).await;
        let old = vec![LogMessage::new(NOW - 25 * 60 * 60 * 1000, "info", "stale")];
        store
            .put(
                "state/logs.json",
                serde_json::to_vec(&old).expect("encode"),
                PutOptions::json(),
            )
            .await
            .expect("seed");

        let report = aggregator.drain_and_fold_at(NOW).await.expect("drain");
        assert!(report.logs_written);
        assert!(!report.state_written);
        assert_eq!(store.object("state/logs.json").await.expect("logs").body, b"[]");
    }

    #[tokio::test]
    async fn new_snapshots_mark_the_state_dirty() {
        let (store, _queue, aggregator) = setup(AggregatorConfig::default()).await;
        store
            .insert(format!("logs/captured/{}-build.log", NOW - 1_000), "output")
            .await;

        let report = aggregator.drain_and_fold_at(NOW).await.expect("drain");
        assert!(report.state_written);
        assert_eq!(report.snapshots.listed, 1);
        assert_eq!(stored_state(&store).await.captured_logs.len(), 1);

        let again = aggregator.drain_and_fold_at(NOW + 1).await.expect("drain");
        assert!(!again.state_written, "unchanged snapshot list must not rewrite state");
    }
}
