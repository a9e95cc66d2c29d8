use std::sync::Arc;

use async_trait::async_trait;
use stagehand_core::{
    BatchDeleteOutcome, DeltaMessage, DirQueue, FailedDelete, LocalDirStore, LogMessage,
    MemoryQueue, MemoryStore, MessageQueue, MessageReceipt, QueueError, QueueMessage,
    StateDocument,
};
use stagehand_state::{
    init_state, read_state, AggregatorConfig, LeaseConfig, LeaseLock, LockStatus,
    StateAggregator, StateRead,
};
use tempfile::TempDir;

const NOW: i64 = 1_700_000_000_000;

/// Delegates to a [`MemoryQueue`] but refuses to delete the first message id.
struct StickyQueue {
    inner: MemoryQueue,
    sticky_id: String,
}

#[async_trait]
impl MessageQueue for StickyQueue {
    async fn send(&self, body: String) -> Result<String, QueueError> {
        self.inner.send(body).await
    }

    async fn receive(&self, max_messages: usize) -> Result<Vec<QueueMessage>, QueueError> {
        self.inner.receive(max_messages).await
    }

    async fn delete_batch(
        &self,
        receipts: &[MessageReceipt],
    ) -> Result<BatchDeleteOutcome, QueueError> {
        let (sticky, rest): (Vec<_>, Vec<_>) = receipts
            .iter()
            .cloned()
            .partition(|r| r.id == self.sticky_id);
        let mut outcome = self.inner.delete_batch(&rest).await?;
        outcome.failed.extend(sticky.into_iter().map(|r| FailedDelete {
            id: r.id,
            reason: "throttled".to_string(),
        }));
        Ok(outcome)
    }
}

async fn document(store: &MemoryStore) -> StateDocument {
    match read_state(store, "state/state.json", None).await.expect("read") {
        StateRead::Modified { document, .. } => document,
        other => panic!("unexpected read {other:?}"),
    }
}

#[tokio::test]
async fn partial_delete_failure_is_counted_and_refold_is_harmless() {
    let store = Arc::new(MemoryStore::new());
    init_state(store.as_ref(), "state/state.json", Some("state/logs.json"))
        .await
        .expect("init");
    let inner = MemoryQueue::new();
    let sticky_id = inner
        .send(
            DeltaMessage::with_display("deploying", true)
                .to_body()
                .expect("body"),
        )
        .await
        .expect("send");
    inner
        .send(
            DeltaMessage::with_log(LogMessage::new(NOW, "info", "deployed"))
                .to_body()
                .expect("body"),
        )
        .await
        .expect("send");
    let queue = Arc::new(StickyQueue { inner, sticky_id });
    let aggregator =
        StateAggregator::new(store.clone(), queue.clone(), AggregatorConfig::default());

    let first = aggregator.drain_and_fold_at(NOW).await.expect("drain");
    assert_eq!(first.folded, 2);
    assert_eq!(first.delete_failures, 1);
    let after_first = document(&store).await;

    queue.inner.expire_in_flight().await;
    let second = aggregator.drain_and_fold_at(NOW + 1).await.expect("redrain");
    assert_eq!(second.received, 1);
    assert!(!second.state_written, "redelivered display delta changes nothing");
    assert_eq!(document(&store).await, after_first);
}

#[tokio::test]
async fn producers_interleaving_fold_in_arrival_order() {
    let store = Arc::new(MemoryStore::new());
    init_state(store.as_ref(), "state/state.json", None)
        .await
        .expect("init");
    let queue = Arc::new(MemoryQueue::new());
    for (flag, value) in [("building", true), ("deploying", true), ("building", false)] {
        queue
            .send(DeltaMessage::with_display(flag, value).to_body().expect("body"))
            .await
            .expect("send");
    }
    let config = AggregatorConfig {
        log_key: None,
        receive_batch: 2,
        ..AggregatorConfig::default()
    };
    let aggregator = StateAggregator::new(store.clone(), queue.clone(), config);

    aggregator.drain_and_fold_at(NOW).await.expect("first batch");
    aggregator.drain_and_fold_at(NOW).await.expect("second batch");

    let doc = document(&store).await;
    assert!(!doc.display["building"].is_true());
    assert!(doc.display["deploying"].is_true());
    assert!(queue.is_empty().await);
}

#[tokio::test]
async fn alice_and_bob_share_a_lock_record_on_disk() {
    let root = TempDir::new().expect("root");
    let store = Arc::new(LocalDirStore::new(root.path()));
    let lock = LeaseLock::new(store, LeaseConfig::default());

    assert_eq!(
        lock.try_acquire_at("alice", NOW).await.expect("alice"),
        LockStatus::Unlocked
    );
    let record = std::fs::read_to_string(root.path().join("state/lock")).expect("record");
    assert_eq!(record, format!("alice {NOW}"));

    let bob = lock.try_acquire_at("bob", NOW + 1_000).await.expect("bob");
    assert!(bob.to_string().starts_with("locked by alice at 2023-11-14T"));

    let takeover = lock
        .try_acquire_at("bob", NOW + 5 * 60 * 1000)
        .await
        .expect("takeover");
    assert_eq!(takeover, LockStatus::Unlocked);
}

#[tokio::test]
async fn poison_messages_on_a_dir_queue_cannot_starve_valid_deltas() {
    let root = TempDir::new().expect("root");
    let queue_dir = root.path().join("queue");
    std::fs::create_dir_all(&queue_dir).expect("queue dir");
    std::fs::write(
        queue_dir.join("0000000000000-00000000-binary.json"),
        [0xff, 0xfe, b'{'],
    )
    .expect("binary message");

    let store = Arc::new(MemoryStore::new());
    init_state(store.as_ref(), "state/state.json", Some("state/logs.json"))
        .await
        .expect("init");
    let queue = Arc::new(DirQueue::new(&queue_dir));
    for _ in 0..10 {
        queue.send("{not json".to_string()).await.expect("send");
    }
    queue
        .send(DeltaMessage::with_display("building", true).to_body().expect("body"))
        .await
        .expect("send");

    let aggregator =
        StateAggregator::new(store.clone(), queue.clone(), AggregatorConfig::default());
    let first = aggregator.drain_and_fold_at(NOW).await.expect("first drain");
    assert_eq!(first.received, 10);
    assert_eq!(first.malformed, 10);
    assert_eq!(first.delete_failures, 0);

    let second = aggregator.drain_and_fold_at(NOW).await.expect("second drain");
    assert_eq!(second.malformed, 1);
    assert_eq!(second.folded, 1);

    assert!(document(&store).await.display["building"].is_true());
    assert!(queue.receive(10).await.expect("receive").is_empty());
}
