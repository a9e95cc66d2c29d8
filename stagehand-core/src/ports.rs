//! Collaborator ports: the object store and the message queue.
//!
//! Both are remote in production and provide no transactions. Everything the
//! engine coordinates goes through these two traits.

use async_trait::async_trait;

use crate::error::{QueueError, StoreError};

// ---------------------------------------------------------------------------
// Object store
// ---------------------------------------------------------------------------

/// One listed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    /// Content fingerprint as reported by the backend.
    pub hash: String,
    pub size: u64,
}

/// One page of a listing. `next` is `Some` while the listing is truncated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub entries: Vec<ObjectEntry>,
    pub next: Option<String>,
}

/// Metadata attached to a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOptions {
    pub content_type: String,
    pub cache_control: Option<String>,
}

impl PutOptions {
    pub fn json() -> Self {
        Self {
            content_type: "application/json".to_string(),
            cache_control: Some("no-cache".to_string()),
        }
    }

    pub fn text() -> Self {
        Self {
            content_type: "text/plain".to_string(),
            cache_control: Some("no-cache".to_string()),
        }
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List one page of keys under `prefix`.
    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ListPage, StoreError>;

    /// Read an object. `Ok(None)` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn put(&self, key: &str, body: Vec<u8>, options: PutOptions) -> Result<(), StoreError>;

    /// Delete an object. A missing key is a successful no-op.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Follow continuation tokens until the listing is complete.
    async fn list_all(&self, prefix: &str) -> Result<Vec<ObjectEntry>, StoreError> {
        let mut entries = Vec::new();
        let mut continuation = None;
        loop {
            let page = self.list_page(prefix, continuation).await?;
            entries.extend(page.entries);
            match page.next {
                Some(next) => continuation = Some(next),
                None => break,
            }
        }
        Ok(entries)
    }
}

// ---------------------------------------------------------------------------
// Message queue
// ---------------------------------------------------------------------------

/// A received message. It stays on the queue until deleted by receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub id: String,
    pub receipt_handle: String,
    pub body: String,
}

impl QueueMessage {
    pub fn receipt(&self) -> MessageReceipt {
        MessageReceipt {
            id: self.id.clone(),
            receipt_handle: self.receipt_handle.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageReceipt {
    pub id: String,
    pub receipt_handle: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDelete {
    pub id: String,
    pub reason: String,
}

/// Result of a batch delete; entries not listed in `failed` were removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchDeleteOutcome {
    pub failed: Vec<FailedDelete>,
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Enqueue one body; returns the message id.
    async fn send(&self, body: String) -> Result<String, QueueError>;

    /// Receive up to `max_messages` messages. Delivery is at-least-once.
    async fn receive(&self, max_messages: usize) -> Result<Vec<QueueMessage>, QueueError>;

    async fn delete_batch(
        &self,
        receipts: &[MessageReceipt],
    ) -> Result<BatchDeleteOutcome, QueueError>;
}
