//! In-process backends for the object store and queue ports.
//!
//! Used by tests and by callers embedding the engine without remote services.
//! Listing pagination is real: a small `page_size` forces callers through the
//! continuation path.

use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::digest::sha256_hex;
use crate::error::{QueueError, StoreError};
use crate::ports::{
    BatchDeleteOutcome, FailedDelete, ListPage, MessageQueue, MessageReceipt, ObjectEntry,
    ObjectStore, PutOptions, QueueMessage,
};

pub const DEFAULT_PAGE_SIZE: usize = 1000;

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: String,
    pub cache_control: Option<String>,
}

#[derive(Debug)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    page_size: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            page_size: page_size.max(1),
        }
    }

    /// Seed an object without going through [`ObjectStore::put`].
    pub async fn insert(&self, key: impl Into<String>, body: impl Into<Vec<u8>>) {
        self.objects.lock().await.insert(
            key.into(),
            StoredObject {
                body: body.into(),
                content_type: "application/octet-stream".to_string(),
                cache_control: None,
            },
        );
    }

    pub async fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().await.get(key).cloned()
    }

    pub async fn keys(&self) -> Vec<String> {
        self.objects.lock().await.keys().cloned().collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ListPage, StoreError> {
        let objects = self.objects.lock().await;
        let mut matching = objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| match &continuation {
                Some(after) => key.as_str() > after.as_str(),
                None => true,
            });

        let entries: Vec<ObjectEntry> = matching
            .by_ref()
            .take(self.page_size)
            .map(|(key, object)| ObjectEntry {
                key: key.clone(),
                hash: sha256_hex(&object.body),
                size: object.body.len() as u64,
            })
            .collect();
        let truncated = matching.next().is_some();
        let next = if truncated {
            entries.last().map(|entry| entry.key.clone())
        } else {
            None
        };
        Ok(ListPage { entries, next })
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .objects
            .lock()
            .await
            .get(key)
            .map(|object| object.body.clone()))
    }

    async fn put(&self, key: &str, body: Vec<u8>, options: PutOptions) -> Result<(), StoreError> {
        self.objects.lock().await.insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: options.content_type,
                cache_control: options.cache_control,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.objects.lock().await.remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryQueue
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct QueueState {
    next_id: u64,
    next_receipt: u64,
    pending: VecDeque<(String, String)>,
    /// receipt handle → (id, body)
    in_flight: BTreeMap<String, (String, String)>,
}

/// FIFO queue with explicit redelivery: received messages stay in flight until
/// deleted or until [`MemoryQueue::expire_in_flight`] returns them to the queue.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    state: Mutex<QueueState>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the visibility timeout lapsing for every in-flight message.
    pub async fn expire_in_flight(&self) {
        let mut state = self.state.lock().await;
        let in_flight = std::mem::take(&mut state.in_flight);
        for (_, message) in in_flight.into_iter().rev() {
            state.pending.push_front(message);
        }
    }

    /// Pending plus in-flight messages.
    pub async fn len(&self) -> usize {
        let state = self.state.lock().await;
        state.pending.len() + state.in_flight.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn send(&self, body: String) -> Result<String, QueueError> {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let id = format!("msg-{:06}", state.next_id);
        state.pending.push_back((id.clone(), body));
        Ok(id)
    }

    async fn receive(&self, max_messages: usize) -> Result<Vec<QueueMessage>, QueueError> {
        let mut state = self.state.lock().await;
        let mut received = Vec::new();
        while received.len() < max_messages {
            let Some((id, body)) = state.pending.pop_front() else {
                break;
            };
            state.next_receipt += 1;
            let receipt_handle = format!("{id}#{}", state.next_receipt);
            state
                .in_flight
                .insert(receipt_handle.clone(), (id.clone(), body.clone()));
            received.push(QueueMessage {
                id,
                receipt_handle,
                body,
            });
        }
        Ok(received)
    }

    async fn delete_batch(
        &self,
        receipts: &[MessageReceipt],
    ) -> Result<BatchDeleteOutcome, QueueError> {
        let mut state = self.state.lock().await;
        let mut outcome = BatchDeleteOutcome::default();
        for receipt in receipts {
            if state.in_flight.remove(&receipt.receipt_handle).is_none() {
                outcome.failed.push(FailedDelete {
                    id: receipt.id.clone(),
                    reason: "receipt handle is not in flight".to_string(),
                });
            }
        }
        Ok(outcome)
    }
}
