//! Fingerprinted state reads and the client-side state cache.

use std::time::Duration;

use serde::Serialize;

use stagehand_core::digest::sha256_hex;
use stagehand_core::{LogMessage, ObjectStore, PutOptions, StateDocument};

use crate::StateError;

/// Outcome of a conditional read.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum StateRead {
    Modified {
        document: StateDocument,
        fingerprint: String,
    },
    NotModified {
        fingerprint: String,
    },
}

impl StateRead {
    pub fn fingerprint(&self) -> &str {
        match self {
            StateRead::Modified { fingerprint, .. } | StateRead::NotModified { fingerprint } => {
                fingerprint
            }
        }
    }
}

/// Read the state document unless its fingerprint equals `if_none_match`.
pub async fn read_state(
    store: &dyn ObjectStore,
    key: &str,
    if_none_match: Option<&str>,
) -> Result<StateRead, StateError> {
    let bytes = store
        .get(key)
        .await?
        .ok_or_else(|| StateError::StateMissing {
            key: key.to_string(),
        })?;
    let fingerprint = sha256_hex(&bytes);
    if if_none_match == Some(fingerprint.as_str()) {
        return Ok(StateRead::NotModified { fingerprint });
    }
    let document = parse_document(key, &bytes)?;
    Ok(StateRead::Modified {
        document,
        fingerprint,
    })
}

/// Load the document for modification. A missing document is an error.
pub(crate) async fn load_document(
    store: &dyn ObjectStore,
    key: &str,
) -> Result<StateDocument, StateError> {
    let bytes = store
        .get(key)
        .await?
        .ok_or_else(|| StateError::StateMissing {
            key: key.to_string(),
        })?;
    parse_document(key, &bytes)
}

/// Load the separate log array. A missing object is an empty log.
pub async fn read_logs(store: &dyn ObjectStore, key: &str) -> Result<Vec<LogMessage>, StateError> {
    match store.get(key).await? {
        None => Ok(Vec::new()),
        Some(bytes) => serde_json::from_slice(&bytes).map_err(|source| StateError::Corrupt {
            key: key.to_string(),
            source,
        }),
    }
}

fn parse_document(key: &str, bytes: &[u8]) -> Result<StateDocument, StateError> {
    serde_json::from_slice(bytes).map_err(|source| StateError::Corrupt {
        key: key.to_string(),
        source,
    })
}

/// Write an empty state document (and log array) unless one already exists.
///
/// Returns `true` when something was created.
pub async fn init_state(
    store: &dyn ObjectStore,
    state_key: &str,
    log_key: Option<&str>,
) -> Result<bool, StateError> {
    let mut created = false;
    if store.get(state_key).await?.is_none() {
        let body = serde_json::to_vec_pretty(&StateDocument::default())?;
        store.put(state_key, body, PutOptions::json()).await?;
        tracing::info!(key = state_key, "state document created");
        created = true;
    }
    if let Some(log_key) = log_key {
        if store.get(log_key).await?.is_none() {
            let body = serde_json::to_vec(&Vec::<LogMessage>::new())?;
            store.put(log_key, body, PutOptions::json()).await?;
            created = true;
        }
    }
    Ok(created)
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct CachedState {
    pub document: StateDocument,
    pub fingerprint: String,
    pub fetched_at_ms: i64,
}

/// Last known state with an explicit time-to-live. Owned by the caller.
#[derive(Debug, Clone)]
pub struct StateCache {
    ttl_ms: i64,
    entry: Option<CachedState>,
}

impl StateCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl_ms: i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX),
            entry: None,
        }
    }

    /// The cached entry if it is younger than the TTL at `now_ms`.
    pub fn get_at(&self, now_ms: i64) -> Option<&CachedState> {
        self.entry
            .as_ref()
            .filter(|entry| now_ms.saturating_sub(entry.fetched_at_ms) < self.ttl_ms)
    }

    pub fn put_at(&mut self, document: StateDocument, fingerprint: String, now_ms: i64) {
        self.entry = Some(CachedState {
            document,
            fingerprint,
            fetched_at_ms: now_ms,
        });
    }

    /// The last fingerprint seen, fresh or not; used for conditional reads.
    pub fn fingerprint(&self) -> Option<&str> {
        self.entry.as_ref().map(|entry| entry.fingerprint.as_str())
    }

    pub fn invalidate(&mut self) {
        self.entry = None;
    }

    /// Serve from the cache while fresh, otherwise revalidate against the store.
    pub async fn fetch_at(
        &mut self,
        store: &dyn ObjectStore,
        key: &str,
        now_ms: i64,
    ) -> Result<&CachedState, StateError> {
        if self.get_at(now_ms).is_none() {
            let previous = self.entry.take();
            let known = previous.as_ref().map(|entry| entry.fingerprint.as_str());
            match read_state(store, key, known).await? {
                StateRead::Modified {
                    document,
                    fingerprint,
                } => self.put_at(document, fingerprint, now_ms),
                StateRead::NotModified { fingerprint } => {
                    let document = previous.map(|entry| entry.document).unwrap_or_default();
                    self.put_at(document, fingerprint, now_ms);
                }
            }
        }
        self.entry
            .as_ref()
            .ok_or_else(|| StateError::StateMissing {
                key: key.to_string(),
            })
    }
}
