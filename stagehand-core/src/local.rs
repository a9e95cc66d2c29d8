//! Local-filesystem backends: a directory tree as an object store and a
//! directory of JSON files as a queue.
//!
//! ## Write protocol
//!
//! 1. Create parent directories.
//! 2. Write to `<path>.stagehand.tmp`.
//! 3. Rename to the final path (atomic on POSIX).
//! 4. On rename failure, remove the tmp file and report the error.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use uuid::Uuid;

use crate::digest::sha256_hex;
use crate::error::{queue_io, store_io, QueueError, StoreError};
use crate::memory::DEFAULT_PAGE_SIZE;
use crate::ports::{
    BatchDeleteOutcome, FailedDelete, ListPage, MessageQueue, MessageReceipt, ObjectEntry,
    ObjectStore, PutOptions, QueueMessage,
};

const TMP_SUFFIX: &str = ".stagehand.tmp";

// ---------------------------------------------------------------------------
// LocalDirStore
// ---------------------------------------------------------------------------

/// A directory tree exposed through [`ObjectStore`]. Keys are `/`-separated
/// paths relative to `root`; hashes are SHA-256 of file contents.
#[derive(Debug, Clone)]
pub struct LocalDirStore {
    root: PathBuf,
    page_size: usize,
}

impl LocalDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key onto a path under `root`, rejecting escapes.
    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(key.trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if key.trim_start_matches('/').is_empty() || escapes {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalDirStore {
    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ListPage, StoreError> {
        let root = self.root.clone();
        let prefix = prefix.to_string();
        let page_size = self.page_size;
        tokio::task::spawn_blocking(move || {
            let mut keys = collect_keys(&root)?;
            keys.retain(|key| key.starts_with(&prefix));
            if let Some(after) = &continuation {
                keys.retain(|key| key.as_str() > after.as_str());
            }
            let truncated = keys.len() > page_size;
            keys.truncate(page_size);

            let mut entries = Vec::with_capacity(keys.len());
            for key in keys {
                let path = root.join(&key);
                let bytes = match std::fs::read(&path) {
                    Ok(bytes) => bytes,
                    // Removed between walk and read.
                    Err(err) if err.kind() == ErrorKind::NotFound => continue,
                    Err(err) => return Err(store_io(&path, err)),
                };
                entries.push(ObjectEntry {
                    hash: sha256_hex(&bytes),
                    size: bytes.len() as u64,
                    key,
                });
            }
            let next = if truncated {
                entries.last().map(|entry| entry.key.clone())
            } else {
                None
            };
            Ok(ListPage { entries, next })
        })
        .await
        .map_err(|err| StoreError::Backend(format!("listing task join error: {err}")))?
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(store_io(&path, err)),
        }
    }

    async fn put(&self, key: &str, body: Vec<u8>, _options: PutOptions) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        atomic_write(&path, &body).await.map_err(|(p, e)| store_io(p, e))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(store_io(&path, err)),
        }
    }
}

/// Every regular file under `root` as a sorted list of `/`-separated keys.
fn collect_keys(root: &Path) -> Result<Vec<String>, StoreError> {
    let mut dirs = vec![root.to_path_buf()];
    let mut keys = Vec::new();
    let mut cursor = 0;
    while cursor < dirs.len() {
        let current = dirs[cursor].clone();
        cursor += 1;
        let entries = match std::fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => return Err(store_io(&current, err)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| store_io(&current, e))?;
            let ty = entry.file_type().map_err(|e| store_io(entry.path(), e))?;
            let path = entry.path();
            if ty.is_dir() {
                dirs.push(path);
                continue;
            }
            if !ty.is_file() || path.to_string_lossy().ends_with(TMP_SUFFIX) {
                continue;
            }
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            keys.push(key);
        }
    }
    keys.sort();
    Ok(keys)
}

async fn atomic_write(path: &Path, body: &[u8]) -> Result<(), (PathBuf, std::io::Error)> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| (parent.to_path_buf(), e))?;
    }
    let tmp = PathBuf::from(format!("{}{TMP_SUFFIX}", path.display()));
    tokio::fs::write(&tmp, body)
        .await
        .map_err(|e| (tmp.clone(), e))?;
    if let Err(err) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err((path.to_path_buf(), err));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// DirQueue
// ---------------------------------------------------------------------------

/// One JSON file per message, named `<ms>-<seq>-<uuid>.json` so a directory
/// listing is arrival order. Files stay until deleted, so a crashed consumer
/// sees the same messages again on its next receive.
#[derive(Debug, Clone)]
pub struct DirQueue {
    dir: PathBuf,
    seq: Arc<AtomicU64>,
}

impl DirQueue {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn message_names(&self) -> Result<Vec<String>, QueueError> {
        let mut reader = match tokio::fs::read_dir(&self.dir).await {
            Ok(reader) => reader,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(queue_io(&self.dir, err)),
        };
        let mut names = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| queue_io(&self.dir, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".json") {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl MessageQueue for DirQueue {
    async fn send(&self, body: String) -> Result<String, QueueError> {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let id = format!("{millis:013}-{seq:08}-{}", Uuid::new_v4().simple());
        let path = self.dir.join(format!("{id}.json"));
        atomic_write(&path, body.as_bytes())
            .await
            .map_err(|(p, e)| queue_io(p, e))?;
        tracing::debug!(id = %id, "message enqueued");
        Ok(id)
    }

    async fn receive(&self, max_messages: usize) -> Result<Vec<QueueMessage>, QueueError> {
        let mut received = Vec::new();
        for name in self.message_names().await? {
            if received.len() >= max_messages {
                break;
            }
            let path = self.dir.join(&name);
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(queue_io(&path, err)),
            };
            // Invalid UTF-8 is delivered lossily so the consumer sees a
            // malformed body instead of a failed receive.
            let body = match String::from_utf8(bytes) {
                Ok(body) => body,
                Err(err) => {
                    tracing::warn!(message = %name, "queue message is not valid UTF-8");
                    String::from_utf8_lossy(err.as_bytes()).into_owned()
                }
            };
            received.push(QueueMessage {
                id: name.trim_end_matches(".json").to_string(),
                receipt_handle: name,
                body,
            });
        }
        Ok(received)
    }

    async fn delete_batch(
        &self,
        receipts: &[MessageReceipt],
    ) -> Result<BatchDeleteOutcome, QueueError> {
        let mut outcome = BatchDeleteOutcome::default();
        for receipt in receipts {
            let name = Path::new(&receipt.receipt_handle);
            if name.components().count() != 1 {
                outcome.failed.push(FailedDelete {
                    id: receipt.id.clone(),
                    reason: "invalid receipt handle".to_string(),
                });
                continue;
            }
            match tokio::fs::remove_file(self.dir.join(name)).await {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => outcome.failed.push(FailedDelete {
                    id: receipt.id.clone(),
                    reason: err.to_string(),
                }),
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn put_creates_parents_and_leaves_no_tmp() {
        let tmp = TempDir::new().unwrap();
        let store = LocalDirStore::new(tmp.path());
        store
            .put("css/deep/site.css", b"body{}".to_vec(), PutOptions::text())
            .await
            .unwrap();

        let path = tmp.path().join("css").join("deep").join("site.css");
        assert_eq!(std::fs::read(&path).unwrap(), b"body{}");
        let tmp_path = PathBuf::from(format!("{}{TMP_SUFFIX}", path.display()));
        assert!(!tmp_path.exists(), "tmp file must be renamed away");
    }

    #[tokio::test]
    async fn listing_hashes_contents_and_skips_tmp_files() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("img")).unwrap();
        std::fs::write(tmp.path().join("index.html"), "<h1>hi</h1>").unwrap();
        std::fs::write(tmp.path().join("img").join("a.png"), [1u8, 2, 3]).unwrap();
        std::fs::write(tmp.path().join("index.html.stagehand.tmp"), "partial").unwrap();

        let store = LocalDirStore::new(tmp.path());
        let entries = store.list_all("").await.unwrap();
        let keys: Vec<_> = entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, ["img/a.png", "index.html"]);
        assert_eq!(entries[1].hash, sha256_hex(b"<h1>hi</h1>"));
    }

    #[tokio::test]
    async fn listing_paginates_by_key() {
        let tmp = TempDir::new().unwrap();
        for name in ["a", "b", "c"] {
            std::fs::write(tmp.path().join(name), name).unwrap();
        }
        let store = LocalDirStore::new(tmp.path()).with_page_size(2);
        let first = store.list_page("", None).await.unwrap();
        assert_eq!(first.entries.len(), 2);
        assert_eq!(first.next.as_deref(), Some("b"));
        assert_eq!(store.list_all("").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn missing_objects_read_as_none_and_delete_ok() {
        let tmp = TempDir::new().unwrap();
        let store = LocalDirStore::new(tmp.path());
        assert!(store.get("missing.txt").await.unwrap().is_none());
        store.delete("missing.txt").await.unwrap();
    }

    #[tokio::test]
    async fn keys_escaping_root_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = LocalDirStore::new(tmp.path());
        let err = store.get("../etc/passwd").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn dir_queue_redelivers_until_deleted() {
        let tmp = TempDir::new().unwrap();
        let queue = DirQueue::new(tmp.path().join("queue"));
        assert!(queue.receive(10).await.unwrap().is_empty());

        queue.send("first".into()).await.unwrap();
        queue.send("second".into()).await.unwrap();

        let received = queue.receive(10).await.unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].body, "first");

        let outcome = queue.delete_batch(&[received[0].receipt()]).await.unwrap();
        assert!(outcome.failed.is_empty());

        let again = queue.receive(10).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].body, "second");
    }

    #[tokio::test]
    async fn dir_queue_delivers_non_utf8_files_instead_of_failing() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("queue");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("0000000000000-00000000-garbage.json"),
            [0xff, 0xfe, b'{'],
        )
        .unwrap();
        let queue = DirQueue::new(&dir);
        queue.send("valid".into()).await.unwrap();

        let received = queue.receive(10).await.unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].receipt_handle, "0000000000000-00000000-garbage.json");
        assert!(received[0].body.ends_with('{'));
        assert_eq!(received[1].body, "valid");

        let outcome = queue.delete_batch(&[received[0].receipt()]).await.unwrap();
        assert!(outcome.failed.is_empty());
        assert_eq!(queue.receive(10).await.unwrap().len(), 1);
    }
}
