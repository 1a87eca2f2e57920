// ── Offline cache ──
//
// Write-behind persistence of collection snapshots, so a cold start can
// show the last known state before the first full load answers. Failures
// never reach callers: reads degrade to "empty", writes are logged and
// dropped.

mod backend;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;

pub(crate) use backend::encode_key;
pub use backend::{CacheBackend, FileBackend, MemoryBackend};

/// Version of the stored document layout.
const DOCUMENT_VERSION: u32 = 1;

#[derive(Serialize)]
struct DocumentRef<'a, T> {
    version: u32,
    records: &'a [T],
}

#[derive(Deserialize)]
struct Document<T> {
    version: u32,
    records: Vec<T>,
}

/// Durable, best-effort store of collection snapshots keyed by cache key.
///
/// Cheap to clone; clones share the same queue and backend.
#[derive(Clone)]
pub struct OfflineCache {
    inner: Arc<Inner>,
}

struct Inner {
    backend: Arc<dyn CacheBackend>,
    /// Encoded documents not yet confirmed on the backend. Only the latest
    /// snapshot per key is kept.
    pending: Mutex<HashMap<String, Arc<Vec<u8>>>>,
    /// Highest version accepted per key by `save_versioned`.
    versions: Mutex<HashMap<String, u64>>,
    draining: AtomicBool,
    /// Serializes drains so two writers never race on one key.
    write_lock: tokio::sync::Mutex<()>,
}

impl OfflineCache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                pending: Mutex::new(HashMap::new()),
                versions: Mutex::new(HashMap::new()),
                draining: AtomicBool::new(false),
                write_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    pub fn with_dir(dir: impl Into<std::path::PathBuf>) -> Self {
        Self::new(Arc::new(FileBackend::new(dir)))
    }

    /// Queue `records` as the new snapshot for `key`.
    pub fn save<T: Serialize>(&self, key: &str, records: &[T]) {
        let doc = DocumentRef {
            version: DOCUMENT_VERSION,
            records,
        };
        let bytes = match serde_json::to_vec(&doc) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to encode cache snapshot");
                return;
            }
        };

        self.inner
            .lock_pending()
            .insert(key.to_owned(), Arc::new(bytes));
        self.inner.schedule();
    }

    /// Like [`save`](Self::save), but ignores snapshots whose `version`
    /// is not newer than the last one accepted for `key`.
    ///
    /// Returns whether the snapshot was queued.
    pub fn save_versioned<T: Serialize>(&self, key: &str, version: u64, records: &[T]) -> bool {
        {
            let mut versions = self
                .inner
                .versions
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if versions.get(key).is_some_and(|last| *last >= version) {
                tracing::trace!(key, version, "Skipping superseded cache snapshot");
                return false;
            }
            versions.insert(key.to_owned(), version);
            // Encode and queue while still holding the version lock so a
            // newer snapshot can never be queued ahead of this one.
            self.save(key, records);
        }
        true
    }

    /// Last snapshot saved for `key`, or empty when absent or unreadable.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Vec<T> {
        let queued = self.inner.lock_pending().get(key).cloned();
        let bytes = match queued {
            Some(bytes) => bytes.as_ref().clone(),
            None => match self.inner.backend.read(key) {
                Ok(Some(bytes)) => bytes,
                Ok(None) => return Vec::new(),
                Err(e) => {
                    tracing::warn!(key, error = %e, "Failed to read cache entry");
                    return Vec::new();
                }
            },
        };

        match serde_json::from_slice::<Document<T>>(&bytes) {
            Ok(doc) if doc.version == DOCUMENT_VERSION => doc.records,
            Ok(doc) => {
                tracing::debug!(key, version = doc.version, "Ignoring cache entry with unknown version");
                Vec::new()
            }
            Err(e) => {
                tracing::debug!(key, error = %e, "Ignoring corrupt cache entry");
                Vec::new()
            }
        }
    }

    /// Forget `key` both in the queue and on the backend.
    pub fn remove(&self, key: &str) {
        self.inner.lock_pending().remove(key);
        self.inner
            .versions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        if let Err(e) = self.inner.backend.remove(key) {
            tracing::warn!(key, error = %e, "Failed to remove cache entry");
        }
    }

    /// Number of snapshots waiting to be written.
    pub fn pending_len(&self) -> usize {
        self.inner.lock_pending().len()
    }

    /// Write every queued snapshot to the backend before returning.
    pub async fn flush(&self) {
        self.inner.drain().await;
    }
}

impl Inner {
    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Vec<u8>>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make sure a drainer is running. Without a runtime the queue is
    /// written inline.
    fn schedule(self: &Arc<Self>) {
        if self.draining.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Ok(handle) = Handle::try_current() {
            let inner = Arc::clone(self);
            handle.spawn(async move {
                inner.drain().await;
                inner.finish_drain();
            });
        } else {
            let batch = self.queued();
            write_batch(self.backend.as_ref(), &batch);
            self.retire(&batch);
            self.finish_drain();
        }
    }

    fn finish_drain(self: &Arc<Self>) {
        self.draining.store(false, Ordering::Release);
        // A save may have landed between the last drain pass and the
        // flag reset.
        if !self.lock_pending().is_empty() {
            self.schedule();
        }
    }

    async fn drain(&self) {
        let _guard = self.write_lock.lock().await;
        loop {
            let batch = self.queued();
            if batch.is_empty() {
                break;
            }
            let backend = Arc::clone(&self.backend);
            let written = batch.clone();
            if let Err(e) =
                tokio::task::spawn_blocking(move || write_batch(backend.as_ref(), &batch)).await
            {
                tracing::warn!(error = %e, "Cache writer task failed");
            }
            self.retire(&written);
        }
    }

    fn queued(&self) -> Vec<(String, Arc<Vec<u8>>)> {
        self.lock_pending()
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect()
    }

    /// Drop written entries from the queue unless a newer snapshot
    /// replaced them in the meantime.
    fn retire(&self, written: &[(String, Arc<Vec<u8>>)]) {
        let mut pending = self.lock_pending();
        for (key, bytes) in written {
            if pending.get(key).is_some_and(|current| Arc::ptr_eq(current, bytes)) {
                pending.remove(key);
            }
        }
    }
}

fn write_batch(backend: &dyn CacheBackend, batch: &[(String, Arc<Vec<u8>>)]) {
    for (key, bytes) in batch {
        match backend.write(key, bytes) {
            Ok(()) => tracing::trace!(key, bytes = bytes.len(), "Cache entry written"),
            Err(e) => tracing::warn!(key, error = %e, "Failed to write cache entry"),
        }
    }
}
