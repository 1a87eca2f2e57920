// ── Cache storage backends ──
//
// Synchronous key/value byte storage. The cache calls these from
// `spawn_blocking`, so implementations are free to do blocking I/O.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

/// Everything but `[A-Za-z0-9_-]` is escaped, `%` included, so distinct
/// keys never share a file and no stem starts with a dot.
const FILE_STEM: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_');

/// Durable storage for encoded cache documents.
pub trait CacheBackend: Send + Sync + 'static {
    /// Stored bytes for `key`, or `None` if nothing was ever written.
    fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>>;

    /// Replace the bytes stored for `key`. Must be all-or-nothing.
    fn write(&self, key: &str, bytes: &[u8]) -> io::Result<()>;

    /// Forget `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> io::Result<()>;
}

// ── File backend ─────────────────────────────────────────────────────

/// One JSON file per key under a directory.
///
/// Writes go to a hidden temp file in the same directory, are synced,
/// then renamed over the target.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_key(key)))
    }
}

impl CacheBackend for FileBackend {
    fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let name = format!("{}.json", encode_key(key));
        let target = self.dir.join(&name);
        let tmp = self.dir.join(format!(".{name}.tmp"));

        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp, &target)
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

/// Map a cache key onto a file stem, reversibly.
pub(crate) fn encode_key(key: &str) -> String {
    utf8_percent_encode(key, FILE_STEM).to_string()
}

// ── Memory backend ───────────────────────────────────────────────────

/// Process-local backend, for tests and cache-less sessions.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys currently stored, unordered.
    pub fn keys(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

impl CacheBackend for MemoryBackend {
    fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn write(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_owned(), bytes.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn file_backend_writes_atomically_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("cache"));

        assert_eq!(backend.read("requests").unwrap(), None);
        backend.write("requests", b"[1]").unwrap();
        backend.write("requests", b"[1,2]").unwrap();
        assert_eq!(backend.read("requests").unwrap().unwrap(), b"[1,2]");

        assert!(!dir.path().join("cache/.requests.json.tmp").exists());
        assert!(dir.path().join("cache/requests.json").exists());
    }

    #[test]
    fn file_backend_escapes_keys() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        backend.write("chat_cache_messages_../x", b"{}").unwrap();
        assert!(dir.path().join("chat_cache_messages_%2E%2E%2Fx.json").exists());
    }

    #[test]
    fn similar_keys_get_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        let keys = ["a.b", "a_b", "a%2Eb", "../x", "___x"];
        for (i, key) in keys.iter().enumerate() {
            backend.write(key, i.to_string().as_bytes()).unwrap();
        }
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(backend.read(key).unwrap().unwrap(), i.to_string().into_bytes(), "{key}");
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), keys.len());
    }

    #[test]
    fn remove_missing_key_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        backend.remove("nothing").unwrap();

        let memory = MemoryBackend::new();
        memory.write("a", b"1").unwrap();
        memory.remove("a").unwrap();
        memory.remove("a").unwrap();
        assert!(memory.keys().is_empty());
    }
}
