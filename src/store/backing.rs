//! Durable key/value media behind [`PersistentStore`](super::PersistentStore).

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use parking_lot::Mutex;

use super::error::BackingError;

/// Synchronous, process-local key/value storage.
pub trait BackingStore: Send + Sync {
    /// Read the raw serialized value for `key`, `None` when absent.
    fn read(&self, key: &str) -> Result<Option<String>, BackingError>;

    fn write(&self, key: &str, value: &str) -> Result<(), BackingError>;

    /// Remove `key`. Removing an absent key succeeds.
    fn remove(&self, key: &str) -> Result<(), BackingError>;
}

/// One stored entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedEntry {
    pub key: String,
    pub serialized_value: String,
}

/// In-memory backing store. Clones share the same map, which makes it a
/// stand-in for process-wide storage in tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackingStore {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
}

impl MemoryBackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a raw value directly, bypassing any serializer.
    pub fn insert(&self, key: impl Into<String>, serialized_value: impl Into<String>) {
        self.entries.lock().insert(key.into(), serialized_value.into());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    /// Snapshot of all entries, ordered by key.
    pub fn entries(&self) -> Vec<PersistedEntry> {
        self.entries
            .lock()
            .iter()
            .map(|(key, value)| PersistedEntry {
                key: key.clone(),
                serialized_value: value.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl BackingStore for MemoryBackingStore {
    fn read(&self, key: &str) -> Result<Option<String>, BackingError> {
        Ok(self.get(key))
    }

    fn write(&self, key: &str, value: &str) -> Result<(), BackingError> {
        self.insert(key, value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), BackingError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Stores each key as `<dir>/<escaped key>.json`.
///
/// Writers and removers of a key serialize on an exclusive lock of the
/// sidecar `<escaped key>.lock`, taken before the temp file is touched.
/// Writes go to a sibling temp file that is renamed over the target, so
/// readers never see a half-written entry.
#[derive(Debug, Clone)]
pub struct FileBackingStore {
    dir: PathBuf,
}

impl FileBackingStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `~/.local/share/resilient-client/state` or the platform equivalent.
    pub fn default_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("resilient-client")
            .join("state")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", escape_key(key)))
    }

    fn lock_path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", escape_key(key)))
    }

    /// Block until this handle holds the exclusive lock for `key`.
    fn lock_key(&self, key: &str) -> Result<KeyLock, BackingError> {
        let path = self.lock_path_for(key);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| io_error(&path, e))?;
        file.lock_exclusive().map_err(|e| io_error(&path, e))?;
        Ok(KeyLock(file))
    }
}

/// Held sidecar lock, released on drop.
struct KeyLock(File);

impl Drop for KeyLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.0) {
            tracing::warn!(error = %e, "Failed to release state file lock");
        }
    }
}

/// Keep `[A-Za-z0-9_-]`, hex-escape everything else as `%XX`.
fn escape_key(key: &str) -> String {
    let mut escaped = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            escaped.push(byte as char);
        } else {
            escaped.push_str(&format!("%{:02X}", byte));
        }
    }
    escaped
}

fn io_error(path: &Path, source: std::io::Error) -> BackingError {
    BackingError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl BackingStore for FileBackingStore {
    fn read(&self, key: &str) -> Result<Option<String>, BackingError> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<(), BackingError> {
        fs::create_dir_all(&self.dir).map_err(|e| io_error(&self.dir, e))?;

        let _lock = self.lock_key(key)?;

        let path = self.path_for(key);
        let tmp_path = path.with_extension("json.tmp");

        let mut tmp = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)
            .map_err(|e| io_error(&tmp_path, e))?;
        tmp.write_all(value.as_bytes())
            .and_then(|()| tmp.sync_all())
            .map_err(|e| io_error(&tmp_path, e))?;
        drop(tmp);

        fs::rename(&tmp_path, &path).map_err(|e| io_error(&path, e))
    }

    fn remove(&self, key: &str) -> Result<(), BackingError> {
        if !self.dir.exists() {
            return Ok(());
        }
        let _lock = self.lock_key(key)?;

        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path, e)),
        }
    }
}
