// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable key/value backends for session credentials.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tokio::sync::broadcast;

/// A mutation observed on a storage backend.
///
/// `key` is `None` when the backend cannot tell which key changed (e.g. the
/// credentials file was rewritten by another process).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    pub key: Option<String>,
}

/// Durable key/value persistence.
///
/// Errors are reported to the caller; [`crate::store::TokenStore`] is the
/// layer that turns them into "value absent".
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
    fn remove(&self, key: &str) -> anyhow::Result<()>;

    /// Subscribe to change notifications, if the backend can produce them.
    fn subscribe(&self) -> Option<broadcast::Receiver<StorageChange>> {
        None
    }
}

/// In-process storage. Every mutation is broadcast to subscribers.
pub struct MemoryStorage {
    values: Mutex<HashMap<String, String>>,
    change_tx: broadcast::Sender<StorageChange>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        let (change_tx, _) = broadcast::channel(32);
        Self { values: Mutex::new(HashMap::new()), change_tx }
    }

    fn notify(&self, key: &str) {
        let _ = self.change_tx.send(StorageChange { key: Some(key.to_owned()) });
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.values.lock().insert(key.to_owned(), value.to_owned());
        self.notify(key);
        Ok(())
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        let removed = self.values.lock().remove(key);
        if removed.is_some() {
            self.notify(key);
        }
        Ok(())
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<StorageChange>> {
        Some(self.change_tx.subscribe())
    }
}

/// JSON-object file storage.
///
/// Reads go to disk every time so writes from other processes are observed.
/// Writes are read-modify-write under a process-local lock, then saved
/// atomically.
pub struct FileStorage {
    path: PathBuf,
    write_lock: Mutex<()>,
    change_tx: broadcast::Sender<StorageChange>,
    watcher: Mutex<Option<notify::RecommendedWatcher>>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let (change_tx, _) = broadcast::channel(32);
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            change_tx,
            watcher: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> anyhow::Result<HashMap<String, String>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e.into()),
        };
        if contents.trim().is_empty() {
            return Ok(HashMap::new());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    fn update(&self, apply: impl FnOnce(&mut HashMap<String, String>) -> bool) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock();
        let mut values = self.load()?;
        if apply(&mut values) {
            save_atomic(&self.path, &values)?;
        }
        Ok(())
    }

    /// Install a `notify` watcher on the file's parent directory.
    /// Returns false when watching is unavailable (callers fall back to polling).
    fn ensure_watcher(&self) -> bool {
        use notify::{RecursiveMode, Watcher};

        let mut slot = self.watcher.lock();
        if slot.is_some() {
            return true;
        }

        let Some(file_name) = self.path.file_name().map(|n| n.to_owned()) else {
            return false;
        };
        let change_tx = self.change_tx.clone();
        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let Ok(event) = res else {
                return;
            };
            if event.paths.iter().any(|p| p.file_name() == Some(file_name.as_os_str())) {
                let _ = change_tx.send(StorageChange { key: None });
            }
        });
        let mut watcher = match watcher {
            Ok(w) => w,
            Err(e) => {
                tracing::debug!(err = %e, "storage watcher unavailable");
                return false;
            }
        };

        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if let Err(e) = std::fs::create_dir_all(&parent) {
            tracing::debug!(err = %e, "failed to create storage dir");
            return false;
        }
        if let Err(e) = watcher.watch(&parent, RecursiveMode::NonRecursive) {
            tracing::debug!(err = %e, path = %parent.display(), "failed to watch storage dir");
            return false;
        }

        *slot = Some(watcher);
        true
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.update(|values| {
            values.insert(key.to_owned(), value.to_owned()).as_deref() != Some(value)
        })
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.update(|values| values.remove(key).is_some())
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<StorageChange>> {
        if self.ensure_watcher() {
            Some(self.change_tx.subscribe())
        } else {
            None
        }
    }
}

/// Save a map to a JSON file atomically (write tmp + rename).
///
/// Temp names carry the PID and a counter so concurrent writers never share
/// a temp file.
fn save_atomic(path: &Path, values: &HashMap<String, String>) -> anyhow::Result<()> {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }

    let json = serde_json::to_string_pretty(values)?;
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_name = format!(
        "{}.{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
        seq,
    );
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
#[path = "storage_tests.rs"]
mod tests;
