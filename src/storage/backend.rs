//! Persistence media for the session collection
//!
//! A backend is a small key/value surface: read, write, and remove a string
//! value under a key, plus an optional push feed of change notifications.
//! [`FileBackend`] keeps one JSON file per key and [`MemoryBackend`] keeps
//! values in process memory; several [`crate::storage::SessionStore`] views
//! can share one backend.

use crate::error::{MathchatError, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{broadcast, mpsc};

/// Storage medium behind a session store
pub trait StorageBackend: Send + Sync {
    /// Returns the value under `key`, or `None` when nothing is stored
    fn read(&self, key: &str) -> Result<Option<String>>;

    /// Replaces the value under `key`; readers never observe a partial value
    fn write(&self, key: &str, value: &str) -> Result<()>;

    /// Removes `key`; removing a missing key is not an error
    fn remove(&self, key: &str) -> Result<()>;

    /// Subscribes to change notifications for `key`
    ///
    /// Returns `Ok(None)` when the medium cannot push notifications.
    fn watch(&self, key: &str) -> Result<Option<ChangeFeed>>;

    /// Short label used in log lines
    fn describe(&self) -> String;
}

/// Stream of "something changed under this key" signals
///
/// A signal only means the value may differ; consumers compare contents
/// themselves.
pub struct ChangeFeed {
    inner: FeedInner,
}

enum FeedInner {
    Fs {
        rx: mpsc::Receiver<()>,
        // Dropping the watcher stops the notifications.
        _watcher: RecommendedWatcher,
    },
    Memory {
        rx: broadcast::Receiver<String>,
        key: String,
    },
}

impl ChangeFeed {
    /// Waits for the next change signal
    ///
    /// Returns `false` once the feed is closed and no more signals will come.
    pub async fn changed(&mut self) -> bool {
        match &mut self.inner {
            FeedInner::Fs { rx, .. } => rx.recv().await.is_some(),
            FeedInner::Memory { rx, key } => loop {
                match rx.recv().await {
                    Ok(changed) if changed == *key => return true,
                    Ok(_) => continue,
                    // Missed signals still mean "changed".
                    Err(broadcast::error::RecvError::Lagged(_)) => return true,
                    Err(broadcast::error::RecvError::Closed) => return false,
                }
            },
        }
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty()
        || key.contains('/')
        || key.contains('\\')
        || key.starts_with('.')
    {
        return Err(MathchatError::Storage(format!("Invalid storage key: {:?}", key)).into());
    }
    Ok(())
}

/// Stores each key as `<dir>/<key>.json`
///
/// Writes land in a temporary sibling file that is renamed over the target,
/// so a crash mid-write leaves the previous collection intact.
///
/// # Examples
///
/// ```
/// use mathchat::storage::{FileBackend, StorageBackend};
///
/// let dir = tempfile::tempdir().unwrap();
/// let backend = FileBackend::new(dir.path()).unwrap();
/// backend.write("chatSessions", "[]").unwrap();
/// assert_eq!(backend.read("chatSessions").unwrap().as_deref(), Some("[]"));
/// ```
#[derive(Debug)]
pub struct FileBackend {
    dir: PathBuf,
    tmp_counter: AtomicU64,
}

impl FileBackend {
    /// Create a backend rooted at `dir`, creating the directory if needed
    pub fn new<P: Into<PathBuf>>(dir: P) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            MathchatError::Storage(format!(
                "Failed to create data directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        Ok(Self {
            dir,
            tmp_counter: AtomicU64::new(0),
        })
    }

    /// Directory holding the key files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File that holds `key`
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    fn tmp_path_for(&self, key: &str) -> PathBuf {
        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        self.dir
            .join(format!(".{}.json.{}.{}.tmp", key, std::process::id(), n))
    }
}

impl StorageBackend for FileBackend {
    fn read(&self, key: &str) -> Result<Option<String>> {
        validate_key(key)?;
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MathchatError::Storage(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))
            .into()),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        let target = self.path_for(key);
        let tmp = self.tmp_path_for(key);

        std::fs::write(&tmp, value).map_err(|e| {
            MathchatError::Storage(format!("Failed to write {}: {}", tmp.display(), e))
        })?;

        if let Err(e) = std::fs::rename(&tmp, &target) {
            let _ = std::fs::remove_file(&tmp);
            return Err(MathchatError::Storage(format!(
                "Failed to replace {}: {}",
                target.display(),
                e
            ))
            .into());
        }

        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MathchatError::Storage(format!(
                "Failed to remove {}: {}",
                path.display(),
                e
            ))
            .into()),
        }
    }

    fn watch(&self, key: &str) -> Result<Option<ChangeFeed>> {
        validate_key(key)?;
        let file_name = format!("{}.json", key);
        let (tx, rx) = mpsc::channel::<()>(32);

        let mut watcher =
            notify::recommended_watcher(move |res: std::result::Result<Event, notify::Error>| {
                match res {
                    Ok(event) => {
                        let relevant = matches!(
                            event.kind,
                            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                        );
                        if !relevant {
                            return;
                        }
                        let ours = event.paths.iter().any(|p| {
                            p.file_name()
                                .map(|n| n.to_string_lossy() == file_name)
                                .unwrap_or(false)
                        });
                        if ours {
                            // A full channel already holds a pending signal.
                            let _ = tx.try_send(());
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Session file watcher error: {}", e);
                    }
                }
            })
            .map_err(MathchatError::from)?;

        watcher
            .watch(&self.dir, RecursiveMode::NonRecursive)
            .map_err(MathchatError::from)?;

        tracing::debug!(dir = %self.dir.display(), key, "Watching session file");

        Ok(Some(ChangeFeed {
            inner: FeedInner::Fs {
                rx,
                _watcher: watcher,
            },
        }))
    }

    fn describe(&self) -> String {
        format!("file:{}", self.dir.display())
    }
}

struct MemoryInner {
    entries: RwLock<HashMap<String, String>>,
    changes: broadcast::Sender<String>,
}

/// In-process medium shared by cloning
///
/// Every clone sees the same entries, which makes it a stand-in for several
/// views of one client-local store.
///
/// # Examples
///
/// ```
/// use mathchat::storage::{MemoryBackend, StorageBackend};
///
/// let a = MemoryBackend::new();
/// let b = a.clone();
/// a.write("k", "v").unwrap();
/// assert_eq!(b.read("k").unwrap().as_deref(), Some("v"));
/// ```
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

impl MemoryBackend {
    /// Create an empty medium
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(MemoryInner {
                entries: RwLock::new(HashMap::new()),
                changes,
            }),
        }
    }

    fn notify_change(&self, key: &str) {
        // No subscribers is fine.
        let _ = self.inner.changes.send(key.to_string());
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for MemoryBackend {
    fn read(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .inner
            .entries
            .read()
            .map_err(|_| MathchatError::Storage("Failed to acquire read lock".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        {
            let mut entries = self
                .inner
                .entries
                .write()
                .map_err(|_| MathchatError::Storage("Failed to acquire write lock".to_string()))?;
            entries.insert(key.to_string(), value.to_string());
        }
        self.notify_change(key);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let removed = {
            let mut entries = self
                .inner
                .entries
                .write()
                .map_err(|_| MathchatError::Storage("Failed to acquire write lock".to_string()))?;
            entries.remove(key).is_some()
        };
        if removed {
            self.notify_change(key);
        }
        Ok(())
    }

    fn watch(&self, key: &str) -> Result<Option<ChangeFeed>> {
        Ok(Some(ChangeFeed {
            inner: FeedInner::Memory {
                rx: self.inner.changes.subscribe(),
                key: key.to_string(),
            },
        }))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
