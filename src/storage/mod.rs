//! Durable, searchable conversation history
//!
//! The whole history is one JSON array stored under a single key of a
//! [`StorageBackend`]. Every mutation reads the current array, applies the
//! change, and writes the full array back while holding the view's lock.
//! Unreadable data is treated as an empty history.

use crate::error::{MathchatError, Result};
use chrono::Utc;
use directories::ProjectDirs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

pub mod backend;
pub mod ids;
pub mod types;

pub use backend::{ChangeFeed, FileBackend, MemoryBackend, StorageBackend};
pub use ids::IdGenerator;
pub use types::{
    generate_title, ChatMessage, Role, Session, DEFAULT_TITLE, TITLE_ELLIPSIS, TITLE_MAX_CHARS,
};

/// Storage key the history lives under
pub const DEFAULT_STORAGE_KEY: &str = "chatSessions";

/// Exported history file: suggested name plus pretty-printed JSON
#[derive(Debug, Clone)]
pub struct ExportArtifact {
    /// `chat-history-<YYYY-MM-DD>.json`
    pub file_name: String,
    /// Pretty-printed JSON array of sessions
    pub bytes: Vec<u8>,
}

/// One view of the persisted session collection
///
/// Clones share the same view state, so a clone handed to a
/// [`crate::watcher::SyncWatcher`] sees this view's own writes. Separate
/// `SessionStore::new` calls over one backend are separate views.
///
/// # Examples
///
/// ```
/// use mathchat::storage::{MemoryBackend, Session, SessionStore};
/// use std::sync::Arc;
///
/// let store = SessionStore::new(Arc::new(MemoryBackend::new()), "chatSessions");
/// assert!(store.load().is_empty());
///
/// store.save(&Session::new("1")).unwrap();
/// assert_eq!(store.load().len(), 1);
/// ```
#[derive(Clone)]
pub struct SessionStore {
    backend: Arc<dyn StorageBackend>,
    key: String,
    /// Serialized collection as last written or reloaded by this view.
    /// The lock also serializes read-modify-write cycles.
    snapshot: Arc<Mutex<Option<String>>>,
}

impl SessionStore {
    /// Create a view over `backend` using `key`
    pub fn new(backend: Arc<dyn StorageBackend>, key: impl Into<String>) -> Self {
        Self {
            backend,
            key: key.into(),
            snapshot: Arc::new(Mutex::new(None)),
        }
    }

    /// Open the file-backed store in `data_dir`
    pub fn open_dir<P: Into<PathBuf>>(data_dir: P, key: impl Into<String>) -> Result<Self> {
        let backend = FileBackend::new(data_dir)?;
        tracing::debug!("Opened session store at {}", backend.describe());
        Ok(Self::new(Arc::new(backend), key))
    }

    /// Platform data directory for the history file
    ///
    /// `MATHCHAT_DATA_DIR` overrides the platform default.
    pub fn default_data_dir() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("MATHCHAT_DATA_DIR") {
            return Ok(PathBuf::from(dir));
        }
        let proj_dirs = ProjectDirs::from("com", "mathchat", "mathchat").ok_or_else(|| {
            MathchatError::Storage("Could not determine data directory".to_string())
        })?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    /// Storage key this view reads and writes
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Backend this view sits on
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Raw serialized collection as currently persisted
    ///
    /// Read failures are logged and reported as `None`.
    pub fn raw(&self) -> Option<String> {
        match self.backend.read(&self.key) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(key = %self.key, "Failed to read session collection: {:#}", e);
                None
            }
        }
    }

    /// Parses a serialized collection, recovering to empty on any error
    pub fn parse_collection(raw: &str) -> Vec<Session> {
        match serde_json::from_str::<Vec<Session>>(raw) {
            Ok(sessions) => sessions,
            Err(e) => {
                tracing::warn!("Session collection is unreadable, treating as empty: {}", e);
                Vec::new()
            }
        }
    }

    /// All stored sessions in insertion order
    ///
    /// Absent or corrupt data yields an empty list.
    pub fn load(&self) -> Vec<Session> {
        self.raw()
            .map(|raw| Self::parse_collection(&raw))
            .unwrap_or_default()
    }

    /// Session with `id`, if stored
    pub fn get(&self, id: &str) -> Option<Session> {
        self.load().into_iter().find(|s| s.id == id)
    }

    /// Inserts or replaces a session by id
    ///
    /// A known id is replaced at its existing position; a new id is
    /// appended.
    pub fn save(&self, session: &Session) -> Result<()> {
        self.mutate(|sessions| {
            match sessions.iter_mut().find(|s| s.id == session.id) {
                Some(existing) => {
                    *existing = session.clone();
                    tracing::debug!(id = %session.id, "Updated existing session");
                }
                None => {
                    sessions.push(session.clone());
                    tracing::debug!(id = %session.id, "Appended new session");
                }
            }
            true
        })
    }

    /// Removes the session with `id`; absent ids are a no-op
    pub fn delete(&self, id: &str) -> Result<()> {
        self.mutate(|sessions| {
            let before = sessions.len();
            sessions.retain(|s| s.id != id);
            before != sessions.len()
        })
    }

    /// Removes every session
    pub fn clear(&self) -> Result<()> {
        let mut snapshot = self.lock_snapshot()?;
        self.backend.remove(&self.key)?;
        *snapshot = None;
        tracing::info!(key = %self.key, "Cleared session history");
        Ok(())
    }

    /// Sessions whose title or any message contains `term`, ignoring case
    ///
    /// An empty term matches everything.
    pub fn search(&self, term: &str) -> Vec<Session> {
        let needle = term.to_lowercase();
        self.load()
            .into_iter()
            .filter(|s| s.matches_lowercase(&needle))
            .collect()
    }

    /// Pretty-printed copy of the collection for download
    pub fn export(&self) -> Result<ExportArtifact> {
        let sessions = self.load();
        let bytes = serde_json::to_vec_pretty(&sessions)?;
        Ok(ExportArtifact {
            file_name: export_file_name(Utc::now().date_naive()),
            bytes,
        })
    }

    /// Takes the currently persisted form as this view's known state
    pub(crate) fn adopt_persisted(&self) -> Result<()> {
        let mut snapshot = self.lock_snapshot()?;
        *snapshot = self.raw();
        Ok(())
    }

    /// Reloads when `changed(persisted, known)` reports a difference
    ///
    /// Compare and adopt happen under the view lock, so a local write can
    /// never slip in between and be mistaken for a foreign one.
    pub(crate) fn reload_if<F>(&self, changed: F) -> Result<Option<Vec<Session>>>
    where
        F: FnOnce(Option<&str>, Option<&str>) -> bool,
    {
        let mut snapshot = self.lock_snapshot()?;
        let persisted = self.raw();

        if !changed(persisted.as_deref(), snapshot.as_deref()) {
            // Equivalent content may still be serialized differently.
            if persisted != *snapshot {
                *snapshot = persisted;
            }
            return Ok(None);
        }

        let sessions = persisted
            .as_deref()
            .map(Self::parse_collection)
            .unwrap_or_default();
        *snapshot = persisted;
        Ok(Some(sessions))
    }

    /// This view's last known persisted form
    pub(crate) fn snapshot(&self) -> Result<Option<String>> {
        Ok(self.lock_snapshot()?.clone())
    }

    fn lock_snapshot(&self) -> Result<std::sync::MutexGuard<'_, Option<String>>> {
        self.snapshot
            .lock()
            .map_err(|_| MathchatError::Storage("Session store lock poisoned".to_string()).into())
    }

    /// Read-modify-write of the full collection under the view lock
    ///
    /// `apply` returns whether it changed anything; unchanged collections
    /// are not rewritten. A medium that cannot be read fails the mutation
    /// instead of being overwritten.
    fn mutate<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<Session>) -> bool,
    {
        let mut snapshot = self.lock_snapshot()?;
        let mut sessions = match self.backend.read(&self.key)? {
            Some(raw) => Self::parse_collection(&raw),
            None => Vec::new(),
        };
        if !apply(&mut sessions) {
            return Ok(());
        }

        let serialized = serde_json::to_string(&sessions)?;
        self.backend.write(&self.key, &serialized)?;
        *snapshot = Some(serialized);

        tracing::debug!(key = %self.key, total = sessions.len(), "Session collection written");
        Ok(())
    }
}

/// `chat-history-<YYYY-MM-DD>.json`
pub fn export_file_name(date: chrono::NaiveDate) -> String {
    format!("chat-history-{}.json", date.format("%Y-%m-%d"))
}
