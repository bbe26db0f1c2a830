//! Keeps a view of the session history current across writers
//!
//! Two detection paths feed the same compare-and-reload step:
//!
//! 1. change notifications from the storage backend, when it offers them
//! 2. a fixed-interval poll of the persisted collection
//!
//! Either path compares the persisted form with the view's snapshot and
//! reloads only when they differ. Local writes update the snapshot as they
//! happen, so a view never reports its own writes back to itself.

use crate::config::{CompareStrategy, SyncConfig};
use crate::error::Result;
use crate::storage::{ChangeFeed, Session, SessionStore};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Buffered events per subscriber before older ones are dropped
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Which detection path noticed a change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// Backend change notification
    Notification,
    /// Periodic poll
    Poll,
    /// Explicit [`SyncWatcher::check_now`] call
    Manual,
}

impl std::fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Notification => write!(f, "notification"),
            Self::Poll => write!(f, "poll"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// Published after the view reloaded a foreign change
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The collection was re-read
    Reloaded {
        /// Freshly loaded sessions
        sessions: Vec<Session>,
        /// Path that detected the change
        trigger: SyncTrigger,
    },
}

/// Whether the persisted form differs from the known one under `strategy`
fn differs(strategy: CompareStrategy, persisted: Option<&str>, known: Option<&str>) -> bool {
    match strategy {
        CompareStrategy::Serialized => persisted != known,
        CompareStrategy::Parsed => {
            if persisted == known {
                return false;
            }
            let parse = |raw: Option<&str>| {
                raw.map(SessionStore::parse_collection).unwrap_or_default()
            };
            parse(persisted) != parse(known)
        }
    }
}

/// Watches one store view for changes made elsewhere
///
/// # Examples
///
/// ```no_run
/// use mathchat::config::SyncConfig;
/// use mathchat::storage::{MemoryBackend, SessionStore};
/// use mathchat::watcher::SyncWatcher;
/// use std::sync::Arc;
///
/// # async fn example() -> anyhow::Result<()> {
/// let store = SessionStore::new(Arc::new(MemoryBackend::new()), "chatSessions");
/// let watcher = SyncWatcher::new(store, SyncConfig::default());
/// let mut events = watcher.subscribe();
///
/// let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
/// let handle = watcher.start(shutdown_rx)?;
///
/// if let Ok(event) = events.recv().await {
///     println!("{:?}", event);
/// }
///
/// shutdown_tx.send(true)?;
/// handle.await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SyncWatcher {
    store: SessionStore,
    config: SyncConfig,
    event_tx: broadcast::Sender<SyncEvent>,
}

impl SyncWatcher {
    /// Watcher over `store`; the store's view state is shared
    pub fn new(store: SessionStore, config: SyncConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            config,
            event_tx,
        }
    }

    /// Receiver for reload events
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.event_tx.subscribe()
    }

    /// Store view being watched
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// One compare-and-reload cycle
    ///
    /// Returns the published event when the persisted collection moved on
    /// since this view last saw it.
    pub fn check_now(&self, trigger: SyncTrigger) -> Option<SyncEvent> {
        let strategy = self.config.compare;
        let reloaded = self
            .store
            .reload_if(|persisted, known| differs(strategy, persisted, known));

        match reloaded {
            Ok(Some(sessions)) => {
                info!(
                    %trigger,
                    sessions = sessions.len(),
                    "Session history changed elsewhere, reloaded"
                );
                let event = SyncEvent::Reloaded { sessions, trigger };
                // No subscribers is fine.
                let _ = self.event_tx.send(event.clone());
                Some(event)
            }
            Ok(None) => {
                debug!(%trigger, "Session history unchanged");
                None
            }
            Err(e) => {
                warn!(%trigger, "Sync check failed: {:#}", e);
                None
            }
        }
    }

    /// Spawn the background task
    ///
    /// The view first adopts the currently persisted collection, so only
    /// changes made after this call are reported. The task exits once
    /// `shutdown_rx` carries `true` or its sender is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the view's snapshot cannot be initialized
    pub fn start(&self, shutdown_rx: watch::Receiver<bool>) -> Result<JoinHandle<()>> {
        self.store.adopt_persisted()?;

        let feed = if self.config.use_notifications {
            match self.store.backend().watch(self.store.key()) {
                Ok(feed) => feed,
                Err(e) => {
                    warn!("Change notifications unavailable: {:#}", e);
                    None
                }
            }
        } else {
            None
        };

        if feed.is_none() {
            info!(
                interval_ms = self.config.poll_interval_ms,
                "Sync watcher running on polling only"
            );
        } else {
            info!(
                interval_ms = self.config.poll_interval_ms,
                backend = %self.store.backend().describe(),
                "Sync watcher running on notifications and polling"
            );
        }

        let watcher = self.clone();
        Ok(tokio::spawn(watcher.run(feed, shutdown_rx)))
    }

    async fn run(self, mut feed: Option<ChangeFeed>, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the snapshot is already fresh.
        ticker.tick().await;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }

                _ = ticker.tick() => {
                    self.check_now(SyncTrigger::Poll);
                }

                signalled = next_change(&mut feed) => {
                    if signalled {
                        self.check_now(SyncTrigger::Notification);
                    } else {
                        info!("Change notifications closed, continuing on polling only");
                        feed = None;
                    }
                }
            }
        }

        debug!("Sync watcher shutting down");
    }
}

/// Next notification, or never when there is no feed
async fn next_change(feed: &mut Option<ChangeFeed>) -> bool {
    match feed {
        Some(feed) => feed.changed().await,
        None => std::future::pending().await,
    }
}
