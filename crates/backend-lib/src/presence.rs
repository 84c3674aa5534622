// ============================
// passport-backend-lib/src/presence.rs
// ============================
//! Last-seen tracking for authenticated users.
//!
//! Requests only record a timestamp in memory; a background task writes
//! pending timestamps through the injected save callback.
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt};
use metrics::counter;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::metrics::{PRESENCE_FLUSHED, PRESENCE_TRACKED};

/// How long a last-seen entry is kept in memory by default
const DEFAULT_RETENTION: Duration = Duration::from_secs(5 * 60);

/// Persists one user's last-seen time
type SaveFn =
    Arc<dyn Fn(String, DateTime<Utc>) -> BoxFuture<'static, Result<(), AppError>> + Send + Sync>;

struct FlushTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

#[derive(Clone)]
pub struct PresenceTracker {
    last_seen: Arc<DashMap<String, DateTime<Utc>>>,
    pending: Arc<DashMap<String, DateTime<Utc>>>,
    save: SaveFn,
    retention: Duration,
    task: Arc<Mutex<Option<FlushTask>>>,
}

fn within(now: DateTime<Utc>, seen_at: DateTime<Utc>, window: Duration) -> bool {
    (now - seen_at).to_std().map(|age| age <= window).unwrap_or(true)
}

impl PresenceTracker {
    pub fn new<F, Fut>(save: F) -> Self
    where
        F: Fn(String, DateTime<Utc>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), AppError>> + Send + 'static,
    {
        Self {
            last_seen: Arc::new(DashMap::new()),
            pending: Arc::new(DashMap::new()),
            save: Arc::new(move |user_id, seen_at| save(user_id, seen_at).boxed()),
            retention: DEFAULT_RETENTION,
            task: Arc::new(Mutex::new(None)),
        }
    }

    /// Keep in-memory last-seen entries this long; older ones are dropped on
    /// each flush. `online_count` cannot see further back than this.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Record activity now. Never waits on storage.
    pub fn touch(&self, user_id: &str) {
        let now = Utc::now();
        self.last_seen.insert(user_id.to_string(), now);
        self.pending.insert(user_id.to_string(), now);
        counter!(PRESENCE_TRACKED).increment(1);
    }

    /// Write every pending timestamp. Failed saves are logged and dropped.
    /// Returns how many were saved.
    pub async fn flush(&self) -> usize {
        let batch: Vec<(String, DateTime<Utc>)> = self
            .pending
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();

        let mut saved = 0;
        for (user_id, seen_at) in batch {
            // A touch that landed after the snapshot stays pending
            self.pending.remove_if(&user_id, |_, ts| *ts == seen_at);
            match (self.save)(user_id.clone(), seen_at).await {
                Ok(()) => saved += 1,
                Err(e) => warn!(user_id = %user_id, error = %e, "failed to save last-seen time"),
            }
        }

        let now = Utc::now();
        let before = self.last_seen.len();
        self.last_seen
            .retain(|_, seen_at| within(now, *seen_at, self.retention));
        let pruned = before.saturating_sub(self.last_seen.len());

        if saved > 0 || pruned > 0 {
            counter!(PRESENCE_FLUSHED).increment(saved as u64);
            debug!(saved, pruned, "presence flushed");
        }
        saved
    }

    /// Spawn periodic flushing. A second call while running is ignored.
    pub fn start(&self, interval: Duration) {
        let Ok(mut slot) = self.task.lock() else {
            warn!("presence task lock poisoned");
            return;
        };
        if slot.is_some() {
            return;
        }

        let (stop, mut stopped) = watch::channel(false);
        let tracker = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        tracker.flush().await;
                    }
                    _ = stopped.changed() => break,
                }
            }
        });
        *slot = Some(FlushTask { stop, handle });
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }

    /// Stop the background task and write what is still pending
    pub async fn shutdown(&self) -> usize {
        let task = self.task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(task) = task {
            let _ = task.stop.send(true);
            if let Err(e) = task.handle.await {
                warn!(error = %e, "presence task ended abnormally");
            }
        }
        self.flush().await
    }

    pub fn last_seen(&self, user_id: &str) -> Option<DateTime<Utc>> {
        self.last_seen.get(user_id).map(|ts| *ts)
    }

    /// Users seen within `window`
    pub fn online_count(&self, window: Duration) -> usize {
        let now = Utc::now();
        self.last_seen
            .iter()
            .filter(|entry| within(now, *entry.value(), window))
            .count()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
