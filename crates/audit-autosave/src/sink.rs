//! DebouncedSink: one pending write per target key, fired after a quiet period.

use audit_types::BackupStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Autosave indicator shown by the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SaveStatus {
    Idle,
    Saving,
    Saved { at: DateTime<Utc> },
    Error { message: String },
}

type SerializeJob = Box<dyn FnOnce() -> Result<String, serde_json::Error> + Send>;

struct PendingWrite {
    generation: u64,
    key: String,
    job: SerializeJob,
    handle: Option<JoinHandle<()>>,
}

struct Shared<K> {
    backup: Arc<dyn BackupStore>,
    quiet: Duration,
    linger: Duration,
    pending: Mutex<HashMap<K, PendingWrite>>,
    generation: AtomicU64,
    /// Held across every backup `set`/`remove`. Maps a removed key to the generation of its
    /// removal; a write scheduled before that generation is dropped instead of landing.
    removals: tokio::sync::Mutex<HashMap<String, u64>>,
    status: watch::Sender<SaveStatus>,
}

/// Debounced writer into the backup store.
///
/// Each target holds at most one pending write. Scheduling again within the quiet period
/// replaces the pending value and restarts the timer, so only the last value is written.
/// Serialization runs when the timer fires. A failed write sets `SaveStatus::Error` and is not
/// retried until the target is scheduled again.
///
/// Writes and removals of the backup store are serialized. A removal waits for an in-flight
/// write to land, and a write taken before a removal of its key never lands after it.
pub struct DebouncedSink<K> {
    shared: Arc<Shared<K>>,
}

impl<K> Clone for DebouncedSink<K> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K> DebouncedSink<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    pub fn new(backup: Arc<dyn BackupStore>, quiet: Duration, linger: Duration) -> Self {
        let (status, _) = watch::channel(SaveStatus::Idle);
        Self {
            shared: Arc::new(Shared {
                backup,
                quiet,
                linger,
                pending: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                removals: tokio::sync::Mutex::new(HashMap::new()),
                status,
            }),
        }
    }

    pub fn status(&self) -> watch::Receiver<SaveStatus> {
        self.shared.status.subscribe()
    }

    pub fn current_status(&self) -> SaveStatus {
        self.shared.status.borrow().clone()
    }

    /// Number of targets with a write waiting for its quiet period.
    pub fn pending(&self) -> usize {
        self.shared.lock_pending().len()
    }

    /// (Re)start the quiet period for `target`; `value` is written under `key` when it ends.
    pub fn schedule<T>(&self, target: K, key: String, value: T)
    where
        T: Serialize + Send + 'static,
    {
        let generation = self.shared.next_generation();
        let job: SerializeJob = Box::new(move || serde_json::to_string(&value));
        let mut pending = self.shared.lock_pending();
        if let Some(previous) = pending.remove(&target) {
            if let Some(handle) = previous.handle {
                handle.abort();
            }
        }
        let shared = Arc::clone(&self.shared);
        let fire_target = target.clone();
        let quiet = self.shared.quiet;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(quiet).await;
            shared.fire(fire_target, generation).await;
        });
        pending.insert(
            target,
            PendingWrite {
                generation,
                key,
                job,
                handle: Some(handle),
            },
        );
    }

    /// Drop a pending write without writing it.
    pub fn cancel(&self, target: &K) -> bool {
        match self.shared.lock_pending().remove(target) {
            Some(p) => {
                if let Some(handle) = p.handle {
                    handle.abort();
                }
                true
            }
            None => false,
        }
    }

    /// Drop every pending write addressed to `key`.
    pub fn cancel_key(&self, key: &str) {
        let mut pending = self.shared.lock_pending();
        pending.retain(|_, p| {
            if p.key == key {
                if let Some(handle) = p.handle.take() {
                    handle.abort();
                }
                false
            } else {
                true
            }
        });
    }

    /// Write `target`'s pending value now instead of waiting.
    pub async fn flush_target(&self, target: &K) {
        let taken = self.shared.lock_pending().remove(target);
        if let Some(p) = taken {
            if let Some(handle) = p.handle {
                handle.abort();
            }
            self.shared.write(p.key, p.generation, p.job).await;
        }
    }

    /// Write every pending value now.
    pub async fn flush(&self) {
        let drained: Vec<PendingWrite> = self
            .shared
            .lock_pending()
            .drain()
            .map(|(_, p)| p)
            .collect();
        for p in drained {
            if let Some(handle) = p.handle {
                handle.abort();
            }
            self.shared.write(p.key, p.generation, p.job).await;
        }
    }

    /// Immediate write of an already-serialized value, outside the debounce.
    pub async fn write_now(&self, key: &str, value: &str) {
        let value = value.to_string();
        let generation = self.shared.next_generation();
        self.shared
            .write(key.to_string(), generation, Box::new(move || Ok(value)))
            .await;
    }

    /// Immediate removal of a key. Waits for a write of the same key that is already in flight.
    pub async fn remove_now(&self, key: &str) {
        let mut removals = self.shared.removals.lock().await;
        removals.insert(key.to_string(), self.shared.next_generation());
        if let Err(e) = self.shared.backup.remove(key).await {
            tracing::warn!(key = %key, error = %e, "backup removal failed");
            self.shared.status.send_replace(SaveStatus::Error {
                message: e.to_string(),
            });
        }
    }
}

impl<K> Shared<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<K, PendingWrite>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    async fn fire(self: Arc<Self>, target: K, generation: u64) {
        let taken = {
            let mut pending = self.lock_pending();
            // A newer schedule or a flush already took this slot.
            if pending.get(&target).map(|p| p.generation) == Some(generation) {
                pending.remove(&target)
            } else {
                None
            }
        };
        if let Some(p) = taken {
            tracing::debug!(target = ?target, key = %p.key, "autosave firing");
            self.write(p.key, p.generation, p.job).await;
        }
    }

    async fn write(self: &Arc<Self>, key: String, generation: u64, job: SerializeJob) {
        let mut removals = self.removals.lock().await;
        match removals.get(&key) {
            Some(&removed) if removed > generation => {
                tracing::debug!(key = %key, "autosave dropped, key removed after scheduling");
                return;
            }
            Some(_) => {
                removals.remove(&key);
            }
            None => {}
        }
        self.status.send_replace(SaveStatus::Saving);
        let body = match job() {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(key = %key, error = %e, "autosave serialization failed");
                self.status.send_replace(SaveStatus::Error {
                    message: format!("serialization failed: {}", e),
                });
                return;
            }
        };
        match self.backup.set(&key, &body).await {
            Ok(()) => {
                let at = Utc::now();
                self.status.send_replace(SaveStatus::Saved { at });
                self.schedule_idle(at);
            }
            Err(e) => {
                tracing::error!(key = %key, error = %e, "autosave write failed");
                self.status.send_replace(SaveStatus::Error {
                    message: e.to_string(),
                });
            }
        }
    }

    /// Drop back to `Idle` after the linger period unless something newer happened.
    fn schedule_idle(self: &Arc<Self>, saved_at: DateTime<Utc>) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(shared.linger).await;
            shared.status.send_if_modified(|s| {
                if *s == (SaveStatus::Saved { at: saved_at }) {
                    *s = SaveStatus::Idle;
                    true
                } else {
                    false
                }
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audit_backup::InMemoryBackupStore;

    fn sink(backup: &InMemoryBackupStore) -> DebouncedSink<&'static str> {
        DebouncedSink::new(
            Arc::new(backup.clone()),
            Duration::from_millis(2000),
            Duration::from_millis(2000),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn only_last_value_is_written() {
        let backup = InMemoryBackupStore::new();
        let sink = sink(&backup);
        for i in 0..5 {
            sink.schedule("t", "k".to_string(), i);
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        assert!(backup.get("k").await.unwrap().is_none());
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(backup.get("k").await.unwrap().as_deref(), Some("4"));
        assert_eq!(sink.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn saved_falls_back_to_idle() {
        let backup = InMemoryBackupStore::new();
        let sink = sink(&backup);
        sink.schedule("t", "k".to_string(), "v");
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert!(matches!(sink.current_status(), SaveStatus::Saved { .. }));
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(sink.current_status(), SaveStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn quota_failure_records_error_without_retry_loop() {
        let backup = InMemoryBackupStore::with_quota(Some(4));
        let sink = sink(&backup);
        sink.schedule("t", "key".to_string(), "a long value");
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert!(matches!(sink.current_status(), SaveStatus::Error { .. }));
        assert_eq!(sink.pending(), 0);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(matches!(sink.current_status(), SaveStatus::Error { .. }));
    }

    /// Backup whose `set` takes a while.
    #[derive(Clone)]
    struct SlowBackup(InMemoryBackupStore);

    #[async_trait::async_trait]
    impl BackupStore for SlowBackup {
        async fn get(&self, key: &str) -> Result<Option<String>, audit_types::BackupStoreError> {
            self.0.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> Result<(), audit_types::BackupStoreError> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            self.0.set(key, value).await
        }

        async fn remove(&self, key: &str) -> Result<(), audit_types::BackupStoreError> {
            self.0.remove(key).await
        }

        async fn keys(&self) -> Result<Vec<String>, audit_types::BackupStoreError> {
            self.0.keys().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn removal_waits_for_in_flight_write() {
        let backup = InMemoryBackupStore::new();
        let sink: DebouncedSink<&'static str> = DebouncedSink::new(
            Arc::new(SlowBackup(backup.clone())),
            Duration::from_millis(2000),
            Duration::from_millis(2000),
        );
        sink.schedule("t", "k".to_string(), "v");
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(sink.current_status(), SaveStatus::Saving);

        sink.cancel_key("k");
        sink.remove_now("k").await;
        assert!(backup.get("k").await.unwrap().is_none());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(backup.get("k").await.unwrap().is_none());

        sink.write_now("k", "again").await;
        assert_eq!(backup.get("k").await.unwrap().as_deref(), Some("again"));
    }

    #[tokio::test(start_paused = true)]
    async fn flush_and_cancel() {
        let backup = InMemoryBackupStore::new();
        let sink = sink(&backup);
        sink.schedule("a", "ka".to_string(), 1);
        sink.schedule("b", "kb".to_string(), 2);
        assert!(sink.cancel(&"b"));
        sink.flush().await;
        assert_eq!(backup.get("ka").await.unwrap().as_deref(), Some("1"));
        assert!(backup.get("kb").await.unwrap().is_none());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(backup.get("kb").await.unwrap().is_none());
    }
}
