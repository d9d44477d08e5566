//! Autosave against the state store: burst coalescing, deletion, status sequence.

use async_trait::async_trait;
use audit_autosave::{AutoSaveScheduler, SaveStatus};
use audit_backup::keys::{audit_key, ACTIVE_AUDIT_KEY, AUDITS_KEY};
use audit_backup::InMemoryBackupStore;
use audit_state::AuditStateStore;
use audit_types::{AuditRecord, BackupStore, BackupStoreError, NewAudit, Question, QuestionStatus};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Backup store that counts writes per key and can be told to fail or to be slow.
#[derive(Clone, Default)]
struct RecordingBackup {
    inner: InMemoryBackupStore,
    writes: Arc<Mutex<HashMap<String, usize>>>,
    failing: Arc<Mutex<bool>>,
    delay: Option<Duration>,
}

impl RecordingBackup {
    fn writes(&self, key: &str) -> usize {
        self.writes.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    fn reset(&self) {
        self.writes.lock().unwrap().clear();
    }

    fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }
}

#[async_trait]
impl BackupStore for RecordingBackup {
    async fn get(&self, key: &str) -> Result<Option<String>, BackupStoreError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), BackupStoreError> {
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        *self.writes.lock().unwrap().entry(key.to_string()).or_default() += 1;
        if *self.failing.lock().unwrap() {
            return Err(BackupStoreError::QuotaExceeded {
                needed: value.len(),
                available: 0,
            });
        }
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), BackupStoreError> {
        self.inner.remove(key).await
    }

    async fn keys(&self) -> Result<Vec<String>, BackupStoreError> {
        self.inner.keys().await
    }
}

fn new_audit() -> NewAudit {
    let mut clauses = BTreeMap::new();
    clauses.insert(
        "7.1".to_string(),
        (0..10)
            .map(|i| Question::new(format!("q{}", i), "7.1", "resource?"))
            .collect(),
    );
    let mut checklist = BTreeMap::new();
    checklist.insert("ISO9001".to_string(), clauses);
    NewAudit {
        client_name: "Acme".to_string(),
        checklist,
        ..Default::default()
    }
}

fn setup(backup: &RecordingBackup) -> (Arc<AuditStateStore>, AutoSaveScheduler) {
    let state = Arc::new(AuditStateStore::new());
    let scheduler = AutoSaveScheduler::spawn(
        Arc::clone(&state),
        Arc::new(backup.clone()),
        Duration::from_millis(2000),
        Duration::from_millis(2000),
    );
    (state, scheduler)
}

#[tokio::test(start_paused = true)]
async fn burst_of_updates_produces_one_write_with_final_state() {
    let backup = RecordingBackup::default();
    let (state, _scheduler) = setup(&backup);
    let audit = state.create(new_audit());
    tokio::time::sleep(Duration::from_secs(5)).await;
    backup.reset();

    for i in 0..10 {
        state
            .update(&audit.id, |mut r| {
                r.question_mut(&format!("q{}", i)).unwrap().status = QuestionStatus::Compliant;
                r
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(backup.writes(&audit_key(&audit.id)), 0);

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(backup.writes(&audit_key(&audit.id)), 1);
    assert_eq!(backup.writes(AUDITS_KEY), 1);

    let stored: AuditRecord =
        serde_json::from_str(&backup.get(&audit_key(&audit.id)).await.unwrap().unwrap()).unwrap();
    assert_eq!(stored.metrics.completion_percentage, 100);
    let list: Vec<AuditRecord> =
        serde_json::from_str(&backup.get(AUDITS_KEY).await.unwrap().unwrap()).unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].metrics.completion_percentage, 100);
}

#[tokio::test(start_paused = true)]
async fn delete_removes_record_key_and_updates_list() {
    let backup = RecordingBackup::default();
    let (state, _scheduler) = setup(&backup);
    let a = state.create(new_audit());
    tokio::time::sleep(Duration::from_millis(10)).await;
    let b = state.create(new_audit());
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(backup.get(&audit_key(&a.id)).await.unwrap().is_some());
    assert_eq!(
        backup.get(ACTIVE_AUDIT_KEY).await.unwrap().as_deref(),
        Some(b.id.as_str())
    );

    state.delete(&a.id);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(backup.get(&audit_key(&a.id)).await.unwrap().is_none());

    tokio::time::sleep(Duration::from_secs(5)).await;
    let list: Vec<AuditRecord> =
        serde_json::from_str(&backup.get(AUDITS_KEY).await.unwrap().unwrap()).unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].id, b.id);
}

#[tokio::test(start_paused = true)]
async fn status_goes_saving_saved_idle() {
    let backup = RecordingBackup {
        delay: Some(Duration::from_millis(50)),
        ..Default::default()
    };
    let (state, scheduler) = setup(&backup);
    let audit = state.create(new_audit());
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(scheduler.current_status(), SaveStatus::Idle);

    let mut rx = scheduler.status();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_w = Arc::clone(&seen);
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let s = rx.borrow_and_update().clone();
            seen_w.lock().unwrap().push(match s {
                SaveStatus::Idle => "idle",
                SaveStatus::Saving => "saving",
                SaveStatus::Saved { .. } => "saved",
                SaveStatus::Error { .. } => "error",
            });
        }
    });

    state.update(&audit.id, |r| r).unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;
    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.first(), Some(&"saving"));
    assert!(seen.contains(&"saved"));
    assert_eq!(seen.last(), Some(&"idle"));
}

#[tokio::test(start_paused = true)]
async fn failed_write_is_retried_only_on_next_change() {
    let backup = RecordingBackup::default();
    let (state, scheduler) = setup(&backup);
    let audit = state.create(new_audit());
    tokio::time::sleep(Duration::from_secs(5)).await;
    backup.reset();
    backup.set_failing(true);

    state.update(&audit.id, |r| r).unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(matches!(scheduler.current_status(), SaveStatus::Error { .. }));
    let attempts = backup.writes(&audit_key(&audit.id));
    assert_eq!(attempts, 1);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(backup.writes(&audit_key(&audit.id)), attempts);

    backup.set_failing(false);
    state.update(&audit.id, |r| r).unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(backup.writes(&audit_key(&audit.id)), attempts + 1);
    assert!(matches!(scheduler.current_status(), SaveStatus::Saved { .. }));
}

#[tokio::test(start_paused = true)]
async fn flush_writes_pending_immediately() {
    let backup = RecordingBackup::default();
    let (state, scheduler) = setup(&backup);
    let audit = state.create(new_audit());
    tokio::time::sleep(Duration::from_millis(10)).await;
    scheduler.flush().await;
    assert!(backup.get(&audit_key(&audit.id)).await.unwrap().is_some());
    assert!(backup.get(AUDITS_KEY).await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn delete_during_in_flight_write_stays_deleted_after_restore() {
    let backup = RecordingBackup {
        delay: Some(Duration::from_millis(500)),
        ..Default::default()
    };
    let (state, _scheduler) = setup(&backup);
    let keep = state.create(new_audit());
    tokio::time::sleep(Duration::from_millis(10)).await;
    let gone = state.create(new_audit());
    tokio::time::sleep(Duration::from_secs(10)).await;

    state.update(&gone.id, |r| r).unwrap();
    // Quiet period over, the slow write of the per-record key is now in flight.
    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert!(state.delete(&gone.id));
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert!(backup.get(&audit_key(&gone.id)).await.unwrap().is_none());
    let restored = AuditStateStore::new();
    restored.restore(&backup).await.unwrap();
    let ids: Vec<String> = restored.records().into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![keep.id]);
}
