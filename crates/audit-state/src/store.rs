//! AuditStateStore: record collection, active pointer, single update entry point.

use crate::validate::{validate_record, ValidationIssue};
use audit_types::{AuditRecord, AuditSummary, NewAudit, StateError, StorageError};
use chrono::Utc;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;
use uuid::Uuid;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Emitted for every committed change, in commit order. Events are sent while the write lock
/// is still held, so two concurrent mutations cannot publish out of order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChange {
    Created(String),
    Updated(String),
    Deleted(String),
    ActiveChanged(Option<String>),
    Imported(Vec<String>),
    /// The whole collection was replaced from the backup store.
    Restored,
}

#[derive(Default)]
pub(crate) struct StateInner {
    pub(crate) records: Vec<AuditRecord>,
    pub(crate) active_id: Option<String>,
}

/// Holds every audit record of the session and the id of the active one.
///
/// Mutations go through [`AuditStateStore::update`]; the mutator runs under the write lock, so
/// readers see either the old or the new record, never an intermediate one. Mutators must not
/// call back into the store.
pub struct AuditStateStore {
    inner: RwLock<StateInner>,
    changes: broadcast::Sender<StateChange>,
}

impl AuditStateStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: RwLock::new(StateInner::default()),
            changes,
        }
    }

    /// Seed with existing records (normalized by deserialization); the first becomes active.
    pub fn with_records(mut records: Vec<AuditRecord>) -> Self {
        let store = Self::new();
        for r in &mut records {
            r.refresh_metrics();
        }
        {
            let mut guard = store.write();
            guard.active_id = records.first().map(|r| r.id.clone());
            guard.records = records;
        }
        store
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, StateInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, StateInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn emit(&self, change: StateChange) {
        // No subscribers is fine.
        let _ = self.changes.send(change);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.read().records.clone()
    }

    pub fn summaries(&self) -> Vec<AuditSummary> {
        self.read().records.iter().map(AuditRecord::summary).collect()
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &str) -> Option<AuditRecord> {
        self.read().records.iter().find(|r| r.id == id).cloned()
    }

    pub fn active_id(&self) -> Option<String> {
        self.read().active_id.clone()
    }

    pub fn active(&self) -> Option<AuditRecord> {
        let guard = self.read();
        let id = guard.active_id.as_deref()?;
        guard.records.iter().find(|r| r.id == id).cloned()
    }

    /// Create a record with a fresh id and make it active.
    pub fn create(&self, input: NewAudit) -> AuditRecord {
        let record = AuditRecord::new(input);
        {
            let mut guard = self.write();
            guard.records.push(record.clone());
            guard.active_id = Some(record.id.clone());
            self.emit(StateChange::Created(record.id.clone()));
            self.emit(StateChange::ActiveChanged(Some(record.id.clone())));
        }
        tracing::info!(audit_id = %record.id, client = %record.metadata.client_name, "audit created");
        record
    }

    /// Copy a record under a fresh id. Attachment metadata is not copied: the files belong to
    /// the source audit. The copy becomes active.
    pub fn duplicate(&self, id: &str) -> Option<AuditRecord> {
        let copy = {
            let mut guard = self.write();
            let source = guard.records.iter().find(|r| r.id == id)?;
            let now = Utc::now();
            let mut copy = source.clone();
            copy.id = Uuid::new_v4().to_string();
            copy.metadata.audit_number = if source.metadata.audit_number.is_empty() {
                "(copy)".to_string()
            } else {
                format!("{} (copy)", source.metadata.audit_number)
            };
            copy.metadata.created_at = now;
            copy.metadata.last_modified = now;
            copy.attachments.clear();
            copy.refresh_metrics();
            guard.records.push(copy.clone());
            guard.active_id = Some(copy.id.clone());
            self.emit(StateChange::Created(copy.id.clone()));
            self.emit(StateChange::ActiveChanged(Some(copy.id.clone())));
            copy
        };
        tracing::info!(source_id = %id, audit_id = %copy.id, "audit duplicated");
        Some(copy)
    }

    /// Apply `mutator` to the active record.
    ///
    /// The record keeps its id whatever the mutator returns. Afterwards notes are capped,
    /// metrics are recomputed from the checklist, and the modification time is stamped.
    /// Validation issues are logged and returned but never block the update.
    pub fn update<F>(&self, record_id: &str, mutator: F) -> Result<Vec<ValidationIssue>, StateError>
    where
        F: FnOnce(AuditRecord) -> AuditRecord,
    {
        let issues = {
            let mut guard = self.write();
            if guard.active_id.as_deref() != Some(record_id) {
                if !guard.records.iter().any(|r| r.id == record_id) {
                    return Err(StateError::UnknownRecord(record_id.to_string()));
                }
                return Err(StateError::NotActive {
                    requested: record_id.to_string(),
                    active: guard.active_id.clone(),
                });
            }
            let slot = guard
                .records
                .iter_mut()
                .find(|r| r.id == record_id)
                .ok_or_else(|| StateError::UnknownRecord(record_id.to_string()))?;

            let mut next = mutator(slot.clone());
            next.id = record_id.to_string();
            for q in next.questions_mut() {
                if q.cap_notes() {
                    tracing::warn!(audit_id = %record_id, question_id = %q.id, "notes truncated");
                }
            }
            next.refresh_metrics();
            next.metadata.last_modified = Utc::now();
            let issues = validate_record(&next);
            *slot = next;
            self.emit(StateChange::Updated(record_id.to_string()));
            issues
        };
        for issue in &issues {
            tracing::warn!(audit_id = %record_id, path = %issue.path, "{}", issue.message);
        }
        Ok(issues)
    }

    /// `update` on whatever record is active.
    pub fn update_active<F>(&self, mutator: F) -> Result<Vec<ValidationIssue>, StateError>
    where
        F: FnOnce(AuditRecord) -> AuditRecord,
    {
        let id = self
            .active_id()
            .ok_or_else(|| StateError::UnknownRecord("<no active audit>".to_string()))?;
        self.update(&id, mutator)
    }

    /// Returns false, leaving state untouched, when `id` is unknown.
    pub fn switch_active(&self, id: &str) -> bool {
        {
            let mut guard = self.write();
            if !guard.records.iter().any(|r| r.id == id) {
                return false;
            }
            if guard.active_id.as_deref() == Some(id) {
                return true;
            }
            guard.active_id = Some(id.to_string());
            self.emit(StateChange::ActiveChanged(Some(id.to_string())));
        }
        tracing::debug!(audit_id = %id, "active audit switched");
        true
    }

    /// Remove a record. If it was active, the first remaining record becomes active.
    pub fn delete(&self, id: &str) -> bool {
        {
            let mut guard = self.write();
            let Some(pos) = guard.records.iter().position(|r| r.id == id) else {
                return false;
            };
            guard.records.remove(pos);
            self.emit(StateChange::Deleted(id.to_string()));
            if guard.active_id.as_deref() == Some(id) {
                guard.active_id = guard.records.first().map(|r| r.id.clone());
                self.emit(StateChange::ActiveChanged(guard.active_id.clone()));
            }
        }
        tracing::info!(audit_id = %id, "audit deleted");
        true
    }

    /// Ingest one record or an array of records from external JSON. Statuses are normalized
    /// while parsing; ids that already exist are replaced with fresh ones.
    pub fn import_json(&self, text: &str) -> Result<Vec<String>, StorageError> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let mut incoming: Vec<AuditRecord> = match value {
            serde_json::Value::Array(_) => serde_json::from_value(value)?,
            other => vec![serde_json::from_value(other)?],
        };
        if incoming.is_empty() {
            return Ok(Vec::new());
        }
        let ids = {
            let mut guard = self.write();
            let mut ids = Vec::with_capacity(incoming.len());
            for mut record in incoming.drain(..) {
                if record.id.trim().is_empty() || guard.records.iter().any(|r| r.id == record.id) {
                    record.id = Uuid::new_v4().to_string();
                }
                record.refresh_metrics();
                ids.push(record.id.clone());
                guard.records.push(record);
            }
            self.emit(StateChange::Imported(ids.clone()));
            if guard.active_id.is_none() {
                guard.active_id = ids.first().cloned();
                self.emit(StateChange::ActiveChanged(ids.first().cloned()));
            }
            ids
        };
        tracing::info!(count = ids.len(), "audits imported");
        Ok(ids)
    }

    pub(crate) fn replace_all(&self, records: Vec<AuditRecord>, active_id: Option<String>) {
        {
            let mut guard = self.write();
            guard.records = records;
            guard.active_id = active_id;
            self.emit(StateChange::Restored);
        }
    }
}

impl Default for AuditStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audit_types::{completion_percentage, AuditMetrics, Question, QuestionStatus};
    use std::collections::BTreeMap;

    fn new_audit(client: &str) -> NewAudit {
        let mut clauses = BTreeMap::new();
        clauses.insert(
            "4.1".to_string(),
            vec![
                Question::new("q1", "4.1", "Context determined?"),
                Question::new("q2", "4.1", "Issues monitored?"),
                Question::new("q3", "4.1", "Reviewed?"),
            ],
        );
        let mut checklist = BTreeMap::new();
        checklist.insert("ISO9001".to_string(), clauses);
        NewAudit {
            client_name: client.to_string(),
            audit_number: "A-1".to_string(),
            checklist,
            ..Default::default()
        }
    }

    fn set_status(id: &str, status: QuestionStatus) -> impl FnOnce(AuditRecord) -> AuditRecord + '_ {
        move |mut r| {
            if let Some(q) = r.question_mut(id) {
                q.status = status;
            }
            r
        }
    }

    #[test]
    fn create_makes_record_active() {
        let store = AuditStateStore::new();
        let a = store.create(new_audit("Acme"));
        assert_eq!(store.active_id().as_deref(), Some(a.id.as_str()));
        let b = store.create(new_audit("Beta"));
        assert_ne!(a.id, b.id);
        assert_eq!(store.active_id().as_deref(), Some(b.id.as_str()));
    }

    #[test]
    fn update_recomputes_metrics_and_stamps_time() {
        let store = AuditStateStore::new();
        let a = store.create(new_audit("Acme"));
        store.update(&a.id, set_status("q1", QuestionStatus::Compliant)).unwrap();
        let r = store.active().unwrap();
        assert_eq!(r.metrics.completion_percentage, 33);
        assert!(r.metadata.last_modified >= a.metadata.last_modified);

        store
            .update(&a.id, set_status("q2", QuestionStatus::NotApplicable))
            .unwrap();
        assert_eq!(store.active().unwrap().metrics.completion_percentage, 67);
    }

    #[test]
    fn update_ignores_stale_metrics_from_mutator() {
        let store = AuditStateStore::new();
        let a = store.create(new_audit("Acme"));
        store
            .update(&a.id, |mut r| {
                r.metrics.completion_percentage = 99;
                r.id = "hijacked".into();
                r
            })
            .unwrap();
        let r = store.get(&a.id).unwrap();
        assert_eq!(r.metrics.completion_percentage, 0);
    }

    #[test]
    fn update_rejects_inactive_and_unknown_records() {
        let store = AuditStateStore::new();
        let a = store.create(new_audit("Acme"));
        let b = store.create(new_audit("Beta"));
        let err = store.update(&a.id, |r| r).unwrap_err();
        assert_eq!(
            err,
            StateError::NotActive {
                requested: a.id.clone(),
                active: Some(b.id.clone())
            }
        );
        assert!(matches!(
            store.update("nope", |r| r),
            Err(StateError::UnknownRecord(_))
        ));
    }

    #[test]
    fn validation_issues_do_not_block_update() {
        let store = AuditStateStore::new();
        let a = store.create(new_audit("Acme"));
        let issues = store
            .update(&a.id, |mut r| {
                r.metadata.client_name.clear();
                r
            })
            .unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(store.active().unwrap().metadata.client_name, "");
    }

    #[test]
    fn switch_active_unknown_id_leaves_state() {
        let store = AuditStateStore::new();
        let a = store.create(new_audit("Acme"));
        assert!(!store.switch_active("missing"));
        assert_eq!(store.active_id().as_deref(), Some(a.id.as_str()));
    }

    #[test]
    fn delete_active_activates_first_remaining() {
        let store = AuditStateStore::new();
        let a = store.create(new_audit("Acme"));
        let b = store.create(new_audit("Beta"));
        assert!(store.delete(&b.id));
        assert_eq!(store.active_id().as_deref(), Some(a.id.as_str()));
        assert!(store.delete(&a.id));
        assert_eq!(store.active_id(), None);
        assert!(!store.delete(&a.id));
    }

    #[test]
    fn duplicate_gets_new_id_and_drops_attachments() {
        let store = AuditStateStore::new();
        let a = store.create(new_audit("Acme"));
        let copy = store.duplicate(&a.id).unwrap();
        assert_ne!(copy.id, a.id);
        assert_eq!(copy.metadata.audit_number, "A-1 (copy)");
        assert_eq!(store.active_id().as_deref(), Some(copy.id.as_str()));
        assert!(store.duplicate("missing").is_none());
    }

    #[test]
    fn import_normalizes_and_reassigns_colliding_ids() {
        let store = AuditStateStore::new();
        let a = store.create(new_audit("Acme"));
        let json = serde_json::json!([{
            "id": a.id,
            "metadata": {
                "clientName": "Imported",
                "createdAt": "2024-05-01T10:00:00Z",
                "lastModified": "2024-05-01T10:00:00Z"
            },
            "checklist": {"ISO9001": {"5.1": [
                {"id": "x1", "status": "non_compliant"},
                {"id": "x2", "status": "bogus"}
            ]}},
            "metrics": {"completionPercentage": 100}
        }]);
        let ids = store.import_json(&json.to_string()).unwrap();
        assert_eq!(ids.len(), 1);
        assert_ne!(ids[0], a.id);
        let imported = store.get(&ids[0]).unwrap();
        assert_eq!(
            imported.question("x1").unwrap().status,
            QuestionStatus::NonConformity
        );
        assert_eq!(
            imported.question("x2").unwrap().status,
            QuestionStatus::NotAnswered
        );
        assert_eq!(imported.metrics.completion_percentage, 50);
    }

    #[test]
    fn metrics_track_every_update_sequence() {
        let store = AuditStateStore::new();
        let a = store.create(new_audit("Acme"));
        // Deterministic pseudo-random walk over (question, status) pairs.
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        for _ in 0..500 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            let question = format!("q{}", seed % 3 + 1);
            let status = QuestionStatus::ALL[(seed >> 8) as usize % QuestionStatus::ALL.len()];
            store.update(&a.id, set_status(&question, status)).unwrap();

            let record = store.get(&a.id).unwrap();
            assert_eq!(record.metrics, AuditMetrics::from_checklist(&record.checklist));
            let answered = record
                .questions()
                .filter(|q| q.status != QuestionStatus::NotAnswered)
                .count();
            assert_eq!(record.metrics.answered, answered);
            assert_eq!(
                record.metrics.completion_percentage,
                completion_percentage(answered, 3)
            );
        }
    }

    #[test]
    fn concurrent_creates_broadcast_in_commit_order() {
        let store = std::sync::Arc::new(AuditStateStore::new());
        let mut rx = store.subscribe();
        let workers: Vec<_> = (0..4)
            .map(|w| {
                let store = std::sync::Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        store.create(new_audit(&format!("client-{}-{}", w, i)));
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        let mut created = Vec::new();
        while let Ok(change) = rx.try_recv() {
            if let StateChange::Created(id) = change {
                created.push(id);
            }
        }
        let committed: Vec<String> = store.records().into_iter().map(|r| r.id).collect();
        assert_eq!(created, committed);
    }

    #[tokio::test]
    async fn changes_are_broadcast_in_order() {
        let store = AuditStateStore::new();
        let mut rx = store.subscribe();
        let a = store.create(new_audit("Acme"));
        store.update(&a.id, |r| r).unwrap();
        store.delete(&a.id);
        assert_eq!(rx.recv().await.unwrap(), StateChange::Created(a.id.clone()));
        assert_eq!(
            rx.recv().await.unwrap(),
            StateChange::ActiveChanged(Some(a.id.clone()))
        );
        assert_eq!(rx.recv().await.unwrap(), StateChange::Updated(a.id.clone()));
        assert_eq!(rx.recv().await.unwrap(), StateChange::Deleted(a.id.clone()));
        assert_eq!(rx.recv().await.unwrap(), StateChange::ActiveChanged(None));
    }
}
