//! Startup restore from the backup store, including schema-version migration.

use crate::store::AuditStateStore;
use audit_backup::keys::{
    audit_id_from_key, audit_key, is_namespaced, ACTIVE_AUDIT_KEY, AUDITS_KEY,
    CURRENT_STORAGE_VERSION, STORAGE_VERSION_KEY,
};
use audit_types::{AuditRecord, BackupStore, StorageError};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RestoreOutcome {
    /// Nothing stored yet.
    Fresh,
    /// Stored data already at the current version.
    Loaded,
    /// Older (or unmarked) data was normalized and rewritten.
    Migrated { from: Option<u32> },
    /// Marker from a newer or unknown layout; namespaced keys were cleared.
    Reset { found: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub outcome: RestoreOutcome,
    pub records: usize,
    pub active_id: Option<String>,
}

fn parse_records(raw: &str) -> Vec<AuditRecord> {
    let values: Vec<serde_json::Value> = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "stored audit collection unreadable");
            return Vec::new();
        }
    };
    values
        .into_iter()
        .filter_map(|v| match serde_json::from_value::<AuditRecord>(v) {
            Ok(r) => Some(r),
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable stored audit");
                None
            }
        })
        .collect()
}

impl AuditStateStore {
    /// Replace the in-memory collection with what the backup store holds.
    ///
    /// Statuses are normalized while parsing and metrics are recomputed. A per-record key wins
    /// over the collection entry when its `lastModified` is newer (the two targets are saved
    /// independently).
    pub async fn restore(&self, backup: &dyn BackupStore) -> Result<RestoreReport, StorageError> {
        let keys = backup.keys().await?;
        let has_data = keys
            .iter()
            .any(|k| is_namespaced(k) && k != STORAGE_VERSION_KEY);
        let marker = backup.get(STORAGE_VERSION_KEY).await?;

        let outcome = match marker.as_deref().map(|m| (m, m.trim().parse::<u32>())) {
            None if !has_data => RestoreOutcome::Fresh,
            None => RestoreOutcome::Migrated { from: None },
            Some((_, Ok(v))) if v == CURRENT_STORAGE_VERSION => RestoreOutcome::Loaded,
            Some((_, Ok(v))) if v < CURRENT_STORAGE_VERSION => {
                RestoreOutcome::Migrated { from: Some(v) }
            }
            Some((raw, _)) => RestoreOutcome::Reset {
                found: raw.to_string(),
            },
        };

        if let RestoreOutcome::Reset { found } = &outcome {
            tracing::warn!(found = %found, expected = CURRENT_STORAGE_VERSION, "incompatible backup layout, clearing");
            for key in keys.iter().filter(|k| is_namespaced(k)) {
                backup.remove(key).await?;
            }
            backup
                .set(STORAGE_VERSION_KEY, &CURRENT_STORAGE_VERSION.to_string())
                .await?;
            self.replace_all(Vec::new(), None);
            return Ok(RestoreReport {
                outcome,
                records: 0,
                active_id: None,
            });
        }

        let mut records = match backup.get(AUDITS_KEY).await? {
            Some(raw) => parse_records(&raw),
            None => Vec::new(),
        };
        for key in &keys {
            let Some(id) = audit_id_from_key(key) else {
                continue;
            };
            let Some(raw) = backup.get(key).await? else {
                continue;
            };
            let single: AuditRecord = match serde_json::from_str(&raw) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(audit_id = %id, error = %e, "skipping unreadable per-record backup");
                    continue;
                }
            };
            match records.iter_mut().find(|r| r.id == single.id) {
                Some(existing) => {
                    if single.metadata.last_modified > existing.metadata.last_modified {
                        *existing = single;
                    }
                }
                None => records.push(single),
            }
        }
        for r in &mut records {
            r.refresh_metrics();
        }

        let stored_active = backup.get(ACTIVE_AUDIT_KEY).await?;
        let active_id = stored_active
            .filter(|id| records.iter().any(|r| &r.id == id))
            .or_else(|| records.first().map(|r| r.id.clone()));

        if !matches!(outcome, RestoreOutcome::Loaded) {
            let body = serde_json::to_string(&records)?;
            if !records.is_empty() {
                backup.set(AUDITS_KEY, &body).await?;
                for r in &records {
                    backup.set(&audit_key(&r.id), &serde_json::to_string(r)?).await?;
                }
            }
            backup
                .set(STORAGE_VERSION_KEY, &CURRENT_STORAGE_VERSION.to_string())
                .await?;
        }

        let count = records.len();
        tracing::info!(records = count, outcome = ?outcome, "state restored from backup");
        self.replace_all(records, active_id.clone());
        Ok(RestoreReport {
            outcome,
            records: count,
            active_id,
        })
    }
}
