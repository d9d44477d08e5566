//! Timestamped full-record snapshots in the workspace export area.

use audit_types::{sanitize_file_name, AccessMode, AuditRecord, StorageError, StorageProvider};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Minute resolution; collisions inside one minute get a `_NN` suffix.
pub const CHECKPOINT_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M00";
const CHECKPOINT_MARKER: &str = "checkpoint_";
const MAX_SUFFIX: usize = 99;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckpointDocument<'a> {
    #[serde(flatten)]
    record: &'a AuditRecord,
    exported_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedCheckpoint {
    pub path: String,
    pub file_name: String,
}

/// `[<client>_]checkpoint_<YYYYMMDDTHHMM00>[_NN].json`
pub fn checkpoint_file_name(client_name: Option<&str>, at: DateTime<Utc>, suffix: usize) -> String {
    let prefix = client_name
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(|c| format!("{}_", sanitize_file_name(c)))
        .unwrap_or_default();
    let ts = at.format(CHECKPOINT_TIMESTAMP_FORMAT);
    if suffix == 0 {
        format!("{}{}{}.json", prefix, CHECKPOINT_MARKER, ts)
    } else {
        format!("{}{}{}_{:02}.json", prefix, CHECKPOINT_MARKER, ts, suffix)
    }
}

pub struct CheckpointManager {
    provider: Arc<dyn StorageProvider>,
}

impl CheckpointManager {
    pub fn new(provider: Arc<dyn StorageProvider>) -> Self {
        Self { provider }
    }

    /// Write `record` as pretty JSON with an `exportedAt` stamp. Never overwrites.
    pub async fn save(&self, record: &AuditRecord) -> Result<SavedCheckpoint, StorageError> {
        if !self.provider.connected() {
            return Err(StorageError::NotConnected);
        }
        if !self.provider.ensure_permission(AccessMode::ReadWrite).await? {
            return Err(StorageError::PermissionDenied {
                path: self.provider.location().unwrap_or_default(),
                mode: AccessMode::ReadWrite,
            });
        }
        let exported_at = Utc::now();
        let contents = serde_json::to_string_pretty(&CheckpointDocument {
            record,
            exported_at,
        })?;

        let client = Some(record.metadata.client_name.as_str());
        for suffix in 0..=MAX_SUFFIX {
            let file_name = checkpoint_file_name(client, exported_at, suffix);
            match self.provider.write_checkpoint(&file_name, &contents).await {
                Ok(path) => {
                    tracing::info!(audit_id = %record.id, file = %file_name, "checkpoint saved");
                    return Ok(SavedCheckpoint { path, file_name });
                }
                Err(StorageError::Conflict(_)) => continue,
                Err(e) => {
                    self.provider.report_write_failure().await;
                    return Err(e);
                }
            }
        }
        Err(StorageError::Conflict(checkpoint_file_name(
            client,
            exported_at,
            0,
        )))
    }

    /// Checkpoint names, oldest first.
    pub async fn list(&self) -> Result<Vec<String>, StorageError> {
        let mut names: Vec<String> = self
            .provider
            .list_checkpoints()
            .await?
            .into_iter()
            .filter(|n| n.contains(CHECKPOINT_MARKER) && n.ends_with(".json"))
            .collect();
        names.sort();
        Ok(names)
    }

    /// The greatest checkpoint name, parsed. `None` when there is none.
    pub async fn load_latest(&self) -> Result<Option<AuditRecord>, StorageError> {
        let Some(latest) = self.list().await?.pop() else {
            return Ok(None);
        };
        let text = self.provider.read_checkpoint(&latest).await?;
        let mut record: AuditRecord = serde_json::from_str(&text)?;
        record.refresh_metrics();
        tracing::info!(audit_id = %record.id, file = %latest, "checkpoint loaded");
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn names_truncate_to_the_minute() {
        let at = Utc.with_ymd_and_hms(2025, 3, 7, 9, 5, 42).unwrap();
        assert_eq!(
            checkpoint_file_name(None, at, 0),
            "checkpoint_20250307T090500.json"
        );
        assert_eq!(
            checkpoint_file_name(Some("Acme S.p.A."), at, 3),
            "Acme_S.p.A_checkpoint_20250307T090500_03.json"
        );
        assert_eq!(
            checkpoint_file_name(Some("  "), at, 0),
            "checkpoint_20250307T090500.json"
        );
    }

    #[test]
    fn suffixed_names_sort_after_the_base() {
        let at = Utc.with_ymd_and_hms(2025, 3, 7, 9, 5, 0).unwrap();
        let mut names = vec![
            checkpoint_file_name(None, at, 1),
            checkpoint_file_name(None, at, 0),
        ];
        names.sort();
        assert_eq!(names[0], "checkpoint_20250307T090500.json");
    }
}
