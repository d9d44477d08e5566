//! JSON file-backed backup store (persists across restarts).

use crate::check_quota;
use audit_types::{BackupStore, BackupStoreError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Keeps the whole key space in one JSON object on disk; every write replaces the file
/// through a temp file + rename so a crash never leaves half a document behind.
pub struct JsonFileBackupStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
    quota: Option<usize>,
}

impl JsonFileBackupStore {
    /// Open (or lazily create) the store at `path`. A corrupt file is logged and treated as
    /// empty; it is overwritten on the next write.
    pub async fn open(
        path: impl AsRef<Path>,
        quota: Option<usize>,
    ) -> Result<Self, BackupStoreError> {
        let path = path.as_ref().to_path_buf();
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str::<BTreeMap<String, String>>(&content) {
                Ok(map) => map,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "backup file unreadable, starting empty");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(BackupStoreError::Io(e.to_string())),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
            quota,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), BackupStoreError> {
        let body = serde_json::to_string(entries)
            .map_err(|e| BackupStoreError::Serialization(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| BackupStoreError::Io(e.to_string()))?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| BackupStoreError::Io(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| BackupStoreError::Io(e.to_string()))
    }
}

#[async_trait::async_trait]
impl BackupStore for JsonFileBackupStore {
    async fn get(&self, key: &str) -> Result<Option<String>, BackupStoreError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), BackupStoreError> {
        let mut guard = self.entries.lock().await;
        check_quota(self.quota, guard.iter(), key, value)?;
        let previous = guard.insert(key.to_string(), value.to_string());
        if let Err(e) = self.persist(&guard).await {
            match previous {
                Some(old) => guard.insert(key.to_string(), old),
                None => guard.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), BackupStoreError> {
        let mut guard = self.entries.lock().await;
        if guard.remove(key).is_some() {
            self.persist(&guard).await?;
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, BackupStoreError> {
        Ok(self.entries.lock().await.keys().cloned().collect())
    }
}
