//! In-memory backup store (process lifetime only).

use crate::check_quota;
use audit_types::{BackupStore, BackupStoreError};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Backup store kept in a map; optional quota mimics the platform's storage limit.
#[derive(Clone)]
pub struct InMemoryBackupStore {
    entries: Arc<RwLock<BTreeMap<String, String>>>,
    quota: Option<usize>,
}

impl InMemoryBackupStore {
    pub fn new() -> Self {
        Self::with_quota(None)
    }

    pub fn with_quota(quota: Option<usize>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(BTreeMap::new())),
            quota,
        }
    }
}

impl Default for InMemoryBackupStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl BackupStore for InMemoryBackupStore {
    async fn get(&self, key: &str) -> Result<Option<String>, BackupStoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), BackupStoreError> {
        let mut guard = self.entries.write().await;
        check_quota(self.quota, guard.iter(), key, value)?;
        guard.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), BackupStoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, BackupStoreError> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_remove() {
        let store = InMemoryBackupStore::new();
        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        store.remove("k").await.unwrap();
        store.remove("k").await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn quota_rejects_oversized_write_and_keeps_old_value() {
        let store = InMemoryBackupStore::with_quota(Some(10));
        store.set("k", "12345").await.unwrap();
        let err = store.set("k", "0123456789").await.unwrap_err();
        assert!(matches!(err, BackupStoreError::QuotaExceeded { needed: 11, .. }));
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("12345"));
        // Replacing a key only counts the new value.
        store.set("k", "123456789").await.unwrap();
    }
}
