//! Picks the workspace backend once from host capabilities.

use crate::directory_provider::DirectoryStorageProvider;
use crate::manager::WorkspaceManager;
use crate::sqlite_provider::SqliteStorageProvider;
use audit_types::{HostCapabilities, ProviderKind, StorageError, StorageProvider};
use std::path::Path;
use std::sync::Arc;

/// Touch-first devices and hosts without directory handles use the local database.
pub fn choose_provider_kind(capabilities: HostCapabilities) -> ProviderKind {
    if capabilities.directory_handles && !capabilities.touch_form_factor {
        ProviderKind::Directory
    } else {
        ProviderKind::LocalDatabase
    }
}

/// Fixed for the process lifetime; consumers program against [`StorageProvider`] only.
#[derive(Clone)]
pub struct StorageProviderAdapter {
    kind: ProviderKind,
    provider: Arc<dyn StorageProvider>,
}

impl StorageProviderAdapter {
    pub fn select(
        capabilities: HostCapabilities,
        workspace: Arc<WorkspaceManager>,
        database_path: &Path,
    ) -> Result<Self, StorageError> {
        let kind = choose_provider_kind(capabilities);
        let provider: Arc<dyn StorageProvider> = match kind {
            ProviderKind::Directory => Arc::new(DirectoryStorageProvider::new(workspace)),
            ProviderKind::LocalDatabase => Arc::new(SqliteStorageProvider::open(database_path)?),
        };
        tracing::info!(
            ?kind,
            directory_handles = capabilities.directory_handles,
            touch = capabilities.touch_form_factor,
            "storage provider selected"
        );
        Ok(Self { kind, provider })
    }

    pub fn from_provider(provider: Arc<dyn StorageProvider>) -> Self {
        Self {
            kind: provider.kind(),
            provider,
        }
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn provider(&self) -> Arc<dyn StorageProvider> {
        Arc::clone(&self.provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(directory_handles: bool, touch_form_factor: bool) -> HostCapabilities {
        HostCapabilities {
            directory_handles,
            touch_form_factor,
        }
    }

    #[test]
    fn capability_matrix() {
        assert_eq!(choose_provider_kind(caps(true, false)), ProviderKind::Directory);
        assert_eq!(choose_provider_kind(caps(true, true)), ProviderKind::LocalDatabase);
        assert_eq!(choose_provider_kind(caps(false, false)), ProviderKind::LocalDatabase);
        assert_eq!(choose_provider_kind(caps(false, true)), ProviderKind::LocalDatabase);
    }

    #[test]
    fn select_opens_database_when_needed() {
        let dir = tempfile::tempdir().unwrap();
        let host = Arc::new(crate::mock::MockDirectoryHost::new());
        let workspace = Arc::new(WorkspaceManager::new(host, "ISO9001"));
        let db_path = dir.path().join("audits.sqlite3");

        let adapter = StorageProviderAdapter::select(caps(false, false), Arc::clone(&workspace), &db_path)
            .unwrap();
        assert_eq!(adapter.kind(), ProviderKind::LocalDatabase);
        assert!(adapter.provider().ready());
        assert!(db_path.exists());

        let adapter = StorageProviderAdapter::select(caps(true, false), workspace, &db_path).unwrap();
        assert_eq!(adapter.kind(), ProviderKind::Directory);
        assert!(!adapter.provider().ready());
    }
}
