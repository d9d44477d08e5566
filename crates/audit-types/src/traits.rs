//! Traits for the storage tiers, plus the error types they share.

use crate::{Attachment, AuditRecord, AuditSummary};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Which concrete backend serves workspace operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// User-selected directory tree (the authoritative copy).
    Directory,
    /// Embedded transactional database used when directory handles are unavailable.
    LocalDatabase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    Read,
    ReadWrite,
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessMode::Read => f.write_str("read"),
            AccessMode::ReadWrite => f.write_str("readwrite"),
        }
    }
}

/// What the host environment can do. Inspected once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCapabilities {
    pub directory_handles: bool,
    pub touch_form_factor: bool,
}

/// Aggregate usage reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    pub provider: ProviderKind,
    pub audits: usize,
    pub attachments: usize,
    pub attachment_bytes: u64,
    pub checkpoints: usize,
}

/// Origin-scoped key/value tier used as a crash-recovery cache.
#[async_trait]
pub trait BackupStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, BackupStoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), BackupStoreError>;

    /// Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), BackupStoreError>;

    async fn keys(&self) -> Result<Vec<String>, BackupStoreError>;
}

/// Uniform surface over the directory-backed and database-backed workspace backends.
///
/// Contract: `save_attachment` and `write_checkpoint` never overwrite an existing entry; they
/// fail with `StorageError::Conflict` so the caller can pick another name.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// True when writes can be attempted without prompting.
    fn ready(&self) -> bool;

    /// Root of the backend (audit directory or database file), when there is one.
    fn location(&self) -> Option<PathBuf>;

    /// A backend is attached, even if its grant has lapsed. Writes on a connected but not
    /// ready backend go through [`StorageProvider::ensure_permission`] first.
    fn connected(&self) -> bool {
        self.ready() || self.location().is_some()
    }

    /// Query and, if needed, re-request access. `Ok(false)` is terminal for the caller's
    /// operation.
    async fn ensure_permission(&self, mode: AccessMode) -> Result<bool, StorageError>;

    async fn save_audit(&self, record: &AuditRecord) -> Result<(), StorageError>;

    async fn load_audit(&self, id: &str) -> Result<Option<AuditRecord>, StorageError>;

    async fn delete_audit(&self, id: &str) -> Result<bool, StorageError>;

    async fn list_audits(&self) -> Result<Vec<AuditSummary>, StorageError>;

    /// Store attachment bytes; returns where they landed (path or row key).
    async fn save_attachment(
        &self,
        audit_id: &str,
        attachment: &Attachment,
        bytes: &[u8],
    ) -> Result<String, StorageError>;

    async fn load_attachment(
        &self,
        audit_id: &str,
        attachment: &Attachment,
    ) -> Result<Option<Vec<u8>>, StorageError>;

    async fn write_checkpoint(&self, file_name: &str, contents: &str)
        -> Result<String, StorageError>;

    /// Checkpoint names, unsorted.
    async fn list_checkpoints(&self) -> Result<Vec<String>, StorageError>;

    async fn read_checkpoint(&self, file_name: &str) -> Result<String, StorageError>;

    async fn stats(&self) -> Result<StorageStats, StorageError>;

    /// Called after a failed write so the backend can re-verify its access.
    async fn report_write_failure(&self) {}
}

/// Which cap an attachment batch violated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "limit", rename_all = "snake_case")]
pub enum LimitViolation {
    TooManyFiles {
        max: usize,
        existing: usize,
        incoming: usize,
    },
    FileTooLarge {
        file_name: String,
        size: u64,
        max: u64,
    },
    TotalTooLarge {
        max: u64,
        existing: u64,
        incoming: u64,
    },
}

impl fmt::Display for LimitViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitViolation::TooManyFiles {
                max,
                existing,
                incoming,
            } => write!(
                f,
                "too many files for question: {} existing + {} new exceeds max {}",
                existing, incoming, max
            ),
            LimitViolation::FileTooLarge {
                file_name,
                size,
                max,
            } => write!(
                f,
                "file '{}' is {} bytes, max per file is {} bytes",
                file_name, size, max
            ),
            LimitViolation::TotalTooLarge {
                max,
                existing,
                incoming,
            } => write!(
                f,
                "total size for question: {} existing + {} new bytes exceeds max {} bytes",
                existing, incoming, max
            ),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("no workspace connected")]
    NotConnected,
    #[error("permission denied ({mode}) on {}", .path.display())]
    PermissionDenied { path: PathBuf, mode: AccessMode },
    #[error("selection aborted by user")]
    UserAborted,
    #[error("limit exceeded: {0}")]
    LimitExceeded(LimitViolation),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("serialization failed: {0}")]
    Serialization(String),
    #[error("already exists: {0}")]
    Conflict(String),
    #[error("i/o error on {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("database error: {0}")]
    Database(String),
    #[error("backup store: {0}")]
    Backup(#[from] BackupStoreError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("storage error: {0}")]
    Other(String),
}

impl StorageError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    /// A dismissed prompt is an outcome, not a failure.
    pub fn is_user_aborted(&self) -> bool {
        matches!(self, StorageError::UserAborted)
    }

    /// Stable identifier for API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            StorageError::NotConnected => "not_connected",
            StorageError::PermissionDenied { .. } => "permission_denied",
            StorageError::UserAborted => "user_aborted",
            StorageError::LimitExceeded(_) => "limit_exceeded",
            StorageError::NotFound(_) => "not_found",
            StorageError::Serialization(_) | StorageError::Backup(_) => "serialization_failure",
            StorageError::Conflict(_) => "conflict",
            StorageError::Io { .. } => "io",
            StorageError::Database(_) => "database",
            StorageError::State(_) => "state",
            StorageError::Other(_) => "other",
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum BackupStoreError {
    #[error("quota exceeded: need {needed} bytes, {available} available")]
    QuotaExceeded { needed: usize, available: usize },
    #[error("serialization failed: {0}")]
    Serialization(String),
    #[error("backup i/o: {0}")]
    Io(String),
    #[error("backup store error: {0}")]
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("unknown audit record: {0}")]
    UnknownRecord(String),
    #[error("audit {requested} is not the active record (active: {active:?})")]
    NotActive {
        requested: String,
        active: Option<String>,
    },
}
