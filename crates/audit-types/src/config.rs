//! Runtime configuration, read from the environment with defaults for everything.

use crate::{AttachmentLimits, HostCapabilities};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Certification scheme used in the audit directory name (`<year>_Audit_<scheme>`).
pub const DEFAULT_SCHEME: &str = "ISO9001";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub listen: String,
    /// Holds the backup file and the local database.
    pub data_dir: PathBuf,
    pub scheme: String,
    pub limits: AttachmentLimits,
    pub autosave_quiet_ms: u64,
    pub saved_linger_ms: u64,
    /// `None` means unlimited.
    pub backup_quota_bytes: Option<usize>,
    /// Overrides capability detection when set.
    pub directory_handles: Option<bool>,
    pub touch_device: Option<bool>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8002".to_string(),
            data_dir: PathBuf::from(".audit-data"),
            scheme: DEFAULT_SCHEME.to_string(),
            limits: AttachmentLimits::default(),
            autosave_quiet_ms: 2000,
            saved_linger_ms: 2000,
            backup_quota_bytes: Some(5 * 1024 * 1024),
            directory_handles: None,
            touch_device: None,
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl StorageConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let limits = AttachmentLimits {
            max_files_per_question: env_parse("AUDIT_MAX_FILES_PER_QUESTION")
                .unwrap_or(d.limits.max_files_per_question),
            max_file_bytes: env_parse("AUDIT_MAX_FILE_BYTES").unwrap_or(d.limits.max_file_bytes),
            max_total_bytes_per_question: env_parse("AUDIT_MAX_TOTAL_BYTES")
                .unwrap_or(d.limits.max_total_bytes_per_question),
        };
        Self {
            listen: std::env::var("AUDIT_LISTEN").unwrap_or(d.listen),
            data_dir: std::env::var("AUDIT_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(d.data_dir),
            scheme: std::env::var("AUDIT_SCHEME").unwrap_or(d.scheme),
            limits,
            autosave_quiet_ms: env_parse("AUDIT_AUTOSAVE_QUIET_MS").unwrap_or(d.autosave_quiet_ms),
            saved_linger_ms: env_parse("AUDIT_SAVED_LINGER_MS").unwrap_or(d.saved_linger_ms),
            backup_quota_bytes: match env_parse::<usize>("AUDIT_BACKUP_QUOTA_BYTES") {
                Some(0) => None,
                Some(n) => Some(n),
                None => d.backup_quota_bytes,
            },
            directory_handles: env_parse("AUDIT_DIRECTORY_HANDLES"),
            touch_device: env_parse("AUDIT_TOUCH_DEVICE"),
        }
    }

    /// Apply configured overrides on top of what the host reports.
    pub fn capabilities(&self, detected: HostCapabilities) -> HostCapabilities {
        HostCapabilities {
            directory_handles: self.directory_handles.unwrap_or(detected.directory_handles),
            touch_form_factor: self.touch_device.unwrap_or(detected.touch_form_factor),
        }
    }

    pub fn backup_path(&self) -> PathBuf {
        self.data_dir.join("backup.json")
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("audits.sqlite3")
    }
}
