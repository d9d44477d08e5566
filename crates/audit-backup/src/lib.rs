//! Backup-store tier: an origin-scoped key space used as a crash-recovery cache.

pub mod keys;
mod file;
mod memory;

pub use audit_types::{BackupStore, BackupStoreError};
pub use file::JsonFileBackupStore;
pub use memory::InMemoryBackupStore;

/// Bytes a key/value pair occupies against the quota.
pub(crate) fn entry_size(key: &str, value: &str) -> usize {
    key.len() + value.len()
}

/// Fail with `QuotaExceeded` if replacing `key` with `value` would exceed `quota`.
pub(crate) fn check_quota<'a>(
    quota: Option<usize>,
    entries: impl Iterator<Item = (&'a String, &'a String)>,
    key: &str,
    value: &str,
) -> Result<(), BackupStoreError> {
    let Some(quota) = quota else {
        return Ok(());
    };
    let used: usize = entries
        .filter(|(k, _)| k.as_str() != key)
        .map(|(k, v)| entry_size(k, v))
        .sum();
    let needed = entry_size(key, value);
    let available = quota.saturating_sub(used);
    if needed > available {
        return Err(BackupStoreError::QuotaExceeded { needed, available });
    }
    Ok(())
}
