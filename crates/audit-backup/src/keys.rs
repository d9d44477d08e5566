//! Backup-store key namespace. Every key the audit store writes starts with `KEY_PREFIX`.

/// Bump when the persisted layout changes in a way older readers cannot follow.
pub const CURRENT_STORAGE_VERSION: u32 = 3;

pub const KEY_PREFIX: &str = "iso9001_";
/// Full record collection.
pub const AUDITS_KEY: &str = "iso9001_audits";
pub const ACTIVE_AUDIT_KEY: &str = "iso9001_active_audit_id";
pub const STORAGE_VERSION_KEY: &str = "iso9001_storage_version";

const AUDIT_KEY_PREFIX: &str = "iso9001_audit_";

/// Per-record key.
pub fn audit_key(id: &str) -> String {
    format!("{}{}", AUDIT_KEY_PREFIX, id)
}

/// Record id of a per-record key, if `key` is one.
pub fn audit_id_from_key(key: &str) -> Option<&str> {
    key.strip_prefix(AUDIT_KEY_PREFIX).filter(|id| !id.is_empty())
}

pub fn is_namespaced(key: &str) -> bool {
    key.starts_with(KEY_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_record_keys_do_not_collide_with_fixed_keys() {
        assert_eq!(audit_id_from_key(&audit_key("abc")), Some("abc"));
        assert_eq!(audit_id_from_key(AUDITS_KEY), None);
        assert_eq!(audit_id_from_key(ACTIVE_AUDIT_KEY), None);
        assert_eq!(audit_id_from_key(STORAGE_VERSION_KEY), None);
        assert!(is_namespaced(&audit_key("x")));
        assert!(!is_namespaced("theme"));
    }
}
