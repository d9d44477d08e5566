//! Fixed directory layout of a workspace and the names derived from it.

use audit_types::AttachmentCategory;
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const REPORT_DIR: &str = "Report";
pub const ATTACHMENTS_DIR: &str = "Allegati";
pub const EXPORT_DIR: &str = "Export";

const MAX_DIR_NAME_CHARS: usize = 100;

/// Sub-directories of an audit directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Subtree {
    Report,
    Photos,
    Documents,
    Minutes,
    Export,
}

impl Subtree {
    pub const ALL: [Subtree; 5] = [
        Subtree::Report,
        Subtree::Photos,
        Subtree::Documents,
        Subtree::Minutes,
        Subtree::Export,
    ];

    pub fn for_category(category: AttachmentCategory) -> Self {
        match category {
            AttachmentCategory::Photo => Subtree::Photos,
            AttachmentCategory::Document => Subtree::Documents,
            AttachmentCategory::Minutes => Subtree::Minutes,
        }
    }

    /// Path relative to the audit directory.
    pub fn relative(&self) -> PathBuf {
        match self {
            Subtree::Report => PathBuf::from(REPORT_DIR),
            Subtree::Photos => Path::new(ATTACHMENTS_DIR).join(AttachmentCategory::Photo.folder()),
            Subtree::Documents => {
                Path::new(ATTACHMENTS_DIR).join(AttachmentCategory::Document.folder())
            }
            Subtree::Minutes => {
                Path::new(ATTACHMENTS_DIR).join(AttachmentCategory::Minutes.folder())
            }
            Subtree::Export => PathBuf::from(EXPORT_DIR),
        }
    }
}

/// `/`-separated location of an attachment inside the audit directory.
pub fn attachment_relative_path(category: AttachmentCategory, stored_name: &str) -> String {
    format!("{}/{}/{}", ATTACHMENTS_DIR, category.folder(), stored_name)
}

/// Resolve a stored relative path, refusing anything that could leave the audit directory.
pub fn resolve_relative(root: &Path, relative: &str) -> Option<PathBuf> {
    let rel = Path::new(relative);
    let safe = !relative.is_empty()
        && rel
            .components()
            .all(|c| matches!(c, std::path::Component::Normal(_)));
    safe.then(|| root.join(rel))
}

/// `<year>_Audit_<scheme>`.
pub fn audit_dir_name(year: i32, scheme: &str) -> String {
    format!("{:04}_Audit_{}", year, scheme)
}

/// Year part of an audit directory name, if `name` is one for `scheme`.
pub fn parse_audit_dir_year<'a>(name: &'a str, scheme: &str) -> Option<&'a str> {
    let suffix = format!("_Audit_{}", scheme);
    let year = name.strip_suffix(suffix.as_str())?;
    (year.len() == 4 && year.bytes().all(|b| b.is_ascii_digit())).then_some(year)
}

/// Make a client name usable as one directory component. Keeps spaces and punctuation that
/// file systems accept, replaces the rest.
pub fn sanitize_dir_component(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => ' ',
            c => c,
        })
        .collect();
    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_matches(|c: char| c == '.' || c == ' ');
    trimmed.chars().take(MAX_DIR_NAME_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_dir_names_round_trip_through_parser() {
        assert_eq!(audit_dir_name(2025, "ISO9001"), "2025_Audit_ISO9001");
        assert_eq!(parse_audit_dir_year("2025_Audit_ISO9001", "ISO9001"), Some("2025"));
        assert_eq!(parse_audit_dir_year("25_Audit_ISO9001", "ISO9001"), None);
        assert_eq!(parse_audit_dir_year("2025_Audit_ISO14001", "ISO9001"), None);
        assert_eq!(parse_audit_dir_year("abcd_Audit_ISO9001", "ISO9001"), None);
    }

    #[test]
    fn relative_paths_cannot_escape() {
        let root = Path::new("/ws");
        assert!(resolve_relative(root, "Allegati/Foto/a.jpg").is_some());
        assert!(resolve_relative(root, "../a.jpg").is_none());
        assert!(resolve_relative(root, "/etc/passwd").is_none());
        assert!(resolve_relative(root, "").is_none());
    }

    #[test]
    fn client_names_become_single_components() {
        assert_eq!(sanitize_dir_component("  Acme  S.p.A. "), "Acme S.p.A");
        assert_eq!(sanitize_dir_component("a/b\\c"), "a_b_c");
        assert_eq!(sanitize_dir_component(".."), "");
    }

    #[test]
    fn category_subtrees() {
        assert_eq!(
            Subtree::for_category(AttachmentCategory::Minutes).relative(),
            Path::new("Allegati").join("Verbali")
        );
        assert_eq!(
            attachment_relative_path(AttachmentCategory::Photo, "x.jpg"),
            "Allegati/Foto/x.jpg"
        );
    }
}
