//! Attachment metadata, limits, and the naming rules for stored files.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of a sanitized original file name.
pub const MAX_SANITIZED_NAME_CHARS: usize = 100;
/// Keeps `<questionId>_<timestamp>_<name>_<n>` under the usual 255-byte file-name limit.
pub const MAX_SANITIZED_NAME_BYTES: usize = 100;

/// Timestamp layout used in stored attachment and checkpoint names.
pub const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentCategory {
    Photo,
    Document,
    Minutes,
}

impl AttachmentCategory {
    pub const ALL: [AttachmentCategory; 3] = [
        AttachmentCategory::Photo,
        AttachmentCategory::Document,
        AttachmentCategory::Minutes,
    ];

    /// Folder under `Allegati/` holding this category.
    pub fn folder(&self) -> &'static str {
        match self {
            AttachmentCategory::Photo => "Foto",
            AttachmentCategory::Document => "Documenti",
            AttachmentCategory::Minutes => "Verbali",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttachmentCategory::Photo => "photo",
            AttachmentCategory::Document => "document",
            AttachmentCategory::Minutes => "minutes",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl fmt::Display for AttachmentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata entry for one uploaded file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub question_id: String,
    pub category: AttachmentCategory,
    pub original_name: String,
    pub stored_name: String,
    /// Path relative to the audit directory, always `/`-separated.
    pub relative_path: String,
    pub size: u64,
    #[serde(default)]
    pub mime_type: String,
    pub uploaded_at: DateTime<Utc>,
}

/// A file handed to the attachment store by the UI.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl IncomingFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Per-question caps. Overridable through configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachmentLimits {
    pub max_files_per_question: usize,
    pub max_file_bytes: u64,
    pub max_total_bytes_per_question: u64,
}

impl Default for AttachmentLimits {
    fn default() -> Self {
        Self {
            max_files_per_question: 10,
            max_file_bytes: 10 * 1024 * 1024,
            max_total_bytes_per_question: 50 * 1024 * 1024,
        }
    }
}

/// Usage of one question against the limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentStats {
    pub count: usize,
    pub total_size: u64,
    pub remaining: usize,
    pub remaining_size: u64,
}

impl AttachmentStats {
    pub fn compute<'a>(
        attachments: impl IntoIterator<Item = &'a Attachment>,
        limits: &AttachmentLimits,
    ) -> Self {
        let (count, total_size) = attachments
            .into_iter()
            .fold((0usize, 0u64), |(n, sum), a| (n + 1, sum + a.size));
        Self {
            count,
            total_size,
            remaining: limits.max_files_per_question.saturating_sub(count),
            remaining_size: limits.max_total_bytes_per_question.saturating_sub(total_size),
        }
    }
}

/// Why a single file of a batch was not stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFailure {
    pub file_name: String,
    pub reason: String,
}

/// Result of a batch upload that passed validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum UploadOutcome {
    Complete {
        uploaded: usize,
        attachments: Vec<Attachment>,
    },
    /// Some files were stored, some were not.
    Partial {
        uploaded: usize,
        failed: usize,
        attachments: Vec<Attachment>,
        errors: Vec<FileFailure>,
    },
}

impl UploadOutcome {
    pub fn uploaded(&self) -> usize {
        match self {
            UploadOutcome::Complete { uploaded, .. } | UploadOutcome::Partial { uploaded, .. } => {
                *uploaded
            }
        }
    }

    pub fn attachments(&self) -> &[Attachment] {
        match self {
            UploadOutcome::Complete { attachments, .. }
            | UploadOutcome::Partial { attachments, .. } => attachments,
        }
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, UploadOutcome::Partial { .. })
    }
}

/// Strip path separators and control characters, collapse whitespace, cap the length in both
/// characters and UTF-8 bytes. Truncation never splits a character.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            c if c.is_control() => ' ',
            c => c,
        })
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join("_");
    let trimmed = collapsed.trim_matches('.');
    let mut bytes = 0;
    let out: String = trimmed
        .chars()
        .take(MAX_SANITIZED_NAME_CHARS)
        .take_while(|c| {
            bytes += c.len_utf8();
            bytes <= MAX_SANITIZED_NAME_BYTES
        })
        .collect();
    if out.is_empty() {
        "file".to_string()
    } else {
        out
    }
}

pub fn file_timestamp(at: DateTime<Utc>) -> String {
    at.format(FILE_TIMESTAMP_FORMAT).to_string()
}

/// `[<questionId>_]<YYYYMMDDTHHMMSS>_<sanitized-original-name>`.
pub fn stored_file_name(question_id: &str, at: DateTime<Utc>, original_name: &str) -> String {
    let ts = file_timestamp(at);
    let name = sanitize_file_name(original_name);
    let qid = sanitize_file_name(question_id);
    if question_id.trim().is_empty() {
        format!("{}_{}", ts, name)
    } else {
        format!("{}_{}_{}", qid, ts, name)
    }
}

/// Insert `_<n>` before the extension: `a.pdf` -> `a_1.pdf`.
pub fn disambiguate_file_name(name: &str, n: usize) -> String {
    match name.rfind('.') {
        Some(dot) if dot > 0 => format!("{}_{}{}", &name[..dot], n, &name[dot..]),
        _ => format!("{}_{}", name, n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 7, 9, 5, 2).unwrap()
    }

    #[test]
    fn sanitize_strips_separators_and_controls() {
        assert_eq!(sanitize_file_name("../etc/passwd"), "_etc_passwd");
        assert_eq!(sanitize_file_name("a\u{7}b  c\td.pdf"), "a_b_c_d.pdf");
        assert_eq!(sanitize_file_name("C:\\docs\\x.txt"), "C:_docs_x.txt");
        assert_eq!(sanitize_file_name("   "), "file");
    }

    #[test]
    fn sanitize_truncates_to_limit() {
        let long = "x".repeat(250);
        assert_eq!(sanitize_file_name(&long).chars().count(), MAX_SANITIZED_NAME_CHARS);
    }

    #[test]
    fn multibyte_names_stay_within_file_name_limit() {
        let long = "è".repeat(90);
        let name = sanitize_file_name(&long);
        assert_eq!(name.len(), 100);
        assert_eq!(name.chars().count(), 50);

        // Three-byte characters cannot split at the byte cap.
        let cjk = "検".repeat(80);
        let name = sanitize_file_name(&cjk);
        assert_eq!(name.len(), 99);
        assert!(name.chars().all(|c| c == '検'));

        let stored = stored_file_name(&"質".repeat(60), at(), &"写".repeat(60));
        assert!(disambiguate_file_name(&stored, 99).len() <= 255);
    }

    #[test]
    fn stored_name_layout() {
        assert_eq!(
            stored_file_name("q-4.1-1", at(), "foto cantiere.jpg"),
            "q-4.1-1_20250307T090502_foto_cantiere.jpg"
        );
        assert_eq!(stored_file_name("", at(), "a.pdf"), "20250307T090502_a.pdf");
    }

    #[test]
    fn disambiguate_keeps_extension() {
        assert_eq!(disambiguate_file_name("a.pdf", 1), "a_1.pdf");
        assert_eq!(disambiguate_file_name("noext", 2), "noext_2");
    }

    #[test]
    fn stats_reports_remaining_capacity() {
        let limits = AttachmentLimits {
            max_files_per_question: 3,
            max_file_bytes: 100,
            max_total_bytes_per_question: 250,
        };
        let a = Attachment {
            question_id: "q".into(),
            category: AttachmentCategory::Photo,
            original_name: "a".into(),
            stored_name: "a".into(),
            relative_path: "Allegati/Foto/a".into(),
            size: 100,
            mime_type: String::new(),
            uploaded_at: at(),
        };
        let stats = AttachmentStats::compute([&a, &a], &limits);
        assert_eq!(stats.count, 2);
        assert_eq!(stats.total_size, 200);
        assert_eq!(stats.remaining, 1);
        assert_eq!(stats.remaining_size, 50);
    }
}
