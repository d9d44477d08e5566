//! Schema checks run after every update. Violations are reported, never enforced.

use audit_types::AuditRecord;
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    /// Dotted location inside the record, e.g. `checklist.ISO9001.4.1[2].id`.
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

pub fn validate_record(record: &AuditRecord) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    if record.id.trim().is_empty() {
        issues.push(ValidationIssue::new("id", "record id is empty"));
    }
    if record.metadata.client_name.trim().is_empty() {
        issues.push(ValidationIssue::new(
            "metadata.clientName",
            "client name is required",
        ));
    }
    if record.metadata.last_modified < record.metadata.created_at {
        issues.push(ValidationIssue::new(
            "metadata.lastModified",
            "last modification precedes creation",
        ));
    }

    let mut seen = HashSet::new();
    for (standard, clauses) in &record.checklist {
        for (clause, questions) in clauses {
            for (i, q) in questions.iter().enumerate() {
                let path = format!("checklist.{}.{}[{}]", standard, clause, i);
                if q.id.trim().is_empty() {
                    issues.push(ValidationIssue::new(
                        format!("{}.id", path),
                        "question id is empty",
                    ));
                } else if !seen.insert(q.id.as_str()) {
                    issues.push(ValidationIssue::new(
                        format!("{}.id", path),
                        format!("duplicate question id '{}'", q.id),
                    ));
                }
            }
        }
    }

    for (i, a) in record.attachments.iter().enumerate() {
        if !seen.contains(a.question_id.as_str()) {
            issues.push(ValidationIssue::new(
                format!("attachments[{}].questionId", i),
                format!("attachment references unknown question '{}'", a.question_id),
            ));
        }
    }
    for (i, nc) in record.non_conformities.iter().enumerate() {
        if !seen.contains(nc.question_id.as_str()) {
            issues.push(ValidationIssue::new(
                format!("nonConformities[{}].questionId", i),
                format!(
                    "non-conformity references unknown question '{}'",
                    nc.question_id
                ),
            ));
        }
    }
    issues
}
