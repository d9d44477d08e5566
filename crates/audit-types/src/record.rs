//! Audit record model. JSON field names are camelCase so checkpoints and backups stay readable
//! by the UI collaborators.

use crate::{Attachment, QuestionStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Maximum length (in characters) of a question's free-text notes.
pub const MAX_NOTES_CHARS: usize = 5000;

/// standard -> clause -> ordered questions.
pub type Checklist = BTreeMap<String, BTreeMap<String, Vec<Question>>>;

/// Evidence attached to a single question.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionEvidence {
    #[serde(default)]
    pub document_ref: String,
    #[serde(default)]
    pub observations: Vec<String>,
}

/// One checklist question.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    #[serde(default)]
    pub clause: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub status: QuestionStatus,
    #[serde(default)]
    pub evidence: QuestionEvidence,
}

impl Question {
    pub fn new(id: impl Into<String>, clause: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            clause: clause.into(),
            text: text.into(),
            ..Default::default()
        }
    }

    /// Truncate notes to `MAX_NOTES_CHARS`. Returns true when something was cut.
    pub fn cap_notes(&mut self) -> bool {
        if self.notes.chars().count() <= MAX_NOTES_CHARS {
            return false;
        }
        self.notes = self.notes.chars().take(MAX_NOTES_CHARS).collect();
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditLifecycle {
    #[default]
    InProgress,
    Completed,
    Archived,
}

/// Client metadata of an audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditMetadata {
    pub client_name: String,
    #[serde(default)]
    pub audit_number: String,
    #[serde(default)]
    pub audit_date: Option<String>,
    #[serde(default)]
    pub status: AuditLifecycle,
    #[serde(default)]
    pub standards: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

/// Input for creating a new audit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAudit {
    pub client_name: String,
    #[serde(default)]
    pub audit_number: String,
    #[serde(default)]
    pub audit_date: Option<String>,
    #[serde(default)]
    pub standards: Vec<String>,
    #[serde(default)]
    pub checklist: Checklist,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Major,
    #[default]
    Minor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NonConformity {
    pub id: String,
    pub question_id: String,
    #[serde(default)]
    pub clause: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub severity: Severity,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingIssue {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub resolved: bool,
}

/// Cached counters derived from the checklist. Never authoritative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuditMetrics {
    pub completion_percentage: u8,
    pub total_questions: usize,
    pub answered: usize,
    pub compliant: usize,
    pub non_conformities: usize,
    pub observations: usize,
    pub improvement_opportunities: usize,
    pub not_applicable: usize,
    pub not_answered: usize,
}

impl AuditMetrics {
    /// Recompute every counter from the checklist.
    pub fn from_checklist(checklist: &Checklist) -> Self {
        let mut m = AuditMetrics::default();
        for question in checklist.values().flat_map(|c| c.values()).flatten() {
            m.total_questions += 1;
            match question.status {
                QuestionStatus::Compliant => m.compliant += 1,
                QuestionStatus::NonConformity => m.non_conformities += 1,
                QuestionStatus::Observation => m.observations += 1,
                QuestionStatus::ImprovementOpportunity => m.improvement_opportunities += 1,
                QuestionStatus::NotApplicable => m.not_applicable += 1,
                QuestionStatus::NotAnswered => m.not_answered += 1,
            }
        }
        m.answered = m.total_questions - m.not_answered;
        m.completion_percentage = completion_percentage(m.answered, m.total_questions);
        m
    }
}

/// `round(100 * answered / total)`, 0 for an empty checklist.
pub fn completion_percentage(answered: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (100.0 * answered as f64 / total as f64).round();
    pct.clamp(0.0, 100.0) as u8
}

/// Full audit record: the unit that is autosaved, checkpointed, and exported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub id: String,
    pub metadata: AuditMetadata,
    #[serde(default)]
    pub checklist: Checklist,
    #[serde(default)]
    pub non_conformities: Vec<NonConformity>,
    #[serde(default)]
    pub evidence: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub pending_issues: Vec<PendingIssue>,
    #[serde(default)]
    pub report_chapters: BTreeMap<String, String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub metrics: AuditMetrics,
}

impl AuditRecord {
    /// Build a fresh record with a new id and empty collections.
    pub fn new(input: NewAudit) -> Self {
        let now = Utc::now();
        let mut record = Self {
            id: uuid::Uuid::new_v4().to_string(),
            metadata: AuditMetadata {
                client_name: input.client_name,
                audit_number: input.audit_number,
                audit_date: input.audit_date,
                status: AuditLifecycle::InProgress,
                standards: input.standards,
                created_at: now,
                last_modified: now,
            },
            checklist: input.checklist,
            non_conformities: Vec::new(),
            evidence: BTreeMap::new(),
            pending_issues: Vec::new(),
            report_chapters: BTreeMap::new(),
            attachments: Vec::new(),
            metrics: AuditMetrics::default(),
        };
        record.refresh_metrics();
        record
    }

    pub fn refresh_metrics(&mut self) {
        self.metrics = AuditMetrics::from_checklist(&self.checklist);
    }

    pub fn questions(&self) -> impl Iterator<Item = &Question> {
        self.checklist.values().flat_map(|c| c.values()).flatten()
    }

    pub fn questions_mut(&mut self) -> impl Iterator<Item = &mut Question> {
        self.checklist
            .values_mut()
            .flat_map(|c| c.values_mut())
            .flatten()
    }

    pub fn question(&self, question_id: &str) -> Option<&Question> {
        self.questions().find(|q| q.id == question_id)
    }

    pub fn question_mut(&mut self, question_id: &str) -> Option<&mut Question> {
        self.questions_mut().find(|q| q.id == question_id)
    }

    /// Attachments belonging to one question, in upload order.
    pub fn attachments_for<'a>(
        &'a self,
        question_id: &'a str,
    ) -> impl Iterator<Item = &'a Attachment> + 'a {
        self.attachments
            .iter()
            .filter(move |a| a.question_id == question_id)
    }

    pub fn summary(&self) -> AuditSummary {
        AuditSummary {
            id: self.id.clone(),
            client_name: self.metadata.client_name.clone(),
            audit_number: self.metadata.audit_number.clone(),
            audit_date: self.metadata.audit_date.clone(),
            status: self.metadata.status,
            completion_percentage: self.metrics.completion_percentage,
            last_modified: self.metadata.last_modified,
        }
    }
}

/// Lightweight listing entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditSummary {
    pub id: String,
    pub client_name: String,
    pub audit_number: String,
    pub audit_date: Option<String>,
    pub status: AuditLifecycle,
    pub completion_percentage: u8,
    pub last_modified: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checklist(statuses: &[QuestionStatus]) -> Checklist {
        let questions = statuses
            .iter()
            .enumerate()
            .map(|(i, s)| Question {
                status: *s,
                ..Question::new(format!("q{}", i), "4.1", "text")
            })
            .collect();
        let mut clauses = BTreeMap::new();
        clauses.insert("4.1".to_string(), questions);
        let mut c = Checklist::new();
        c.insert("ISO9001".to_string(), clauses);
        c
    }

    #[test]
    fn metrics_count_every_status() {
        let m = AuditMetrics::from_checklist(&checklist(&[
            QuestionStatus::Compliant,
            QuestionStatus::NonConformity,
            QuestionStatus::NotAnswered,
        ]));
        assert_eq!(m.total_questions, 3);
        assert_eq!(m.answered, 2);
        assert_eq!(m.compliant, 1);
        assert_eq!(m.non_conformities, 1);
        assert_eq!(m.completion_percentage, 67);
    }

    #[test]
    fn not_applicable_counts_as_answered() {
        let m = AuditMetrics::from_checklist(&checklist(&[
            QuestionStatus::NotApplicable,
            QuestionStatus::NotAnswered,
        ]));
        assert_eq!(m.completion_percentage, 50);
    }

    #[test]
    fn half_percent_rounds_up() {
        assert_eq!(completion_percentage(1, 8), 13);
        assert_eq!(completion_percentage(3, 8), 38);
        assert_eq!(completion_percentage(1, 3), 33);
        assert_eq!(completion_percentage(2, 3), 67);
        assert_eq!(completion_percentage(8, 8), 100);
    }

    #[test]
    fn empty_checklist_is_zero_percent() {
        assert_eq!(completion_percentage(0, 0), 0);
        assert_eq!(AuditMetrics::from_checklist(&Checklist::new()).completion_percentage, 0);
    }

    #[test]
    fn legacy_record_json_is_normalized_on_load() {
        let json = r#"{
            "id": "a1",
            "metadata": {
                "clientName": "Acme",
                "createdAt": "2025-01-01T00:00:00Z",
                "lastModified": "2025-01-01T00:00:00Z"
            },
            "checklist": {"ISO9001": {"4.1": [
                {"id": "q1", "status": "compliant"},
                {"id": "q2", "status": "partial"},
                {"id": "q3"}
            ]}}
        }"#;
        let record: AuditRecord = serde_json::from_str(json).unwrap();
        let statuses: Vec<_> = record.questions().map(|q| q.status).collect();
        assert_eq!(
            statuses,
            vec![
                QuestionStatus::Compliant,
                QuestionStatus::Observation,
                QuestionStatus::NotAnswered
            ]
        );
    }

    #[test]
    fn cap_notes_truncates_on_char_boundary() {
        let mut q = Question::new("q", "4.1", "t");
        q.notes = "è".repeat(MAX_NOTES_CHARS + 3);
        assert!(q.cap_notes());
        assert_eq!(q.notes.chars().count(), MAX_NOTES_CHARS);
        assert!(!q.cap_notes());
    }
}
