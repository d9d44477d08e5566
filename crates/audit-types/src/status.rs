//! Canonical checklist status and the normalizer that every ingestion path goes through.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Answer given to a checklist question. Only these six values exist in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub enum QuestionStatus {
    Compliant,
    NonConformity,
    Observation,
    ImprovementOpportunity,
    NotApplicable,
    #[default]
    NotAnswered,
}

/// Tokens written by older schema versions and the canonical status they map to.
const LEGACY_TOKENS: &[(&str, QuestionStatus)] = &[
    ("compliant", QuestionStatus::Compliant),
    ("non_compliant", QuestionStatus::NonConformity),
    ("partial", QuestionStatus::Observation),
    ("not_applicable", QuestionStatus::NotApplicable),
];

impl QuestionStatus {
    pub const ALL: [QuestionStatus; 6] = [
        QuestionStatus::Compliant,
        QuestionStatus::NonConformity,
        QuestionStatus::Observation,
        QuestionStatus::ImprovementOpportunity,
        QuestionStatus::NotApplicable,
        QuestionStatus::NotAnswered,
    ];

    /// Canonical wire token.
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionStatus::Compliant => "C",
            QuestionStatus::NonConformity => "NC",
            QuestionStatus::Observation => "OSS",
            QuestionStatus::ImprovementOpportunity => "OM",
            QuestionStatus::NotApplicable => "NA",
            QuestionStatus::NotAnswered => "NOT_ANSWERED",
        }
    }

    /// Human-readable label used by report collaborators.
    pub fn label(&self) -> &'static str {
        match self {
            QuestionStatus::Compliant => "Conforme",
            QuestionStatus::NonConformity => "Non conformità",
            QuestionStatus::Observation => "Osservazione",
            QuestionStatus::ImprovementOpportunity => "Opportunità di miglioramento",
            QuestionStatus::NotApplicable => "Non applicabile",
            QuestionStatus::NotAnswered => "Non risposto",
        }
    }

    /// Everything except `NotAnswered` counts toward completion.
    pub fn is_answered(&self) -> bool {
        !matches!(self, QuestionStatus::NotAnswered)
    }

    /// Statuses that produce a finding in the report.
    pub fn is_finding(&self) -> bool {
        matches!(
            self,
            QuestionStatus::NonConformity
                | QuestionStatus::Observation
                | QuestionStatus::ImprovementOpportunity
        )
    }

    fn from_canonical(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == token)
    }
}

/// Map any incoming token to a canonical status.
///
/// Absent or empty input reads as `NotAnswered`; canonical tokens map to themselves; legacy
/// tokens go through the fixed table; anything else falls back to `NotAnswered`.
pub fn normalize(token: Option<&str>) -> QuestionStatus {
    let Some(raw) = token else {
        return QuestionStatus::NotAnswered;
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return QuestionStatus::NotAnswered;
    }
    if let Some(status) = QuestionStatus::from_canonical(trimmed) {
        return status;
    }
    let lowered = trimmed.to_ascii_lowercase();
    LEGACY_TOKENS
        .iter()
        .find(|(legacy, _)| *legacy == lowered)
        .map(|(_, status)| *status)
        .unwrap_or(QuestionStatus::NotAnswered)
}

impl fmt::Display for QuestionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for QuestionStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for QuestionStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: Option<serde_json::Value> = Option::deserialize(deserializer)?;
        Ok(match raw {
            Some(serde_json::Value::String(s)) => normalize(Some(&s)),
            _ => QuestionStatus::NotAnswered,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_and_empty_are_not_answered() {
        assert_eq!(normalize(None), QuestionStatus::NotAnswered);
        assert_eq!(normalize(Some("")), QuestionStatus::NotAnswered);
        assert_eq!(normalize(Some("   ")), QuestionStatus::NotAnswered);
    }

    #[test]
    fn legacy_tokens_map_to_canonical() {
        assert_eq!(normalize(Some("compliant")), QuestionStatus::Compliant);
        assert_eq!(normalize(Some("non_compliant")), QuestionStatus::NonConformity);
        assert_eq!(normalize(Some("partial")), QuestionStatus::Observation);
        assert_eq!(normalize(Some("not_applicable")), QuestionStatus::NotApplicable);
        assert_eq!(normalize(Some(" Partial ")), QuestionStatus::Observation);
    }

    #[test]
    fn unknown_tokens_fall_back_to_not_answered() {
        assert_eq!(normalize(Some("maybe")), QuestionStatus::NotAnswered);
        assert_eq!(normalize(Some("nc ")), QuestionStatus::NotAnswered);
    }

    #[test]
    fn normalize_is_idempotent_and_total() {
        let inputs = [
            None,
            Some(""),
            Some("C"),
            Some("NC"),
            Some("OSS"),
            Some("OM"),
            Some("NA"),
            Some("NOT_ANSWERED"),
            Some("compliant"),
            Some("non_compliant"),
            Some("partial"),
            Some("not_applicable"),
            Some("garbage"),
            Some("\u{0}"),
        ];
        for input in inputs {
            let once = normalize(input);
            let twice = normalize(Some(once.as_str()));
            assert_eq!(once, twice, "input {:?}", input);
            assert!(QuestionStatus::ALL.contains(&once));
        }
    }

    #[test]
    fn deserialize_normalizes_legacy_and_null() {
        let v: Vec<QuestionStatus> =
            serde_json::from_str(r#"["non_compliant", null, "OM", "", 3]"#).unwrap();
        assert_eq!(
            v,
            vec![
                QuestionStatus::NonConformity,
                QuestionStatus::NotAnswered,
                QuestionStatus::ImprovementOpportunity,
                QuestionStatus::NotAnswered,
                QuestionStatus::NotAnswered,
            ]
        );
        assert_eq!(serde_json::to_string(&QuestionStatus::Observation).unwrap(), "\"OSS\"");
    }
}
