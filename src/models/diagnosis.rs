use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Severity scale reported by the analysis model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Healthy,
    Low,
    Moderate,
    Critical,
    Unknown,
}

/// Structured diagnosis returned by the Gemini vision call.
///
/// Field names match the JSON schema sent in `generationConfig`, so a
/// response that omits or renames a field fails deserialization and is
/// treated as a request-level failure, not retried against other keys.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Diagnosis {
    pub bee_detected: bool,
    pub condition_name: String,
    pub severity: Severity,
    pub description: String,
    pub recommended_treatment: Vec<String>,
    pub preventative_measures: Vec<String>,
}

/// Resolution state of a diagnosis record.
///
/// `Pending` is the only non-terminal state; a record transitions at most
/// once, to `Confirmed` or `Rejected`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackState {
    Pending,
    Confirmed,
    Rejected,
}

impl FeedbackState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, FeedbackState::Pending)
    }
}

/// A submitter's verdict on a delivered diagnosis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Confirm,
    Reject,
}

impl Verdict {
    pub fn resolved_state(&self) -> FeedbackState {
        match self {
            Verdict::Confirm => FeedbackState::Confirmed,
            Verdict::Reject => FeedbackState::Rejected,
        }
    }
}

/// Durable outcome of a successfully analyzed job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisRecord {
    /// Unique, monotonically increasing across the store.
    pub id: i64,
    /// Path of the raw image blob on local disk.
    pub image_path: String,
    pub diagnosis: Diagnosis,
    pub feedback: FeedbackState,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnosis_parses_gemini_payload() {
        let raw = r#"{
            "beeDetected": true,
            "conditionName": "Varroa destructor infestation",
            "severity": "MODERATE",
            "description": "Mites visible on adult bees.",
            "recommendedTreatment": ["Oxalic acid vaporization"],
            "preventativeMeasures": ["Monthly mite counts"]
        }"#;

        let d: Diagnosis = serde_json::from_str(raw).unwrap();
        assert!(d.bee_detected);
        assert_eq!(d.severity, Severity::Moderate);
        assert_eq!(d.recommended_treatment.len(), 1);
    }

    #[test]
    fn diagnosis_rejects_missing_fields() {
        let raw = r#"{"beeDetected": true, "severity": "LOW"}"#;
        assert!(serde_json::from_str::<Diagnosis>(raw).is_err());
    }

    #[test]
    fn severity_display_is_uppercase() {
        assert_eq!(Severity::Critical.to_string(), "CRITICAL");
    }
}
