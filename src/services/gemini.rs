use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

use crate::models::diagnosis::Diagnosis;
use crate::services::credentials::ApiKey;

const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";

const INSTRUCTION: &str = concat!(
    "Act as a Ph.D. bee pathologist. Analyze this photo of bees or brood comb ",
    "for diseases and parasites (varroa, foulbrood, nosema, chalkbrood, DWV). ",
    "Return ONLY JSON matching the response schema. Set beeDetected to false ",
    "if the image contains no bees or brood."
);

/// One external analysis call, parameterized by the credential selected
/// by the pool. Implementations must be side-effect free on failure so
/// the retry policy can safely re-issue the call with another key.
#[async_trait]
pub trait DiagnosisEngine: Send + Sync {
    async fn diagnose(&self, image: &[u8], key: &ApiKey) -> Result<Diagnosis, AnalysisError>;
}

/// Client for the Gemini generateContent vision API.
pub struct GeminiClient {
    http: Client,
    model: String,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

impl GeminiClient {
    pub fn new(model: impl Into<String>, timeout: Duration) -> Result<Self, AnalysisError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            model: model.into(),
        })
    }

    fn request_body(image: &[u8]) -> serde_json::Value {
        serde_json::json!({
            "contents": {
                "parts": [
                    {
                        "inlineData": {
                            "mimeType": "image/jpeg",
                            "data": base64::engine::general_purpose::STANDARD.encode(image)
                        }
                    },
                    { "text": INSTRUCTION }
                ]
            },
            "generationConfig": {
                "responseMimeType": "application/json",
                "temperature": 0.1,
                "responseSchema": {
                    "type": "OBJECT",
                    "properties": {
                        "beeDetected": { "type": "BOOLEAN" },
                        "conditionName": { "type": "STRING" },
                        "severity": {
                            "type": "STRING",
                            "enum": ["HEALTHY", "LOW", "MODERATE", "CRITICAL", "UNKNOWN"]
                        },
                        "description": { "type": "STRING" },
                        "recommendedTreatment": {
                            "type": "ARRAY", "items": { "type": "STRING" }
                        },
                        "preventativeMeasures": {
                            "type": "ARRAY", "items": { "type": "STRING" }
                        }
                    },
                    "required": [
                        "beeDetected", "conditionName", "severity", "description",
                        "recommendedTreatment", "preventativeMeasures"
                    ]
                }
            }
        })
    }
}

#[async_trait]
impl DiagnosisEngine for GeminiClient {
    async fn diagnose(&self, image: &[u8], key: &ApiKey) -> Result<Diagnosis, AnalysisError> {
        let url = format!("{}/{}:generateContent", GEMINI_ENDPOINT, self.model);

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", key.secret())
            .json(&Self::request_body(image))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Status { status, body });
        }

        let payload: GenerateContentResponse = response.json().await?;
        let text = payload
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.as_str())
            .ok_or(AnalysisError::Empty)?;

        serde_json::from_str(text).map_err(AnalysisError::Schema)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("analysis request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("analysis service returned HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("diagnosis payload violates response schema: {0}")]
    Schema(#[from] serde_json::Error),

    #[error("analysis service returned no candidates")]
    Empty,
}
