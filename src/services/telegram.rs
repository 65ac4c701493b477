use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use crate::models::diagnosis::{Diagnosis, DiagnosisRecord};
use crate::models::job::ChatRef;

const API_BASE: &str = "https://api.telegram.org";
const LONG_POLL_SECS: u64 = 30;

/// Fetches raw image bytes for a transport-level image reference.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn fetch(&self, image_ref: &str) -> Result<Vec<u8>, TransportError>;
}

/// Delivers core notifications back to a submitter's chat.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_text(&self, chat: ChatRef, text: &str) -> Result<(), TransportError>;
    async fn notify_queue_position(
        &self,
        chat: ChatRef,
        position: usize,
    ) -> Result<(), TransportError>;
    async fn notify_diagnosis(
        &self,
        chat: ChatRef,
        record: &DiagnosisRecord,
    ) -> Result<(), TransportError>;
}

/// Thin client for the Telegram Bot API (long polling).
pub struct TelegramClient {
    http: Client,
    token: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    pub text: Option<String>,
    pub photo: Option<Vec<PhotoSize>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    pub file_size: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub message: Option<Message>,
    pub data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramFile {
    file_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BotUser {
    pub username: Option<String>,
}

impl TelegramClient {
    pub fn new(token: impl Into<String>) -> Result<Self, TransportError> {
        // Client timeout must outlast the getUpdates long poll.
        let http = Client::builder()
            .timeout(Duration::from_secs(LONG_POLL_SECS + 30))
            .build()
            .map_err(TransportError::Http)?;
        Ok(Self {
            http,
            token: token.into(),
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", API_BASE, self.token, method)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        payload: &serde_json::Value,
    ) -> Result<T, TransportError> {
        let response: ApiResponse<T> = self
            .http
            .post(self.url(method))
            .json(payload)
            .send()
            .await?
            .json()
            .await?;

        match (response.ok, response.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(TransportError::Api {
                method: method.to_string(),
                description: response
                    .description
                    .unwrap_or_else(|| "no description".to_string()),
            }),
        }
    }

    /// Long-poll for new updates after `offset`.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, TransportError> {
        self.call(
            "getUpdates",
            &serde_json::json!({
                "offset": offset,
                "timeout": LONG_POLL_SECS,
                "allowed_updates": ["message", "callback_query"],
            }),
        )
        .await
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_markup: Option<serde_json::Value>,
    ) -> Result<(), TransportError> {
        let mut payload = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown",
        });
        if let Some(markup) = reply_markup {
            payload["reply_markup"] = markup;
        }
        self.call::<Message>("sendMessage", &payload).await?;
        Ok(())
    }

    pub async fn answer_callback_query(&self, callback_id: &str) -> Result<(), TransportError> {
        self.call::<bool>(
            "answerCallbackQuery",
            &serde_json::json!({ "callback_query_id": callback_id }),
        )
        .await?;
        Ok(())
    }

    /// Upload a photo with caption to a chat or channel (multipart).
    pub async fn send_photo(
        &self,
        chat_id: &str,
        image: Vec<u8>,
        caption: &str,
    ) -> Result<(), TransportError> {
        let part = reqwest::multipart::Part::bytes(image)
            .file_name("diagnosis.jpg")
            .mime_str("image/jpeg")
            .map_err(TransportError::Http)?;
        let form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .part("photo", part);

        let response: ApiResponse<Message> = self
            .http
            .post(self.url("sendPhoto"))
            .multipart(form)
            .send()
            .await?
            .json()
            .await?;

        if response.ok {
            Ok(())
        } else {
            Err(TransportError::Api {
                method: "sendPhoto".to_string(),
                description: response
                    .description
                    .unwrap_or_else(|| "no description".to_string()),
            })
        }
    }

    /// Bot identity, used by the health check.
    pub async fn get_me(&self) -> Result<String, TransportError> {
        let user: BotUser = self.call("getMe", &serde_json::json!({})).await?;
        Ok(user.username.unwrap_or_default())
    }
}

#[async_trait]
impl ImageSource for TelegramClient {
    async fn fetch(&self, image_ref: &str) -> Result<Vec<u8>, TransportError> {
        let file: TelegramFile = self
            .call("getFile", &serde_json::json!({ "file_id": image_ref }))
            .await?;
        let file_path = file.file_path.ok_or_else(|| TransportError::Api {
            method: "getFile".to_string(),
            description: "file has no path".to_string(),
        })?;

        let url = format!("{}/file/bot{}/{}", API_BASE, self.token, file_path);
        let bytes = self.http.get(url).send().await?.bytes().await?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl Notifier for TelegramClient {
    async fn notify_text(&self, chat: ChatRef, text: &str) -> Result<(), TransportError> {
        self.send_message(chat.0, text, None).await
    }

    async fn notify_queue_position(
        &self,
        chat: ChatRef,
        position: usize,
    ) -> Result<(), TransportError> {
        let text = if position <= 1 {
            "🔍 Analyzing your photo...".to_string()
        } else {
            format!("🕐 Photo queued at position {position}. It will be analyzed shortly.")
        };
        self.send_message(chat.0, &text, None).await
    }

    async fn notify_diagnosis(
        &self,
        chat: ChatRef,
        record: &DiagnosisRecord,
    ) -> Result<(), TransportError> {
        let keyboard = serde_json::json!({
            "inline_keyboard": [[
                { "text": "✅ Accurate", "callback_data": format!("fb:{}:confirm", record.id) },
                { "text": "❌ Inaccurate", "callback_data": format!("fb:{}:reject", record.id) },
            ]]
        });
        let text = format!(
            "{}\n\nWas this diagnosis accurate?",
            render_diagnosis(&record.diagnosis)
        );
        self.send_message(chat.0, &text, Some(keyboard)).await
    }
}

/// Render the diagnosis report as a Markdown chat message.
pub fn render_diagnosis(d: &Diagnosis) -> String {
    let bullets = |items: &[String]| {
        items
            .iter()
            .map(|item| format!("• {item}"))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "🔬 *Diagnosis report*\n\
         🦠 *Condition:* {}\n\
         ⚠️ *Severity:* {}\n\n\
         📝 {}\n\n\
         💊 *Recommended treatment:*\n{}\n\n\
         🛡 *Prevention:*\n{}",
        d.condition_name,
        d.severity,
        d.description,
        bullets(&d.recommended_treatment),
        bullets(&d.preventative_measures),
    )
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("telegram request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("telegram API error in {method}: {description}")]
    Api { method: String, description: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::diagnosis::Severity;

    #[test]
    fn rendered_report_lists_treatment_and_prevention() {
        let diagnosis = Diagnosis {
            bee_detected: true,
            condition_name: "European foulbrood".into(),
            severity: Severity::Critical,
            description: "Twisted larvae with sour smell.".into(),
            recommended_treatment: vec!["Requeen the colony".into(), "Shook swarm".into()],
            preventative_measures: vec!["Replace old comb".into()],
        };

        let text = render_diagnosis(&diagnosis);
        assert!(text.contains("European foulbrood"));
        assert!(text.contains("CRITICAL"));
        assert!(text.contains("• Requeen the colony"));
        assert!(text.contains("• Replace old comb"));
    }

    #[test]
    fn update_envelope_parses() {
        let raw = r#"{
            "ok": true,
            "result": [{
                "update_id": 7,
                "message": {
                    "message_id": 1,
                    "chat": { "id": 99 },
                    "photo": [
                        { "file_id": "small", "file_size": 100 },
                        { "file_id": "large", "file_size": 9000 }
                    ]
                }
            }]
        }"#;

        let parsed: ApiResponse<Vec<Update>> = serde_json::from_str(raw).unwrap();
        assert!(parsed.ok);
        let updates = parsed.result.unwrap();
        assert_eq!(updates[0].update_id, 7);
        let photos = updates[0].message.as_ref().unwrap().photo.as_ref().unwrap();
        assert_eq!(photos.len(), 2);
    }
}
