use async_trait::async_trait;
use std::sync::Arc;

use crate::models::diagnosis::DiagnosisRecord;
use crate::services::telegram::{TelegramClient, TransportError};

/// Long-term archive for confirmed diagnoses.
///
/// `publish` is called exactly once per confirmed record. Failures are an
/// operator concern only; the caller never retries and never unwinds the
/// record's feedback state.
#[async_trait]
pub trait ArchiveSink: Send + Sync {
    async fn publish(&self, image: &[u8], record: &DiagnosisRecord) -> Result<(), ArchiveError>;
}

/// Publishes confirmed diagnoses to the curated Telegram dataset channel.
pub struct DatasetArchive {
    telegram: Arc<TelegramClient>,
    channel_id: String,
}

impl DatasetArchive {
    pub fn new(telegram: Arc<TelegramClient>, channel_id: impl Into<String>) -> Self {
        Self {
            telegram,
            channel_id: channel_id.into(),
        }
    }
}

#[async_trait]
impl ArchiveSink for DatasetArchive {
    async fn publish(&self, image: &[u8], record: &DiagnosisRecord) -> Result<(), ArchiveError> {
        let d = &record.diagnosis;
        let caption = format!(
            "#{} | {} | severity {}\nconfirmed by submitter",
            record.id, d.condition_name, d.severity,
        );
        self.telegram
            .send_photo(&self.channel_id, image.to_vec(), &caption)
            .await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("archive publish failed: {0}")]
    Transport(#[from] TransportError),

    #[error("stored image unreadable: {0}")]
    Image(#[from] std::io::Error),
}
