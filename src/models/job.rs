use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque reference to a submitter's chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatRef(pub i64);

impl std::fmt::Display for ChatRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// One unit of work: a submitted photo waiting for diagnosis.
///
/// Owned by the task queue until dequeued, then by the drain loop until
/// a record is created or the job is abandoned. Never persisted; jobs
/// lost on restart are an accepted degradation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub job_id: Uuid,
    pub chat_ref: ChatRef,
    /// Transport-level image handle (Telegram `file_id`)
    pub image_ref: String,
    pub submitted_at: DateTime<Utc>,
}

impl AnalysisJob {
    pub fn new(chat_ref: ChatRef, image_ref: impl Into<String>) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            chat_ref,
            image_ref: image_ref.into(),
            submitted_at: Utc::now(),
        }
    }
}
