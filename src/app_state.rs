use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use crate::models::job::ChatRef;
use crate::services::{
    archive::ArchiveSink,
    credentials::CredentialPool,
    gemini::DiagnosisEngine,
    queue::TaskQueue,
    retry::RetryPolicy,
    store::RecordStore,
    telegram::{ImageSource, Notifier},
};

/// Shared application state owned by the drain loop and update dispatch.
///
/// Collaborators sit behind trait objects so tests can drive the real
/// queue and drain loop against scripted engines and transports.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<TaskQueue>,
    pub pool: Arc<CredentialPool>,
    pub retry: RetryPolicy,
    pub store: Arc<RecordStore>,
    pub engine: Arc<dyn DiagnosisEngine>,
    pub images: Arc<dyn ImageSource>,
    pub notifier: Arc<dyn Notifier>,
    pub archive: Arc<dyn ArchiveSink>,
    /// Directory for raw image blobs referenced by records.
    pub images_dir: PathBuf,
    /// Operator chat for actionable alerts (pool exhausted, archive down).
    pub admin_chat: Option<ChatRef>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<TaskQueue>,
        pool: CredentialPool,
        retry: RetryPolicy,
        store: Arc<RecordStore>,
        engine: Arc<dyn DiagnosisEngine>,
        images: Arc<dyn ImageSource>,
        notifier: Arc<dyn Notifier>,
        archive: Arc<dyn ArchiveSink>,
        images_dir: PathBuf,
        admin_chat: Option<ChatRef>,
    ) -> Self {
        Self {
            queue,
            pool: Arc::new(pool),
            retry,
            store,
            engine,
            images,
            notifier,
            archive,
            images_dir,
            admin_chat,
        }
    }

    /// Best-effort operator alert. Failures are logged, never propagated;
    /// alerts must not take down the loop that raised them.
    pub async fn alert_operator(&self, text: &str) {
        let Some(chat) = self.admin_chat else {
            return;
        };
        if let Err(e) = self.notifier.notify_text(chat, text).await {
            warn!(error = %e, "operator alert delivery failed");
        }
    }
}
