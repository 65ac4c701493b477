use chrono::Utc;
use tracing::{error, info};

use crate::models::diagnosis::{DiagnosisRecord, FeedbackState, Verdict};
use crate::services::archive::{ArchiveError, ArchiveSink};
use crate::services::store::{RecordStore, StoreError};

/// Result of applying a submitter verdict to a record.
#[derive(Debug)]
pub enum FeedbackOutcome {
    /// The record transitioned out of `pending`.
    Applied {
        record: DiagnosisRecord,
        archived: ArchiveStatus,
    },
    /// The record was already terminal; nothing was mutated. The sender
    /// still deserves an acknowledgement.
    AlreadyResolved(FeedbackState),
    /// Unknown id (never existed, or already evicted).
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveStatus {
    /// Rejected records are finalized only; nothing is published.
    NotRequested,
    Published,
    /// Publish failed. Logged for the operator; the record stays
    /// confirmed and the publish is not retried.
    Failed,
}

/// Transition a record from `pending` to its terminal state and, on
/// confirmation, publish the image plus diagnosis to the archive exactly
/// once. A repeated verdict on a terminal record is a no-op.
pub async fn apply_verdict(
    store: &RecordStore,
    archive: &dyn ArchiveSink,
    id: i64,
    verdict: Verdict,
) -> Result<FeedbackOutcome, StoreError> {
    let Some(current) = store.get(id) else {
        return Ok(FeedbackOutcome::NotFound);
    };
    if current.feedback.is_terminal() {
        return Ok(FeedbackOutcome::AlreadyResolved(current.feedback));
    }

    let new_state = verdict.resolved_state();
    let updated = store.update(id, |record| {
        record.feedback = new_state;
        record.resolved_at = Some(Utc::now());
        record.clone()
    })?;
    let Some(record) = updated else {
        // Evicted between lookup and update.
        return Ok(FeedbackOutcome::NotFound);
    };

    let archived = match new_state {
        FeedbackState::Confirmed => publish_confirmed(archive, &record).await,
        _ => ArchiveStatus::NotRequested,
    };

    info!(record_id = id, state = ?new_state, "feedback applied");
    Ok(FeedbackOutcome::Applied { record, archived })
}

async fn publish_confirmed(archive: &dyn ArchiveSink, record: &DiagnosisRecord) -> ArchiveStatus {
    let result = async {
        let image = tokio::fs::read(&record.image_path)
            .await
            .map_err(ArchiveError::Image)?;
        archive.publish(&image, record).await
    }
    .await;

    match result {
        Ok(()) => {
            info!(record_id = record.id, "confirmed diagnosis published to dataset archive");
            ArchiveStatus::Published
        }
        Err(e) => {
            error!(
                record_id = record.id,
                error = %e,
                "archive publish failed; feedback state unchanged, not retried"
            );
            ArchiveStatus::Failed
        }
    }
}
