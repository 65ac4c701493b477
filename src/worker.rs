//! The drain loop: the single sequential worker that empties the task
//! queue one job at a time. Sole consumer of the queue, which is what
//! guarantees at most one in-flight analysis call.

use tracing::{error, info, warn};

use crate::app_state::AppState;
use crate::models::job::AnalysisJob;
use crate::models::diagnosis::{Diagnosis, DiagnosisRecord};
use crate::services::retry::DiagnosisError;
use crate::services::store::StoreError;
use crate::services::telegram::{render_diagnosis, TransportError};

const MSG_NO_BEE: &str =
    "🤔 No bees or brood detected in this photo. Try a closer shot of the frame or the bees.";
const MSG_BAD_IMAGE: &str = "❌ That file doesn't look like a photo I can analyze.";
const MSG_FAILED: &str = "❌ Analysis failed. Please try again in a few minutes.";

/// Run the drain loop forever. Each job is processed to completion before
/// the next is popped; per-job failures are contained in `process_job`
/// and never stop the loop.
pub async fn run(state: AppState) {
    info!("drain loop ready");
    loop {
        let Some(job) = state.queue.pop() else {
            state.queue.notified().await;
            continue;
        };
        process_job(&state, &job).await;
    }
}

enum JobOutcome {
    /// Record created and report delivered with a feedback prompt.
    Recorded(i64),
    /// Report delivered text-only because record persistence failed.
    Unrecorded,
    /// The model saw no bees; nothing to record.
    NoBeeDetected,
}

#[derive(Debug, thiserror::Error)]
enum JobFailure {
    #[error("image fetch failed: {0}")]
    Fetch(#[from] TransportError),

    #[error("unsupported image payload: {0}")]
    BadImage(#[from] image::ImageError),

    #[error(transparent)]
    Analysis(#[from] DiagnosisError),
}

/// Process one job end to end. Every failure is converted to a generic
/// submitter message plus a classified operator log line.
pub async fn process_job(state: &AppState, job: &AnalysisJob) {
    metrics::counter!("diagnosis_jobs_total").increment(1);
    let started = std::time::Instant::now();

    info!(
        job_id = %job.job_id,
        chat = %job.chat_ref,
        queue_depth = state.queue.depth(),
        "processing diagnosis job"
    );

    let outcome = diagnose(state, job).await;
    metrics::histogram!("diagnosis_processing_seconds").record(started.elapsed().as_secs_f64());

    let user_message = match outcome {
        Ok(JobOutcome::Recorded(record_id)) => {
            metrics::counter!("diagnosis_jobs_completed").increment(1);
            info!(job_id = %job.job_id, record_id, "diagnosis delivered");
            return; // report already sent with feedback buttons
        }
        Ok(JobOutcome::Unrecorded) => {
            metrics::counter!("diagnosis_jobs_completed").increment(1);
            return; // degraded report already sent
        }
        Ok(JobOutcome::NoBeeDetected) => {
            metrics::counter!("diagnosis_jobs_completed").increment(1);
            info!(job_id = %job.job_id, "no bee detected, nothing recorded");
            MSG_NO_BEE
        }
        Err(JobFailure::BadImage(e)) => {
            metrics::counter!("diagnosis_jobs_failed").increment(1);
            warn!(job_id = %job.job_id, error = %e, "rejected non-image payload");
            MSG_BAD_IMAGE
        }
        Err(JobFailure::Analysis(DiagnosisError::PoolExhausted { attempts })) => {
            metrics::counter!("diagnosis_jobs_failed").increment(1);
            error!(job_id = %job.job_id, attempts, "credential pool exhausted");
            state
                .alert_operator(&format!(
                    "⚠️ Gemini credential pool exhausted after {attempts} attempts. \
                     All keys are rate-limited or revoked."
                ))
                .await;
            MSG_FAILED
        }
        Err(failure) => {
            metrics::counter!("diagnosis_jobs_failed").increment(1);
            error!(job_id = %job.job_id, error = %failure, "diagnosis job failed");
            MSG_FAILED
        }
    };

    if let Err(e) = state.notifier.notify_text(job.chat_ref, user_message).await {
        warn!(job_id = %job.job_id, error = %e, "failed to notify submitter");
    }
}

async fn diagnose(state: &AppState, job: &AnalysisJob) -> Result<JobOutcome, JobFailure> {
    let image = state.images.fetch(&job.image_ref).await?;
    image::guess_format(&image)?;

    let diagnosis = state
        .retry
        .diagnose_with_failover(state.engine.as_ref(), &state.pool, &image)
        .await?;

    if !diagnosis.bee_detected {
        return Ok(JobOutcome::NoBeeDetected);
    }

    match persist(state, job, &image, diagnosis.clone()).await {
        Ok(record) => {
            if let Err(e) = state.notifier.notify_diagnosis(job.chat_ref, &record).await {
                warn!(job_id = %job.job_id, error = %e, "failed to deliver diagnosis report");
            }
            Ok(JobOutcome::Recorded(record.id))
        }
        Err(e) => {
            // Best-effort store: deliver the result without a feedback
            // prompt rather than dropping the job.
            error!(job_id = %job.job_id, error = %e, "record persistence failed, delivering unrecorded");
            let text = render_diagnosis(&diagnosis);
            if let Err(e) = state.notifier.notify_text(job.chat_ref, &text).await {
                warn!(job_id = %job.job_id, error = %e, "failed to deliver diagnosis report");
            }
            Ok(JobOutcome::Unrecorded)
        }
    }
}

/// Write the image blob to disk and create the pending record.
async fn persist(
    state: &AppState,
    job: &AnalysisJob,
    image: &[u8],
    diagnosis: Diagnosis,
) -> Result<DiagnosisRecord, StoreError> {
    let path = state.images_dir.join(format!("{}.jpg", job.job_id));
    tokio::fs::write(&path, image).await?;
    state.store.create(path.to_string_lossy(), diagnosis)
}
