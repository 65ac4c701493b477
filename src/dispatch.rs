//! Telegram update dispatch: the thin adapter between the transport and
//! the orchestration core. Photos become queued jobs, callback buttons
//! become feedback transitions.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::models::diagnosis::Verdict;
use crate::models::job::{AnalysisJob, ChatRef};
use crate::services::feedback::{self, ArchiveStatus, FeedbackOutcome};
use crate::services::telegram::{CallbackQuery, Message, PhotoSize, TelegramClient, Update};

const POLL_BACKOFF: Duration = Duration::from_secs(5);

const WELCOME: &str = "👨‍⚕️ *BeeSense — bee disease diagnosis*\n\n\
    Send a photo of your bees or brood comb and I will analyze it for \
    diseases and parasites: varroa, foulbrood, nosema, chalkbrood and more.\n\n\
    After each diagnosis, tell me whether it was accurate. Confirmed cases \
    are curated into a research dataset.";

const MSG_FEEDBACK_CONFIRMED: &str =
    "🙏 Thanks! Your confirmation helps improve diagnosis accuracy.";
const MSG_FEEDBACK_REJECTED: &str =
    "📝 Noted. This diagnosis was marked inaccurate and will be reviewed.";
const MSG_FEEDBACK_REPEAT: &str = "This diagnosis has already been reviewed — thanks!";
const MSG_FEEDBACK_UNKNOWN: &str =
    "⌛ This diagnosis is no longer on file; older records rotate out.";
const MSG_FEEDBACK_FAILED: &str = "❌ Couldn't record your feedback. Please try again.";

/// Long-poll for updates forever. Poll failures back off and retry; a
/// malformed update never stops the loop.
pub async fn run(state: AppState, telegram: Arc<TelegramClient>) {
    info!("update dispatch ready");
    let mut offset = 0i64;
    loop {
        match telegram.get_updates(offset).await {
            Ok(updates) => {
                for update in updates {
                    offset = offset.max(update.update_id + 1);
                    handle_update(&state, &telegram, &update).await;
                }
            }
            Err(e) => {
                warn!(error = %e, "getUpdates failed, backing off");
                sleep(POLL_BACKOFF).await;
            }
        }
    }
}

async fn handle_update(state: &AppState, telegram: &TelegramClient, update: &Update) {
    if let Some(message) = &update.message {
        handle_message(state, message).await;
    }
    if let Some(callback) = &update.callback_query {
        handle_callback(state, telegram, callback).await;
    }
}

async fn handle_message(state: &AppState, message: &Message) {
    let chat = ChatRef(message.chat.id);

    if let Some(text) = &message.text {
        if text.starts_with("/start") {
            if let Err(e) = state.notifier.notify_text(chat, WELCOME).await {
                warn!(chat = %chat, error = %e, "failed to send welcome");
            }
            return;
        }
    }

    let Some(photo) = message.photo.as_deref().and_then(largest_photo) else {
        return;
    };

    let job = AnalysisJob::new(chat, photo.file_id.clone());
    let job_id = job.job_id;
    let position = state.queue.enqueue(job);
    info!(job_id = %job_id, chat = %chat, position, "job enqueued");

    // Queue-position feedback is a courtesy, not a queue invariant.
    if let Err(e) = state.notifier.notify_queue_position(chat, position).await {
        warn!(chat = %chat, error = %e, "failed to send queue position");
    }
}

async fn handle_callback(state: &AppState, telegram: &TelegramClient, callback: &CallbackQuery) {
    if let Err(e) = telegram.answer_callback_query(&callback.id).await {
        warn!(error = %e, "failed to answer callback query");
    }

    let Some(chat) = callback.message.as_ref().map(|m| ChatRef(m.chat.id)) else {
        return;
    };
    let Some((record_id, verdict)) = callback.data.as_deref().and_then(parse_callback_data)
    else {
        warn!(chat = %chat, data = ?callback.data, "unrecognized callback data");
        return;
    };

    let ack = match feedback::apply_verdict(
        state.store.as_ref(),
        state.archive.as_ref(),
        record_id,
        verdict,
    )
    .await
    {
        Ok(FeedbackOutcome::Applied { archived, .. }) => {
            if archived == ArchiveStatus::Failed {
                state
                    .alert_operator(&format!(
                        "⚠️ Archive publish failed for confirmed record {record_id}. \
                         Not retried; see logs."
                    ))
                    .await;
            }
            match verdict {
                Verdict::Confirm => MSG_FEEDBACK_CONFIRMED,
                Verdict::Reject => MSG_FEEDBACK_REJECTED,
            }
        }
        Ok(FeedbackOutcome::AlreadyResolved(_)) => MSG_FEEDBACK_REPEAT,
        Ok(FeedbackOutcome::NotFound) => MSG_FEEDBACK_UNKNOWN,
        Err(e) => {
            warn!(record_id, error = %e, "feedback transition failed");
            MSG_FEEDBACK_FAILED
        }
    };

    if let Err(e) = state.notifier.notify_text(chat, ack).await {
        warn!(chat = %chat, error = %e, "failed to acknowledge feedback");
    }
}

/// Telegram sends several downscaled variants; archive quality wants the
/// largest one.
fn largest_photo(photos: &[PhotoSize]) -> Option<&PhotoSize> {
    photos.iter().max_by_key(|p| p.file_size.unwrap_or(0))
}

/// Parse `fb:{record_id}:{confirm|reject}` callback payloads.
fn parse_callback_data(data: &str) -> Option<(i64, Verdict)> {
    let mut parts = data.split(':');
    if parts.next() != Some("fb") {
        return None;
    }
    let id: i64 = parts.next()?.parse().ok()?;
    let verdict = match parts.next()? {
        "confirm" => Verdict::Confirm,
        "reject" => Verdict::Reject,
        _ => return None,
    };
    if parts.next().is_some() {
        return None;
    }
    Some((id, verdict))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_data_roundtrip() {
        assert_eq!(
            parse_callback_data("fb:1755912345678:confirm"),
            Some((1755912345678, Verdict::Confirm))
        );
        assert_eq!(
            parse_callback_data("fb:42:reject"),
            Some((42, Verdict::Reject))
        );
    }

    #[test]
    fn malformed_callback_data_is_ignored() {
        assert_eq!(parse_callback_data(""), None);
        assert_eq!(parse_callback_data("fb:42"), None);
        assert_eq!(parse_callback_data("fb:notanid:confirm"), None);
        assert_eq!(parse_callback_data("fb:42:maybe"), None);
        assert_eq!(parse_callback_data("fb:42:confirm:extra"), None);
        assert_eq!(parse_callback_data("pay:42:confirm"), None);
    }

    #[test]
    fn largest_photo_prefers_biggest_variant() {
        let photos = vec![
            PhotoSize {
                file_id: "s".into(),
                file_size: Some(1_200),
            },
            PhotoSize {
                file_id: "l".into(),
                file_size: Some(88_000),
            },
            PhotoSize {
                file_id: "m".into(),
                file_size: Some(9_000),
            },
        ];
        assert_eq!(largest_photo(&photos).unwrap().file_id, "l");
        assert!(largest_photo(&[]).is_none());
    }
}
