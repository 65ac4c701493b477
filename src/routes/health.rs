use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::services::queue::TaskQueue;
use crate::services::store::RecordStore;
use crate::services::telegram::TelegramClient;

/// State for the status/health listener, separate from the core state.
#[derive(Clone)]
pub struct HealthState {
    pub telegram: Arc<TelegramClient>,
    pub store: Arc<RecordStore>,
    pub queue: Arc<TaskQueue>,
    pub started_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub queue_depth: usize,
    pub records: usize,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub telegram: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
}

/// GET / — minimal keep-alive status page.
pub async fn status_page(State(state): State<HealthState>) -> Html<String> {
    Html(format!(
        "<h1>BeeSense Active</h1><p>Status: Online</p><p>Started: {} UTC</p>",
        state.started_at.format("%Y-%m-%d %H:%M:%S"),
    ))
}

/// GET /health — health check with dependency status.
pub async fn health_check(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let start = std::time::Instant::now();
    let telegram_check = match state.telegram.get_me().await {
        Ok(_) => ComponentHealth {
            status: "ok".to_string(),
            latency_ms: Some(start.elapsed().as_millis() as u64),
        },
        Err(_) => ComponentHealth {
            status: "error".to_string(),
            latency_ms: None,
        },
    };

    let healthy = telegram_check.status == "ok";
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if healthy { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        queue_depth: state.queue.depth(),
        records: state.store.len(),
        checks: HealthChecks {
            telegram: telegram_check,
        },
    };

    (status_code, Json(response))
}
