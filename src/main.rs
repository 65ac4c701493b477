mod app_state;
mod config;
mod dispatch;
mod models;
mod routes;
mod services;
mod worker;

use axum::{routing::get, Router};
use chrono::Utc;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use app_state::AppState;
use config::AppConfig;
use models::job::ChatRef;
use routes::health::HealthState;
use services::{
    archive::DatasetArchive,
    credentials::CredentialPool,
    gemini::GeminiClient,
    queue::TaskQueue,
    retry::RetryPolicy,
    store::RecordStore,
    telegram::{ImageSource, Notifier, TelegramClient},
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing beesense");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_histogram!(
        "diagnosis_processing_seconds",
        "Time to process one diagnosis job"
    );
    metrics::describe_counter!("diagnosis_jobs_total", "Total diagnosis jobs submitted");
    metrics::describe_counter!(
        "diagnosis_jobs_completed",
        "Total diagnosis jobs completed"
    );
    metrics::describe_counter!("diagnosis_jobs_failed", "Total diagnosis jobs that failed");
    metrics::describe_gauge!(
        "diagnosis_queue_depth",
        "Current number of pending jobs in the queue"
    );
    metrics::describe_counter!(
        "credential_rotations_total",
        "Total analysis credential rotations"
    );

    // Credential pool: refusing to start on an empty pool beats entering
    // the retry loop with nothing to rotate to.
    let pool = CredentialPool::new(config.gemini_api_keys.clone())
        .expect("No usable Gemini API keys configured");
    let retry = RetryPolicy::for_pool(&pool);
    tracing::info!(
        keys = pool.len(),
        max_attempts = retry.max_attempts(),
        "Credential pool ready"
    );

    // Record store and image blob directory
    let store = Arc::new(
        RecordStore::open(config.data_dir.join("records.json"), config.max_records)
            .expect("Failed to open record store"),
    );
    let images_dir = config.data_dir.join("images");
    std::fs::create_dir_all(&images_dir).expect("Failed to create image directory");
    tracing::info!(records = store.len(), "Record store loaded");

    // Telegram transport (notifier, image source, archive channel)
    let telegram = Arc::new(
        TelegramClient::new(config.telegram_token.clone())
            .expect("Failed to initialize Telegram client"),
    );

    // Gemini analysis client
    let engine = GeminiClient::new(
        config.gemini_model.clone(),
        Duration::from_secs(config.analysis_timeout_secs),
    )
    .expect("Failed to initialize Gemini client");

    let archive = DatasetArchive::new(telegram.clone(), config.dataset_channel_id.clone());

    let queue = Arc::new(TaskQueue::new());

    let state = AppState::new(
        queue.clone(),
        pool,
        retry,
        store.clone(),
        Arc::new(engine),
        telegram.clone() as Arc<dyn ImageSource>,
        telegram.clone() as Arc<dyn Notifier>,
        Arc::new(archive),
        images_dir,
        config.admin_chat_id.map(ChatRef),
    );

    // Single drain loop plus the update dispatch loop
    tokio::spawn(worker::run(state.clone()));
    tokio::spawn(dispatch::run(state.clone(), telegram.clone()));

    // Status/health listener
    let health_state = HealthState {
        telegram,
        store,
        queue,
        started_at: Utc::now(),
    };

    let app = Router::new()
        .route("/", get(routes::health::status_page))
        .route("/health", get(routes::health::health_check))
        .with_state(health_state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new());

    tracing::info!("Starting beesense on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
