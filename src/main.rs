use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use image_crop_api::app_state::AppState;
use image_crop_api::config::AppConfig;
use image_crop_api::db;
use image_crop_api::routes;
use image_crop_api::services::bus::PubSubClient;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing image-crop API");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!("jobs_created_total", "Crop jobs accepted and persisted");
    metrics::describe_counter!("jobs_reused_total", "Idempotent replays served from the store");
    metrics::describe_counter!("jobs_completed_total", "Crop jobs finished successfully");
    metrics::describe_counter!("jobs_failed_total", "Crop jobs that ended in failure");
    metrics::describe_counter!("outbox_published_total", "Outbox rows acknowledged by the bus");
    metrics::describe_counter!(
        "outbox_publish_failures_total",
        "Outbox publish attempts rejected or timed out"
    );

    tracing::info!("Connecting to PostgreSQL job store");
    let db_pool = db::init_pool(&config.job_db_dsn)
        .await
        .expect("Failed to connect to job store");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    let project_id = config
        .gcp_project_id
        .as_deref()
        .expect("GCP_PROJECT_ID is required");
    let topic = config
        .pubsub_topic
        .as_deref()
        .expect("PUBSUB_TOPIC is required");

    let bus = PubSubClient::new(
        &config.pubsub_mode,
        config.pubsub_emulator_host.as_deref(),
        project_id,
        topic,
        config.pubsub_auth_token.as_deref(),
    )
    .expect("Failed to initialize Pub/Sub client");

    if config.pubsub_mode == "emulator" {
        bus.ensure_topic_with_retry(10, Duration::from_millis(500))
            .await
            .expect("Failed to ensure Pub/Sub topic");
    }

    let state = AppState::new(db_pool, bus);

    let app = Router::new()
        .route("/healthz", get(routes::health::healthz))
        .route("/readyz", get(routes::health::readyz))
        .route("/jobs/image-crop", post(routes::jobs::create_crop_job))
        .route("/jobs/:id", get(routes::jobs::get_job_status))
        .with_state(state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(1024 * 1024)); // crop requests are small JSON bodies

    tracing::info!("Starting API on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("API listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
