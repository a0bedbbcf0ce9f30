use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use image_crop_api::config::AppConfig;
use image_crop_api::db;
use image_crop_api::routes;
use image_crop_api::services::bus::PubSubClient;
use image_crop_api::services::publisher::run_publisher_loop;

/// Publisher service: leases unpublished outbox rows and publishes them to
/// the bus, marking rows published only on acknowledgement.
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing outbox publisher");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    tracing::info!("Connecting to PostgreSQL job store");
    let db_pool = db::init_pool(&config.job_db_dsn)
        .await
        .expect("Failed to connect to job store");

    let project_id = config
        .gcp_project_id
        .as_deref()
        .expect("GCP_PROJECT_ID is required");
    let topic = config
        .pubsub_topic
        .as_deref()
        .expect("PUBSUB_TOPIC is required");

    let bus = Arc::new(
        PubSubClient::new(
            &config.pubsub_mode,
            config.pubsub_emulator_host.as_deref(),
            project_id,
            topic,
            config.pubsub_auth_token.as_deref(),
        )
        .expect("Failed to initialize Pub/Sub client"),
    );

    if config.pubsub_mode == "emulator" {
        bus.ensure_topic_with_retry(10, Duration::from_millis(500))
            .await
            .expect("Failed to ensure Pub/Sub topic");
        bus.ensure_push_subscription(&config.pubsub_subscription, &config.pubsub_push_endpoint)
            .await
            .expect("Failed to ensure Pub/Sub subscription");
    }

    tokio::spawn(run_publisher_loop(
        db_pool.clone(),
        Arc::clone(&bus),
        config.outbox_poll_duration(),
        config.outbox_batch_size,
    ));

    let app = Router::new()
        .route("/healthz", get(routes::health::healthz))
        .route("/readyz", get(routes::health::readyz_db))
        .with_state(db_pool)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        );

    tracing::info!("Publisher listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app).await.expect("Server error");
}
