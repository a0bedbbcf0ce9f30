use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use image_crop_api::app_state::WorkerState;
use image_crop_api::config::AppConfig;
use image_crop_api::db::{self, queries};
use image_crop_api::routes;
use image_crop_api::routes::pubsub::process_claimed_job;
use image_crop_api::services::fetch::RemoteFetcher;
use image_crop_api::services::imageproc::Limits;
use image_crop_api::services::processor::JobProcessor;
use image_crop_api::services::storage::{LocalUploader, S3Uploader, Uploader};

const FETCH_TIMEOUT: Duration = Duration::from_secs(20);
const MAX_REDIRECTS: usize = 3;

/// Worker service: consumes bus push deliveries (and optionally polls the
/// store directly), claims jobs, runs the crop pipeline, and records
/// terminal state.
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing crop worker");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    tracing::info!("Connecting to PostgreSQL job store");
    let db_pool = db::init_pool(&config.job_db_dsn)
        .await
        .expect("Failed to connect to job store");

    let uploader: Arc<dyn Uploader> = if config.upload_backend == "local" {
        tracing::info!(dir = %config.local_storage_dir, "Using local storage backend");
        Arc::new(LocalUploader::new(
            config.local_storage_dir.clone(),
            &config.local_storage_base_url,
        ))
    } else {
        let bucket = config.s3_bucket.as_deref().expect("S3_BUCKET is required");
        let endpoint = config
            .s3_endpoint
            .as_deref()
            .expect("S3_ENDPOINT is required");
        let access_key = config
            .s3_access_key
            .as_deref()
            .expect("S3_ACCESS_KEY is required");
        let secret_key = config
            .s3_secret_key
            .as_deref()
            .expect("S3_SECRET_KEY is required");
        let public_base_url = config
            .storage_public_base_url
            .as_deref()
            .expect("STORAGE_PUBLIC_BASE_URL is required");

        tracing::info!(bucket = %bucket, "Using S3 storage backend");
        Arc::new(
            S3Uploader::new(
                bucket,
                endpoint,
                &config.s3_region,
                access_key,
                secret_key,
                public_base_url,
            )
            .expect("Failed to initialize S3 uploader"),
        )
    };

    let fetcher =
        RemoteFetcher::new(MAX_REDIRECTS, FETCH_TIMEOUT).expect("Failed to build HTTP client");

    let processor = JobProcessor::new(
        fetcher,
        uploader,
        Limits {
            max_bytes: config.image_max_bytes,
            max_pixels: config.image_max_pixels,
        },
        config.image_jpeg_quality,
    );

    let state = WorkerState::new(db_pool, processor);

    if let Some(interval) = config.job_poll_duration() {
        tracing::info!(interval_secs = interval.as_secs_f64(), "Starting poll-mode claim loop");
        tokio::spawn(run_poll_loop(state.clone(), interval));
    }

    let mut app = Router::new()
        .route("/healthz", get(routes::health::healthz))
        .route("/pubsub/jobs", post(routes::pubsub::receive_job))
        .with_state(state.clone())
        .route(
            "/readyz",
            get(routes::health::readyz_db).with_state(state.db.clone()),
        )
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        );

    if config.upload_backend == "local" && config.local_storage_serve {
        app = app.nest_service("/files", ServeDir::new(&config.local_storage_dir));
    }

    let app = app.layer(TraceLayer::new_for_http());

    tracing::info!("Worker listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app).await.expect("Server error");
}

/// Poll-mode claim loop: lease the oldest pending job and run it through the
/// same pipeline as push deliveries.
async fn run_poll_loop(state: WorkerState, interval: Duration) {
    loop {
        match queries::claim_job(&state.db).await {
            Ok(Some(job)) => {
                tracing::info!(job_id = %job.id, "claimed job from store");
                // Terminal state and logging are handled inside.
                let _ = process_claimed_job(&state, &job).await;
            }
            Ok(None) => sleep(interval).await,
            Err(err) => {
                tracing::error!(error = %err, "job claim failed");
                sleep(interval).await;
            }
        }
    }
}
