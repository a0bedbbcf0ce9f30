use serde::Deserialize;
use std::time::Duration;

/// Configuration shared by the api, publisher, and worker binaries.
///
/// Fields a binary does not use may stay unset; each binary enforces its own
/// required subset at startup.
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g. "0.0.0.0:8080").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string for the job store.
    pub job_db_dsn: String,

    /// GCP project owning the Pub/Sub topic (api and publisher).
    #[serde(default)]
    pub gcp_project_id: Option<String>,

    /// Pub/Sub topic jobs are published to (api and publisher).
    #[serde(default)]
    pub pubsub_topic: Option<String>,

    /// "cloud" or "emulator".
    #[serde(default = "default_pubsub_mode")]
    pub pubsub_mode: String,

    /// Emulator host:port; required when `pubsub_mode` is "emulator".
    #[serde(default)]
    pub pubsub_emulator_host: Option<String>,

    /// Bearer token for cloud mode; emulator mode needs none.
    #[serde(default)]
    pub pubsub_auth_token: Option<String>,

    /// Push subscription name, provisioned in emulator mode.
    #[serde(default = "default_pubsub_subscription")]
    pub pubsub_subscription: String,

    /// Worker endpoint the push subscription delivers to.
    #[serde(default = "default_pubsub_push_endpoint")]
    pub pubsub_push_endpoint: String,

    /// Publisher pacing, in seconds.
    #[serde(default = "default_outbox_poll_interval")]
    pub outbox_poll_interval: f64,

    /// Outbox rows leased per publisher tick.
    #[serde(default = "default_outbox_batch_size")]
    pub outbox_batch_size: i64,

    /// Poll-mode worker pacing, in seconds; unset means push-only.
    #[serde(default)]
    pub job_poll_interval: Option<f64>,

    /// "s3" or "local".
    #[serde(default = "default_upload_backend")]
    pub upload_backend: String,

    #[serde(default)]
    pub s3_bucket: Option<String>,

    #[serde(default)]
    pub s3_endpoint: Option<String>,

    #[serde(default = "default_s3_region")]
    pub s3_region: String,

    #[serde(default)]
    pub s3_access_key: Option<String>,

    #[serde(default)]
    pub s3_secret_key: Option<String>,

    /// Public URL prefix under which uploaded crops are reachable.
    #[serde(default)]
    pub storage_public_base_url: Option<String>,

    #[serde(default = "default_local_storage_dir")]
    pub local_storage_dir: String,

    #[serde(default = "default_local_storage_base_url")]
    pub local_storage_base_url: String,

    /// Serve the local storage dir from the worker under /files/.
    #[serde(default = "default_true")]
    pub local_storage_serve: bool,

    #[serde(default = "default_image_max_bytes")]
    pub image_max_bytes: u64,

    #[serde(default = "default_image_max_pixels")]
    pub image_max_pixels: u64,

    #[serde(default = "default_image_jpeg_quality")]
    pub image_jpeg_quality: u8,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_pubsub_mode() -> String {
    "cloud".to_string()
}

fn default_pubsub_subscription() -> String {
    "image-jobs-push".to_string()
}

fn default_pubsub_push_endpoint() -> String {
    "http://worker:8080/pubsub/jobs".to_string()
}

fn default_outbox_poll_interval() -> f64 {
    2.0
}

fn default_outbox_batch_size() -> i64 {
    10
}

fn default_upload_backend() -> String {
    "s3".to_string()
}

fn default_s3_region() -> String {
    "auto".to_string()
}

fn default_local_storage_dir() -> String {
    "/tmp/image-crops".to_string()
}

fn default_local_storage_base_url() -> String {
    "http://localhost:8001/files".to_string()
}

fn default_true() -> bool {
    true
}

fn default_image_max_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_image_max_pixels() -> u64 {
    25_000_000
}

fn default_image_jpeg_quality() -> u8 {
    90
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn outbox_poll_duration(&self) -> Duration {
        Duration::from_secs_f64(self.outbox_poll_interval.max(0.0))
    }

    pub fn job_poll_duration(&self) -> Option<Duration> {
        self.job_poll_interval
            .map(|secs| Duration::from_secs_f64(secs.max(0.0)))
    }
}
