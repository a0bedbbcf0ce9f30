use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Status of a crop job in the async pipeline.
///
/// Transitions are monotonic: `pending -> in_progress -> {done, failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Done,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

/// An image-crop job.
///
/// `payload` and `result` are opaque JSON from the store's perspective;
/// they are canonicalized at the HTTP edges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub payload: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A pending bus publication, inserted in the same transaction as its job.
///
/// `payload` holds the exact bytes delivered to the bus (minimally
/// `{"jobId": <id>}`). `published_at` stays null until the bus acknowledges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: String,
    pub job_id: String,
    pub payload: serde_json::Value,
    pub published_at: Option<String>,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Binds a client-supplied idempotency key to the job it created.
///
/// Immutable after first insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub idempotency_key: String,
    pub request_hash: String,
    pub job_id: String,
    pub created_at: String,
}
