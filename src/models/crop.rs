use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::models::job::{Job, JobStatus};

/// Request to crop a remote image.
///
/// Only presence and positive dimensions are checked here. URL scheme and
/// crop bounds are enforced by the pipeline, so their violations become
/// terminal job failures rather than request errors.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ImageCropRequest {
    #[garde(length(min = 1))]
    pub image_url: String,

    #[garde(skip)]
    pub x: i64,

    #[garde(skip)]
    pub y: i64,

    #[garde(range(min = 1))]
    pub width: i64,

    #[garde(range(min = 1))]
    pub height: i64,
}

/// Response for both job creation and status polling.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    pub id: String,
    pub status: JobStatus,
    pub cropped_image_url: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl JobResponse {
    pub fn from_job(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            status: job.status,
            cropped_image_url: extract_cropped_image_url(job.result.as_ref()),
            error: job.error.clone().filter(|e| !e.is_empty()),
            created_at: job.created_at.clone(),
            updated_at: job.updated_at.clone(),
        }
    }
}

/// Pull `croppedImageUrl` out of the stored job result JSON.
pub fn extract_cropped_image_url(result: Option<&serde_json::Value>) -> Option<String> {
    let url = result?.get("croppedImageUrl")?.as_str()?;
    if url.is_empty() {
        return None;
    }
    Some(url.to_string())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
}
