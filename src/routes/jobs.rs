use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use garde::Validate;
use sha2::{Digest, Sha256};

use crate::app_state::AppState;
use crate::db::queries;
use crate::db::StoreError;
use crate::models::crop::{ErrorResponse, ImageCropRequest, JobResponse};
use crate::models::job::OutboxMessage;

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            message: message.into(),
        }),
    )
}

/// POST /jobs/image-crop — accept a crop request and enqueue a job.
///
/// With an `Idempotency-Key` header, replays with the same body return the
/// existing job (200); the same key with a different body is a conflict
/// (409). The raw body is hashed before parsing so the comparison is
/// byte-exact.
pub async fn create_crop_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<JobResponse>), ApiError> {
    let request: ImageCropRequest = serde_json::from_slice(&body)
        .map_err(|_| error(StatusCode::BAD_REQUEST, "invalid json"))?;
    request
        .validate()
        .map_err(|report| error(StatusCode::BAD_REQUEST, report.to_string()))?;

    // Canonicalize: the stored payload is the validated request re-encoded.
    let payload = serde_json::to_value(&request)
        .map_err(|_| error(StatusCode::INTERNAL_SERVER_ERROR, "failed to encode payload"))?;

    let idempotency_key = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .filter(|k| !k.is_empty())
        .map(str::to_string);

    if let Some(key) = idempotency_key {
        let hash = request_hash(&body);
        match queries::create_job_with_idempotency(&state.db, payload, &key, &hash).await {
            Ok((job, outbox, reused)) => {
                if reused {
                    metrics::counter!("jobs_reused_total").increment(1);
                    tracing::info!(job_id = %job.id, "idempotent replay, reusing job");
                    Ok((StatusCode::OK, Json(JobResponse::from_job(&job))))
                } else {
                    metrics::counter!("jobs_created_total").increment(1);
                    publish_opportunistically(&state, &job.id, &outbox).await;
                    Ok((StatusCode::CREATED, Json(JobResponse::from_job(&job))))
                }
            }
            Err(StoreError::IdempotencyConflict) => Err(error(
                StatusCode::CONFLICT,
                "idempotency key reused with different payload",
            )),
            Err(err) => {
                tracing::error!(error = %err, "failed to create job");
                Err(error(StatusCode::INTERNAL_SERVER_ERROR, "failed to create job"))
            }
        }
    } else {
        let (job, outbox) = queries::create_job_with_outbox(&state.db, payload)
            .await
            .map_err(|err| {
                tracing::error!(error = %err, "failed to create job");
                error(StatusCode::INTERNAL_SERVER_ERROR, "failed to create job")
            })?;

        metrics::counter!("jobs_created_total").increment(1);
        publish_opportunistically(&state, &job.id, &outbox).await;
        Ok((StatusCode::CREATED, Json(JobResponse::from_job(&job))))
    }
}

/// GET /jobs/:id — job status and any resulting cropped-image URL or error.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = queries::get_job(&state.db, &job_id)
        .await
        .map_err(|err| {
            tracing::error!(job_id = %job_id, error = %err, "failed to fetch job");
            error(StatusCode::INTERNAL_SERVER_ERROR, "failed to fetch job")
        })?
        .ok_or_else(|| error(StatusCode::NOT_FOUND, "job not found"))?;

    Ok(Json(JobResponse::from_job(&job)))
}

/// Best-effort publish right after insert, to shave queue latency. Failures
/// are recorded and left for the publisher loop, which is the correctness
/// path.
async fn publish_opportunistically(state: &AppState, job_id: &str, outbox: &OutboxMessage) {
    match state.bus.publish(&outbox.payload).await {
        Ok(_) => {
            if let Err(err) = queries::mark_outbox_published(&state.db, &outbox.id).await {
                tracing::error!(outbox_id = %outbox.id, error = %err, "mark published failed");
            }
        }
        Err(err) => {
            tracing::warn!(job_id = %job_id, error = %err, "opportunistic publish failed");
            if let Err(record_err) =
                queries::record_outbox_error(&state.db, &outbox.id, &err.to_string()).await
            {
                tracing::error!(outbox_id = %outbox.id, error = %record_err, "record outbox error failed");
            }
        }
    }
}

fn request_hash(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    format!("{:x}", hasher.finalize())
}
