use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::app_state::WorkerState;
use crate::db::queries;
use crate::models::job::Job;
use crate::services::bus::{decode_job_id, PushEnvelope};

type HandlerError = (StatusCode, String);

/// POST /pubsub/jobs — bus push delivery of a job message.
///
/// Non-2xx responses trigger bus redelivery, so only genuinely retryable
/// failures return 5xx. An undecodable envelope is 400 (redelivering it
/// would never help), and a lost claim race is a plain 200.
pub async fn receive_job(
    State(state): State<WorkerState>,
    Json(envelope): Json<PushEnvelope>,
) -> Result<StatusCode, HandlerError> {
    let job_id = decode_job_id(&envelope)
        .map_err(|_| (StatusCode::BAD_REQUEST, "invalid message".to_string()))?;
    tracing::info!(job_id = %job_id, "received job message");

    let claimed = queries::start_job(&state.db, &job_id).await.map_err(|err| {
        tracing::error!(job_id = %job_id, error = %err, "failed to start job");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed to start job".to_string(),
        )
    })?;
    if !claimed {
        tracing::info!(job_id = %job_id, "job already claimed");
        return Ok(StatusCode::OK);
    }

    let job = queries::get_job(&state.db, &job_id)
        .await
        .map_err(|err| {
            tracing::error!(job_id = %job_id, error = %err, "failed to fetch job");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to fetch job".to_string(),
            )
        })?
        .ok_or_else(|| (StatusCode::NOT_FOUND, "job not found".to_string()))?;

    process_claimed_job(&state, &job).await
}

/// Run the pipeline for a job this worker has already claimed, then record
/// the terminal transition. Shared by the push handler and the poll loop.
///
/// A pipeline error marks the job failed before returning 500; the ensuing
/// redelivery is short-circuited by `start_job` returning false.
pub async fn process_claimed_job(state: &WorkerState, job: &Job) -> Result<StatusCode, HandlerError> {
    match state.processor.process(&job.id, &job.payload).await {
        Ok(result) => {
            queries::complete_job(&state.db, &job.id, result)
                .await
                .map_err(|err| {
                    tracing::error!(job_id = %job.id, error = %err, "failed to mark job done");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "job completion failed".to_string(),
                    )
                })?;
            metrics::counter!("jobs_completed_total").increment(1);
            tracing::info!(job_id = %job.id, "job completed");
            Ok(StatusCode::OK)
        }
        Err(err) => {
            tracing::warn!(job_id = %job.id, error = %err, "job processing failed");
            if let Err(db_err) = queries::fail_job(&state.db, &job.id, &err.to_string()).await {
                tracing::error!(job_id = %job.id, error = %db_err, "failed to mark job failed");
            }
            metrics::counter!("jobs_failed_total").increment(1);
            Err((StatusCode::INTERNAL_SERVER_ERROR, "job failed".to_string()))
        }
    }
}
