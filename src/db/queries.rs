use sqlx::{PgExecutor, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::db::{now_iso, StoreError};
use crate::models::job::{IdempotencyRecord, Job, JobStatus, OutboxMessage};

type JobRow = (
    String,
    String,
    serde_json::Value,
    Option<serde_json::Value>,
    Option<String>,
    String,
    String,
);

type OutboxRow = (
    String,
    String,
    serde_json::Value,
    Option<String>,
    i32,
    Option<String>,
    String,
    String,
);

fn job_from_row(row: JobRow) -> Result<Job, StoreError> {
    let (id, status, payload, result, error, created_at, updated_at) = row;
    let status = status
        .parse::<JobStatus>()
        .map_err(|_| StoreError::UnknownStatus(status))?;
    Ok(Job {
        id,
        status,
        payload,
        result,
        error,
        created_at,
        updated_at,
    })
}

fn outbox_from_row(row: OutboxRow) -> OutboxMessage {
    let (id, job_id, payload, published_at, attempts, last_error, created_at, updated_at) = row;
    OutboxMessage {
        id,
        job_id,
        payload,
        published_at,
        attempts,
        last_error,
        created_at,
        updated_at,
    }
}

fn new_job(payload: serde_json::Value) -> Job {
    let now = now_iso();
    Job {
        id: Uuid::new_v4().to_string(),
        status: JobStatus::Pending,
        payload,
        result: None,
        error: None,
        created_at: now.clone(),
        updated_at: now,
    }
}

fn new_outbox(job_id: &str) -> OutboxMessage {
    let now = now_iso();
    OutboxMessage {
        id: Uuid::new_v4().to_string(),
        job_id: job_id.to_string(),
        payload: serde_json::json!({ "jobId": job_id }),
        published_at: None,
        attempts: 0,
        last_error: None,
        created_at: now.clone(),
        updated_at: now,
    }
}

async fn insert_job<'e>(ex: impl PgExecutor<'e>, job: &Job) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO jobs (id, status, payload, result, error, created_at, updated_at)
         VALUES ($1, $2, $3, NULL, NULL, $4, $5)",
    )
    .bind(&job.id)
    .bind(job.status.to_string())
    .bind(&job.payload)
    .bind(&job.created_at)
    .bind(&job.updated_at)
    .execute(ex)
    .await?;
    Ok(())
}

async fn insert_outbox<'e>(ex: impl PgExecutor<'e>, msg: &OutboxMessage) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO outbox (id, job_id, payload, published_at, attempts, last_error, created_at, updated_at)
         VALUES ($1, $2, $3, NULL, 0, NULL, $4, $5)",
    )
    .bind(&msg.id)
    .bind(&msg.job_id)
    .bind(&msg.payload)
    .bind(&msg.created_at)
    .bind(&msg.updated_at)
    .execute(ex)
    .await?;
    Ok(())
}

async fn insert_idempotency<'e>(
    ex: impl PgExecutor<'e>,
    record: &IdempotencyRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO idempotency_keys (idempotency_key, request_hash, job_id, created_at)
         VALUES ($1, $2, $3, $4)",
    )
    .bind(&record.idempotency_key)
    .bind(&record.request_hash)
    .bind(&record.job_id)
    .bind(&record.created_at)
    .execute(ex)
    .await?;
    Ok(())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false)
}

async fn insert_job_and_outbox(
    tx: &mut Transaction<'_, Postgres>,
    payload: serde_json::Value,
) -> Result<(Job, OutboxMessage), StoreError> {
    let job = new_job(payload);
    insert_job(&mut **tx, &job).await?;
    let outbox = new_outbox(&job.id);
    insert_outbox(&mut **tx, &outbox).await?;
    Ok((job, outbox))
}

/// Insert a new pending job.
pub async fn create_job(pool: &PgPool, payload: serde_json::Value) -> Result<Job, StoreError> {
    let job = new_job(payload);
    insert_job(pool, &job).await?;
    Ok(job)
}

/// Insert a job and its outbox row in one transaction: both commit or neither.
pub async fn create_job_with_outbox(
    pool: &PgPool,
    payload: serde_json::Value,
) -> Result<(Job, OutboxMessage), StoreError> {
    let mut tx = pool.begin().await?;
    let (job, outbox) = insert_job_and_outbox(&mut tx, payload).await?;
    tx.commit().await?;
    Ok((job, outbox))
}

/// Insert a job, outbox row, and idempotency record atomically.
///
/// Returns `reused = true` with the previously stored job when the key has
/// already been used with an identical request hash. A different hash under
/// the same key is an `IdempotencyConflict`. Losing a concurrent insert race
/// on the key (unique violation) is handled internally by re-reading the
/// winner's record.
pub async fn create_job_with_idempotency(
    pool: &PgPool,
    payload: serde_json::Value,
    key: &str,
    request_hash: &str,
) -> Result<(Job, OutboxMessage, bool), StoreError> {
    if let Some(existing) = get_idempotency_record(pool, key).await? {
        return reuse_existing(pool, request_hash, existing).await;
    }

    let mut tx = pool.begin().await?;
    let (job, outbox) = insert_job_and_outbox(&mut tx, payload).await?;
    let record = IdempotencyRecord {
        idempotency_key: key.to_string(),
        request_hash: request_hash.to_string(),
        job_id: job.id.clone(),
        created_at: now_iso(),
    };
    match insert_idempotency(&mut *tx, &record).await {
        Ok(()) => {
            tx.commit().await?;
            Ok((job, outbox, false))
        }
        Err(err) if is_unique_violation(&err) => {
            // Lost the insert race; the winner's record is authoritative.
            tx.rollback().await?;
            let existing = get_idempotency_record(pool, key)
                .await?
                .ok_or(StoreError::Database(sqlx::Error::RowNotFound))?;
            reuse_existing(pool, request_hash, existing).await
        }
        Err(err) => Err(err.into()),
    }
}

async fn reuse_existing(
    pool: &PgPool,
    request_hash: &str,
    record: IdempotencyRecord,
) -> Result<(Job, OutboxMessage, bool), StoreError> {
    if record.request_hash != request_hash {
        return Err(StoreError::IdempotencyConflict);
    }
    let job = get_job(pool, &record.job_id)
        .await?
        .ok_or_else(|| StoreError::MissingJob(record.job_id.clone()))?;
    let outbox = get_outbox_for_job(pool, &job.id)
        .await?
        .ok_or_else(|| StoreError::MissingOutbox(job.id.clone()))?;
    Ok((job, outbox, true))
}

async fn get_idempotency_record(
    pool: &PgPool,
    key: &str,
) -> Result<Option<IdempotencyRecord>, StoreError> {
    let row: Option<(String, String, String, String)> = sqlx::query_as(
        "SELECT idempotency_key, request_hash, job_id, created_at
         FROM idempotency_keys WHERE idempotency_key = $1",
    )
    .bind(key)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(
        |(idempotency_key, request_hash, job_id, created_at)| IdempotencyRecord {
            idempotency_key,
            request_hash,
            job_id,
            created_at,
        },
    ))
}

/// Fetch a job by ID; `None` when not found.
pub async fn get_job(pool: &PgPool, job_id: &str) -> Result<Option<Job>, StoreError> {
    let row: Option<JobRow> = sqlx::query_as(
        "SELECT id, status, payload, result, error, created_at, updated_at
         FROM jobs WHERE id = $1",
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    row.map(job_from_row).transpose()
}

/// Fetch the outbox row paired with a job.
pub async fn get_outbox_for_job(
    pool: &PgPool,
    job_id: &str,
) -> Result<Option<OutboxMessage>, StoreError> {
    let row: Option<OutboxRow> = sqlx::query_as(
        "SELECT id, job_id, payload, published_at, attempts, last_error, created_at, updated_at
         FROM outbox WHERE job_id = $1 LIMIT 1",
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(outbox_from_row))
}

/// Claim a specific job: `pending -> in_progress`.
///
/// Returns whether this caller won the claim. Concurrent attempts serialize
/// at the row; exactly one observes `true`.
pub async fn start_job(pool: &PgPool, job_id: &str) -> Result<bool, StoreError> {
    let result = sqlx::query(
        "UPDATE jobs SET status = 'in_progress', updated_at = $2
         WHERE id = $1 AND status = 'pending'",
    )
    .bind(job_id)
    .bind(now_iso())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Claim the oldest pending job, skipping rows locked by concurrent claimers.
///
/// Poll-mode counterpart to [`start_job`]: selection and the status flip
/// happen in one statement, so at most one claimer observes any given job.
pub async fn claim_job(pool: &PgPool) -> Result<Option<Job>, StoreError> {
    let row: Option<JobRow> = sqlx::query_as(
        "WITH next AS (
             SELECT id FROM jobs
             WHERE status = 'pending'
             ORDER BY created_at ASC
             LIMIT 1
             FOR UPDATE SKIP LOCKED
         )
         UPDATE jobs j
         SET status = 'in_progress', updated_at = $1
         FROM next
         WHERE j.id = next.id
         RETURNING j.id, j.status, j.payload, j.result, j.error, j.created_at, j.updated_at",
    )
    .bind(now_iso())
    .fetch_optional(pool)
    .await?;

    row.map(job_from_row).transpose()
}

/// Mark a job done and store its result JSON.
pub async fn complete_job(
    pool: &PgPool,
    job_id: &str,
    result: serde_json::Value,
) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE jobs SET status = 'done', result = $2, error = NULL, updated_at = $3
         WHERE id = $1",
    )
    .bind(job_id)
    .bind(result)
    .bind(now_iso())
    .execute(pool)
    .await?;
    Ok(())
}

/// Mark a job failed and store the error text.
///
/// Gated on non-done status: a completed job is never overwritten, and
/// `failed -> failed` stays a harmless overwrite.
pub async fn fail_job(pool: &PgPool, job_id: &str, message: &str) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE jobs SET status = 'failed', error = $2, updated_at = $3
         WHERE id = $1 AND status IN ('in_progress', 'failed')",
    )
    .bind(job_id)
    .bind(message)
    .bind(now_iso())
    .execute(pool)
    .await?;
    Ok(())
}

/// Lease a batch of unpublished outbox rows.
///
/// Selection (oldest first, lock-skipping) and the `attempts` increment
/// happen in one statement, so concurrent publishers receive disjoint
/// batches. Rows are NOT marked published here; that requires an actual
/// bus acknowledgement.
pub async fn claim_outbox_batch(
    pool: &PgPool,
    limit: i64,
) -> Result<Vec<OutboxMessage>, StoreError> {
    let rows: Vec<OutboxRow> = sqlx::query_as(
        "WITH claimable AS (
             SELECT id FROM outbox
             WHERE published_at IS NULL
             ORDER BY created_at ASC
             LIMIT $1
             FOR UPDATE SKIP LOCKED
         )
         UPDATE outbox o
         SET attempts = o.attempts + 1, updated_at = $2
         FROM claimable c
         WHERE o.id = c.id
         RETURNING o.id, o.job_id, o.payload, o.published_at, o.attempts, o.last_error,
                   o.created_at, o.updated_at",
    )
    .bind(limit)
    .bind(now_iso())
    .fetch_all(pool)
    .await?;

    let mut messages: Vec<OutboxMessage> = rows.into_iter().map(outbox_from_row).collect();
    // UPDATE .. RETURNING does not guarantee row order.
    messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(messages)
}

/// Record a bus acknowledgement. Idempotent; clears `last_error`.
pub async fn mark_outbox_published(pool: &PgPool, outbox_id: &str) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE outbox SET published_at = $2, last_error = NULL, updated_at = $2
         WHERE id = $1",
    )
    .bind(outbox_id)
    .bind(now_iso())
    .execute(pool)
    .await?;
    Ok(())
}

/// Record a failed publication attempt. Never touches `published_at`.
pub async fn record_outbox_error(
    pool: &PgPool,
    outbox_id: &str,
    message: &str,
) -> Result<(), StoreError> {
    sqlx::query("UPDATE outbox SET last_error = $2, updated_at = $3 WHERE id = $1")
        .bind(outbox_id)
        .bind(message)
        .bind(now_iso())
        .execute(pool)
        .await?;
    Ok(())
}
