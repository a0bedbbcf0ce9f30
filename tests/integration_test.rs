//! Job-store integration tests.
//!
//! These need a running PostgreSQL instance with `JOB_DB_DSN` set (the
//! schema is migrated on first connection).
//!
//! Run with: cargo test --test integration_test -- --ignored

use sqlx::PgPool;

use image_crop_api::db::{self, queries, StoreError};
use image_crop_api::models::job::JobStatus;

async fn test_pool() -> PgPool {
    dotenvy::dotenv().ok();
    let dsn = std::env::var("JOB_DB_DSN").expect("JOB_DB_DSN must be set");
    let pool = db::init_pool(&dsn).await.expect("Failed to connect");
    db::run_migrations(&pool).await.expect("Failed to migrate");
    pool
}

fn crop_payload(url: &str) -> serde_json::Value {
    serde_json::json!({
        "imageUrl": url,
        "x": 0, "y": 0, "width": 10, "height": 10,
    })
}

#[tokio::test]
#[ignore] // Requires PostgreSQL; see module docs.
async fn job_and_outbox_lifecycle() {
    let pool = test_pool().await;

    // Insert commits the job and its outbox row together.
    let (job, outbox) = queries::create_job_with_outbox(&pool, crop_payload("http://x/a.jpg"))
        .await
        .expect("create failed");

    assert_eq!(job.id.len(), 36);
    assert_eq!(job.status, JobStatus::Pending);
    assert!(job.result.is_none());
    assert!(job.error.is_none());
    assert_eq!(job.created_at, job.updated_at);

    assert_eq!(outbox.job_id, job.id);
    assert_eq!(outbox.payload, serde_json::json!({ "jobId": job.id }));
    assert!(outbox.published_at.is_none());
    assert_eq!(outbox.attempts, 0);

    let fetched = queries::get_job(&pool, &job.id)
        .await
        .expect("get failed")
        .expect("job missing");
    assert_eq!(fetched.status, JobStatus::Pending);
    assert_eq!(fetched.payload, job.payload);

    // Exactly one claim wins; repeats observe the taken state.
    assert!(queries::start_job(&pool, &job.id).await.expect("start failed"));
    assert!(!queries::start_job(&pool, &job.id).await.expect("restart failed"));

    let in_progress = queries::get_job(&pool, &job.id)
        .await
        .expect("get failed")
        .expect("job missing");
    assert_eq!(in_progress.status, JobStatus::InProgress);
    assert!(in_progress.updated_at >= in_progress.created_at);

    let result = serde_json::json!({ "croppedImageUrl": "https://cdn/crops/x.jpg" });
    queries::complete_job(&pool, &job.id, result.clone())
        .await
        .expect("complete failed");

    let done = queries::get_job(&pool, &job.id)
        .await
        .expect("get failed")
        .expect("job missing");
    assert_eq!(done.status, JobStatus::Done);
    assert_eq!(done.result, Some(result));
    assert!(done.error.is_none());

    // A done job is never overwritten by fail_job.
    queries::fail_job(&pool, &job.id, "late failure")
        .await
        .expect("fail_job errored");
    let still_done = queries::get_job(&pool, &job.id)
        .await
        .expect("get failed")
        .expect("job missing");
    assert_eq!(still_done.status, JobStatus::Done);
    assert!(still_done.error.is_none());
}

#[tokio::test]
#[ignore] // Requires PostgreSQL; see module docs.
async fn plain_insert_creates_pending_job() {
    let pool = test_pool().await;

    let job = queries::create_job(&pool, crop_payload("http://x/plain.jpg"))
        .await
        .expect("create failed");
    assert_eq!(job.status, JobStatus::Pending);

    let fetched = queries::get_job(&pool, &job.id)
        .await
        .expect("get failed")
        .expect("job missing");
    assert_eq!(fetched.id, job.id);

    // No outbox row is paired with a plain insert.
    let outbox = queries::get_outbox_for_job(&pool, &job.id)
        .await
        .expect("get outbox failed");
    assert!(outbox.is_none());

    assert!(
        queries::get_job(&pool, "00000000-0000-0000-0000-000000000000")
            .await
            .expect("get failed")
            .is_none()
    );
}

#[tokio::test]
#[ignore] // Requires PostgreSQL; see module docs.
async fn start_job_race_has_one_winner() {
    let pool = test_pool().await;
    let (job, _) = queries::create_job_with_outbox(&pool, crop_payload("http://x/race.jpg"))
        .await
        .expect("create failed");

    let (a, b) = tokio::join!(
        queries::start_job(&pool, &job.id),
        queries::start_job(&pool, &job.id),
    );
    let a = a.expect("start a failed");
    let b = b.expect("start b failed");

    assert!(a ^ b, "exactly one claim must win (a={a}, b={b})");
}

#[tokio::test]
#[ignore] // Requires PostgreSQL; see module docs.
async fn failed_job_records_error() {
    let pool = test_pool().await;
    let (job, _) = queries::create_job_with_outbox(&pool, crop_payload("http://x/fail.jpg"))
        .await
        .expect("create failed");

    assert!(queries::start_job(&pool, &job.id).await.expect("start failed"));
    queries::fail_job(&pool, &job.id, "crop rectangle exceeds image bounds")
        .await
        .expect("fail failed");

    let failed = queries::get_job(&pool, &job.id)
        .await
        .expect("get failed")
        .expect("job missing");
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(
        failed.error.as_deref(),
        Some("crop rectangle exceeds image bounds")
    );
    assert!(failed.result.is_none());

    // failed -> failed stays a harmless overwrite.
    queries::fail_job(&pool, &job.id, "second failure")
        .await
        .expect("re-fail failed");
    let refailed = queries::get_job(&pool, &job.id)
        .await
        .expect("get failed")
        .expect("job missing");
    assert_eq!(refailed.status, JobStatus::Failed);
    assert_eq!(refailed.error.as_deref(), Some("second failure"));
}

#[tokio::test]
#[ignore] // Requires PostgreSQL; see module docs.
async fn outbox_claim_and_publish_state() {
    let pool = test_pool().await;
    let (_, outbox) = queries::create_job_with_outbox(&pool, crop_payload("http://x/ob.jpg"))
        .await
        .expect("create failed");

    // Claiming leases the row and bumps attempts, but does not publish it.
    let batch = queries::claim_outbox_batch(&pool, 100).await.expect("claim failed");
    let claimed = batch
        .iter()
        .find(|m| m.id == outbox.id)
        .expect("row missing from batch");
    assert_eq!(claimed.attempts, 1);
    assert!(claimed.published_at.is_none());

    // A failed publish leaves the row claimable and records the cause.
    queries::record_outbox_error(&pool, &outbox.id, "bus unavailable")
        .await
        .expect("record failed");
    let batch = queries::claim_outbox_batch(&pool, 100).await.expect("claim failed");
    let reclaimed = batch
        .iter()
        .find(|m| m.id == outbox.id)
        .expect("row should still be claimable");
    assert_eq!(reclaimed.attempts, 2);
    assert_eq!(reclaimed.last_error.as_deref(), Some("bus unavailable"));

    // Acknowledgement publishes the row and clears the error.
    queries::mark_outbox_published(&pool, &outbox.id)
        .await
        .expect("mark failed");
    let batch = queries::claim_outbox_batch(&pool, 100).await.expect("claim failed");
    assert!(
        batch.iter().all(|m| m.id != outbox.id),
        "published rows must not be re-claimed"
    );

    let published = queries::get_outbox_for_job(&pool, &outbox.job_id)
        .await
        .expect("get failed")
        .expect("outbox missing");
    assert!(published.published_at.is_some());
    assert!(published.last_error.is_none());
    assert_eq!(published.attempts, 2);
}

#[tokio::test]
#[ignore] // Requires PostgreSQL; see module docs.
async fn idempotent_replay_returns_same_job() {
    let pool = test_pool().await;
    let key = format!("test-key-{}", uuid::Uuid::new_v4());
    let payload = crop_payload("http://x/idem.jpg");
    let hash = "a".repeat(64);

    let (job1, outbox1, reused1) =
        queries::create_job_with_idempotency(&pool, payload.clone(), &key, &hash)
            .await
            .expect("first insert failed");
    assert!(!reused1);

    let (job2, outbox2, reused2) =
        queries::create_job_with_idempotency(&pool, payload.clone(), &key, &hash)
            .await
            .expect("replay failed");
    assert!(reused2);
    assert_eq!(job2.id, job1.id);
    assert_eq!(outbox2.id, outbox1.id);

    // Same key, different body: conflict.
    let err = queries::create_job_with_idempotency(&pool, payload, &key, &"b".repeat(64))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::IdempotencyConflict));
}

#[tokio::test]
#[ignore] // Requires PostgreSQL; see module docs.
async fn concurrent_idempotent_inserts_converge() {
    let pool = test_pool().await;
    let key = format!("race-key-{}", uuid::Uuid::new_v4());
    let payload = crop_payload("http://x/race-idem.jpg");
    let hash = "c".repeat(64);

    let (a, b) = tokio::join!(
        queries::create_job_with_idempotency(&pool, payload.clone(), &key, &hash),
        queries::create_job_with_idempotency(&pool, payload.clone(), &key, &hash),
    );
    let (job_a, _, reused_a) = a.expect("insert a failed");
    let (job_b, _, reused_b) = b.expect("insert b failed");

    assert_eq!(job_a.id, job_b.id, "both requests must reference one job");
    assert!(
        reused_a ^ reused_b,
        "exactly one insert may win (a={reused_a}, b={reused_b})"
    );
}

#[tokio::test]
#[ignore] // Requires PostgreSQL; see module docs.
async fn poll_claim_takes_oldest_pending_job() {
    let pool = test_pool().await;

    let (first, _) = queries::create_job_with_outbox(&pool, crop_payload("http://x/p1.jpg"))
        .await
        .expect("create failed");
    let (second, _) = queries::create_job_with_outbox(&pool, crop_payload("http://x/p2.jpg"))
        .await
        .expect("create failed");

    // Other tests may have left pending jobs behind; drain until ours show up.
    let mut seen = Vec::new();
    while seen.len() < 2 {
        match queries::claim_job(&pool).await.expect("claim failed") {
            Some(job) if job.id == first.id || job.id == second.id => seen.push(job.id.clone()),
            Some(_) => continue,
            None => break,
        }
    }

    assert_eq!(seen, vec![first.id.clone(), second.id.clone()]);

    let claimed = queries::get_job(&pool, &first.id)
        .await
        .expect("get failed")
        .expect("job missing");
    assert_eq!(claimed.status, JobStatus::InProgress);
}
