//! End-to-end scenarios against a running pipeline.
//!
//! These tests require the full stack:
//! 1. PostgreSQL with migrations applied
//! 2. A Pub/Sub emulator (or real topic + push subscription)
//! 3. The API, publisher, and worker processes running
//!
//! Run with: cargo test --test e2e_test -- --ignored --nocapture
//!
//! Set API_BASE_URL to override the default (http://localhost:8080).

mod helpers;

use helpers::*;

fn base_url() -> String {
    std::env::var("API_BASE_URL").unwrap_or_else(|_| "http://localhost:8080".to_string())
}

fn crop_body(image_url: &str, x: i64, y: i64, width: i64, height: i64) -> serde_json::Value {
    serde_json::json!({
        "imageUrl": image_url,
        "x": x, "y": y, "width": width, "height": height,
    })
}

#[tokio::test]
#[ignore] // Requires a running stack; see module docs.
async fn health_and_readiness() {
    let client = reqwest::Client::new();

    let health = client
        .get(format!("{}/healthz", base_url()))
        .send()
        .await
        .expect("healthz failed");
    assert!(health.status().is_success());

    let ready = client
        .get(format!("{}/readyz", base_url()))
        .send()
        .await
        .expect("readyz failed");
    assert!(ready.status().is_success(), "stack reports not ready");
}

#[tokio::test]
#[ignore] // Requires a running stack; see module docs.
async fn happy_path_crop_completes() {
    let client = reqwest::Client::new();
    let image_url = serve_test_image(32, 32).await;

    let (status, job) = submit_crop_job(
        &client,
        &base_url(),
        &crop_body(&image_url, 0, 0, 10, 10),
        None,
    )
    .await
    .expect("submit failed");

    assert_eq!(status, reqwest::StatusCode::CREATED);
    let job = job.expect("missing body");
    assert_eq!(job.status, "pending");
    assert!(job.cropped_image_url.is_none());

    let finished = poll_until_terminal(&client, &base_url(), &job.id, 60)
        .await
        .expect("polling failed");
    assert_eq!(finished.status, "done", "error: {:?}", finished.error);
    let url = finished.cropped_image_url.expect("croppedImageUrl missing");
    assert!(url.ends_with(&format!("crops/{}.jpg", job.id)), "url: {url}");
    assert!(finished.error.is_none());
}

#[tokio::test]
#[ignore] // Requires a running stack; see module docs.
async fn idempotent_replay_reuses_job() {
    let client = reqwest::Client::new();
    let image_url = serve_test_image(32, 32).await;
    let body = crop_body(&image_url, 0, 0, 8, 8);
    let key = format!("e2e-{}", uuid::Uuid::new_v4());

    let (first_status, first) = submit_crop_job(&client, &base_url(), &body, Some(&key))
        .await
        .expect("first submit failed");
    assert_eq!(first_status, reqwest::StatusCode::CREATED);
    let first = first.expect("missing body");

    let (second_status, second) = submit_crop_job(&client, &base_url(), &body, Some(&key))
        .await
        .expect("second submit failed");
    assert_eq!(second_status, reqwest::StatusCode::OK);
    let second = second.expect("missing body");

    assert_eq!(second.id, first.id, "replay must reference the same job");
}

#[tokio::test]
#[ignore] // Requires a running stack; see module docs.
async fn idempotency_conflict_is_rejected() {
    let client = reqwest::Client::new();
    let image_url = serve_test_image(32, 32).await;
    let key = format!("e2e-conflict-{}", uuid::Uuid::new_v4());

    let (first_status, _) = submit_crop_job(
        &client,
        &base_url(),
        &crop_body(&image_url, 0, 0, 8, 8),
        Some(&key),
    )
    .await
    .expect("first submit failed");
    assert_eq!(first_status, reqwest::StatusCode::CREATED);

    let (second_status, _) = submit_crop_job(
        &client,
        &base_url(),
        &crop_body(&image_url, 0, 0, 16, 16),
        Some(&key),
    )
    .await
    .expect("second submit failed");
    assert_eq!(second_status, reqwest::StatusCode::CONFLICT);
}

#[tokio::test]
#[ignore] // Requires a running stack; see module docs.
async fn invalid_requests_are_rejected() {
    let client = reqwest::Client::new();

    let cases = [
        crop_body("", 0, 0, 10, 10),
        crop_body("http://example.com/a.jpg", 0, 0, 0, 10),
        crop_body("http://example.com/a.jpg", 0, 0, 10, 0),
    ];
    for body in cases {
        let (status, _) = submit_crop_job(&client, &base_url(), &body, None)
            .await
            .expect("submit failed");
        assert_eq!(status, reqwest::StatusCode::BAD_REQUEST, "body: {body}");
    }

    let missing = client
        .get(format!("{}/jobs/{}", base_url(), uuid::Uuid::new_v4()))
        .send()
        .await
        .expect("get failed");
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
#[ignore] // Requires a running stack; see module docs.
async fn non_http_scheme_is_accepted_then_fails() {
    let client = reqwest::Client::new();

    // Scheme is only enforced by the worker's fetcher, so ingest accepts the
    // job and the failure lands on the job record.
    let (status, job) = submit_crop_job(
        &client,
        &base_url(),
        &crop_body("ftp://example.com/a.jpg", 0, 0, 10, 10),
        None,
    )
    .await
    .expect("submit failed");
    assert_eq!(status, reqwest::StatusCode::CREATED);
    let job = job.expect("missing body");
    assert_eq!(job.status, "pending");

    let finished = poll_until_terminal(&client, &base_url(), &job.id, 60)
        .await
        .expect("polling failed");
    assert_eq!(finished.status, "failed");
    assert_eq!(finished.error.as_deref(), Some("url must use http or https"));
    assert!(finished.cropped_image_url.is_none());
}

#[tokio::test]
#[ignore] // Requires a running stack; see module docs.
async fn out_of_bounds_crop_fails_permanently() {
    let client = reqwest::Client::new();
    let image_url = serve_test_image(10, 10).await;

    let (status, job) = submit_crop_job(
        &client,
        &base_url(),
        &crop_body(&image_url, 5, 5, 10, 10),
        None,
    )
    .await
    .expect("submit failed");
    assert_eq!(status, reqwest::StatusCode::CREATED);
    let job = job.expect("missing body");

    let finished = poll_until_terminal(&client, &base_url(), &job.id, 60)
        .await
        .expect("polling failed");
    assert_eq!(finished.status, "failed");
    assert_eq!(
        finished.error.as_deref(),
        Some("crop rectangle exceeds image bounds")
    );
    assert!(finished.cropped_image_url.is_none());
}
