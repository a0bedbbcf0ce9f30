//! Helpers for end-to-end tests driving a running pipeline over HTTP.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;

/// Response shape shared by job creation and status polling.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    pub id: String,
    pub status: String,
    pub cropped_image_url: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Submit a crop request; returns the HTTP status and parsed body.
pub async fn submit_crop_job(
    client: &reqwest::Client,
    base_url: &str,
    body: &serde_json::Value,
    idempotency_key: Option<&str>,
) -> Result<(reqwest::StatusCode, Option<JobResponse>), Box<dyn std::error::Error>> {
    let mut request = client
        .post(format!("{base_url}/jobs/image-crop"))
        .json(body);
    if let Some(key) = idempotency_key {
        request = request.header("Idempotency-Key", key);
    }

    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
        Ok((status, Some(response.json::<JobResponse>().await?)))
    } else {
        Ok((status, None))
    }
}

/// Poll job status until it reaches a terminal state (with timeout).
pub async fn poll_until_terminal(
    client: &reqwest::Client,
    base_url: &str,
    job_id: &str,
    timeout_secs: u64,
) -> Result<JobResponse, Box<dyn std::error::Error>> {
    let max_attempts = timeout_secs * 2; // poll every 500ms

    for _ in 0..max_attempts {
        let response = client
            .get(format!("{base_url}/jobs/{job_id}"))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(format!("status check failed: {}", response.status()).into());
        }

        let job = response.json::<JobResponse>().await?;
        match job.status.as_str() {
            "done" | "failed" => return Ok(job),
            "pending" | "in_progress" => sleep(Duration::from_millis(500)).await,
            other => return Err(format!("unknown job status: {other}").into()),
        }
    }

    Err(format!("job {job_id} did not finish within {timeout_secs} seconds").into())
}

/// Serve a generated PNG from an ephemeral local port; returns its URL.
///
/// The worker must be able to reach this address, so e2e runs assume the
/// whole stack shares a network namespace with the test process.
pub async fn serve_test_image(width: u32, height: u32) -> String {
    use axum::http::header;
    use axum::routing::get;

    let mut img = image::RgbaImage::new(width, height);
    for (x, y, pixel) in img.enumerate_pixels_mut() {
        *pixel = image::Rgba([(x * 20 % 256) as u8, (y * 20 % 256) as u8, 200, 255]);
    }
    let mut buf = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut buf, image::ImageFormat::Png)
        .expect("png encode failed");
    let data = buf.into_inner();

    let app = axum::Router::new().route(
        "/source.png",
        get(move || {
            let data = data.clone();
            async move { ([(header::CONTENT_TYPE, "image/png")], data) }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind failed");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    format!("http://{addr}/source.png")
}
