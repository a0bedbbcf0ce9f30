use base64::Engine;
use serde::Deserialize;
use std::time::Duration;

/// Bound on each publish round-trip; pacing beyond this is the caller's job.
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(2);

/// Pub/Sub client speaking the REST surface.
///
/// `cloud` mode targets the public endpoint with an optional bearer token;
/// `emulator` mode targets `PUBSUB_EMULATOR_HOST` and can self-provision the
/// topic and push subscription for local runs.
pub struct PubSubClient {
    http: reqwest::Client,
    base_url: String,
    project_id: String,
    topic: String,
    auth_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PublishResponse {
    #[serde(default, rename = "messageIds")]
    message_ids: Vec<String>,
}

impl PubSubClient {
    pub fn new(
        mode: &str,
        emulator_host: Option<&str>,
        project_id: &str,
        topic: &str,
        auth_token: Option<&str>,
    ) -> Result<Self, BusError> {
        let base_url = match mode {
            "emulator" => {
                let host = emulator_host
                    .ok_or_else(|| BusError::Config("PUBSUB_EMULATOR_HOST is required in emulator mode".into()))?;
                format!("http://{}", host.trim_end_matches('/'))
            }
            _ => "https://pubsub.googleapis.com".to_string(),
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(BusError::Http)?;

        Ok(Self {
            http,
            base_url,
            project_id: project_id.to_string(),
            topic: topic.to_string(),
            auth_token: auth_token.map(str::to_string),
        })
    }

    fn topic_path(&self) -> String {
        format!("projects/{}/topics/{}", self.project_id, self.topic)
    }

    fn with_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Publish one message; returns the bus-assigned message ID.
    ///
    /// The payload bytes on the wire are exactly the serialized JSON value.
    pub async fn publish(&self, payload: &serde_json::Value) -> Result<String, BusError> {
        let bytes = serde_json::to_vec(payload)?;
        let data = base64::engine::general_purpose::STANDARD.encode(bytes);
        let url = format!("{}/v1/{}:publish", self.base_url, self.topic_path());

        let response = self
            .with_auth(self.http.post(&url))
            .timeout(PUBLISH_TIMEOUT)
            .json(&serde_json::json!({ "messages": [{ "data": data }] }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BusError::Rejected(response.status().as_u16()));
        }

        let body: PublishResponse = response.json().await?;
        Ok(body.message_ids.into_iter().next().unwrap_or_default())
    }

    /// Check that the configured topic exists (readiness probe).
    pub async fn topic_exists(&self) -> Result<bool, BusError> {
        let url = format!("{}/v1/{}", self.base_url, self.topic_path());
        let response = self.with_auth(self.http.get(&url)).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(true)
        } else if status == reqwest::StatusCode::NOT_FOUND {
            Ok(false)
        } else {
            Err(BusError::Rejected(status.as_u16()))
        }
    }

    /// Create the topic if absent. Emulator startup only.
    pub async fn ensure_topic(&self) -> Result<(), BusError> {
        let url = format!("{}/v1/{}", self.base_url, self.topic_path());
        let response = self
            .with_auth(self.http.put(&url))
            .json(&serde_json::json!({}))
            .send()
            .await?;
        let status = response.status();
        if status.is_success() || status == reqwest::StatusCode::CONFLICT {
            Ok(())
        } else {
            Err(BusError::Rejected(status.as_u16()))
        }
    }

    /// Retry topic creation while the emulator comes up.
    pub async fn ensure_topic_with_retry(
        &self,
        attempts: u32,
        delay: Duration,
    ) -> Result<(), BusError> {
        let mut last_err = BusError::Config("no attempts made".into());
        for _ in 0..attempts {
            match self.ensure_topic().await {
                Ok(()) => return Ok(()),
                Err(err) => last_err = err,
            }
            tokio::time::sleep(delay).await;
        }
        Err(last_err)
    }

    /// Create a push subscription delivering to `push_endpoint` if absent.
    /// Emulator startup only.
    pub async fn ensure_push_subscription(
        &self,
        subscription: &str,
        push_endpoint: &str,
    ) -> Result<(), BusError> {
        let url = format!(
            "{}/v1/projects/{}/subscriptions/{}",
            self.base_url, self.project_id, subscription
        );
        let response = self
            .with_auth(self.http.put(&url))
            .json(&serde_json::json!({
                "topic": self.topic_path(),
                "pushConfig": { "pushEndpoint": push_endpoint },
            }))
            .send()
            .await?;
        let status = response.status();
        if status.is_success() || status == reqwest::StatusCode::CONFLICT {
            Ok(())
        } else {
            Err(BusError::Rejected(status.as_u16()))
        }
    }
}

/// Push-delivery envelope: the bus POSTs `{"message": {"data": <base64>}}`.
#[derive(Debug, Deserialize)]
pub struct PushEnvelope {
    pub message: PushMessage,
}

#[derive(Debug, Deserialize)]
pub struct PushMessage {
    #[serde(default)]
    pub data: String,
}

/// Decode the job reference out of a push envelope.
pub fn decode_job_id(envelope: &PushEnvelope) -> Result<String, BusError> {
    #[derive(Deserialize)]
    struct JobRef {
        #[serde(default, rename = "jobId")]
        job_id: String,
    }

    let raw = base64::engine::general_purpose::STANDARD
        .decode(&envelope.message.data)
        .map_err(|_| BusError::InvalidEnvelope)?;
    let payload: JobRef = serde_json::from_slice(&raw).map_err(|_| BusError::InvalidEnvelope)?;
    if payload.job_id.is_empty() {
        return Err(BusError::InvalidEnvelope);
    }
    Ok(payload.job_id)
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("bus configuration error: {0}")]
    Config(String),

    #[error("bus request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("bus rejected request: status {0}")]
    Rejected(u16),

    #[error("invalid push envelope")]
    InvalidEnvelope,

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
