use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::db::queries;
use crate::db::StoreError;
use crate::services::bus::PubSubClient;

/// Drain unpublished outbox rows to the bus forever.
///
/// Safe to run in multiple instances: each tick leases a disjoint batch.
/// Rows are only marked published on a bus acknowledgement, so delivery is
/// at-least-once; a crash between publish and mark re-delivers next tick.
pub async fn run_publisher_loop(
    db: PgPool,
    bus: Arc<PubSubClient>,
    poll_interval: Duration,
    batch_size: i64,
) {
    loop {
        match drain_once(&db, &bus, batch_size).await {
            Ok(0) => sleep(poll_interval).await,
            Ok(published) => {
                tracing::debug!(published = published, "outbox batch drained");
            }
            Err(err) => {
                tracing::error!(error = %err, "outbox claim failed");
                sleep(poll_interval).await;
            }
        }
    }
}

/// Claim one batch and publish it; returns how many rows were acknowledged.
pub async fn drain_once(
    db: &PgPool,
    bus: &PubSubClient,
    batch_size: i64,
) -> Result<usize, StoreError> {
    let messages = queries::claim_outbox_batch(db, batch_size).await?;
    if messages.is_empty() {
        return Ok(0);
    }

    let mut published = 0;
    for msg in &messages {
        match bus.publish(&msg.payload).await {
            Ok(message_id) => {
                if let Err(err) = queries::mark_outbox_published(db, &msg.id).await {
                    tracing::error!(outbox_id = %msg.id, error = %err, "mark published failed");
                    continue;
                }
                metrics::counter!("outbox_published_total").increment(1);
                tracing::info!(
                    outbox_id = %msg.id,
                    job_id = %msg.job_id,
                    message_id = %message_id,
                    "outbox message published"
                );
                published += 1;
            }
            Err(err) => {
                metrics::counter!("outbox_publish_failures_total").increment(1);
                tracing::warn!(outbox_id = %msg.id, error = %err, "publish failed");
                // Row stays unpublished and will be re-claimed on a later tick.
                if let Err(record_err) =
                    queries::record_outbox_error(db, &msg.id, &err.to_string()).await
                {
                    tracing::error!(outbox_id = %msg.id, error = %record_err, "record outbox error failed");
                }
            }
        }
    }

    Ok(published)
}
