use sqlx::PgPool;
use std::sync::Arc;

use crate::services::bus::PubSubClient;
use crate::services::processor::JobProcessor;

/// Shared state for the ingest API handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub bus: Arc<PubSubClient>,
}

impl AppState {
    pub fn new(db: PgPool, bus: PubSubClient) -> Self {
        Self {
            db,
            bus: Arc::new(bus),
        }
    }
}

/// Shared state for the worker handlers and poll loop.
#[derive(Clone)]
pub struct WorkerState {
    pub db: PgPool,
    pub processor: Arc<JobProcessor>,
}

impl WorkerState {
    pub fn new(db: PgPool, processor: JobProcessor) -> Self {
        Self {
            db,
            processor: Arc::new(processor),
        }
    }
}
