use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

pub mod queries;

/// Initialize the PostgreSQL connection pool.
pub async fn init_pool(dsn: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(dsn)
        .await
}

/// Apply pending schema migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

/// Current UTC time as a fixed-width ISO-8601 string.
///
/// Microsecond precision keeps the encoding fixed-width, so lexicographic
/// order on stored timestamps agrees with chronological order.
pub fn now_iso() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Errors surfaced by job-store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("idempotency key reused with a different request body")]
    IdempotencyConflict,

    #[error("job row carries unknown status {0:?}")]
    UnknownStatus(String),

    #[error("idempotency record references missing job {0}")]
    MissingJob(String),

    #[error("job {0} has no outbox row")]
    MissingOutbox(String),
}
