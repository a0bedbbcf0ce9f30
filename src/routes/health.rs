use axum::extract::State;
use axum::http::StatusCode;
use std::time::Duration;

use crate::app_state::AppState;

const READINESS_TIMEOUT: Duration = Duration::from_secs(2);

/// GET /healthz — liveness.
pub async fn healthz() -> &'static str {
    "ok"
}

/// GET /readyz — readiness for the ingest API: store reachable and the bus
/// topic resolvable, both within two seconds.
pub async fn readyz(State(state): State<AppState>) -> (StatusCode, &'static str) {
    let check = async {
        sqlx::query("SELECT 1")
            .execute(&state.db)
            .await
            .map_err(|err| err.to_string())?;
        state
            .bus
            .topic_exists()
            .await
            .map_err(|err| err.to_string())?;
        Ok::<(), String>(())
    };

    match tokio::time::timeout(READINESS_TIMEOUT, check).await {
        Ok(Ok(())) => (StatusCode::OK, "ok"),
        Ok(Err(reason)) => {
            tracing::warn!(reason = %reason, "readiness check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "not ready")
        }
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "not ready"),
    }
}

/// Readiness handler for binaries whose only dependency is the store.
pub async fn readyz_db(State(db): State<sqlx::PgPool>) -> (StatusCode, &'static str) {
    match tokio::time::timeout(READINESS_TIMEOUT, sqlx::query("SELECT 1").execute(&db)).await {
        Ok(Ok(_)) => (StatusCode::OK, "ok"),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "not ready"),
    }
}
