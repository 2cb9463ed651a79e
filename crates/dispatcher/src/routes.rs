//! Health, stats and notification status endpoints.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;

use chatpush_common::error::AppError;
use chatpush_notifier::store::RecordStore;

use crate::state::AppState;

/// Build the router serving `/health`, `/stats` and `/notifications/{id}`.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(stats))
        .route("/notifications/{id}", get(notification_status))
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "chatpush-dispatcher",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    let uptime = Utc::now() - state.started_at;
    Json(json!({
        "uptime_seconds": uptime.num_seconds(),
        "dispatch": state.stats.snapshot(),
    }))
}

/// Delivery state of one notification, for clients polling after a send.
async fn notification_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let record = state
        .store
        .fetch(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("notification {}", id)))?;

    Ok(Json(json!({
        "id": record.id,
        "status": record.status,
        "error": record.error,
        "message_id": record.message_id,
        "sent_at": record.sent_at,
    })))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    use chatpush_notifier::dispatcher::DispatchStats;
    use chatpush_notifier::store::PgRecordStore;

    use super::*;

    async fn get_json(path: &str) -> (StatusCode, serde_json::Value) {
        // Lazy pool: these routes never touch the database.
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://chatpush@localhost/unused")
            .unwrap();
        let state = AppState::new(Arc::new(DispatchStats::default()), PgRecordStore::new(pool));
        let response = create_router(state)
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = get_json("/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "chatpush-dispatcher");
    }

    #[tokio::test]
    async fn test_stats_start_at_zero() {
        let (status, body) = get_json("/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["dispatch"]["invocations"], 0);
        assert_eq!(body["dispatch"]["dead_lettered"], 0);
        assert!(body["uptime_seconds"].as_i64().unwrap() >= 0);
    }
}
