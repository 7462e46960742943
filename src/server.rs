//! Liveness endpoint.
//!
//! The server never touches the sync engine. The scheduler writes into a
//! shared [`HealthState`] and the handler only reads it.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Scheduler and AI status, last completed sync, version |
//!
//! # Status
//!
//! | `status` | HTTP | Condition |
//! |----------|------|-----------|
//! | `ok` | 200 | scheduler running, AI reachable |
//! | `degraded` | 200 | scheduler running, AI unreachable (listings use the fallback) |
//! | `error` | 503 | scheduler not running |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Process health shared between the scheduler and the HTTP handler.
#[derive(Debug, Default)]
pub struct HealthState {
    scheduler_running: AtomicBool,
    ai_reachable: AtomicBool,
    /// Unix milliseconds of the last completed run; 0 before the first one.
    last_sync_ms: AtomicI64,
}

impl HealthState {
    pub fn new(ai_reachable: bool) -> Self {
        Self {
            scheduler_running: AtomicBool::new(false),
            ai_reachable: AtomicBool::new(ai_reachable),
            last_sync_ms: AtomicI64::new(0),
        }
    }

    pub fn set_scheduler_running(&self, running: bool) {
        self.scheduler_running.store(running, Ordering::SeqCst);
    }

    pub fn scheduler_running(&self) -> bool {
        self.scheduler_running.load(Ordering::SeqCst)
    }

    pub fn set_ai_reachable(&self, reachable: bool) {
        self.ai_reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn ai_reachable(&self) -> bool {
        self.ai_reachable.load(Ordering::SeqCst)
    }

    /// Record a finished run. `ai_reachable` is `None` when the run made no AI call.
    pub fn record_sync(&self, at: DateTime<Utc>, ai_reachable: Option<bool>) {
        self.last_sync_ms.store(at.timestamp_millis(), Ordering::SeqCst);
        if let Some(reachable) = ai_reachable {
            self.set_ai_reachable(reachable);
        }
    }

    pub fn last_sync_at(&self) -> Option<DateTime<Utc>> {
        match self.last_sync_ms.load(Ordering::SeqCst) {
            0 => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }

    pub fn status(&self) -> HealthStatus {
        if !self.scheduler_running() {
            HealthStatus::Error
        } else if !self.ai_reachable() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Ok
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
    Error,
}

/// JSON body of `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub scheduler_running: bool,
    pub ai_reachable: bool,
    pub last_sync_at: Option<String>,
    pub version: String,
}

pub fn router(health: Arc<HealthState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(health)
}

/// Serve the health endpoint on `bind` until the process exits.
pub async fn run_health_server(bind: &str, health: Arc<HealthState>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("Health endpoint listening on http://{}/health", bind);
    axum::serve(listener, router(health)).await?;
    Ok(())
}

async fn handle_health(State(health): State<Arc<HealthState>>) -> (StatusCode, Json<HealthResponse>) {
    let status = health.status();
    let code = match status {
        HealthStatus::Error => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };

    (
        code,
        Json(HealthResponse {
            status,
            scheduler_running: health.scheduler_running(),
            ai_reachable: health.ai_reachable(),
            last_sync_at: health.last_sync_at().map(|t| t.to_rfc3339()),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_matrix() {
        let health = HealthState::new(true);
        assert_eq!(health.status(), HealthStatus::Error);

        health.set_scheduler_running(true);
        assert_eq!(health.status(), HealthStatus::Ok);

        health.set_ai_reachable(false);
        assert_eq!(health.status(), HealthStatus::Degraded);
    }

    #[test]
    fn test_record_sync_keeps_ai_flag_when_unknown() {
        let health = HealthState::new(false);
        assert!(health.last_sync_at().is_none());

        let at = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        health.record_sync(at, None);
        assert_eq!(health.last_sync_at(), Some(at));
        assert!(!health.ai_reachable());

        health.record_sync(at, Some(true));
        assert!(health.ai_reachable());
    }

    #[tokio::test]
    async fn test_handler_returns_503_when_scheduler_stopped() {
        let health = Arc::new(HealthState::new(true));

        let (code, Json(body)) = handle_health(State(health.clone())).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.status, HealthStatus::Error);

        health.set_scheduler_running(true);
        let (code, Json(body)) = handle_health(State(health)).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body.status, HealthStatus::Ok);
        assert_eq!(body.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_response_serializes_lowercase_status() {
        let body = HealthResponse {
            status: HealthStatus::Degraded,
            scheduler_running: true,
            ai_reachable: false,
            last_sync_at: None,
            version: "0.1.0".into(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["status"], "degraded");
        assert!(json["last_sync_at"].is_null());
    }
}
