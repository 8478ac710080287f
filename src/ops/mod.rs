//! Operator HTTP surface
//!
//! A small read-only server started next to the worker:
//!
//! | Route | Description |
//! |-------|-------------|
//! | `GET /health` | Liveness plus worker state |
//! | `GET /metrics` | Prometheus text exposition |
//! | `GET /api/quota` | Per-project quota status |
//! | `GET /api/dashboard` | Upload counts and account totals |
//! | `GET /api/uploads/{id}/history` | Audit trail of one upload |

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::error::Error;
use crate::service::SchedulingService;

// ============================================================================
// State
// ============================================================================

/// Shared state behind every handler
#[derive(Clone)]
pub struct OpsState {
    pub service: Arc<SchedulingService>,
    /// Set while the worker loop is running
    pub worker_running: Arc<AtomicBool>,
    pub start_time: Instant,
}

impl OpsState {
    pub fn new(service: Arc<SchedulingService>) -> Self {
        Self {
            service,
            worker_running: Arc::new(AtomicBool::new(false)),
            start_time: Instant::now(),
        }
    }

    pub fn set_worker_running(&self, running: bool) {
        self.worker_running.store(running, Ordering::SeqCst);
    }
}

/// Errors starting or running the ops server
#[derive(Debug, thiserror::Error)]
pub enum OpsError {
    #[error("Failed to bind ops server: {0}")]
    Bind(String),

    #[error("Ops server error: {0}")]
    Serve(String),
}

// ============================================================================
// Responses
// ============================================================================

/// Generic API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub worker_running: bool,
    pub timestamp: String,
}

fn error_status(err: &Error) -> StatusCode {
    match err {
        Error::NotFound { .. } => StatusCode::NOT_FOUND,
        Error::InvalidScheduleRequest { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond<T: Serialize>(result: crate::error::Result<T>) -> (StatusCode, Json<ApiResponse<T>>) {
    match result {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::success(data))),
        Err(e) => {
            tracing::warn!(error = %e, "Ops request failed");
            (error_status(&e), Json(ApiResponse::error(e.to_string())))
        }
    }
}

// ============================================================================
// Router
// ============================================================================

pub fn create_router(state: OpsState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/api/quota", get(quota))
        .route("/api/dashboard", get(dashboard))
        .route("/api/uploads/{id}/history", get(upload_history))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves
pub async fn serve(
    addr: SocketAddr,
    state: OpsState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), OpsError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| OpsError::Bind(e.to_string()))?;

    tracing::info!(%addr, "Ops server listening");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| OpsError::Serve(e.to_string()))?;

    tracing::info!("Ops server shutdown complete");
    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

async fn health(State(state): State<OpsState>) -> impl IntoResponse {
    let worker_running = state.worker_running.load(Ordering::SeqCst);
    Json(HealthResponse {
        status: if worker_running { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.start_time.elapsed().as_secs(),
        worker_running,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

async fn metrics() -> impl IntoResponse {
    match crate::metrics::encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain")],
            format!("failed to encode metrics: {e}"),
        ),
    }
}

async fn quota(State(state): State<OpsState>) -> impl IntoResponse {
    respond(state.service.quota_status())
}

async fn dashboard(State(state): State<OpsState>) -> impl IntoResponse {
    respond(state.service.dashboard_metrics())
}

async fn upload_history(
    State(state): State<OpsState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let result = Uuid::parse_str(&id)
        .map_err(|e| Error::invalid_schedule(format!("invalid upload id '{id}': {e}")))
        .and_then(|id| {
            state.service.get_upload(id)?;
            state.service.upload_history(id)
        });
    respond(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::SchedulePlanner;
    use crate::service::ServiceConfig;
    use crate::storage::MemoryStore;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn state() -> OpsState {
        let service = SchedulingService::new(
            Arc::new(MemoryStore::new()),
            SchedulePlanner::seeded(30, 1),
            ServiceConfig::default(),
        )
        .unwrap();
        service.create_project("main", Some(10_000)).unwrap();
        OpsState::new(Arc::new(service))
    }

    async fn get_json(state: OpsState, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = create_router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health_reflects_worker_state() {
        let state = state();
        let (status, body) = get_json(state.clone(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "degraded");

        state.set_worker_running(true);
        let (_, body) = get_json(state, "/health").await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["worker_running"], true);
    }

    #[tokio::test]
    async fn test_quota_endpoint() {
        let (status, body) = get_json(state(), "/api/quota").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["total_quota"], 10_000);
        assert_eq!(body["data"]["uploads_remaining"], 6);
    }

    #[tokio::test]
    async fn test_dashboard_endpoint() {
        let (status, body) = get_json(state(), "/api/dashboard").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["total_uploads"], 0);
        assert_eq!(body["data"]["uploads_by_status"]["scheduled"], 0);
    }

    #[tokio::test]
    async fn test_history_unknown_upload_is_404() {
        let uri = format!("/api/uploads/{}/history", Uuid::new_v4());
        let (status, body) = get_json(state(), &uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_history_bad_id_is_400() {
        let (status, _) = get_json(state(), "/api/uploads/nope/history").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_serves_text() {
        let _ = crate::metrics::init_metrics();
        let response = create_router(state())
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
