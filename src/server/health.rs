//! Health Check API
//!
//! Backend reachability for monitoring, plus a liveness probe and a small
//! service info document.

use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use crate::gateway::{HealthReport, RequestGateway};

/// State shared by every handler
pub struct AppState {
    pub gateway: Arc<RequestGateway>,
    /// Server start time for uptime calculation
    pub start_time: Instant,
    pub version: &'static str,
}

impl AppState {
    pub fn new(gateway: Arc<RequestGateway>) -> Self {
        Self {
            gateway,
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    #[serde(flatten)]
    pub report: HealthReport,
    pub version: &'static str,
    pub uptime_secs: u64,
    /// ISO 8601
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct InfoResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub endpoints: [&'static str; 6],
}

/// Probe every backend
///
/// Always 200; `status` says `healthy` or `degraded`.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        report: state.gateway.health().await,
        version: state.version,
        uptime_secs: state.uptime_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Liveness probe
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

pub async fn info(State(state): State<Arc<AppState>>) -> Json<InfoResponse> {
    Json(InfoResponse {
        service: "llm-orchestrator",
        version: state.version,
        endpoints: [
            "POST /v1/chat/completions",
            "POST /query",
            "POST /embed",
            "POST /index",
            "GET /health",
            "GET /healthz",
        ],
    })
}

pub fn health_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(info))
        .route("/health", get(health_check))
        .route("/healthz", get(liveness))
        .with_state(state)
}
