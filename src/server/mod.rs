//! HTTP Server
//!
//! Axum server with CORS, optional request tracing and graceful shutdown.
//!
//! Routes:
//! - POST /v1/chat/completions - OpenAI-compatible chat with memory, reasoning and routing
//! - POST /query - single-turn query with optional retrieval
//! - POST /embed - embeddings for a list of texts
//! - POST /index - add documents to the knowledge collection
//! - GET /health - reachability of every backend
//! - GET /healthz - liveness probe
//! - GET / - service info

pub mod api;
pub mod health;

use anyhow::Result;
use axum::{
    http::{header, Method},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::gateway::RequestGateway;
pub use api::api_router;
pub use health::{health_router, AppState};

/// Build the full router over a gateway
pub fn app(gateway: Arc<RequestGateway>, log_requests: bool) -> Router {
    let state = Arc::new(AppState::new(gateway));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let mut router = Router::new()
        .merge(api_router(state.clone()))
        .merge(health_router(state))
        .layer(cors);

    if log_requests {
        router = router.layer(TraceLayer::new_for_http());
    }

    router
}

/// Orchestrator HTTP server
pub struct Server {
    addr: SocketAddr,
    router: Router,
}

impl Server {
    pub fn new(addr: SocketAddr, gateway: Arc<RequestGateway>, log_requests: bool) -> Self {
        Self {
            addr,
            router: app(gateway, log_requests),
        }
    }

    /// Serve until Ctrl+C or SIGTERM
    ///
    /// Dropped connections drop their handler futures, which cancels any
    /// in-flight backend calls for that request.
    pub async fn run(self) -> Result<()> {
        info!("Starting orchestrator on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("Orchestrator shut down gracefully");
        Ok(())
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
