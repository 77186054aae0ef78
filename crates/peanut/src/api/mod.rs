//! HTTP surface: history, manual trigger and metrics.
//!
//! - `GET /latest` - latest sealed run (204 before the first)
//! - `GET /history` - retained runs, oldest first
//! - `POST /api/v1/sync` - request a reconciliation
//! - `GET /metrics` - Prometheus exposition

pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use prometheus::Registry;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::gitops::sync_scheduler::{ShutdownSignal, SyncTrigger};
use crate::history::SyncHistoryRing;

pub use error::{ApiError, ProblemDetails};

/// Shared handler state. Handlers only read history and fire triggers; they
/// never touch the working copy.
#[derive(Clone)]
pub struct ApiState {
    pub history: Arc<SyncHistoryRing>,
    pub trigger: SyncTrigger,
    pub registry: Registry,
}

/// Builds the router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/latest", get(routes::latest))
        .route("/history", get(routes::history))
        .route("/api/v1/sync", post(routes::trigger_sync))
        .route("/metrics", get(routes::metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves until the shutdown signal fires, then drains connections.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    mut shutdown: ShutdownSignal,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        log::info!("HTTP server listening on {}", addr);
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await?;
    log::info!("HTTP server stopped");
    Ok(())
}
