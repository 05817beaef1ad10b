//! HTTP server setup for the peer surface.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::api;
use crate::config::Config;
use crate::state::AppState;

/// Inbox notices are small JSON documents.
const MAX_NOTICE_BODY: usize = 64 * 1024;

/// Routes of the peer surface, without the trace layer.
pub fn build_router(state: Arc<AppState>) -> Router {
    let federation = Router::new()
        .route("/pullable-packages", get(api::pullable_packages))
        .route("/download-package/{package_id}", get(api::download_package))
        .route("/download-icon/{package_id}", get(api::download_icon))
        .route("/download-demo/{package_id}", get(api::download_demo))
        .route(
            "/inbox-message",
            post(api::inbox_message).layer(DefaultBodyLimit::max(MAX_NOTICE_BODY)),
        );

    Router::new()
        .route("/health", get(api::health))
        .nest("/api/v1/federation", federation)
        .with_state(state)
}

pub async fn run_server(config: Config) -> Result<()> {
    let host = config.server.host.clone();
    let port = config.server.port;

    std::fs::create_dir_all(&config.storage.data_dir)?;
    std::fs::create_dir_all(config.staging_dir())?;
    info!(
        data_dir = %config.storage.data_dir.display(),
        store_id = %config.store.store_id,
        peers = config.federation.peers.len(),
        test_gate = config.test_gate.enabled,
        "Starting app store engine"
    );

    let state = Arc::new(AppState::from_config(config)?);
    let app = build_router(state).layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{host}:{port}").parse().map_err(|e| {
        error!(host = %host, port = %port, error = %e, "Invalid socket address");
        anyhow::anyhow!("Invalid socket address {host}:{port}: {e}")
    })?;

    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        error!(addr = %addr, error = %e, "Failed to bind to address");
        anyhow::anyhow!("Failed to bind to {addr}: {e}")
    })?;

    info!(addr = %addr, "Server listening");
    axum::serve(listener, app).await.map_err(|e| {
        error!(error = %e, "Server error");
        anyhow::anyhow!("Server error: {e}")
    })?;

    Ok(())
}
