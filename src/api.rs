use anyhow::{Context, Result};
use axum::{extract::State, routing::get, Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::models::Snapshot;
use crate::registry::MonitorRegistry;

pub type SharedRegistry = Arc<Mutex<MonitorRegistry>>;

pub async fn get_status(State(registry): State<SharedRegistry>) -> Json<Snapshot> {
    let registry = registry.lock().await;
    Json(registry.snapshot())
}

pub fn create_router(registry: SharedRegistry) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .with_state(registry)
}

pub async fn start_server(port: u16, registry: SharedRegistry) -> Result<()> {
    let app = create_router(registry);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind status API on port {}", port))?;
    info!("Status API: http://localhost:{}/api/status", addr.port());
    axum::serve(listener, app).await.context("Status API server failed")
}
