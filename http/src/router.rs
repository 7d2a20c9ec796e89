use crate::{
    status,
    viewer,
};
use axum::{
    routing::get,
    Router,
};
use cucm_monitor_core::{
    BroadcastHub,
    SnapshotStore,
};
use eyre::Result;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct AppState {
    pub store: SnapshotStore,
    pub hub: BroadcastHub,
    /// Snapshots queued per viewer before the hub gives up on it.
    pub viewer_buffer: usize,
    pub shutdown: CancellationToken,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(status::health))
        .route("/api/status", get(status::snapshot))
        .route("/api/connection", get(status::connection))
        .route("/ws", get(viewer::handler))
        .with_state(state)
}

/// Serves the dashboard API until the shutdown token is cancelled. Open viewer
/// connections are closed by their own tasks once the token fires.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    let shutdown = state.shutdown.clone();
    info!("Dashboard API listening on http://{}", listener.local_addr()?);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Dashboard API stopped");
    Ok(())
}
