use crate::{
    error::AppError,
    router::AppState,
};
use axum::{
    extract::State,
    response::{
        IntoResponse,
        Response,
    },
    Json,
};
use cucm_monitor_core::ConnectionStatus;

pub async fn health(State(state): State<AppState>) -> Response {
    Json(serde_json::json!({
        "status": "healthy",
        "cucm_host": state.store.connection_status().cucm_host,
    }))
    .into_response()
}

/// The latest snapshot, or 503 with the connection status until the first poll succeeds.
pub async fn snapshot(State(state): State<AppState>) -> Result<Response, AppError> {
    match state.store.snapshot() {
        Some(snapshot) => Ok(Json(&*snapshot).into_response()),
        None => Err(AppError::NotConnected(state.store.connection_status())),
    }
}

pub async fn connection(State(state): State<AppState>) -> Json<ConnectionStatus> {
    Json(state.store.connection_status())
}
