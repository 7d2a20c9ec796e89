use axum::{
    extract::ws::Message,
    http::StatusCode,
    response::{
        IntoResponse,
        Response,
    },
    Json,
};
use cucm_monitor_core::ConnectionStatus;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Not connected to CUCM")]
    NotConnected(ConnectionStatus),
    #[error("Handling the websocket connection failed: {0}")]
    Socket(eyre::Report),
}

impl AppError {
    pub fn into_message(self) -> Message {
        Message::Text(serde_json::json!({ "error": self.to_string() }).to_string().into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::NotConnected(ref connection_status) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "error": self.to_string(),
                    "connection_status": connection_status,
                })),
            )
                .into_response(),
            AppError::Socket(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": self.to_string() })),
            )
                .into_response(),
        }
    }
}
