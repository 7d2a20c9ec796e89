use crate::{
    error::AppError,
    router::AppState,
};
use axum::{
    extract::{
        ws::{
            Message,
            WebSocket,
            WebSocketUpgrade,
        },
        State,
    },
    response::Response,
};
use cucm_monitor_core::ViewerId;
use eyre::Result;
use futures::{
    sink::SinkExt,
    stream::{
        SplitSink,
        SplitStream,
        StreamExt,
    },
};
use std::sync::Arc;
use tokio::sync::mpsc;

pub async fn handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (queue_tx, queue_rx) = mpsc::channel::<Arc<str>>(state.viewer_buffer);
    let viewer = state.hub.register(queue_tx);

    let (mut sender, receiver) = socket.split();

    tokio::select! {
        _ = state.shutdown.cancelled() => {
            debug!(%viewer, "Closing viewer for shutdown");
            sender
                .send(Message::Close(None))
                .await
                .unwrap_or_else(|e| trace!(%viewer, "Failed to send close frame: {e}"));
        }
        result = handle_socket_inner(viewer, &mut sender, receiver, queue_rx, &state) => {
            if let Err(e) = result {
                warn!(%viewer, "Error handling WebSocket connection: {e}");
                sender
                    .send(AppError::Socket(e).into_message())
                    .await
                    .unwrap_or_else(|e| trace!(%viewer, "Failed to send error message: {e}"));
            }
        }
    }

    state.hub.deregister(viewer);
}

async fn handle_socket_inner(
    viewer: ViewerId,
    sender: &mut SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut queue: mpsc::Receiver<Arc<str>>,
    state: &AppState,
) -> Result<()> {
    loop {
        tokio::select! {
            outbound = queue.recv() => {
                match outbound {
                    Some(payload) => sender.send(Message::Text(payload.to_string().into())).await?,
                    None => {
                        // The hub dropped this viewer because it fell behind.
                        info!(%viewer, "Viewer queue closed");
                        sender.send(Message::Close(None)).await?;
                        return Ok(());
                    }
                }
            },
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => match text.as_str().trim() {
                        "ping" => sender.send(Message::Text("pong".into())).await?,
                        "status" => {
                            if let Some(snapshot) = state.store.snapshot() {
                                let json = serde_json::to_string(&*snapshot)?;
                                sender.send(Message::Text(json.into())).await?;
                            }
                        }
                        other => trace!(%viewer, message = other, "Ignoring viewer message"),
                    },
                    Some(Ok(Message::Ping(ping))) => sender.send(Message::Pong(ping)).await?,
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(%viewer, "WebSocket connection closed by viewer");
                        return Ok(());
                    }
                    Some(Ok(Message::Binary(_) | Message::Pong(_))) => {}
                    Some(Err(e)) => return Err(e.into()),
                }
            },
        }
    }
}
