use axum::{
    body::Body,
    http::{
        Request,
        StatusCode,
    },
    Router,
};
use chrono::Utc;
use cucm_monitor_core::{
    model::{
        CallState,
        DeviceRecord,
        Node,
        RegistrationStatus,
    },
    BroadcastHub,
    Snapshot,
    SnapshotStore,
    SnapshotWriter,
};
use cucm_monitor_http::{
    create_router,
    serve,
    AppState,
};
use futures::{
    SinkExt,
    Stream,
    StreamExt,
};
use pretty_assertions::assert_eq;
use serde_json::{
    json,
    Value,
};
use std::time::Duration;
use tokio_tungstenite::{
    connect_async,
    tungstenite::Message,
};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

struct Harness {
    writer: SnapshotWriter,
    state: AppState,
}

impl Harness {
    fn new() -> Self {
        let (writer, store) = SnapshotStore::channel("cucm-pub.example.com");
        let hub = BroadcastHub::new(store.clone());
        Self {
            writer,
            state: AppState {
                store,
                hub,
                viewer_buffer: 8,
                shutdown: CancellationToken::new(),
            },
        }
    }

    fn router(&self) -> Router {
        create_router(self.state.clone())
    }
}

fn snapshot(total_active_calls: u64) -> Snapshot {
    let device = DeviceRecord {
        name: "SEP001122334455".to_string(),
        status: RegistrationStatus::Registered,
        ip_address: Some("10.0.0.5".to_string()),
        ..Default::default()
    }
    .into_device(CallState::OnCall);

    Snapshot {
        timestamp: Utc::now(),
        cucm_host: "cucm-pub.example.com".to_string(),
        total_devices: 1,
        registered_devices: 1,
        total_active_calls,
        devices: vec![device],
        nodes: vec![Node::probed("uat-clt-ucmpubc1.example.com", true)],
    }
}

async fn get_json(router: Router, uri: &str) -> (StatusCode, Value) {
    let response = router
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn health_reports_host() {
    let harness = Harness::new();
    let (status, body) = get_json(harness.router(), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "healthy", "cucm_host": "cucm-pub.example.com" }));
}

#[tokio::test]
async fn status_is_unavailable_until_first_snapshot() {
    let harness = Harness::new();
    harness.writer.record_failure("device registry returned HTTP 401 Unauthorized");

    let (status, body) = get_json(harness.router(), "/api/status").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], json!("Not connected to CUCM"));
    assert_eq!(body["connection_status"]["connected"], json!(false));
    assert_eq!(
        body["connection_status"]["last_error"],
        json!("device registry returned HTTP 401 Unauthorized")
    );

    let published = harness.writer.publish(snapshot(3));
    harness.writer.record_success(published.timestamp);

    let (status, body) = get_json(harness.router(), "/api/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_active_calls"], json!(3));
    assert_eq!(body["devices"][0]["call_status"], json!("on-call"));
    assert_eq!(body["nodes"][0]["short_name"], json!("ucmpubc1"));
    assert_eq!(serde_json::from_value::<Snapshot>(body).unwrap(), *published);
}

#[tokio::test]
async fn connection_endpoint_mirrors_store() {
    let harness = Harness::new();
    let (status, body) = get_json(harness.router(), "/api/connection").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "connected": false,
            "cucm_host": "cucm-pub.example.com",
            "last_error": null,
            "last_successful_poll": null,
        })
    );
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let harness = Harness::new();
    let response = harness
        .router()
        .oneshot(Request::builder().uri("/api/devices").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

async fn next_text<S>(ws: &mut S) -> String
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("viewer message in time")
        .expect("stream open")
        .expect("valid frame");
    message.to_text().unwrap().to_string()
}

async fn wait_for_no_viewers(hub: &BroadcastHub) {
    for _ in 0..100 {
        if hub.is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("viewer was not deregistered, {} left", hub.len());
}

fn calls(payload: &str) -> u64 {
    serde_json::from_str::<Snapshot>(payload).unwrap().total_active_calls
}

#[tokio::test]
async fn websocket_viewer_lifecycle() {
    let harness = Harness::new();
    harness.writer.publish(snapshot(2));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let server = tokio::spawn(serve(listener, harness.state.clone()));

    let (mut ws, _) = connect_async(format!("ws://{address}/ws")).await.unwrap();

    // Current snapshot right after connecting.
    assert_eq!(calls(&next_text(&mut ws).await), 2);
    assert_eq!(harness.state.hub.len(), 1);

    ws.send(Message::Text("ping".to_string().into())).await.unwrap();
    assert_eq!(next_text(&mut ws).await, "pong");

    ws.send(Message::Text("status".to_string().into())).await.unwrap();
    assert_eq!(calls(&next_text(&mut ws).await), 2);

    // Unknown text is ignored, the next frame is the broadcast.
    ws.send(Message::Text("hello".to_string().into())).await.unwrap();
    let report = harness.state.hub.broadcast(&harness.writer.publish(snapshot(5)));
    assert_eq!(report.delivered, 1);
    assert_eq!(calls(&next_text(&mut ws).await), 5);

    ws.close(None).await.unwrap();
    wait_for_no_viewers(&harness.state.hub).await;

    harness.state.shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn shutdown_closes_open_viewers() {
    let harness = Harness::new();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let server = tokio::spawn(serve(listener, harness.state.clone()));

    let (mut ws, _) = connect_async(format!("ws://{address}/ws")).await.unwrap();
    ws.send(Message::Text("ping".to_string().into())).await.unwrap();
    assert_eq!(next_text(&mut ws).await, "pong");

    harness.state.shutdown.cancel();
    let closing = tokio::time::timeout(Duration::from_secs(5), ws.next()).await.unwrap();
    assert!(matches!(closing, Some(Ok(Message::Close(_))) | None | Some(Err(_))));

    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    wait_for_no_viewers(&harness.state.hub).await;
}
