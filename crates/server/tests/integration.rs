use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use base64::{engine::general_purpose::STANDARD, Engine};
use docflow_broker::{Broker, BrokerConfig};
use docflow_server::pipeline::StubAnalyzer;
use docflow_server::{create_app, AppState, ServerConfig};
use futures_util::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Helper to make a request to the app.
async fn request(
    state: &Arc<AppState>,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);

    let body = if let Some(json) = body {
        builder = builder.header("content-type", "application/json");
        Body::from(serde_json::to_string(&json).unwrap())
    } else {
        Body::empty()
    };

    let response = create_app(state.clone())
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn state_with(stub_latency: Duration, heartbeat_interval: Duration) -> Arc<AppState> {
    let (broker, _) = Broker::in_memory(BrokerConfig::default());
    AppState::new(
        broker,
        Arc::new(StubAnalyzer::new(stub_latency)),
        ServerConfig {
            heartbeat_interval,
            stub_latency,
        },
    )
}

async fn spawn_server(state: Arc<AppState>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_app(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr, job_id: &str) -> WsStream {
    let (ws, _) = connect_async(format!("ws://{addr}/ws/progress/{job_id}"))
        .await
        .expect("websocket connect");
    ws
}

/// Next text frame as JSON, heartbeats included.
async fn next_frame(ws: &mut WsStream) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Next job event, skipping heartbeats.
async fn next_event(ws: &mut WsStream) -> Value {
    loop {
        let frame = next_frame(ws).await;
        if frame.get("type") != Some(&json!("ping")) {
            return frame;
        }
    }
}

async fn submit(state: &Arc<AppState>, job_id: &str, content: &str) {
    let (status, body) = request(
        state,
        "POST",
        "/api/jobs",
        Some(json!({
            "file_name": "receipt.txt",
            "content": STANDARD.encode(content),
            "message": "office supplies",
            "job_id": job_id,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED, "submit failed: {body}");
}

async fn wait_until_finished(state: &Arc<AppState>, job_id: &str) {
    for _ in 0..500 {
        if !state.broker.is_running(job_id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} did not finish");
}

#[tokio::test]
async fn health_check() {
    let state = AppState::for_testing(Duration::ZERO);
    let (status, body) = request(&state, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["active_jobs"], 0);
}

#[tokio::test]
async fn duplicate_running_job_is_409() {
    let state = AppState::for_testing(Duration::ZERO);
    state
        .broker
        .start(Some("busy".into()), |ctx| async move {
            ctx.cancelled().await;
            Ok(())
        })
        .unwrap();

    let (status, body) = request(
        &state,
        "POST",
        "/api/jobs",
        Some(json!({"file_name": "a.txt", "content": STANDARD.encode("x"), "job_id": "busy"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Job already running");

    let (_, jobs) = request(&state, "GET", "/api/jobs", None).await;
    assert_eq!(jobs[0]["job_id"], "busy");
}

#[tokio::test]
async fn late_subscriber_replays_buffer_then_persisted_result() {
    let state = state_with(Duration::ZERO, Duration::from_secs(15));
    let addr = spawn_server(state.clone()).await;

    submit(&state, "inv-1", "Pens x3\nStapler").await;
    wait_until_finished(&state, "inv-1").await;

    let mut ws = connect(addr, "inv-1").await;
    let mut names = Vec::new();
    loop {
        let event = next_event(&mut ws).await;
        assert_eq!(event["job_id"], "inv-1");
        let name = event["event"].as_str().unwrap().to_string();
        names.push(name.clone());
        if name == "ANALYSIS_COMPLETE" {
            assert_eq!(event["file_name"], "receipt.txt");
            assert!(event["ai_result"].is_array());
            break;
        }
    }
    assert_eq!(
        names,
        vec!["DOC_RECEIVED", "OCR_PROCESSING", "AI_THINKING", "ANALYSIS_COMPLETE"]
    );
    ws.close(None).await.ok();

    // Buffer is drained; a reconnect falls back to the stored result.
    let mut ws = connect(addr, "inv-1").await;
    let event = next_event(&mut ws).await;
    assert_eq!(event["event"], "ANALYSIS_COMPLETE");
    assert_eq!(event["replayed"], true);
    assert_eq!(event["result"]["items"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn cancel_reaches_live_subscriber() {
    let state = state_with(Duration::from_secs(60), Duration::from_secs(15));
    let addr = spawn_server(state.clone()).await;

    submit(&state, "inv-2", "Pens x3").await;
    let mut ws = connect(addr, "inv-2").await;
    assert_eq!(next_event(&mut ws).await["event"], "DOC_RECEIVED");
    assert_eq!(next_event(&mut ws).await["event"], "OCR_PROCESSING");

    let (status, body) = request(&state, "POST", "/api/jobs/inv-2/cancel", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancel_requested");

    let event = next_event(&mut ws).await;
    assert_eq!(event["event"], "CANCELED");
    assert_eq!(event["reason"], "canceled");
    wait_until_finished(&state, "inv-2").await;
}

#[tokio::test]
async fn heartbeat_pings_idle_socket() {
    let state = state_with(Duration::ZERO, Duration::from_millis(100));
    let addr = spawn_server(state).await;

    let mut ws = connect(addr, "quiet").await;
    assert_eq!(next_frame(&mut ws).await, json!({"type": "ping"}));
}

#[tokio::test]
async fn zero_heartbeat_interval_still_pings() {
    let state = state_with(Duration::ZERO, Duration::ZERO);
    let addr = spawn_server(state).await;

    let mut ws = connect(addr, "quiet").await;
    assert_eq!(next_frame(&mut ws).await, json!({"type": "ping"}));
    // The socket survives and keeps streaming.
    assert_eq!(next_frame(&mut ws).await, json!({"type": "ping"}));
}

#[tokio::test]
async fn newer_subscriber_takes_over() {
    let state = state_with(Duration::ZERO, Duration::from_secs(15));
    let addr = spawn_server(state.clone()).await;

    let mut first = connect(addr, "J").await;
    wait_for_subscriber(&state, "J").await;
    let mut second = connect(addr, "J").await;
    // Let the second attach land before emitting.
    tokio::time::sleep(Duration::from_millis(100)).await;

    state.broker.emit("J", "AI_THINKING", &json!({"items_count": 1})).unwrap();
    let event = next_event(&mut second).await;
    assert_eq!(event["event"], "AI_THINKING");
    assert_eq!(event["items_count"], 1);

    // The displaced socket is closed rather than fed.
    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(msg) = first.next().await {
            match msg {
                Ok(Message::Text(text)) => panic!("displaced socket got {text:?}"),
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok());
    assert!(state.broker.has_subscriber("J"));
}

async fn wait_for_subscriber(state: &Arc<AppState>, job_id: &str) {
    for _ in 0..500 {
        if state.broker.has_subscriber(job_id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no subscriber for {job_id}");
}
