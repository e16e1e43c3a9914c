// crates/server/src/routes/ws.rs
//! Progress WebSocket: one job's ordered event stream.
//!
//! The socket is split. A forwarding task drains the connection's event
//! channel to the sink and interleaves heartbeats; the handler itself only
//! reads, waiting for the client to go away. When the broker lets go of the
//! connection (replaced by a newer subscriber, or the job was reaped) the
//! channel closes and the forwarding task closes the socket.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use docflow_broker::{Broker, Connection, ConnectionId, Frame, JobEvent};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::Receiver;

use crate::state::AppState;

/// Detaches the subscriber however the handler exits.
struct SubscriberGuard {
    broker: Broker,
    job_id: String,
    conn_id: ConnectionId,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.broker.detach(&self.job_id, self.conn_id);
        tracing::debug!(
            job_id = %self.job_id,
            connection = self.conn_id,
            "SubscriberGuard dropped, subscriber detached"
        );
    }
}

/// Build the progress WebSocket sub-router.
///
/// Routes:
/// - `WS /progress/{id}` - live and replayed events for one job
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/progress/{id}", get(ws_progress_handler))
}

async fn ws_progress_handler(
    ws: WebSocketUpgrade,
    Path(job_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_progress_socket(socket, job_id, state))
}

async fn handle_progress_socket(socket: WebSocket, job_id: String, state: Arc<AppState>) {
    let (sink, mut stream) = socket.split();
    let (conn, rx) = Connection::channel(state.broker.config().max_buffered_events);
    let conn_id = conn.id();

    let mut forward_task = tokio::spawn(forward_frames(
        sink,
        rx,
        state.config.heartbeat_interval,
    ));

    let _guard = SubscriberGuard {
        broker: state.broker.clone(),
        job_id: job_id.clone(),
        conn_id,
    };
    let outcome = state.broker.attach(&job_id, conn).await;
    tracing::info!(
        job_id = %job_id,
        connection = conn_id,
        outcome = ?outcome,
        "Progress WebSocket connected"
    );

    loop {
        tokio::select! {
            _ = &mut forward_task => break,
            msg = stream.next() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // Client messages carry no meaning; pongs are handled by axum.
                Some(Ok(_)) => {}
            },
        }
    }

    forward_task.abort();
    tracing::info!(job_id = %job_id, connection = conn_id, "Progress WebSocket disconnected");
}

/// Write events and heartbeats to the socket until the channel closes or a
/// write fails.
async fn forward_frames(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: Receiver<JobEvent>,
    heartbeat: Duration,
) {
    // `interval` panics on a zero period.
    let mut heartbeat_interval = tokio::time::interval(heartbeat.max(Duration::from_millis(1)));
    // Skip the first immediate tick
    heartbeat_interval.tick().await;

    loop {
        let frame = tokio::select! {
            event = rx.recv() => match event {
                Some(event) => Frame::Event(event),
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    return;
                }
            },
            _ = heartbeat_interval.tick() => Frame::Ping,
        };
        if sink.send(Message::Text(frame.to_json().into())).await.is_err() {
            return;
        }
    }
}
