// crates/server/src/routes/health.rs
//! Liveness plus a glance at the broker: how many jobs it is supervising and
//! how long it lets one stay silent before reaping it.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    /// Jobs currently registered with the broker, finished-but-not-torn-down
    /// ones included.
    pub active_jobs: usize,
    pub idle_timeout_secs: u64,
}

/// GET /health
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.uptime_secs(),
        active_jobs: state.broker.active_jobs().len(),
        idle_timeout_secs: state.broker.config().idle_timeout.as_secs(),
    })
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health_check))
}
