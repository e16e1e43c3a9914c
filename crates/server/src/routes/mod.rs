//! Route handlers for the docflow server.

pub mod health;
pub mod jobs;
pub mod ws;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Create the combined router.
///
/// Routes:
/// - GET  /health - Health check
/// - POST /api/jobs - Start an ingestion job
/// - GET  /api/jobs - List running jobs
/// - POST /api/jobs/{id}/cancel - Cancel a job
/// - GET  /ws/progress/{id} - Progress WebSocket for one job
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(health::router())
        .nest("/api", jobs::router())
        .nest("/ws", ws::router())
        .with_state(state)
}
