// crates/server/src/routes/jobs.rs
//! API routes for ingestion jobs.
//!
//! - POST /jobs — Start an ingestion job for an uploaded document
//! - GET /jobs — List running jobs
//! - POST /jobs/{id}/cancel — Request cancellation

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::{engine::general_purpose::STANDARD, Engine};
use docflow_broker::{CancelOutcome, JobSummary};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::pipeline::{run_ingestion, Document};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub file_name: String,
    /// Base64-encoded file content.
    pub content: String,
    #[serde(default)]
    pub message: Option<String>,
    /// Caller-chosen id; generated when absent.
    #[serde(default)]
    pub job_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct SubmitJobResponse {
    pub job_id: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct CancelJobResponse {
    pub job_id: String,
    pub status: String,
}

/// POST /api/jobs — Decode the upload and start ingestion.
async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitJobRequest>,
) -> ApiResult<(StatusCode, Json<SubmitJobResponse>)> {
    let file_name = req.file_name.trim();
    if file_name.is_empty() {
        return Err(ApiError::BadRequest("file_name must not be empty".into()));
    }
    if req.job_id.as_deref().is_some_and(|id| id.trim().is_empty()) {
        return Err(ApiError::BadRequest("job_id must not be empty".into()));
    }
    let content = STANDARD
        .decode(req.content.as_bytes())
        .map_err(|e| ApiError::BadRequest(format!("content is not valid base64: {e}")))?;

    let document = Document {
        file_name: file_name.to_string(),
        content,
        user_message: req.message.filter(|m| !m.trim().is_empty()),
    };
    let analyzer = state.analyzer.clone();
    let handle = state
        .broker
        .start(req.job_id, move |ctx| run_ingestion(ctx, analyzer, document))?;

    tracing::info!(job_id = %handle.id, file_name = %file_name, "ingestion job accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitJobResponse {
            job_id: handle.id,
            status: "accepted".to_string(),
        }),
    ))
}

/// GET /api/jobs — List running jobs.
async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<JobSummary>> {
    Json(state.broker.active_jobs())
}

/// POST /api/jobs/{id}/cancel — Cancel a job, running or not.
async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Json<CancelJobResponse> {
    let status = match state.broker.cancel(&job_id).await {
        CancelOutcome::Requested | CancelOutcome::AlreadyRequested => "cancel_requested",
        CancelOutcome::NotRunning => "canceled",
    };
    Json(CancelJobResponse {
        job_id,
        status: status.to_string(),
    })
}

/// Build the jobs router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs", get(list_jobs).post(submit_job))
        .route("/jobs/{id}/cancel", post(cancel_job))
}
