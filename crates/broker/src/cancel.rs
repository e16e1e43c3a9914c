// crates/broker/src/cancel.rs
use serde::Serialize;
use tracing::{info, warn};

use crate::broker::Broker;
use crate::event::JobEvent;
use crate::registry::CancelRequest;
use crate::types::CancelReason;

/// Reason recorded for explicitly canceled jobs.
pub const CANCEL_REASON: &str = "canceled";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The running job was signalled. It emits `CANCELED` once torn down.
    Requested,
    /// A cancellation or timeout is already in flight for this job.
    AlreadyRequested,
    /// Nothing was running; `CANCELED` was emitted and persisted directly.
    NotRunning,
}

impl Broker {
    /// Request cancellation of `job_id`.
    ///
    /// For a running job this only signals it; the job's teardown emits
    /// `CANCELED` and records the cancellation. For an unknown or finished
    /// job the event is emitted (buffered if nobody is watching) and the
    /// cancellation recorded right here.
    pub async fn cancel(&self, job_id: &str) -> CancelOutcome {
        match self
            .inner
            .registry
            .request_cancel(job_id, CancelReason::Requested)
        {
            CancelRequest::Signalled => {
                info!(job_id = %job_id, "cancellation requested");
                CancelOutcome::Requested
            }
            CancelRequest::AlreadyCancelling => CancelOutcome::AlreadyRequested,
            CancelRequest::NotRunning => {
                info!(job_id = %job_id, "cancel for job that is not running");
                self.finish_canceled(job_id).await;
                CancelOutcome::NotRunning
            }
        }
    }

    /// Emit `CANCELED` then record the cancellation.
    pub(crate) async fn finish_canceled(&self, job_id: &str) {
        self.dispatch(JobEvent::canceled(job_id, CANCEL_REASON));
        if let Err(err) = self
            .inner
            .sink
            .persist_cancellation(job_id, CANCEL_REASON)
            .await
        {
            warn!(job_id = %job_id, error = %err, "failed to persist cancellation");
        }
    }
}
