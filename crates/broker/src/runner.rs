// crates/broker/src/runner.rs
//! Job runner: spawns units of work and tears them down.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::broker::Broker;
use crate::dispatcher::Delivery;
use crate::error::{BrokerError, JobError, PayloadError};
use crate::persistence::ResultSink;
use crate::registry::CancelSignal;
use crate::types::{CancelReason, JobHandle, JobId, JobStatus};

/// What a unit of work gets to talk to the broker.
#[derive(Clone)]
pub struct JobContext {
    job_id: JobId,
    broker: Broker,
    signal: CancelSignal,
}

impl JobContext {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Emit an event for this job.
    pub fn emit(&self, name: &str, payload: &impl Serialize) -> Result<Delivery, PayloadError> {
        self.broker.emit(&self.job_id, name, payload)
    }

    /// For work that runs long stretches without awaiting: check this and
    /// yield so cancellation can land.
    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }

    pub async fn cancelled(&self) -> CancelReason {
        self.signal.cancelled().await
    }

    pub fn sink(&self) -> Arc<dyn ResultSink> {
        self.broker.sink()
    }
}

impl Broker {
    /// Start a unit of work under `job_id` (generated when `None`).
    ///
    /// The work runs on its own tokio task. Cancellation drops the work future
    /// at its next `.await`. After a requested cancellation the runner emits
    /// `CANCELED` and persists it; after a timeout the reaper already has.
    /// Whatever the outcome, the registry entry is removed exactly once.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<F, Fut>(&self, job_id: Option<JobId>, work: F) -> Result<JobHandle, BrokerError>
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), JobError>> + Send + 'static,
    {
        let job_id = job_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let (generation, signal) = self.inner.registry.reserve(&job_id)?;
        let (status_tx, status_rx) = watch::channel(JobStatus::Running);

        let ctx = JobContext {
            job_id: job_id.clone(),
            broker: self.clone(),
            signal: signal.clone(),
        };
        let broker = self.clone();
        let id = job_id.clone();
        let task = tokio::spawn(async move {
            let status = broker.supervise(&id, &signal, work(ctx)).await;
            broker.inner.registry.release(&id, generation);
            info!(job_id = %id, status = status.label(), "job finished");
            let _ = status_tx.send(status);
        });
        self.inner.registry.attach_task(&job_id, generation, task);

        info!(job_id = %job_id, "job started");
        Ok(JobHandle::new(job_id, status_rx))
    }

    async fn supervise(
        &self,
        job_id: &str,
        signal: &CancelSignal,
        work: impl Future<Output = Result<(), JobError>>,
    ) -> JobStatus {
        let outcome = tokio::select! {
            biased;
            reason = signal.cancelled() => Err(reason),
            result = AssertUnwindSafe(work).catch_unwind() => Ok(result),
        };

        match outcome {
            Err(CancelReason::Requested) => {
                self.finish_canceled(job_id).await;
                JobStatus::Canceled
            }
            Err(CancelReason::TimedOut) => JobStatus::TimedOut,
            Ok(Ok(Ok(()))) => JobStatus::Completed,
            Ok(Ok(Err(err))) => {
                warn!(job_id = %job_id, error = %err, "job reported failure");
                JobStatus::Failed(err.to_string())
            }
            Ok(Err(panic)) => {
                error!(job_id = %job_id, panic = %panic_message(panic.as_ref()), "job panicked");
                JobStatus::Failed("job panicked".to_string())
            }
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
