// crates/broker/src/types.rs
//! Types shared across the broker: job identity, terminal status, job handles.

use serde::Serialize;
use tokio::sync::watch;

/// Opaque identifier for a job. Caller-supplied or generated.
pub type JobId = String;

/// Lifecycle status of a job.
///
/// `Running` is the only non-terminal state; there is no transition out of
/// a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum JobStatus {
    Running,
    Completed,
    Failed(String),
    Canceled,
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }

    pub fn label(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed(_) => "failed",
            JobStatus::Canceled => "canceled",
            JobStatus::TimedOut => "timed_out",
        }
    }
}

/// Why a job's cancellation token fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// Explicit request through the cancellation handler.
    Requested,
    /// The reaper converted idle time into a timeout.
    TimedOut,
}

/// Handle returned by [`crate::Broker::start`].
///
/// The task itself is owned by the registry; this handle only observes the
/// terminal status.
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub id: JobId,
    status_rx: watch::Receiver<JobStatus>,
}

impl JobHandle {
    pub(crate) fn new(id: JobId, status_rx: watch::Receiver<JobStatus>) -> Self {
        Self { id, status_rx }
    }

    /// Current status without waiting.
    pub fn status(&self) -> JobStatus {
        self.status_rx.borrow().clone()
    }

    /// Wait for the job to reach a terminal status.
    ///
    /// If the supervising task disappears without reporting (runtime shutdown),
    /// the job is reported as failed.
    pub async fn wait(mut self) -> JobStatus {
        match self.status_rx.wait_for(JobStatus::is_terminal).await {
            Ok(status) => status.clone(),
            Err(_) => JobStatus::Failed("job task dropped before reporting".into()),
        }
    }
}

/// Snapshot of one running job, for listings.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub job_id: JobId,
    pub running_secs: u64,
    /// Seconds since the last emitted event, if the job has emitted any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_secs: Option<u64>,
}
