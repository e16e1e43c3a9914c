// crates/broker/src/registry.rs
//! Process-wide table of running jobs and their last activity.
//!
//! A job with no registry entry is finished, whatever its buffer or stored
//! result says. Activity timestamps live in a separate map because events are
//! also emitted for ids with no entry (cancelling a finished job, say). Only
//! activity recorded since a job started counts toward its idle time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::BrokerError;
use crate::types::{CancelReason, JobId, JobSummary};

/// Cooperative cancellation signal shared by a job's task and the registry.
///
/// The first reason recorded wins, so a job that is both timed out and
/// explicitly canceled reports one consistent outcome.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    token: CancellationToken,
    reason: Arc<OnceLock<CancelReason>>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Returns `false` if it was already requested.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        let first = self.reason.set(reason).is_ok();
        self.token.cancel();
        first
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<CancelReason> {
        self.reason.get().copied()
    }

    /// Resolves once cancellation is requested.
    pub async fn cancelled(&self) -> CancelReason {
        self.token.cancelled().await;
        self.reason().unwrap_or(CancelReason::Requested)
    }
}

/// One running job.
#[derive(Debug)]
pub struct JobEntry {
    /// Distinguishes successive jobs that reuse the same id.
    pub(crate) generation: u64,
    pub(crate) signal: CancelSignal,
    pub(crate) task: Option<JoinHandle<()>>,
    pub(crate) started_at: Instant,
}

impl JobEntry {
    /// True once the job's task has returned, even if teardown has not yet
    /// removed the entry.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_some_and(JoinHandle::is_finished)
    }
}

/// Result of asking the registry to cancel a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelRequest {
    Signalled,
    AlreadyCancelling,
    NotRunning,
}

#[derive(Debug, Default)]
pub struct JobRegistry {
    entries: DashMap<JobId, JobEntry>,
    activity: DashMap<JobId, Instant>,
    next_generation: AtomicU64,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `job_id` for a new job.
    ///
    /// Fails if a job with that id is still registered.
    pub fn reserve(&self, job_id: &str) -> Result<(u64, CancelSignal), BrokerError> {
        match self.entries.entry(job_id.to_string()) {
            Entry::Occupied(_) => Err(BrokerError::JobAlreadyRunning(job_id.to_string())),
            Entry::Vacant(slot) => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let signal = CancelSignal::new();
                slot.insert(JobEntry {
                    generation,
                    signal: signal.clone(),
                    task: None,
                    started_at: Instant::now(),
                });
                Ok((generation, signal))
            }
        }
    }

    /// Hand the spawned task to its entry.
    ///
    /// If the task already finished and released the entry, the handle is
    /// simply dropped.
    pub fn attach_task(&self, job_id: &str, generation: u64, task: JoinHandle<()>) {
        if let Some(mut entry) = self.entries.get_mut(job_id) {
            if entry.generation == generation {
                entry.task = Some(task);
            }
        }
    }

    /// Teardown after the job's task terminates. Removes the entry only if it
    /// still belongs to `generation`; returns whether it did.
    pub fn release(&self, job_id: &str, generation: u64) -> bool {
        let removed = self
            .entries
            .remove_if(job_id, |_, entry| entry.generation == generation)
            .is_some();
        if removed {
            self.activity.remove(job_id);
        }
        removed
    }

    /// Unconditional removal, used by the reaper.
    pub fn remove(&self, job_id: &str) -> Option<JobEntry> {
        self.entries.remove(job_id).map(|(_, entry)| entry)
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.entries.contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record activity for `job_id`, registered or not.
    pub fn touch(&self, job_id: &str) {
        self.activity.insert(job_id.to_string(), Instant::now());
    }

    pub fn last_active(&self, job_id: &str) -> Option<Instant> {
        self.activity.get(job_id).map(|at| *at)
    }

    pub fn forget_activity(&self, job_id: &str) {
        self.activity.remove(job_id);
    }

    /// Drop activity timestamps of unregistered jobs older than `older_than`.
    pub fn sweep_activity(&self, now: Instant, older_than: Duration) -> usize {
        let is_stale = |at: &Instant| now.saturating_duration_since(*at) >= older_than;
        // Collect first: never hold an activity shard while touching `entries`.
        let candidates: Vec<JobId> = self
            .activity
            .iter()
            .filter(|entry| is_stale(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();
        candidates
            .into_iter()
            .filter(|job_id| !self.entries.contains_key(job_id))
            .filter(|job_id| self.activity.remove_if(job_id, |_, at| is_stale(at)).is_some())
            .count()
    }

    pub fn request_cancel(&self, job_id: &str, reason: CancelReason) -> CancelRequest {
        let Some(entry) = self.entries.get(job_id) else {
            return CancelRequest::NotRunning;
        };
        if entry.is_finished() {
            return CancelRequest::NotRunning;
        }
        if entry.signal.cancel(reason) {
            CancelRequest::Signalled
        } else {
            CancelRequest::AlreadyCancelling
        }
    }

    /// Registered jobs whose last activity is older than `timeout`, with their
    /// idle time. Jobs that have not emitted since they started are skipped.
    pub fn idle_jobs(&self, now: Instant, timeout: Duration) -> Vec<(JobId, Duration)> {
        self.entries
            .iter()
            .filter_map(|entry| {
                let last = self.activity_since_start(entry.key(), entry.value())?;
                let idle = now.saturating_duration_since(last);
                (idle > timeout).then(|| (entry.key().clone(), idle))
            })
            .collect()
    }

    /// Last activity of the job currently holding `job_id`. A timestamp left
    /// behind by an earlier job under the same id does not count.
    fn activity_since_start(&self, job_id: &str, entry: &JobEntry) -> Option<Instant> {
        self.last_active(job_id).filter(|at| *at >= entry.started_at)
    }

    pub fn summaries(&self) -> Vec<JobSummary> {
        let now = Instant::now();
        let mut jobs: Vec<JobSummary> = self
            .entries
            .iter()
            .map(|entry| JobSummary {
                job_id: entry.key().clone(),
                running_secs: now.saturating_duration_since(entry.started_at).as_secs(),
                idle_secs: self
                    .activity_since_start(entry.key(), entry.value())
                    .map(|at| now.saturating_duration_since(at).as_secs()),
            })
            .collect();
        jobs.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        jobs
    }
}
