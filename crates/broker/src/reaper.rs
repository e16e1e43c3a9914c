//! Idle-job reaper.
//!
//! A job's idle time runs from its last emitted event, not from when it
//! started, so a slow job that keeps reporting progress is never reaped.
//! Jobs that have not emitted anything yet are left alone.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::Broker;
use crate::event::JobEvent;
use crate::runner::panic_message;
use crate::types::CancelReason;

/// Failure reason persisted for reaped jobs.
pub const TIMEOUT_REASON: &str = "timeout";

/// Summary of one reaper pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub reaped: usize,
    /// Jobs whose cleanup panicked. They are skipped, not retried.
    pub faulted: usize,
    pub swept_channels: usize,
    pub swept_activity: usize,
}

impl Broker {
    /// Run the reaper on its own task until `shutdown` fires.
    pub fn spawn_reaper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let broker = self.clone();
        tokio::spawn(async move { broker.run_reaper(shutdown).await })
    }

    /// Reap every `reap_interval` until `shutdown` fires.
    ///
    /// A panicking pass is logged and the loop carries on.
    pub async fn run_reaper(&self, shutdown: CancellationToken) {
        // `interval` panics on a zero period.
        let period = self.inner.config.reap_interval.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick fires immediately; skip it.
        interval.tick().await;

        info!(
            interval_secs = period.as_secs(),
            idle_timeout_secs = self.inner.config.idle_timeout.as_secs(),
            "reaper started"
        );
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            match AssertUnwindSafe(self.reap_idle()).catch_unwind().await {
                Ok(report) if report != ReapReport::default() => {
                    info!(
                        reaped = report.reaped,
                        faulted = report.faulted,
                        swept_channels = report.swept_channels,
                        swept_activity = report.swept_activity,
                        "reaper pass"
                    );
                }
                Ok(_) => {}
                Err(panic) => {
                    error!(panic = %panic_message(panic.as_ref()), "reaper pass panicked");
                }
            }
        }
        info!("reaper stopped");
    }

    /// One pass: time out idle jobs, then drop stale bookkeeping of
    /// finished jobs.
    pub async fn reap_idle(&self) -> ReapReport {
        let config = &self.inner.config;
        let mut report = ReapReport::default();

        let idle = self
            .inner
            .registry
            .idle_jobs(Instant::now(), config.idle_timeout);
        for (job_id, idle_for) in idle {
            match AssertUnwindSafe(self.reap_job(&job_id, idle_for))
                .catch_unwind()
                .await
            {
                Ok(true) => report.reaped += 1,
                Ok(false) => {}
                Err(panic) => {
                    report.faulted += 1;
                    error!(job_id = %job_id, panic = %panic_message(panic.as_ref()), "reaping job panicked");
                }
            }
        }

        let now = Instant::now();
        let registry = &self.inner.registry;
        report.swept_channels =
            self.inner
                .channels
                .sweep_stale(now, config.buffer_retention, |id| registry.contains(id));
        report.swept_activity = registry.sweep_activity(now, config.buffer_retention);
        report
    }

    /// Time out one job. Returns false if it was already gone.
    async fn reap_job(&self, job_id: &str, idle_for: Duration) -> bool {
        let Some(entry) = self.inner.registry.remove(job_id) else {
            return false;
        };
        warn!(job_id = %job_id, idle_secs = idle_for.as_secs(), "job idle past timeout, reaping");

        if !entry.is_finished() {
            entry.signal.cancel(CancelReason::TimedOut);
        }

        if let Err(err) = self.inner.sink.persist_failure(job_id, TIMEOUT_REASON).await {
            warn!(job_id = %job_id, error = %err, "failed to persist timeout");
        }

        let stale = self.inner.channels.discard_buffer(job_id);
        if stale > 0 {
            debug!(job_id = %job_id, stale, "discarded stale buffered events");
        }
        // Buffered if nobody is watching, so a late subscriber still learns
        // how the job ended.
        self.dispatch(JobEvent::timed_out(job_id, idle_for));
        self.inner.channels.drop_subscriber(job_id);
        self.inner.registry.forget_activity(job_id);
        true
    }
}
