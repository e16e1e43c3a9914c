//! Subscriber attach and detach.

use tracing::{debug, info, warn};

use crate::broker::Broker;
use crate::channel::{Connection, ConnectionId};
use crate::event::JobEvent;

/// What a newly attached subscriber received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    /// Buffered events were flushed. `remaining` is non-zero if the
    /// connection failed part way through.
    Replayed { sent: usize, remaining: usize },
    /// Nothing was buffered; a persisted result was found and sent.
    Fallback { delivered: bool },
    /// Nothing buffered and nothing persisted.
    Nothing,
}

impl Broker {
    /// Register `conn` as the subscriber for `job_id` and catch it up.
    ///
    /// Any previous subscriber is replaced; its transport is left alone and
    /// will clean up on its own disconnect. Buffered events are flushed in
    /// order under the job's lock, so no live event can slip in between. If
    /// there was no buffer at all, a completed result from persistence is
    /// replayed as a terminal `ANALYSIS_COMPLETE`.
    ///
    /// Failures here are logged, never returned.
    pub async fn attach(&self, job_id: &str, conn: Connection) -> AttachOutcome {
        let conn_id = conn.id();
        let (replaced, flushed) = self.inner.channels.with(job_id, |channel| {
            let replaced = channel.subscriber.replace(conn.clone()).map(|old| old.id());
            (replaced, channel.flush_to(&conn))
        });

        if let Some(old) = replaced.filter(|old| *old != conn_id) {
            info!(job_id = %job_id, old, new = conn_id, "subscriber replaced");
        }

        if let Some((sent, remaining)) = flushed {
            if remaining > 0 {
                warn!(job_id = %job_id, sent, remaining, "flush interrupted, events kept");
            } else {
                debug!(job_id = %job_id, sent, "flushed buffered events");
            }
            return AttachOutcome::Replayed { sent, remaining };
        }

        match self.inner.source.read_final(job_id).await {
            Ok(Some(result)) => {
                let delivered = conn
                    .send_event(JobEvent::replayed_complete(job_id, &result))
                    .is_ok();
                debug!(job_id = %job_id, delivered, "replayed persisted result");
                AttachOutcome::Fallback { delivered }
            }
            Ok(None) => AttachOutcome::Nothing,
            Err(err) => {
                warn!(job_id = %job_id, error = %err, "failed to read persisted result");
                AttachOutcome::Nothing
            }
        }
    }

    /// Remove `conn_id` as subscriber of `job_id`. A newer subscriber that
    /// already replaced it is left in place. Returns whether anything changed.
    pub fn detach(&self, job_id: &str, conn_id: ConnectionId) -> bool {
        let detached = self.inner.channels.detach(job_id, conn_id);
        if detached {
            debug!(job_id = %job_id, connection = conn_id, "subscriber detached");
        }
        detached
    }
}
