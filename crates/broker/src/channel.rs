//! Per-job delivery state: the event buffer and the live subscriber.
//!
//! Both live in one [`JobChannel`] per job id so that buffering, live
//! delivery and flushing for a job are serialized under that key's lock.
//! Nothing here awaits while a lock is held.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;

use crate::event::JobEvent;
use crate::types::JobId;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one subscriber connection.
pub type ConnectionId = u64;

/// Sending half of a subscriber connection.
///
/// The transport owns the receiving half and writes events to the socket.
/// The queue between them is bounded: a send fails when the transport has
/// gone away or has fallen `capacity` events behind, and the dispatcher
/// falls back to the job's capped buffer either way.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::Sender<JobEvent>,
}

impl Connection {
    /// New connection queueing at most `capacity` events, plus the receiver
    /// the transport drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<JobEvent>) {
        // `mpsc::channel` panics on zero capacity.
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let conn = Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            tx,
        };
        (conn, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Try to queue one event without waiting. On a closed or full queue the
    /// event is handed back.
    pub fn send_event(&self, event: JobEvent) -> Result<(), JobEvent> {
        self.tx.try_send(event).map_err(TrySendError::into_inner)
    }
}

/// Buffer and subscriber for one job.
#[derive(Debug)]
pub struct JobChannel {
    /// Undelivered events, oldest first. `None` once fully flushed.
    pub(crate) buffer: Option<VecDeque<JobEvent>>,
    pub(crate) subscriber: Option<Connection>,
    pub(crate) touched_at: Instant,
    /// Events dropped from the front of the buffer because of the cap.
    pub(crate) dropped: u64,
}

impl JobChannel {
    fn new() -> Self {
        Self {
            buffer: None,
            subscriber: None,
            touched_at: Instant::now(),
            dropped: 0,
        }
    }

    pub fn has_pending(&self) -> bool {
        self.buffer.as_ref().is_some_and(|b| !b.is_empty())
    }

    /// Append to the buffer, dropping the oldest event past `cap`.
    /// Returns true if an event was dropped.
    pub(crate) fn push(&mut self, event: JobEvent, cap: usize) -> bool {
        let buffer = self.buffer.get_or_insert_with(VecDeque::new);
        buffer.push_back(event);
        if buffer.len() > cap {
            buffer.pop_front();
            self.dropped += 1;
            true
        } else {
            false
        }
    }

    /// Send buffered events in order until one fails.
    ///
    /// Returns `None` when there was no buffer, otherwise `(sent, remaining)`.
    /// The unsent suffix stays buffered, in order.
    pub(crate) fn flush_to(&mut self, conn: &Connection) -> Option<(usize, usize)> {
        let mut pending = self.buffer.take()?;
        let mut sent = 0;
        while let Some(event) = pending.pop_front() {
            if let Err(event) = conn.send_event(event) {
                pending.push_front(event);
                break;
            }
            sent += 1;
        }
        let remaining = pending.len();
        if remaining > 0 {
            self.buffer = Some(pending);
        }
        Some((sent, remaining))
    }

    pub fn buffered(&self) -> Vec<JobEvent> {
        self.buffer
            .as_ref()
            .map(|b| b.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Process-wide table of job channels.
#[derive(Debug, Default)]
pub struct ChannelTable {
    channels: DashMap<JobId, JobChannel>,
}

impl ChannelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with exclusive access to the job's channel, creating it if
    /// needed. `f` must not block.
    pub fn with<R>(&self, job_id: &str, f: impl FnOnce(&mut JobChannel) -> R) -> R {
        let mut channel = self
            .channels
            .entry(job_id.to_string())
            .or_insert_with(JobChannel::new);
        channel.touched_at = Instant::now();
        f(channel.value_mut())
    }

    /// Snapshot of buffered events for a job.
    pub fn buffered(&self, job_id: &str) -> Vec<JobEvent> {
        self.channels
            .get(job_id)
            .map(|c| c.buffered())
            .unwrap_or_default()
    }

    pub fn has_buffer(&self, job_id: &str) -> bool {
        self.channels.get(job_id).is_some_and(|c| c.buffer.is_some())
    }

    pub fn subscriber_id(&self, job_id: &str) -> Option<ConnectionId> {
        self.channels
            .get(job_id)
            .and_then(|c| c.subscriber.as_ref().map(Connection::id))
    }

    pub fn discard_buffer(&self, job_id: &str) -> usize {
        self.channels
            .get_mut(job_id)
            .and_then(|mut c| c.buffer.take())
            .map_or(0, |b| b.len())
    }

    /// Remove the subscriber if it is still `conn_id`. Drops the whole entry
    /// when nothing is left in it.
    pub fn detach(&self, job_id: &str, conn_id: ConnectionId) -> bool {
        let mut detached = false;
        if let Some(mut channel) = self.channels.get_mut(job_id) {
            if channel.subscriber.as_ref().map(Connection::id) == Some(conn_id) {
                channel.subscriber = None;
                detached = true;
            }
        }
        self.channels
            .remove_if(job_id, |_, c| c.subscriber.is_none() && c.buffer.is_none());
        detached
    }

    /// Remove the subscriber regardless of which connection it is.
    pub fn drop_subscriber(&self, job_id: &str) -> Option<Connection> {
        let conn = self
            .channels
            .get_mut(job_id)
            .and_then(|mut c| c.subscriber.take());
        self.channels
            .remove_if(job_id, |_, c| c.subscriber.is_none() && c.buffer.is_none());
        conn
    }

    /// Drop channels of finished jobs that nobody is watching and nobody has
    /// touched for `retention`. `is_running` decides which jobs are finished.
    pub fn sweep_stale(
        &self,
        now: Instant,
        retention: Duration,
        is_running: impl Fn(&str) -> bool,
    ) -> usize {
        let before = self.channels.len();
        self.channels.retain(|job_id, channel| {
            let live = channel.subscriber.as_ref().is_some_and(|c| !c.is_closed());
            live || is_running(job_id) || now.saturating_duration_since(channel.touched_at) < retention
        });
        before - self.channels.len()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
