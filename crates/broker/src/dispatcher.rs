//! Event dispatch: live delivery with buffering fallback.

use serde::Serialize;
use tracing::{debug, warn};

use crate::broker::Broker;
use crate::error::PayloadError;
use crate::event::JobEvent;

/// Where an emitted event went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Live,
    Buffered,
}

impl Broker {
    /// Emit a named event with a serializable payload for `job_id`.
    ///
    /// Only payload validation can fail; delivery problems end in the buffer.
    pub fn emit(
        &self,
        job_id: &str,
        name: &str,
        payload: &impl Serialize,
    ) -> Result<Delivery, PayloadError> {
        let event = JobEvent::new(job_id, name, payload)?;
        Ok(self.dispatch(event))
    }

    /// Deliver an already-built event.
    ///
    /// Marks the job active. With a subscriber attached, anything still
    /// buffered is flushed to it first and the event goes live only once the
    /// buffer is empty, so it never overtakes an older event. Otherwise, or
    /// when the send fails (transport gone or its queue full), the event is
    /// appended to the job's capped buffer. A failed subscriber stays
    /// registered; the transport cleans it up on disconnect.
    pub fn dispatch(&self, event: JobEvent) -> Delivery {
        let job_id = event.job_id.clone();
        self.inner.registry.touch(&job_id);
        let cap = self.inner.config.max_buffered_events;

        self.inner.channels.with(&job_id, |channel| {
            let event = match channel.subscriber.clone() {
                Some(conn) => {
                    let caught_up = match channel.flush_to(&conn) {
                        None => true,
                        Some((sent, remaining)) => {
                            if sent > 0 {
                                debug!(job_id = %job_id, sent, remaining, "caught subscriber up");
                            }
                            remaining == 0
                        }
                    };
                    if !caught_up {
                        event
                    } else {
                        match conn.send_event(event) {
                            Ok(()) => return Delivery::Live,
                            Err(event) => {
                                debug!(
                                    job_id = %job_id,
                                    connection = conn.id(),
                                    event = %event.name,
                                    "live send failed, buffering"
                                );
                                event
                            }
                        }
                    }
                }
                None => event,
            };
            if channel.push(event, cap) {
                warn!(
                    job_id = %job_id,
                    cap,
                    dropped_total = channel.dropped,
                    "event buffer full, dropped oldest event"
                );
            }
            Delivery::Buffered
        })
    }
}
