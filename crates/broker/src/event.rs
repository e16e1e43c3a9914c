//! Job events and the frames written to a subscriber connection.
//!
//! On the wire an event is one flat JSON object:
//! `{"event": "OCR_PROCESSING", "job_id": "...", ...payload}`.
//! Heartbeats are `{"type": "ping"}` and carry no job semantics.

use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::PayloadError;
use crate::persistence::FinalResult;
use crate::types::JobId;

/// Emitted by the broker after a requested cancellation.
pub const EVENT_CANCELED: &str = "CANCELED";
/// Emitted by the reaper when a job goes idle past the timeout.
pub const EVENT_TIMED_OUT: &str = "TIMED_OUT";
/// Terminal success event. The broker synthesizes it from a persisted result.
pub const EVENT_ANALYSIS_COMPLETE: &str = "ANALYSIS_COMPLETE";

/// Keys owned by the envelope; payloads may not use them.
const RESERVED_KEYS: [&str; 2] = ["event", "job_id"];

pub type EventPayload = Map<String, Value>;

/// A named, ordered notification about one job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobEvent {
    pub job_id: JobId,
    pub name: String,
    pub payload: EventPayload,
}

impl JobEvent {
    /// Build an event from any serializable payload.
    ///
    /// The payload must serialize to a JSON object that does not use the
    /// envelope keys. `()` and `None` are accepted as an empty payload.
    pub fn new(
        job_id: impl Into<JobId>,
        name: impl Into<String>,
        payload: &impl Serialize,
    ) -> Result<Self, PayloadError> {
        let payload = match serde_json::to_value(payload)? {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            Value::Bool(_) => return Err(PayloadError::NotAnObject("bool")),
            Value::Number(_) => return Err(PayloadError::NotAnObject("number")),
            Value::String(_) => return Err(PayloadError::NotAnObject("string")),
            Value::Array(_) => return Err(PayloadError::NotAnObject("array")),
        };
        if let Some(key) = RESERVED_KEYS.iter().find(|k| payload.contains_key(**k)) {
            return Err(PayloadError::ReservedKey((*key).to_string()));
        }
        Ok(Self {
            job_id: job_id.into(),
            name: name.into(),
            payload,
        })
    }

    fn internal(job_id: &str, name: &str, payload: EventPayload) -> Self {
        Self {
            job_id: job_id.to_string(),
            name: name.to_string(),
            payload,
        }
    }

    pub fn canceled(job_id: &str, reason: &str) -> Self {
        let mut payload = Map::new();
        payload.insert("reason".into(), Value::from(reason));
        Self::internal(job_id, EVENT_CANCELED, payload)
    }

    pub fn timed_out(job_id: &str, idle_for: Duration) -> Self {
        let mut payload = Map::new();
        payload.insert("reason".into(), Value::from("timeout"));
        payload.insert("idle_secs".into(), Value::from(idle_for.as_secs()));
        Self::internal(job_id, EVENT_TIMED_OUT, payload)
    }

    /// Terminal event rebuilt from a persisted result for a late subscriber.
    pub fn replayed_complete(job_id: &str, result: &FinalResult) -> Self {
        let mut payload = Map::new();
        payload.insert("result".into(), result.ocr_result.clone());
        payload.insert("ai_result".into(), result.ai_result.clone());
        if let Some(file_name) = &result.file_name {
            payload.insert("file_name".into(), Value::from(file_name.as_str()));
        }
        payload.insert("replayed".into(), Value::Bool(true));
        Self::internal(job_id, EVENT_ANALYSIS_COMPLETE, payload)
    }

    /// The flat wire record for this event.
    pub fn to_wire(&self) -> Value {
        let mut record = Map::with_capacity(self.payload.len() + 2);
        record.insert("event".into(), Value::from(self.name.as_str()));
        record.insert("job_id".into(), Value::from(self.job_id.as_str()));
        for (key, value) in &self.payload {
            record.insert(key.clone(), value.clone());
        }
        Value::Object(record)
    }
}

/// What the transport writes to a subscriber socket.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Event(JobEvent),
    Ping,
}

impl Frame {
    pub fn to_json(&self) -> String {
        match self {
            Frame::Event(event) => event.to_wire().to_string(),
            Frame::Ping => r#"{"type":"ping"}"#.to_string(),
        }
    }
}
