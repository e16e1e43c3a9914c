// crates/broker/src/error.rs
use thiserror::Error;

use crate::types::JobId;

/// Errors surfaced to callers of the broker.
///
/// Delivery failures never show up here: the dispatcher recovers from them
/// by buffering.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("job already running: {0}")]
    JobAlreadyRunning(JobId),

    #[error("invalid event payload: {0}")]
    InvalidPayload(#[from] PayloadError),
}

/// Why an event payload was rejected at construction.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload must serialize to a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("payload uses reserved key `{0}`")]
    ReservedKey(String),

    #[error("payload failed to serialize: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Failure reported by a unit of work.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("{0}")]
    Failed(String),

    #[error("invalid event payload: {0}")]
    Payload(#[from] PayloadError),
}

impl JobError {
    pub fn failed(msg: impl Into<String>) -> Self {
        JobError::Failed(msg.into())
    }
}

/// Error from a persistence collaborator. Logged by the broker, never retried.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("persistence backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("stored result is corrupt: {0}")]
    Corrupt(String),
}

impl PersistError {
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        PersistError::Backend(Box::new(err))
    }
}
