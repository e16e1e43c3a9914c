//! Job event broker for the docflow ingestion service.
//!
//! Runs background units of work, delivers their ordered progress events to
//! at most one live subscriber per job, buffers events nobody is listening
//! for, replays them on reconnect, falls back to the persisted result once
//! the buffer is gone, reaps idle jobs and propagates cancellation.

pub mod broker;
pub mod cancel;
pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod persistence;
pub mod reaper;
pub mod registry;
pub mod runner;
pub mod subscription;
pub mod types;

pub use broker::Broker;
pub use cancel::{CancelOutcome, CANCEL_REASON};
pub use channel::{Connection, ConnectionId};
pub use config::BrokerConfig;
pub use dispatcher::Delivery;
pub use error::{BrokerError, JobError, PayloadError, PersistError};
pub use event::{Frame, JobEvent, EVENT_ANALYSIS_COMPLETE, EVENT_CANCELED, EVENT_TIMED_OUT};
pub use persistence::{FinalResult, InMemoryResults, ResultSink, ResultSource, StoredOutcome};
pub use reaper::{ReapReport, TIMEOUT_REASON};
pub use runner::JobContext;
pub use subscription::AttachOutcome;
pub use types::{CancelReason, JobHandle, JobId, JobStatus, JobSummary};
