//! Narrow interfaces to the store that owns final job results.
//!
//! The broker only ever writes terminal states through [`ResultSink`] and
//! reads completed results through [`ResultSource`] (subscription fallback).
//! Implementations must be idempotent: the first terminal write for a job id
//! wins and later writes are no-ops.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PersistError;

/// Terminal payload of a successfully analyzed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalResult {
    pub ocr_result: Value,
    pub ai_result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

/// Terminal record as stored.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredOutcome {
    Completed(FinalResult),
    Failed(String),
    Canceled(String),
}

/// Write side: persist a job's terminal state.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn persist_final(&self, job_id: &str, result: &FinalResult) -> Result<(), PersistError>;

    async fn persist_failure(&self, job_id: &str, reason: &str) -> Result<(), PersistError>;

    async fn persist_cancellation(&self, job_id: &str, reason: &str) -> Result<(), PersistError>;
}

/// Read side: the completed result for a job, if there is one.
#[async_trait]
pub trait ResultSource: Send + Sync {
    async fn read_final(&self, job_id: &str) -> Result<Option<FinalResult>, PersistError>;
}

/// Process-local result store. Used by tests and `--in-memory` runs.
#[derive(Debug, Default)]
pub struct InMemoryResults {
    records: DashMap<String, StoredOutcome>,
}

impl InMemoryResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outcome(&self, job_id: &str) -> Option<StoredOutcome> {
        self.records.get(job_id).map(|r| r.value().clone())
    }

    fn record_once(&self, job_id: &str, outcome: StoredOutcome) {
        match self.records.entry(job_id.to_string()) {
            Entry::Occupied(_) => {
                tracing::debug!(job_id = %job_id, "terminal state already recorded, ignoring");
            }
            Entry::Vacant(slot) => {
                slot.insert(outcome);
            }
        }
    }
}

#[async_trait]
impl ResultSink for InMemoryResults {
    async fn persist_final(&self, job_id: &str, result: &FinalResult) -> Result<(), PersistError> {
        self.record_once(job_id, StoredOutcome::Completed(result.clone()));
        Ok(())
    }

    async fn persist_failure(&self, job_id: &str, reason: &str) -> Result<(), PersistError> {
        self.record_once(job_id, StoredOutcome::Failed(reason.to_string()));
        Ok(())
    }

    async fn persist_cancellation(&self, job_id: &str, reason: &str) -> Result<(), PersistError> {
        self.record_once(job_id, StoredOutcome::Canceled(reason.to_string()));
        Ok(())
    }
}

#[async_trait]
impl ResultSource for InMemoryResults {
    async fn read_final(&self, job_id: &str) -> Result<Option<FinalResult>, PersistError> {
        Ok(match self.outcome(job_id) {
            Some(StoredOutcome::Completed(result)) => Some(result),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> FinalResult {
        FinalResult {
            ocr_result: json!({"vendor": "ACME"}),
            ai_result: json!([]),
            file_name: None,
        }
    }

    #[tokio::test]
    async fn test_first_terminal_write_wins() {
        let store = InMemoryResults::new();
        store.persist_final("a", &sample()).await.unwrap();
        store.persist_failure("a", "timeout").await.unwrap();
        assert_eq!(store.outcome("a"), Some(StoredOutcome::Completed(sample())));

        store.persist_cancellation("b", "canceled").await.unwrap();
        store.persist_final("b", &sample()).await.unwrap();
        assert_eq!(store.outcome("b"), Some(StoredOutcome::Canceled("canceled".into())));
    }

    #[tokio::test]
    async fn test_read_final_only_returns_completed() {
        let store = InMemoryResults::new();
        store.persist_failure("failed", "ocr error").await.unwrap();
        store.persist_final("done", &sample()).await.unwrap();

        assert_eq!(store.read_final("failed").await.unwrap(), None);
        assert_eq!(store.read_final("missing").await.unwrap(), None);
        assert_eq!(store.read_final("done").await.unwrap(), Some(sample()));
    }
}
