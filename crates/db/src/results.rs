// crates/db/src/results.rs
//! Terminal job results: the broker's persistence sink and result source.
//!
//! Each job id gets at most one row. The first terminal write wins; later
//! writes for the same id are ignored.

use async_trait::async_trait;
use docflow_broker::{FinalResult, PersistError, ResultSink, ResultSource, StoredOutcome};
use tracing::debug;

use crate::{Database, DbResult};

const STATUS_COMPLETED: &str = "completed";
const STATUS_FAILED: &str = "failed";
const STATUS_CANCELED: &str = "canceled";

/// One stored row, JSON columns still encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct JobResultRow {
    pub job_id: String,
    pub status: String,
    pub ocr_result: Option<String>,
    pub ai_result: Option<String>,
    pub file_name: Option<String>,
    pub error_message: Option<String>,
    pub finished_at: i64,
}

type RowTuple = (
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    i64,
);

impl From<RowTuple> for JobResultRow {
    fn from(row: RowTuple) -> Self {
        let (job_id, status, ocr_result, ai_result, file_name, error_message, finished_at) = row;
        Self {
            job_id,
            status,
            ocr_result,
            ai_result,
            file_name,
            error_message,
            finished_at,
        }
    }
}

impl JobResultRow {
    /// Decode into the broker's view of a terminal outcome.
    pub fn into_outcome(self) -> Result<StoredOutcome, PersistError> {
        let reason = || self.error_message.clone().unwrap_or_default();
        match self.status.as_str() {
            STATUS_COMPLETED => Ok(StoredOutcome::Completed(FinalResult {
                ocr_result: decode_json(&self.job_id, "ocr_result", self.ocr_result.as_deref())?,
                ai_result: decode_json(&self.job_id, "ai_result", self.ai_result.as_deref())?,
                file_name: self.file_name.clone(),
            })),
            STATUS_FAILED => Ok(StoredOutcome::Failed(reason())),
            STATUS_CANCELED => Ok(StoredOutcome::Canceled(reason())),
            other => Err(PersistError::Corrupt(format!(
                "job {}: unknown status {other:?}",
                self.job_id
            ))),
        }
    }
}

fn decode_json(
    job_id: &str,
    column: &str,
    raw: Option<&str>,
) -> Result<serde_json::Value, PersistError> {
    match raw {
        None => Ok(serde_json::Value::Null),
        Some(text) => serde_json::from_str(text)
            .map_err(|e| PersistError::Corrupt(format!("job {job_id}: bad {column}: {e}"))),
    }
}

impl Database {
    /// Insert a terminal row unless one exists. Returns whether it was written.
    async fn insert_result(
        &self,
        job_id: &str,
        status: &str,
        result: Option<&FinalResult>,
        error_message: Option<&str>,
    ) -> DbResult<bool> {
        let (ocr_result, ai_result, file_name) = match result {
            Some(r) => (
                Some(serde_json::to_string(&r.ocr_result)?),
                Some(serde_json::to_string(&r.ai_result)?),
                r.file_name.clone(),
            ),
            None => (None, None, None),
        };

        let outcome = sqlx::query(
            r#"INSERT INTO job_results
                (job_id, status, ocr_result, ai_result, file_name, error_message, finished_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(job_id) DO NOTHING"#,
        )
        .bind(job_id)
        .bind(status)
        .bind(ocr_result)
        .bind(ai_result)
        .bind(file_name)
        .bind(error_message)
        .bind(chrono::Utc::now().timestamp())
        .execute(self.pool())
        .await?;

        let written = outcome.rows_affected() == 1;
        if !written {
            debug!(job_id = %job_id, status, "terminal state already recorded, ignoring");
        }
        Ok(written)
    }

    /// Stored row for a job, if any.
    pub async fn job_result(&self, job_id: &str) -> DbResult<Option<JobResultRow>> {
        let row: Option<RowTuple> = sqlx::query_as(
            r#"SELECT job_id, status, ocr_result, ai_result, file_name, error_message, finished_at
            FROM job_results WHERE job_id = ?"#,
        )
        .bind(job_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(JobResultRow::from))
    }

    /// Most recent rows with the given status, newest first.
    pub async fn recent_results(&self, status: &str, limit: i64) -> DbResult<Vec<JobResultRow>> {
        let rows: Vec<RowTuple> = sqlx::query_as(
            r#"SELECT job_id, status, ocr_result, ai_result, file_name, error_message, finished_at
            FROM job_results WHERE status = ?
            ORDER BY finished_at DESC, job_id
            LIMIT ?"#,
        )
        .bind(status)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(JobResultRow::from).collect())
    }
}

#[async_trait]
impl ResultSink for Database {
    async fn persist_final(&self, job_id: &str, result: &FinalResult) -> Result<(), PersistError> {
        self.insert_result(job_id, STATUS_COMPLETED, Some(result), None)
            .await
            .map(|_| ())
            .map_err(PersistError::backend)
    }

    async fn persist_failure(&self, job_id: &str, reason: &str) -> Result<(), PersistError> {
        self.insert_result(job_id, STATUS_FAILED, None, Some(reason))
            .await
            .map(|_| ())
            .map_err(PersistError::backend)
    }

    async fn persist_cancellation(&self, job_id: &str, reason: &str) -> Result<(), PersistError> {
        self.insert_result(job_id, STATUS_CANCELED, None, Some(reason))
            .await
            .map(|_| ())
            .map_err(PersistError::backend)
    }
}

#[async_trait]
impl ResultSource for Database {
    async fn read_final(&self, job_id: &str) -> Result<Option<FinalResult>, PersistError> {
        let Some(row) = self
            .job_result(job_id)
            .await
            .map_err(PersistError::backend)?
        else {
            return Ok(None);
        };
        match row.into_outcome()? {
            StoredOutcome::Completed(result) => Ok(Some(result)),
            _ => Ok(None),
        }
    }
}
