// crates/server/src/pipeline.rs
//! Document ingestion: OCR then AI classification, reported as job events.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use docflow_broker::{FinalResult, JobContext, JobError, EVENT_ANALYSIS_COMPLETE};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};

pub const EVENT_DOC_RECEIVED: &str = "DOC_RECEIVED";
pub const EVENT_OCR_PROCESSING: &str = "OCR_PROCESSING";
pub const EVENT_AI_THINKING: &str = "AI_THINKING";
pub const EVENT_ANALYSIS_FAILED: &str = "ANALYSIS_FAILED";

/// An uploaded document.
#[derive(Debug, Clone)]
pub struct Document {
    pub file_name: String,
    pub content: Vec<u8>,
    /// Free-form instructions from the user, passed to classification.
    pub user_message: Option<String>,
}

/// Text and line items extracted by OCR.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OcrOutput {
    pub content: String,
    pub items: Vec<Value>,
}

#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error("document is empty")]
    EmptyDocument,

    #[error("OCR failed: {0}")]
    Ocr(String),

    #[error("classification failed: {0}")]
    Classify(String),
}

/// OCR and classification backend.
#[async_trait]
pub trait DocumentAnalyzer: Send + Sync {
    async fn extract_text(&self, doc: &Document) -> Result<OcrOutput, AnalyzeError>;

    async fn classify(
        &self,
        ocr: &OcrOutput,
        user_message: Option<&str>,
    ) -> Result<Value, AnalyzeError>;
}

/// Offline analyzer: treats the upload as UTF-8 text, one item per
/// non-empty line, after a fixed delay per step.
#[derive(Debug, Clone, Default)]
pub struct StubAnalyzer {
    latency: Duration,
}

impl StubAnalyzer {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }

    async fn pause(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl DocumentAnalyzer for StubAnalyzer {
    async fn extract_text(&self, doc: &Document) -> Result<OcrOutput, AnalyzeError> {
        if doc.content.is_empty() {
            return Err(AnalyzeError::EmptyDocument);
        }
        self.pause().await;

        let content = String::from_utf8_lossy(&doc.content).into_owned();
        let items = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| json!({ "description": line }))
            .collect();
        Ok(OcrOutput { content, items })
    }

    async fn classify(
        &self,
        ocr: &OcrOutput,
        user_message: Option<&str>,
    ) -> Result<Value, AnalyzeError> {
        self.pause().await;

        let entries: Vec<Value> = ocr
            .items
            .iter()
            .map(|item| {
                json!({
                    "description": item["description"],
                    "account": "Miscellaneous",
                    "note": user_message,
                })
            })
            .collect();
        Ok(Value::Array(entries))
    }
}

/// Run one document through OCR and classification, emitting progress.
///
/// The terminal state is persisted before `ANALYSIS_COMPLETE` goes out, so a
/// client that misses the event can read it back. Analyzer failures emit
/// `ANALYSIS_FAILED`, persist the failure and end the job with an error.
pub async fn run_ingestion(
    ctx: JobContext,
    analyzer: Arc<dyn DocumentAnalyzer>,
    doc: Document,
) -> Result<(), JobError> {
    ctx.emit(
        EVENT_DOC_RECEIVED,
        &json!({ "file_name": doc.file_name, "size_bytes": doc.content.len() }),
    )?;
    ctx.emit(
        EVENT_OCR_PROCESSING,
        &json!({ "message": "Starting OCR analysis" }),
    )?;

    let ocr = match analyzer.extract_text(&doc).await {
        Ok(ocr) => ocr,
        Err(err) => return fail(&ctx, err).await,
    };

    ctx.emit(
        EVENT_AI_THINKING,
        &json!({ "characters": ocr.content.chars().count(), "items_count": ocr.items.len() }),
    )?;

    let ai_result = match analyzer.classify(&ocr, doc.user_message.as_deref()).await {
        Ok(value) => value,
        Err(err) => return fail(&ctx, err).await,
    };

    let result = FinalResult {
        ocr_result: serde_json::to_value(&ocr).map_err(|e| JobError::failed(e.to_string()))?,
        ai_result,
        file_name: Some(doc.file_name),
    };
    if let Err(err) = ctx.sink().persist_final(ctx.job_id(), &result).await {
        warn!(job_id = %ctx.job_id(), error = %err, "failed to persist result");
    }

    ctx.emit(
        EVENT_ANALYSIS_COMPLETE,
        &json!({
            "result": result.ocr_result,
            "ai_result": result.ai_result,
            "file_name": result.file_name,
        }),
    )?;
    info!(job_id = %ctx.job_id(), "analysis complete");
    Ok(())
}

async fn fail(ctx: &JobContext, err: AnalyzeError) -> Result<(), JobError> {
    let message = err.to_string();
    warn!(job_id = %ctx.job_id(), error = %message, "analysis failed");
    ctx.emit(EVENT_ANALYSIS_FAILED, &json!({ "error": message }))?;
    if let Err(persist_err) = ctx.sink().persist_failure(ctx.job_id(), &message).await {
        warn!(job_id = %ctx.job_id(), error = %persist_err, "failed to persist failure");
    }
    Err(JobError::Failed(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use docflow_broker::{Broker, BrokerConfig, JobStatus, StoredOutcome};

    fn doc(content: &str) -> Document {
        Document {
            file_name: "receipt.txt".into(),
            content: content.as_bytes().to_vec(),
            user_message: Some("office supplies".into()),
        }
    }

    fn names(broker: &Broker, job_id: &str) -> Vec<String> {
        broker
            .buffered_events(job_id)
            .into_iter()
            .map(|e| e.name)
            .collect()
    }

    #[tokio::test]
    async fn test_stub_pipeline_emits_phases_and_persists() {
        let (broker, store) = Broker::in_memory(BrokerConfig::default());
        let analyzer: Arc<dyn DocumentAnalyzer> = Arc::new(StubAnalyzer::default());
        let document = doc("Pens x3\n\nStapler\n");

        let handle = broker
            .start(Some("inv-1".into()), move |ctx| {
                run_ingestion(ctx, analyzer, document)
            })
            .unwrap();
        assert_eq!(handle.wait().await, JobStatus::Completed);

        assert_eq!(
            names(&broker, "inv-1"),
            vec!["DOC_RECEIVED", "OCR_PROCESSING", "AI_THINKING", "ANALYSIS_COMPLETE"]
        );

        let Some(StoredOutcome::Completed(result)) = store.outcome("inv-1") else {
            panic!("expected completed result");
        };
        assert_eq!(result.file_name.as_deref(), Some("receipt.txt"));
        assert_eq!(result.ocr_result["items"].as_array().unwrap().len(), 2);
        assert_eq!(result.ai_result[1]["description"], "Stapler");
        assert_eq!(result.ai_result[0]["note"], "office supplies");

        let complete = broker.buffered_events("inv-1").pop().unwrap();
        assert_eq!(complete.payload["file_name"], "receipt.txt");
        assert_eq!(complete.payload["ai_result"], result.ai_result);
    }

    #[tokio::test]
    async fn test_empty_document_fails_with_event() {
        let (broker, store) = Broker::in_memory(BrokerConfig::default());
        let analyzer: Arc<dyn DocumentAnalyzer> = Arc::new(StubAnalyzer::default());
        let document = doc("");

        let handle = broker
            .start(Some("inv-2".into()), move |ctx| {
                run_ingestion(ctx, analyzer, document)
            })
            .unwrap();
        assert_eq!(
            handle.wait().await,
            JobStatus::Failed("document is empty".into())
        );

        assert_eq!(
            names(&broker, "inv-2"),
            vec!["DOC_RECEIVED", "OCR_PROCESSING", "ANALYSIS_FAILED"]
        );
        assert_eq!(
            store.outcome("inv-2"),
            Some(StoredOutcome::Failed("document is empty".into()))
        );
    }

    struct BrokenClassifier;

    #[async_trait]
    impl DocumentAnalyzer for BrokenClassifier {
        async fn extract_text(&self, _doc: &Document) -> Result<OcrOutput, AnalyzeError> {
            Ok(OcrOutput {
                content: "total 100".into(),
                items: vec![json!({"description": "total 100"})],
            })
        }

        async fn classify(
            &self,
            _ocr: &OcrOutput,
            _user_message: Option<&str>,
        ) -> Result<Value, AnalyzeError> {
            Err(AnalyzeError::Classify("model unavailable".into()))
        }
    }

    #[tokio::test]
    async fn test_classify_failure_after_ai_thinking() {
        let (broker, store) = Broker::in_memory(BrokerConfig::default());
        let analyzer: Arc<dyn DocumentAnalyzer> = Arc::new(BrokenClassifier);
        let document = doc("total 100");

        let handle = broker
            .start(Some("inv-3".into()), move |ctx| {
                run_ingestion(ctx, analyzer, document)
            })
            .unwrap();
        assert!(matches!(handle.wait().await, JobStatus::Failed(_)));

        let events = broker.buffered_events("inv-3");
        let last = events.last().unwrap();
        assert_eq!(last.name, "ANALYSIS_FAILED");
        assert_eq!(last.payload["error"], "classification failed: model unavailable");
        assert!(matches!(store.outcome("inv-3"), Some(StoredOutcome::Failed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stub_latency_keeps_job_running() {
        let (broker, _) = Broker::in_memory(BrokerConfig::default());
        let analyzer: Arc<dyn DocumentAnalyzer> =
            Arc::new(StubAnalyzer::new(Duration::from_secs(5)));
        let document = doc("line");

        let handle = broker
            .start(Some("inv-4".into()), move |ctx| {
                run_ingestion(ctx, analyzer, document)
            })
            .unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(broker.is_running("inv-4"));
        assert_eq!(names(&broker, "inv-4"), vec!["DOC_RECEIVED", "OCR_PROCESSING"]);

        assert_eq!(handle.wait().await, JobStatus::Completed);
    }
}
