/// Inline SQL migrations for the docflow result store.
///
/// One statement per entry; versions are 1-based positions in this list.
pub const MIGRATIONS: &[&str] = &[
    // Migration 1: terminal job results
    r#"
CREATE TABLE IF NOT EXISTS job_results (
    job_id TEXT PRIMARY KEY,
    status TEXT NOT NULL CHECK (status IN ('completed', 'failed', 'canceled')),
    ocr_result TEXT,
    ai_result TEXT,
    file_name TEXT,
    error_message TEXT,
    finished_at INTEGER NOT NULL
);
"#,
    // Migration 2: listing by status
    r#"
CREATE INDEX IF NOT EXISTS idx_job_results_status ON job_results(status, finished_at DESC);
"#,
];
