// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use docflow_broker::{Broker, BrokerConfig};

use crate::config::ServerConfig;
use crate::pipeline::{DocumentAnalyzer, StubAnalyzer};

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Job event broker shared by ingestion jobs and progress sockets.
    pub broker: Broker,
    /// OCR/classification backend used by new ingestion jobs.
    pub analyzer: Arc<dyn DocumentAnalyzer>,
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(
        broker: Broker,
        analyzer: Arc<dyn DocumentAnalyzer>,
        config: ServerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            broker,
            analyzer,
            config,
        })
    }

    /// In-memory broker and stub analyzer with the given latency (for testing).
    pub fn for_testing(stub_latency: std::time::Duration) -> Arc<Self> {
        let (broker, _) = Broker::in_memory(BrokerConfig::default());
        let config = ServerConfig {
            stub_latency,
            ..ServerConfig::default()
        };
        Self::new(broker, Arc::new(StubAnalyzer::new(stub_latency)), config)
    }

    /// Get server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
