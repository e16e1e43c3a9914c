// crates/server/src/config.rs
//! Command line and environment configuration for the `docflow` binary.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use docflow_broker::BrokerConfig;

/// Default port for the server.
pub const DEFAULT_PORT: u16 = 47892;

/// Settings the HTTP/WebSocket layer needs at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Gap between `{"type":"ping"}` heartbeats on progress sockets.
    pub heartbeat_interval: Duration,
    /// Simulated latency of each stub analyzer step.
    pub stub_latency: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(15),
            stub_latency: Duration::from_millis(500),
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "docflow", version, about = "Document ingestion server with live job progress")]
pub struct Cli {
    /// Port to listen on.
    #[arg(long, env = "DOCFLOW_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// SQLite database file. Defaults to the user cache directory.
    #[arg(long, env = "DOCFLOW_DB")]
    pub db: Option<PathBuf>,

    /// Keep results in process memory instead of SQLite.
    #[arg(long, env = "DOCFLOW_IN_MEMORY", conflicts_with = "db")]
    pub in_memory: bool,

    /// Seconds without an emitted event before a job is reaped.
    #[arg(long, env = "DOCFLOW_IDLE_TIMEOUT_SECS", default_value_t = 300)]
    pub idle_timeout_secs: u64,

    /// Seconds between reaper passes.
    #[arg(long, env = "DOCFLOW_REAP_INTERVAL_SECS", default_value_t = 10)]
    pub reap_interval_secs: u64,

    /// Per-job cap on events waiting for a subscriber.
    #[arg(long, env = "DOCFLOW_MAX_BUFFERED_EVENTS", default_value_t = 256)]
    pub max_buffered_events: usize,

    /// Seconds to keep a finished job's undelivered events.
    #[arg(long, env = "DOCFLOW_BUFFER_RETENTION_SECS", default_value_t = 3600)]
    pub buffer_retention_secs: u64,

    /// Seconds between heartbeats on progress sockets.
    #[arg(long, env = "DOCFLOW_HEARTBEAT_SECS", default_value_t = 15)]
    pub heartbeat_secs: u64,

    /// Milliseconds the stub analyzer spends on each step.
    #[arg(long, env = "DOCFLOW_STUB_LATENCY_MS", default_value_t = 500)]
    pub stub_latency_ms: u64,
}

impl Cli {
    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig::default()
            .with_idle_timeout(Duration::from_secs(self.idle_timeout_secs))
            .with_reap_interval(Duration::from_secs(self.reap_interval_secs.max(1)))
            .with_max_buffered_events(self.max_buffered_events)
            .with_buffer_retention(Duration::from_secs(self.buffer_retention_secs))
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            heartbeat_interval: Duration::from_secs(self.heartbeat_secs.max(1)),
            stub_latency: Duration::from_millis(self.stub_latency_ms),
        }
    }
}
