//! Broker tuning knobs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default idle time after which a running job is reaped.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
/// Default reaper tick.
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(10);
/// Default per-job cap on buffered events.
pub const DEFAULT_MAX_BUFFERED_EVENTS: usize = 256;
/// Default retention for buffers of finished jobs nobody came back for.
pub const DEFAULT_BUFFER_RETENTION: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// A running job with no emitted event for this long is timed out.
    pub idle_timeout: Duration,
    /// How often the reaper scans the registry.
    pub reap_interval: Duration,
    /// Oldest events are dropped once a job's buffer holds this many.
    pub max_buffered_events: usize,
    /// Untouched buffers of finished, unsubscribed jobs are dropped after this.
    pub buffer_retention: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            reap_interval: DEFAULT_REAP_INTERVAL,
            max_buffered_events: DEFAULT_MAX_BUFFERED_EVENTS,
            buffer_retention: DEFAULT_BUFFER_RETENTION,
        }
    }
}

impl BrokerConfig {
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_reap_interval(mut self, reap_interval: Duration) -> Self {
        self.reap_interval = reap_interval;
        self
    }

    pub fn with_max_buffered_events(mut self, max: usize) -> Self {
        // A zero cap would drop every event including terminal ones.
        self.max_buffered_events = max.max(1);
        self
    }

    pub fn with_buffer_retention(mut self, retention: Duration) -> Self {
        self.buffer_retention = retention;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = BrokerConfig::default();
        assert_eq!(config.idle_timeout, Duration::from_secs(300));
        assert_eq!(config.reap_interval, Duration::from_secs(10));
        assert_eq!(config.max_buffered_events, 256);
    }

    #[test]
    fn zero_buffer_cap_is_clamped() {
        let config = BrokerConfig::default().with_max_buffered_events(0);
        assert_eq!(config.max_buffered_events, 1);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: BrokerConfig =
            serde_json::from_str(r#"{"max_buffered_events": 8}"#).unwrap();
        assert_eq!(config.max_buffered_events, 8);
        assert_eq!(config.idle_timeout, DEFAULT_IDLE_TIMEOUT);
    }
}
