// crates/broker/src/broker.rs
//! The broker handle that owns every job table.
//!
//! Behavior is split across modules by component: `dispatcher` (emit),
//! `runner` (start), `subscription` (attach/detach), `cancel` and `reaper`.

use std::fmt;
use std::sync::Arc;

use crate::channel::ChannelTable;
use crate::config::BrokerConfig;
use crate::event::JobEvent;
use crate::persistence::{InMemoryResults, ResultSink, ResultSource};
use crate::registry::JobRegistry;
use crate::types::JobSummary;

/// Job event broker.
///
/// Cheap to clone; every clone shares the same tables. Construct one per
/// process and hand clones to whoever needs it.
#[derive(Clone)]
pub struct Broker {
    pub(crate) inner: Arc<BrokerInner>,
}

pub(crate) struct BrokerInner {
    pub(crate) config: BrokerConfig,
    pub(crate) registry: JobRegistry,
    pub(crate) channels: ChannelTable,
    pub(crate) sink: Arc<dyn ResultSink>,
    pub(crate) source: Arc<dyn ResultSource>,
}

impl Broker {
    pub fn new(
        config: BrokerConfig,
        sink: Arc<dyn ResultSink>,
        source: Arc<dyn ResultSource>,
    ) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                config,
                registry: JobRegistry::new(),
                channels: ChannelTable::new(),
                sink,
                source,
            }),
        }
    }

    /// Broker backed by a process-local result store, which is returned too.
    pub fn in_memory(config: BrokerConfig) -> (Self, Arc<InMemoryResults>) {
        let store = Arc::new(InMemoryResults::new());
        let broker = Self::new(config, store.clone(), store.clone());
        (broker, store)
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.inner.config
    }

    /// Sink that units of work use to persist their own terminal state.
    pub fn sink(&self) -> Arc<dyn ResultSink> {
        Arc::clone(&self.inner.sink)
    }

    pub fn is_running(&self, job_id: &str) -> bool {
        self.inner.registry.contains(job_id)
    }

    pub fn active_jobs(&self) -> Vec<JobSummary> {
        self.inner.registry.summaries()
    }

    /// Events waiting for a subscriber, oldest first.
    pub fn buffered_events(&self, job_id: &str) -> Vec<JobEvent> {
        self.inner.channels.buffered(job_id)
    }

    pub fn has_subscriber(&self, job_id: &str) -> bool {
        self.inner.channels.subscriber_id(job_id).is_some()
    }
}

impl fmt::Debug for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broker")
            .field("config", &self.inner.config)
            .field("running_jobs", &self.inner.registry.len())
            .field("channels", &self.inner.channels.len())
            .finish()
    }
}
