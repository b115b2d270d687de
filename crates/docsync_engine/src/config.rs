//! Engine configuration.

use crate::cache::{CachePolicy, PolicyTable};
use std::time::Duration;

/// Configuration for the engine and its background coordinator.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Transient failures allowed per queue item before it is parked as
    /// failed.
    pub max_retries: u32,
    /// Maximum number of offline records kept by the eviction policy.
    pub eviction_budget: usize,
    /// Optional safety-net interval on which the coordinator drains the
    /// queue even without a connectivity transition.
    pub drain_interval: Option<Duration>,
    /// Upper bound on any single remote call. A timeout counts as a
    /// transient failure.
    pub request_timeout: Duration,
    /// Per-request-class cache policy selection, fixed at startup.
    pub cache_policies: PolicyTable,
    /// Coordinator mailbox depth.
    pub mailbox_capacity: usize,
}

impl EngineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-item retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the eviction budget.
    #[must_use]
    pub fn with_eviction_budget(mut self, budget: usize) -> Self {
        self.eviction_budget = budget;
        self
    }

    /// Enables the periodic safety-net drain.
    #[must_use]
    pub fn with_drain_interval(mut self, interval: Duration) -> Self {
        self.drain_interval = Some(interval);
        self
    }

    /// Sets the per-call remote timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the cache policy table.
    #[must_use]
    pub fn with_cache_policies(mut self, table: PolicyTable) -> Self {
        self.cache_policies = table;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            eviction_budget: 50,
            drain_interval: None,
            request_timeout: Duration::from_secs(30),
            cache_policies: PolicyTable::new(CachePolicy::NetworkFirstFallback)
                .route("/files/", CachePolicy::CacheFirstRefresh)
                .route("/thumbnails/", CachePolicy::CacheFirstRefresh),
            mailbox_capacity: 64,
        }
    }
}
