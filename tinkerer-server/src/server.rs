//! Central control plane state.
//!
//! `ControlPlane` owns the two pieces of shared mutable state (agent
//! registry and operation queue store) plus configuration and metrics.
//! Dispatch, streaming, abort, heartbeat, and sweep all operate through it.

use crate::config::Config;
use crate::queue::OperationQueueStore;
use crate::registry::AgentRegistry;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

/// Operational metrics for monitoring control plane activity.
///
/// All counters are monotonically increasing (reset only on restart).
/// Thread-safe via `AtomicU64` — no locks needed for incrementing.
#[derive(Debug, Default)]
pub struct ControlPlaneMetrics {
    /// Total operations dispatched to agents.
    pub operations_dispatched: AtomicU64,
    /// Total result fragments accepted from agents.
    pub fragments_received: AtomicU64,
    /// Total fragments dropped for unknown operation ids.
    pub fragments_dropped: AtomicU64,
    /// Total response bytes received from agents.
    pub bytes_received: AtomicU64,
    /// Total response bytes streamed out to HTTP callers.
    pub bytes_streamed: AtomicU64,
    /// Total agent registrations (including reconnects).
    pub agents_registered_total: AtomicU64,
    /// Total agents evicted by the heartbeat monitor.
    pub agents_evicted: AtomicU64,
    /// Total operations terminated by the staleness sweep.
    pub operations_timed_out: AtomicU64,
    /// Total ABORT requests sent to agents.
    pub aborts_sent: AtomicU64,
    /// Total fragments rejected for exceeding the buffer limit.
    pub capacity_rejections: AtomicU64,
}

/// Shared state of the agent control plane.
#[derive(Debug)]
pub struct ControlPlane {
    config: Config,
    registry: AgentRegistry,
    store: OperationQueueStore,
    metrics: ControlPlaneMetrics,
}

impl ControlPlane {
    /// Create a control plane from configuration.
    pub fn new(config: Config) -> Self {
        let store = OperationQueueStore::new(&config.operations);
        Self {
            config,
            registry: AgentRegistry::new(),
            store,
            metrics: ControlPlaneMetrics::default(),
        }
    }

    /// The loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The live agent registry.
    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// The operation queue store.
    pub fn store(&self) -> &OperationQueueStore {
        &self.store
    }

    /// The operational metrics.
    pub fn metrics(&self) -> &ControlPlaneMetrics {
        &self.metrics
    }

    /// Fallback poll interval for consumers waiting on fragments.
    pub fn poll_interval(&self) -> Duration {
        self.config.operations.poll_interval()
    }

    /// End-to-end operation timeout.
    pub fn operation_timeout(&self) -> Duration {
        self.config.operations.timeout()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn control_plane_starts_empty() {
        let plane = ControlPlane::new(Config::default());
        assert!(plane.registry().is_empty());
        assert!(plane.store().is_empty());
        assert_eq!(plane.metrics().operations_dispatched.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn intervals_come_from_config() {
        let mut config = Config::default();
        config.operations.poll_interval_ms = 250;
        config.operations.timeout_secs = 40;
        let plane = ControlPlane::new(config);
        assert_eq!(plane.poll_interval(), Duration::from_millis(250));
        assert_eq!(plane.operation_timeout(), Duration::from_secs(40));
    }
}
