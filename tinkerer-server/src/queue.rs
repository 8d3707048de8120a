//! Per-operation result buffering.
//!
//! Every dispatched operation owns one queue entry that accumulates result
//! fragments from the agent until a consumer drains them. Each entry also
//! carries the notification signal consumers wait on, keyed by operation id
//! so delivery is O(1) per fragment rather than a broadcast every waiter
//! must filter.

use crate::config::OperationsConfig;
use crate::error::ControlPlaneError;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tinkerer_types::{OperationCode, OperationFragment};
use tokio::sync::Notify;

/// Synthetic failures report this exit value.
pub const FAILURE_EXIT_VALUE: i32 = 1;

#[derive(Debug)]
struct QueueEntry {
    agent_id: String,
    code: OperationCode,
    fragments: VecDeque<OperationFragment>,
    buffered_bytes: usize,
    completed: bool,
    last_updated: Instant,
    last_consumed: Instant,
    signal: Arc<Notify>,
}

impl QueueEntry {
    fn new(agent_id: &str, code: OperationCode, now: Instant) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            code,
            fragments: VecDeque::new(),
            buffered_bytes: 0,
            completed: false,
            last_updated: now,
            last_consumed: now,
            signal: Arc::new(Notify::new()),
        }
    }

    fn push_terminal_failure(&mut self, operation_id: &str, now: Instant) {
        self.fragments.push_back(OperationFragment::terminal(
            operation_id,
            self.code,
            FAILURE_EXIT_VALUE,
        ));
        self.completed = true;
        self.last_updated = now;
        self.signal.notify_waiters();
    }
}

/// An operation that the sweep terminated for inactivity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedOutOperation {
    /// The stale operation.
    pub operation_id: String,
    /// The agent it was dispatched to.
    pub agent_id: String,
    /// The kind of operation.
    pub code: OperationCode,
}

/// What one sweep pass did.
#[derive(Debug, Default)]
pub struct SweepOutcome {
    /// Entries terminated with a synthetic failure fragment this pass.
    pub timed_out: Vec<TimedOutOperation>,
    /// Already-terminated entries purged because nobody consumed them.
    pub purged: Vec<String>,
}

/// Store of per-operation fragment buffers.
///
/// Sharded-lock concurrent map keyed by operation id; entries for different
/// operations never contend on one lock.
#[derive(Debug)]
pub struct OperationQueueStore {
    entries: DashMap<String, QueueEntry>,
    max_content_bytes: usize,
    stale_update_timeout: Duration,
    stale_consume_timeout: Duration,
}

impl OperationQueueStore {
    /// Create a store with the configured limits.
    pub fn new(config: &OperationsConfig) -> Self {
        Self {
            entries: DashMap::new(),
            max_content_bytes: config.max_queue_content_bytes,
            stale_update_timeout: config.stale_update_timeout(),
            stale_consume_timeout: config.stale_consume_timeout(),
        }
    }

    /// Open a queue entry for a freshly dispatched operation.
    pub fn open(&self, operation_id: &str, code: OperationCode, agent_id: &str) {
        self.entries.insert(
            operation_id.to_string(),
            QueueEntry::new(agent_id, code, Instant::now()),
        );
    }

    /// Append a fragment from the agent and wake the operation's waiters.
    ///
    /// Fragments arriving after the entry reached a terminal state are
    /// dropped so an operation yields exactly one terminal fragment.
    ///
    /// # Errors
    ///
    /// [`ControlPlaneError::OperationNotFound`] if no entry exists (the
    /// server never dispatched this id, or it was already purged);
    /// [`ControlPlaneError::CapacityExceeded`] if buffering the fragment
    /// would exceed the per-operation size limit.
    pub fn append(&self, fragment: OperationFragment) -> Result<(), ControlPlaneError> {
        let mut entry = self.entries.get_mut(&fragment.operation_id).ok_or_else(|| {
            ControlPlaneError::OperationNotFound {
                operation_id: fragment.operation_id.clone(),
            }
        })?;
        if entry.completed {
            tracing::debug!(
                operation_id = %fragment.operation_id,
                "dropping fragment for terminated operation"
            );
            return Ok(());
        }
        if entry.buffered_bytes + fragment.response.len() > self.max_content_bytes {
            return Err(ControlPlaneError::CapacityExceeded {
                operation_id: fragment.operation_id.clone(),
                limit: self.max_content_bytes,
            });
        }
        entry.buffered_bytes += fragment.response.len();
        entry.completed = fragment.completed;
        entry.last_updated = Instant::now();
        entry.fragments.push_back(fragment);
        entry.signal.notify_waiters();
        Ok(())
    }

    /// Atomically remove and return all buffered fragments, in append order.
    ///
    /// Returns `None` once the entry has been closed or purged.
    pub fn drain(&self, operation_id: &str) -> Option<Vec<OperationFragment>> {
        let mut entry = self.entries.get_mut(operation_id)?;
        let fragments: Vec<OperationFragment> =
            std::mem::take(&mut entry.fragments).into_iter().collect();
        entry.buffered_bytes = 0;
        entry.last_consumed = Instant::now();
        Some(fragments)
    }

    /// Remove the entry, waking any residual waiter so it observes the
    /// entry is gone.
    pub fn close(&self, operation_id: &str) -> bool {
        match self.entries.remove(operation_id) {
            Some((_, entry)) => {
                entry.signal.notify_waiters();
                true
            }
            None => false,
        }
    }

    /// The notification signal for one operation.
    ///
    /// Fired on every append and on synthetic termination; subscribers are
    /// expected to pair it with a fallback poll interval.
    pub fn subscribe(&self, operation_id: &str) -> Option<Arc<Notify>> {
        self.entries
            .get(operation_id)
            .map(|entry| entry.signal.clone())
    }

    /// Whether the operation has reached a terminal state.
    pub fn is_completed(&self, operation_id: &str) -> bool {
        self.entries
            .get(operation_id)
            .map(|entry| entry.completed)
            .unwrap_or(false)
    }

    /// Whether a queue entry exists for the operation.
    pub fn contains(&self, operation_id: &str) -> bool {
        self.entries.contains_key(operation_id)
    }

    /// Number of open queue entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no queue entries are open.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Terminate an operation with a synthetic failure fragment.
    ///
    /// Waiters wake and drain a `completed = true, exitValue = 1` fragment.
    /// Returns false if the entry is missing or already terminated.
    pub fn fail_operation(&self, operation_id: &str) -> bool {
        let Some(mut entry) = self.entries.get_mut(operation_id) else {
            return false;
        };
        if entry.completed {
            return false;
        }
        entry.push_terminal_failure(operation_id, Instant::now());
        true
    }

    /// Terminate every outstanding operation of one agent.
    ///
    /// Called when an agent disconnects or is evicted so no waiter sits out
    /// the full operation timeout. Returns how many operations were failed.
    pub fn fail_agent_operations(&self, agent_id: &str) -> usize {
        let now = Instant::now();
        let mut failed = 0;
        for mut entry in self.entries.iter_mut() {
            if entry.agent_id == agent_id && !entry.completed {
                let operation_id = entry.key().clone();
                entry.push_terminal_failure(&operation_id, now);
                failed += 1;
            }
        }
        failed
    }

    /// One maintenance pass over all entries.
    ///
    /// Tier 1: an entry with no new fragment within the stale-update
    /// timeout and no consumer read within the stale-consume timeout is
    /// terminated with a synthetic failure fragment, so every dispatched
    /// operation reaches a terminal state even if its agent vanished.
    /// Tier 2: an entry already terminated whose terminal fragment nobody
    /// drained within the stale-consume timeout is purged outright.
    pub fn sweep(&self, now: Instant) -> SweepOutcome {
        let mut outcome = SweepOutcome::default();
        let operation_ids: Vec<String> =
            self.entries.iter().map(|entry| entry.key().clone()).collect();

        for operation_id in operation_ids {
            let Some(mut entry) = self.entries.get_mut(&operation_id) else {
                continue;
            };
            let unconsumed = now.saturating_duration_since(entry.last_consumed);
            if entry.completed {
                if unconsumed > self.stale_consume_timeout {
                    drop(entry);
                    self.close(&operation_id);
                    outcome.purged.push(operation_id);
                }
                continue;
            }
            let idle = now.saturating_duration_since(entry.last_updated);
            if idle > self.stale_update_timeout && unconsumed > self.stale_consume_timeout {
                entry.push_terminal_failure(&operation_id, now);
                outcome.timed_out.push(TimedOutOperation {
                    operation_id: operation_id.clone(),
                    agent_id: entry.agent_id.clone(),
                    code: entry.code,
                });
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> OperationQueueStore {
        OperationQueueStore::new(&OperationsConfig::default())
    }

    fn small_store(max_bytes: usize) -> OperationQueueStore {
        OperationQueueStore::new(&OperationsConfig {
            max_queue_content_bytes: max_bytes,
            ..OperationsConfig::default()
        })
    }

    fn partial(operation_id: &str, response: &str) -> OperationFragment {
        OperationFragment::partial(operation_id, OperationCode::Shell, response)
    }

    #[tokio::test]
    async fn drain_preserves_append_order() {
        let store = test_store();
        store.open("op-1", OperationCode::Shell, "agent-1");

        for chunk in ["a", "b", "c"] {
            store.append(partial("op-1", chunk)).unwrap();
        }

        let fragments = store.drain("op-1").unwrap();
        let joined: String = fragments.iter().map(|f| f.response.as_str()).collect();
        assert_eq!(joined, "abc");

        // Drained fragments are gone; the entry remains open
        assert_eq!(store.drain("op-1").unwrap().len(), 0);
        assert!(store.contains("op-1"));
    }

    #[tokio::test]
    async fn append_past_capacity_is_rejected_not_truncated() {
        let store = small_store(8);
        store.open("op-1", OperationCode::Shell, "agent-1");

        store.append(partial("op-1", "12345678")).unwrap();
        let err = store.append(partial("op-1", "9")).unwrap_err();
        assert!(matches!(err, ControlPlaneError::CapacityExceeded { .. }));

        // Everything appended before the limit is still there
        let fragments = store.drain("op-1").unwrap();
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].response, "12345678");
    }

    #[tokio::test]
    async fn drain_frees_capacity() {
        let store = small_store(8);
        store.open("op-1", OperationCode::Shell, "agent-1");

        store.append(partial("op-1", "12345678")).unwrap();
        store.drain("op-1").unwrap();
        store.append(partial("op-1", "abcdefgh")).unwrap();
    }

    #[tokio::test]
    async fn append_to_unknown_operation_is_an_error() {
        let store = test_store();
        let err = store.append(partial("never-dispatched", "x")).unwrap_err();
        assert!(matches!(err, ControlPlaneError::OperationNotFound { .. }));
    }

    #[tokio::test]
    async fn terminal_fragment_latches_completion() {
        let store = test_store();
        store.open("op-1", OperationCode::Shell, "agent-1");

        store.append(partial("op-1", "out")).unwrap();
        store
            .append(OperationFragment::terminal("op-1", OperationCode::Shell, 0))
            .unwrap();
        assert!(store.is_completed("op-1"));

        // Late fragments after the terminal one are dropped
        store.append(partial("op-1", "late")).unwrap();
        let fragments = store.drain("op-1").unwrap();
        assert_eq!(fragments.len(), 2);
        assert!(fragments[1].completed);
    }

    #[tokio::test]
    async fn fail_operation_synthesizes_one_terminal_failure() {
        let store = test_store();
        store.open("op-1", OperationCode::Shell, "agent-1");

        assert!(store.fail_operation("op-1"));
        // Second failure is a no-op thanks to the completion latch
        assert!(!store.fail_operation("op-1"));

        let fragments = store.drain("op-1").unwrap();
        let terminal: Vec<_> = fragments.iter().filter(|f| f.completed).collect();
        assert_eq!(terminal.len(), 1);
        assert_eq!(terminal[0].exit_value, FAILURE_EXIT_VALUE);
    }

    #[tokio::test]
    async fn fail_agent_operations_only_touches_that_agent() {
        let store = test_store();
        store.open("op-1", OperationCode::Shell, "agent-1");
        store.open("op-2", OperationCode::Ping, "agent-1");
        store.open("op-3", OperationCode::Shell, "agent-2");

        assert_eq!(store.fail_agent_operations("agent-1"), 2);
        assert!(store.is_completed("op-1"));
        assert!(store.is_completed("op-2"));
        assert!(!store.is_completed("op-3"));
    }

    #[tokio::test]
    async fn append_wakes_subscriber() {
        let store = Arc::new(test_store());
        store.open("op-1", OperationCode::Shell, "agent-1");
        let signal = store.subscribe("op-1").unwrap();

        let waiter = tokio::spawn(async move { signal.notified().await });
        tokio::task::yield_now().await;
        store.append(partial("op-1", "x")).unwrap();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("subscriber should be woken by append")
            .unwrap();
    }

    #[tokio::test]
    async fn sweep_times_out_stale_entry_with_single_failure() {
        let store = OperationQueueStore::new(&OperationsConfig {
            stale_update_timeout_secs: 1,
            stale_consume_timeout_secs: 1,
            ..OperationsConfig::default()
        });
        store.open("op-1", OperationCode::Shell, "agent-1");

        // Not yet stale
        let outcome = store.sweep(Instant::now());
        assert!(outcome.timed_out.is_empty());

        let later = Instant::now() + Duration::from_secs(2);
        let outcome = store.sweep(later);
        assert_eq!(outcome.timed_out.len(), 1);
        assert_eq!(outcome.timed_out[0].operation_id, "op-1");
        assert_eq!(outcome.timed_out[0].agent_id, "agent-1");

        // Exactly one terminal fragment with a failure exit value
        let fragments = store.drain("op-1").unwrap();
        let terminal: Vec<_> = fragments.iter().filter(|f| f.completed).collect();
        assert_eq!(terminal.len(), 1);
        assert_eq!(terminal[0].exit_value, FAILURE_EXIT_VALUE);

        // A second sweep does not time it out again
        let outcome = store.sweep(later);
        assert!(outcome.timed_out.is_empty());
    }

    #[tokio::test]
    async fn sweep_purges_terminated_entry_nobody_drained() {
        let store = OperationQueueStore::new(&OperationsConfig {
            stale_update_timeout_secs: 1,
            stale_consume_timeout_secs: 1,
            ..OperationsConfig::default()
        });
        store.open("op-1", OperationCode::Shell, "agent-1");

        let later = Instant::now() + Duration::from_secs(2);
        store.sweep(later); // tier 1: synthesize failure
        let outcome = store.sweep(later + Duration::from_secs(2)); // tier 2: purge
        assert_eq!(outcome.purged, vec!["op-1".to_string()]);
        assert!(!store.contains("op-1"));
    }

    #[tokio::test]
    async fn sweep_spares_recently_consumed_entries() {
        let store = OperationQueueStore::new(&OperationsConfig {
            stale_update_timeout_secs: 1,
            stale_consume_timeout_secs: 1000,
            ..OperationsConfig::default()
        });
        store.open("op-1", OperationCode::Shell, "agent-1");

        // Consumer is still polling even though the agent went quiet
        let later = Instant::now() + Duration::from_secs(5);
        let outcome = store.sweep(later);
        assert!(outcome.timed_out.is_empty());
    }

    #[tokio::test]
    async fn close_removes_entry() {
        let store = test_store();
        store.open("op-1", OperationCode::Ping, "agent-1");
        assert!(store.close("op-1"));
        assert!(!store.close("op-1"));
        assert!(store.drain("op-1").is_none());
        assert!(store.subscribe("op-1").is_none());
    }
}
