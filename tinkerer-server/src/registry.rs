//! Live agent registry.
//!
//! Single source of truth for which agents are connected. Every other
//! component resolves agents and connection handles through here on each
//! call instead of caching them.

use dashmap::DashMap;
use tinkerer_types::Agent;
use tokio::sync::mpsc;

/// Outbound traffic for one agent connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A JSON text frame to forward to the agent.
    Frame(String),
    /// Ask the writer task to close the socket.
    Close,
}

/// Sending half of an agent's duplex connection.
///
/// The WebSocket writer task owns the paired receiver; once that task ends
/// the channel closes and the handle reports dead. Validity must be checked
/// before every send since the agent may disconnect at any time.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    tx: mpsc::Sender<Outbound>,
}

impl ConnectionHandle {
    /// Wrap the sending half of a connection's outbound channel.
    pub fn new(tx: mpsc::Sender<Outbound>) -> Self {
        Self { tx }
    }

    /// Whether the writer task is still draining this channel.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Queue a text frame for the agent.
    pub async fn send_frame(
        &self,
        frame: String,
    ) -> Result<(), mpsc::error::SendError<Outbound>> {
        self.tx.send(Outbound::Frame(frame)).await
    }

    /// Ask the writer task to close the socket.
    pub async fn close(&self) {
        let _ = self.tx.send(Outbound::Close).await;
    }

    /// Whether two handles wrap the same underlying connection.
    pub fn same_channel(&self, other: &ConnectionHandle) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

#[derive(Debug)]
struct AgentEntry {
    agent: Agent,
    handle: ConnectionHandle,
}

/// Registry of connected agents and their connection handles.
///
/// Agent and handle live in one map entry so registration and removal are
/// atomic per agent id. Safe under concurrent access from connection,
/// heartbeat, and request tasks.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    entries: DashMap<String, AgentEntry>,
}

impl AgentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent, replacing any previous entry for the same id.
    ///
    /// Reconnects land here too: the stale handle is dropped with the old
    /// entry and its writer task winds down on its own.
    pub fn register(&self, agent: Agent, handle: ConnectionHandle) {
        let agent_id = agent.agent_id.clone();
        self.entries.insert(agent_id.clone(), AgentEntry { agent, handle });
        tracing::debug!(%agent_id, total = self.entries.len(), "registered agent");
    }

    /// Remove an agent and its connection handle, returning the agent.
    pub fn remove(&self, agent_id: &str) -> Option<Agent> {
        let removed = self.entries.remove(agent_id).map(|(_, entry)| entry.agent);
        if removed.is_some() {
            tracing::debug!(agent_id, total = self.entries.len(), "removed agent");
        }
        removed
    }

    /// Remove an agent only if it is still bound to the given connection.
    ///
    /// Connection teardown uses this so a socket that was already replaced
    /// by a reconnect cannot tear down the fresh registration.
    pub fn remove_if_current(&self, agent_id: &str, handle: &ConnectionHandle) -> bool {
        self.entries
            .remove_if(agent_id, |_, entry| entry.handle.same_channel(handle))
            .is_some()
    }

    /// Look up an agent by id.
    pub fn lookup(&self, agent_id: &str) -> Option<Agent> {
        self.entries.get(agent_id).map(|entry| entry.agent.clone())
    }

    /// Look up an agent by the test plan that spawned it and its instance
    /// name. Linear scan; fleets are hundreds of agents, not millions.
    pub fn lookup_by_test_plan(&self, test_plan_id: &str, instance_name: &str) -> Option<Agent> {
        self.entries.iter().find_map(|entry| {
            let agent = &entry.agent;
            (agent.test_plan_id == test_plan_id && agent.instance_name == instance_name)
                .then(|| agent.clone())
        })
    }

    /// Whether the agent is registered with a connection that still accepts
    /// writes.
    pub fn has_live_connection(&self, agent_id: &str) -> bool {
        self.entries
            .get(agent_id)
            .map(|entry| entry.handle.is_open())
            .unwrap_or(false)
    }

    /// The connection handle for an agent, if registered.
    pub fn connection(&self, agent_id: &str) -> Option<ConnectionHandle> {
        self.entries.get(agent_id).map(|entry| entry.handle.clone())
    }

    /// Snapshot of all registered agents.
    pub fn agents(&self) -> Vec<Agent> {
        self.entries.iter().map(|entry| entry.agent.clone()).collect()
    }

    /// Snapshot of the agents belonging to one test plan.
    pub fn agents_for_test_plan(&self, test_plan_id: &str) -> Vec<Agent> {
        self.entries
            .iter()
            .filter(|entry| entry.agent.test_plan_id == test_plan_id)
            .map(|entry| entry.agent.clone())
            .collect()
    }

    /// Snapshot of all registered agent ids.
    pub fn agent_ids(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Distinct test plan ids with at least one live agent.
    pub fn test_plan_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries
            .iter()
            .map(|entry| entry.agent.test_plan_id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no agents are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_agent(agent_id: &str) -> Agent {
        Agent::from_composite_id(agent_id).unwrap()
    }

    fn test_handle() -> (ConnectionHandle, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(8);
        (ConnectionHandle::new(tx), rx)
    }

    #[tokio::test]
    async fn register_lookup_remove() {
        let registry = AgentRegistry::new();
        let agent = test_agent("aws:us-east-1:plan-1:i-01:10.0.0.1");
        let (handle, _rx) = test_handle();

        registry.register(agent.clone(), handle);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup(&agent.agent_id), Some(agent.clone()));
        assert!(registry.has_live_connection(&agent.agent_id));

        let removed = registry.remove(&agent.agent_id);
        assert_eq!(removed, Some(agent.clone()));
        assert!(registry.is_empty());
        assert!(registry.lookup(&agent.agent_id).is_none());
        assert!(!registry.has_live_connection(&agent.agent_id));
    }

    #[tokio::test]
    async fn reregistration_replaces_previous_connection() {
        let registry = AgentRegistry::new();
        let agent = test_agent("aws:us-east-1:plan-1:i-01:10.0.0.1");

        let (old_handle, old_rx) = test_handle();
        registry.register(agent.clone(), old_handle);

        // Simulate a reconnect with a fresh channel
        drop(old_rx);
        let (new_handle, _new_rx) = test_handle();
        registry.register(agent.clone(), new_handle);

        assert_eq!(registry.len(), 1);
        assert!(registry.has_live_connection(&agent.agent_id));
    }

    #[tokio::test]
    async fn dead_channel_reports_no_live_connection() {
        let registry = AgentRegistry::new();
        let agent = test_agent("aws:us-east-1:plan-1:i-01:10.0.0.1");
        let (handle, rx) = test_handle();

        registry.register(agent.clone(), handle);
        drop(rx);

        // Still registered, but the connection is no longer writable
        assert!(registry.lookup(&agent.agent_id).is_some());
        assert!(!registry.has_live_connection(&agent.agent_id));
    }

    #[tokio::test]
    async fn lookup_by_test_plan_and_instance_name() {
        let registry = AgentRegistry::new();
        let (h1, _r1) = test_handle();
        let (h2, _r2) = test_handle();
        let mut a = test_agent("aws:us-east-1:plan-1:i-01:10.0.0.1");
        a.instance_name = "build-node".to_string();
        let mut b = test_agent("aws:us-east-1:plan-2:i-02:10.0.0.2");
        b.instance_name = "build-node".to_string();
        registry.register(a.clone(), h1);
        registry.register(b.clone(), h2);

        let found = registry.lookup_by_test_plan("plan-2", "build-node").unwrap();
        assert_eq!(found.agent_id, b.agent_id);
        assert!(registry.lookup_by_test_plan("plan-3", "build-node").is_none());
        assert!(registry.lookup_by_test_plan("plan-1", "other").is_none());
    }

    #[tokio::test]
    async fn test_plan_ids_are_distinct() {
        let registry = AgentRegistry::new();
        let mut receivers = Vec::new();
        for id in [
            "aws:us-east-1:plan-1:i-01:10.0.0.1",
            "aws:us-east-1:plan-1:i-02:10.0.0.2",
            "aws:us-east-1:plan-2:i-03:10.0.0.3",
        ] {
            let (handle, rx) = test_handle();
            receivers.push(rx);
            registry.register(test_agent(id), handle);
        }

        let mut plans = registry.test_plan_ids();
        plans.sort();
        assert_eq!(plans, vec!["plan-1".to_string(), "plan-2".to_string()]);
        assert_eq!(registry.agents_for_test_plan("plan-1").len(), 2);
    }

    #[tokio::test]
    async fn stale_connection_cannot_remove_fresh_registration() {
        let registry = AgentRegistry::new();
        let agent = test_agent("aws:us-east-1:plan-1:i-01:10.0.0.1");

        let (old_handle, _old_rx) = test_handle();
        registry.register(agent.clone(), old_handle.clone());

        // Agent reconnects before the old socket finishes tearing down
        let (new_handle, _new_rx) = test_handle();
        registry.register(agent.clone(), new_handle.clone());

        assert!(!registry.remove_if_current(&agent.agent_id, &old_handle));
        assert!(registry.lookup(&agent.agent_id).is_some());

        assert!(registry.remove_if_current(&agent.agent_id, &new_handle));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn send_frame_reaches_writer_channel() {
        let (handle, mut rx) = test_handle();
        handle.send_frame("{\"x\":1}".to_string()).await.unwrap();
        assert_eq!(rx.recv().await, Some(Outbound::Frame("{\"x\":1}".to_string())));

        handle.close().await;
        assert_eq!(rx.recv().await, Some(Outbound::Close));
    }
}
