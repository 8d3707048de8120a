//! Error types for the control plane.

/// Main error type for control plane operations.
///
/// Every failure is local to one operation or one agent; nothing here is
/// fatal to the process.
#[derive(Debug, thiserror::Error)]
pub enum ControlPlaneError {
    /// The target agent is not registered or its connection is dead.
    #[error("agent unreachable: {agent_id}")]
    AgentUnreachable {
        /// Identity the caller used to address the agent.
        agent_id: String,
    },

    /// Writing to the agent's connection failed mid-send.
    #[error("failed to send to agent {agent_id}")]
    SendFailure {
        /// The agent whose connection rejected the write.
        agent_id: String,
    },

    /// Buffering the fragment would exceed the per-operation size limit.
    #[error("operation {operation_id} exceeded buffered size limit of {limit} bytes")]
    CapacityExceeded {
        /// The operation whose queue entry is full.
        operation_id: String,
        /// The configured maximum buffered size.
        limit: usize,
    },

    /// No queue entry exists for the operation.
    #[error("unknown operation: {operation_id}")]
    OperationNotFound {
        /// The operation id that had no queue entry.
        operation_id: String,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Wire message error.
    #[error("message error: {0}")]
    Message(#[from] tinkerer_types::MessageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for control plane operations.
pub type Result<T> = std::result::Result<T, ControlPlaneError>;
