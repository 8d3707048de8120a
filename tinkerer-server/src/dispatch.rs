//! Sending operation requests to agents.

use crate::error::{ControlPlaneError, Result};
use crate::server::ControlPlane;
use std::sync::atomic::Ordering;
use tinkerer_types::OperationRequest;

/// Dispatch one operation request to one agent.
///
/// Resolves the agent's connection through the registry, opens the queue
/// entry for the operation, and writes the serialized request to the
/// connection. Exactly one queue entry exists per successful dispatch; the
/// caller is responsible for eventually closing it (completion, abort, or
/// the staleness sweep).
///
/// # Errors
///
/// [`ControlPlaneError::AgentUnreachable`] if the agent is not registered
/// or its connection is dead; no queue entry is created in that case.
/// [`ControlPlaneError::SendFailure`] if the connection rejected the write;
/// the just-created queue entry is closed again, leaving nothing dangling.
pub async fn dispatch(
    plane: &ControlPlane,
    agent_id: &str,
    request: &OperationRequest,
) -> Result<()> {
    let handle = plane
        .registry()
        .connection(agent_id)
        .filter(|handle| handle.is_open())
        .ok_or_else(|| ControlPlaneError::AgentUnreachable {
            agent_id: agent_id.to_string(),
        })?;

    let frame = request.to_json()?;
    plane
        .store()
        .open(&request.operation_id, request.code, agent_id);

    if handle.send_frame(frame).await.is_err() {
        plane.store().close(&request.operation_id);
        return Err(ControlPlaneError::SendFailure {
            agent_id: agent_id.to_string(),
        });
    }

    plane
        .metrics()
        .operations_dispatched
        .fetch_add(1, Ordering::Relaxed);
    tracing::info!(
        operation_id = %request.operation_id,
        code = %request.code,
        agent_id,
        "dispatched operation"
    );
    Ok(())
}
