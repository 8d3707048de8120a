//! Cancelling in-flight operations.

use crate::server::ControlPlane;
use std::sync::atomic::Ordering;
use tinkerer_types::{OperationCode, OperationRequest};

/// Ask an agent to stop executing an operation.
///
/// With a live connection, an ABORT request reusing the operation id goes
/// out and the agent is expected to answer asynchronously with a terminal
/// fragment through the normal append path; returns true without touching
/// the queue entry. With a dead connection (or a failed send), a terminal
/// failure fragment is synthesized directly into the store so any waiting
/// consumer still gets a terminal signal; returns false. Returns false
/// without side effects if the operation has no queue entry.
pub async fn abort(plane: &ControlPlane, operation_id: &str, agent_id: &str) -> bool {
    if !plane.store().contains(operation_id) {
        return false;
    }

    if let Some(handle) = plane.registry().connection(agent_id) {
        if handle.is_open() {
            let request = OperationRequest::with_id(operation_id, OperationCode::Abort, "");
            match request.to_json() {
                Ok(frame) => {
                    if handle.send_frame(frame).await.is_ok() {
                        plane.metrics().aborts_sent.fetch_add(1, Ordering::Relaxed);
                        tracing::info!(operation_id, agent_id, "sent abort to agent");
                        return true;
                    }
                    tracing::warn!(operation_id, agent_id, "abort send failed");
                }
                Err(e) => {
                    tracing::error!(operation_id, error = %e, "failed to encode abort request");
                }
            }
        }
    }

    // No way to reach the agent: terminate locally so waiters are not left
    // hanging until the staleness sweep.
    tracing::info!(operation_id, agent_id, "agent gone, synthesizing abort failure");
    plane.store().fail_operation(operation_id);
    false
}
