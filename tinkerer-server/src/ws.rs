//! WebSocket endpoint agents connect to.
//!
//! Each agent holds one persistent connection at `/agent/{agentId}`. The
//! reader half feeds result fragments into the queue store; the writer half
//! drains the outbound channel the registry hands to dispatchers.

use crate::abort;
use crate::config::Config;
use crate::error::ControlPlaneError;
use crate::providers;
use crate::registry::{ConnectionHandle, Outbound};
use crate::server::ControlPlane;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::Path;
use axum::response::IntoResponse;
use axum::Extension;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tinkerer_types::{Agent, OperationFragment};
use tokio::sync::mpsc;

/// Upgrade handler for agent connections.
pub async fn agent_ws_handler(
    Extension(plane): Extension<Arc<ControlPlane>>,
    Path(agent_id): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_agent_socket(socket, plane, agent_id))
}

/// Run one agent connection until it closes.
async fn handle_agent_socket(socket: WebSocket, plane: Arc<ControlPlane>, agent_id: String) {
    let agent = match Agent::from_composite_id(&agent_id) {
        Ok(agent) => agent,
        Err(e) => {
            tracing::warn!(%agent_id, error = %e, "rejecting agent with malformed id");
            return;
        }
    };
    let agent = resolve_instance_metadata(plane.config(), agent).await;

    let (mut sink, mut reader) = socket.split();
    let (tx, mut outbound_rx) = mpsc::channel::<Outbound>(64);
    let handle = ConnectionHandle::new(tx);
    plane.registry().register(agent.clone(), handle.clone());
    plane
        .metrics()
        .agents_registered_total
        .fetch_add(1, Ordering::Relaxed);
    tracing::info!(
        %agent_id,
        test_plan_id = %agent.test_plan_id,
        instance_name = %agent.instance_name,
        "agent connected"
    );

    let writer = tokio::spawn(async move {
        while let Some(outbound) = outbound_rx.recv().await {
            match outbound {
                Outbound::Frame(frame) => {
                    if sink.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    while let Some(message) = reader.next().await {
        match message {
            Ok(Message::Text(frame)) => handle_frame(&plane, &agent_id, &frame).await,
            Ok(Message::Close(_)) | Err(_) => break,
            // Binary frames and transport pings carry nothing for us
            Ok(_) => {}
        }
    }

    // Only tear down if a reconnect has not already replaced this socket
    if plane.registry().remove_if_current(&agent_id, &handle) {
        let failed = plane.store().fail_agent_operations(&agent_id);
        if failed > 0 {
            tracing::warn!(%agent_id, failed, "failed outstanding operations of disconnected agent");
        }
    }
    writer.abort();
    tracing::info!(%agent_id, "agent disconnected");
}

/// Handle one inbound text frame from an agent.
async fn handle_frame(plane: &ControlPlane, agent_id: &str, frame: &str) {
    let fragment = match OperationFragment::from_json(frame) {
        Ok(fragment) => fragment,
        Err(e) => {
            tracing::warn!(agent_id, error = %e, "discarding undecodable frame");
            return;
        }
    };
    let operation_id = fragment.operation_id.clone();
    let response_len = fragment.response.len() as u64;
    tracing::debug!(
        agent_id,
        %operation_id,
        completed = fragment.completed,
        bytes = response_len,
        "fragment received"
    );

    match plane.store().append(fragment) {
        Ok(()) => {
            plane
                .metrics()
                .fragments_received
                .fetch_add(1, Ordering::Relaxed);
            plane
                .metrics()
                .bytes_received
                .fetch_add(response_len, Ordering::Relaxed);
        }
        Err(ControlPlaneError::OperationNotFound { .. }) => {
            // Never dispatched here (e.g. a fragment from before a server
            // restart): dropped, not an error.
            plane
                .metrics()
                .fragments_dropped
                .fetch_add(1, Ordering::Relaxed);
            tracing::debug!(agent_id, %operation_id, "dropping fragment for unknown operation");
        }
        Err(ControlPlaneError::CapacityExceeded { limit, .. }) => {
            plane
                .metrics()
                .capacity_rejections
                .fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                agent_id,
                %operation_id,
                limit,
                "operation exceeded buffer limit, failing it"
            );
            // Settle the caller side, then tell the agent to stop producing
            plane.store().fail_operation(&operation_id);
            abort::abort(plane, &operation_id, agent_id).await;
        }
        Err(e) => {
            tracing::warn!(agent_id, %operation_id, error = %e, "failed to append fragment");
        }
    }
}

/// Fill in provider-resolved instance metadata at registration time.
async fn resolve_instance_metadata(config: &Config, mut agent: Agent) -> Agent {
    match providers::provider_for(&agent.provider) {
        Some(provider) => {
            if let Some(name) = provider.instance_name(&agent.region, &agent.instance_id).await {
                agent.instance_name = name;
            }
            if let Some(user) = provider.instance_user(&agent.region, &agent.instance_id).await {
                agent.instance_user = user;
            }
        }
        None => {
            tracing::debug!(
                provider = %agent.provider,
                "no infrastructure provider plugin, keeping defaults"
            );
        }
    }
    if agent.instance_user.is_empty() {
        agent.instance_user = config.operations.default_instance_user.clone();
    }
    agent
}
