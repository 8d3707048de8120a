//! Streaming operation results back to HTTP callers.
//!
//! One bridge serves both ways of addressing an agent (direct agent id, or
//! test plan + instance name); the handlers only differ in how the target
//! resolves.

use crate::abort;
use crate::dispatch;
use crate::error::{ControlPlaneError, Result};
use crate::server::ControlPlane;
use axum::body::{Body, Bytes};
use std::convert::Infallible;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tinkerer_types::{Agent, OperationCode, OperationRequest};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// How the caller addressed the target agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTarget {
    /// Directly by agent id.
    Agent(String),
    /// By the test plan that spawned it and the instance name.
    TestPlanInstance {
        /// The test plan id.
        test_plan_id: String,
        /// The instance name within that plan.
        instance_name: String,
    },
}

impl StreamTarget {
    fn resolve(&self, plane: &ControlPlane) -> Option<Agent> {
        match self {
            Self::Agent(agent_id) => plane.registry().lookup(agent_id),
            Self::TestPlanInstance {
                test_plan_id,
                instance_name,
            } => plane
                .registry()
                .lookup_by_test_plan(test_plan_id, instance_name),
        }
    }
}

impl std::fmt::Display for StreamTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Agent(agent_id) => write!(f, "{agent_id}"),
            Self::TestPlanInstance {
                test_plan_id,
                instance_name,
            } => write!(f, "{test_plan_id}/{instance_name}"),
        }
    }
}

/// Dispatch an operation and return its result stream as an HTTP body.
///
/// The body yields newline-delimited JSON fragments as the agent produces
/// them, ending with the terminal fragment. Dispatch errors surface before
/// any body is produced so the handler can answer with a proper status.
pub async fn open_stream(
    plane: Arc<ControlPlane>,
    target: StreamTarget,
    code: OperationCode,
    command: String,
) -> Result<Body> {
    let agent = target
        .resolve(&plane)
        .ok_or_else(|| ControlPlaneError::AgentUnreachable {
            agent_id: target.to_string(),
        })?;

    let request = OperationRequest::new(code, command);
    dispatch::dispatch(&plane, &agent.agent_id, &request).await?;

    let (tx, rx) = mpsc::channel::<std::result::Result<Bytes, Infallible>>(16);
    tokio::spawn(run_bridge(plane, agent.agent_id, request.operation_id, tx));
    Ok(Body::from_stream(ReceiverStream::new(rx)))
}

/// Copy fragments from the queue store to the caller until the operation
/// reaches a terminal state.
///
/// A closed body channel means the caller disconnected mid-stream; the
/// agent is then told to abort so partial work does not continue
/// unattended, and the queue entry is closed.
async fn run_bridge(
    plane: Arc<ControlPlane>,
    agent_id: String,
    operation_id: String,
    tx: mpsc::Sender<std::result::Result<Bytes, Infallible>>,
) {
    let Some(signal) = plane.store().subscribe(&operation_id) else {
        // Entry vanished before we got here (swept or closed): nothing to
        // stream.
        return;
    };
    let poll_interval = plane.poll_interval();

    loop {
        let Some(fragments) = plane.store().drain(&operation_id) else {
            // Entry purged underneath us; the stream ends without a
            // terminal fragment rather than hanging.
            tracing::warn!(%operation_id, "queue entry disappeared mid-stream");
            return;
        };

        for fragment in fragments {
            let terminal = fragment.completed;
            let line = match fragment.to_json() {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(%operation_id, error = %e, "failed to encode fragment");
                    continue;
                }
            };
            let mut chunk = line.into_bytes();
            chunk.extend_from_slice(b"\r\n");
            let chunk_len = chunk.len() as u64;

            if tx.send(Ok(Bytes::from(chunk))).await.is_err() {
                tracing::warn!(
                    %operation_id,
                    %agent_id,
                    "caller disconnected mid-stream, aborting operation"
                );
                abort::abort(&plane, &operation_id, &agent_id).await;
                plane.store().close(&operation_id);
                return;
            }
            plane
                .metrics()
                .bytes_streamed
                .fetch_add(chunk_len, Ordering::Relaxed);

            if terminal {
                tracing::info!(%operation_id, %agent_id, "operation stream completed");
                plane.store().close(&operation_id);
                return;
            }
        }

        // Nothing terminal yet: wait for the next signal, or fall back to
        // polling in case a wakeup was missed.
        let _ = tokio::time::timeout(poll_interval, signal.notified()).await;
    }
}
