//! Background staleness sweep for the operation queue store.
//!
//! Guarantees every dispatched operation reaches a terminal state even if
//! its agent vanishes mid-execution and nobody is left consuming.

use crate::abort;
use crate::server::ControlPlane;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tinkerer_types::OperationCode;
use tokio::time::interval;

/// Spawn the background sweep task.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_sweep_task(plane: Arc<ControlPlane>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let config = plane.config().sweep.clone();
        if !config.enabled {
            tracing::info!("queue sweep disabled");
            return;
        }
        tracing::info!(interval_secs = config.interval_secs, "queue sweep started");

        let mut timer = interval(Duration::from_secs(config.interval_secs));
        loop {
            timer.tick().await;
            sweep_once(&plane).await;
        }
    })
}

/// Run one sweep pass and follow up on what it found.
///
/// Timed-out shell operations also get an ABORT sent to their agent: the
/// synthetic failure only settles the caller side, while the agent may
/// still be running the command.
pub async fn sweep_once(plane: &ControlPlane) {
    let outcome = plane.store().sweep(Instant::now());

    for timed_out in &outcome.timed_out {
        tracing::warn!(
            operation_id = %timed_out.operation_id,
            agent_id = %timed_out.agent_id,
            code = %timed_out.code,
            "operation stale, synthesized failure"
        );
        plane
            .metrics()
            .operations_timed_out
            .fetch_add(1, Ordering::Relaxed);
        if timed_out.code == OperationCode::Shell {
            abort::abort(plane, &timed_out.operation_id, &timed_out.agent_id).await;
        }
    }

    for operation_id in &outcome.purged {
        tracing::warn!(%operation_id, "purged unconsumed operation");
    }
}
