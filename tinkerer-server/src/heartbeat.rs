//! Agent liveness probing.
//!
//! A fixed-period timer fans PING operations out to every registered agent
//! on a bounded worker pool, reusing the normal dispatch/queue correlation
//! machinery. Agents that stay silent for half the operation timeout are
//! evicted; this is the only path that removes agents absent an explicit
//! disconnect.

use crate::dispatch;
use crate::server::ControlPlane;
use dashmap::DashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tinkerer_types::{OperationCode, OperationRequest};
use tokio::sync::Semaphore;
use tokio::time::interval;

/// Spawn the background heartbeat task.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_heartbeat_task(plane: Arc<ControlPlane>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let config = plane.config().heartbeat.clone();
        if !config.enabled {
            tracing::info!("heartbeat monitor disabled");
            return;
        }
        tracing::info!(interval_secs = config.interval_secs, "heartbeat monitor started");

        let permits = Arc::new(Semaphore::new(config.max_concurrent_probes));
        // Agents whose previous probe has not finished; ticks skip them so
        // no agent ever has two concurrent PINGs outstanding.
        let in_flight: Arc<DashMap<String, ()>> = Arc::new(DashMap::new());

        let mut timer = interval(Duration::from_secs(config.interval_secs));
        loop {
            timer.tick().await;
            for agent_id in plane.registry().agent_ids() {
                if in_flight.contains_key(&agent_id) {
                    tracing::debug!(%agent_id, "previous probe still running, skipping tick");
                    continue;
                }
                in_flight.insert(agent_id.clone(), ());

                let plane = plane.clone();
                let permits = permits.clone();
                let in_flight = in_flight.clone();
                tokio::spawn(async move {
                    // Closed only on shutdown; holding the slot for the
                    // whole probe bounds concurrency across agents.
                    let Ok(_permit) = permits.acquire_owned().await else {
                        in_flight.remove(&agent_id);
                        return;
                    };
                    probe_agent(&plane, &agent_id).await;
                    in_flight.remove(&agent_id);
                });
            }
        }
    })
}

/// Probe one agent and evict it if the PING goes unanswered.
pub async fn probe_agent(plane: &ControlPlane, agent_id: &str) {
    let request = OperationRequest::new(OperationCode::Ping, "");
    if dispatch::dispatch(plane, agent_id, &request).await.is_err() {
        // Already unreachable; the connection close path handles cleanup.
        tracing::debug!(agent_id, "skipping probe of unreachable agent");
        return;
    }

    let window = plane.operation_timeout() / 2;
    let answered = wait_for_completion(plane, &request.operation_id, window).await;
    plane.store().close(&request.operation_id);

    if !answered {
        tracing::error!(agent_id, "agent unresponsive, evicting");
        evict_agent(plane, agent_id).await;
    }
}

/// Wait until the operation reaches a terminal state, up to `window`.
pub(crate) async fn wait_for_completion(
    plane: &ControlPlane,
    operation_id: &str,
    window: Duration,
) -> bool {
    let Some(signal) = plane.store().subscribe(operation_id) else {
        return false;
    };
    let poll_interval = plane.poll_interval();
    let started = Instant::now();

    loop {
        if plane.store().is_completed(operation_id) {
            return true;
        }
        let Some(remaining) = window.checked_sub(started.elapsed()) else {
            return plane.store().is_completed(operation_id);
        };
        let _ = tokio::time::timeout(poll_interval.min(remaining), signal.notified()).await;
    }
}

/// Force an unresponsive agent out of the fleet.
///
/// Closes the socket, removes the registry entry, and terminates the
/// agent's outstanding operations so their waiters observe a failure
/// instead of sitting out the full operation timeout.
async fn evict_agent(plane: &ControlPlane, agent_id: &str) {
    if let Some(handle) = plane.registry().connection(agent_id) {
        handle.close().await;
    }
    plane.registry().remove(agent_id);
    let failed = plane.store().fail_agent_operations(agent_id);
    plane.metrics().agents_evicted.fetch_add(1, Ordering::Relaxed);
    tracing::warn!(agent_id, failed_operations = failed, "removed unresponsive agent");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::registry::{ConnectionHandle, Outbound};
    use tinkerer_types::{Agent, OperationFragment};
    use tokio::sync::mpsc;

    const AGENT_ID: &str = "aws:us-east-1:plan-1:i-01:10.0.0.1";

    fn probe_plane(timeout_secs: u64) -> (Arc<ControlPlane>, mpsc::Receiver<Outbound>) {
        let mut config = Config::default();
        config.operations.timeout_secs = timeout_secs;
        config.operations.poll_interval_ms = 10;
        let plane = Arc::new(ControlPlane::new(config));
        let agent = Agent::from_composite_id(AGENT_ID).unwrap();
        let (tx, rx) = mpsc::channel(8);
        plane.registry().register(agent, ConnectionHandle::new(tx));
        (plane, rx)
    }

    #[tokio::test]
    async fn answered_ping_keeps_agent_registered() {
        let (plane, mut conn_rx) = probe_plane(2);

        let responder = {
            let plane = plane.clone();
            tokio::spawn(async move {
                let Some(Outbound::Frame(frame)) = conn_rx.recv().await else {
                    panic!("expected ping frame");
                };
                let ping = OperationRequest::from_json(&frame).unwrap();
                assert_eq!(ping.code, OperationCode::Ping);
                plane
                    .store()
                    .append(OperationFragment::terminal(
                        &ping.operation_id,
                        OperationCode::Ping,
                        0,
                    ))
                    .unwrap();
                conn_rx
            })
        };

        probe_agent(&plane, AGENT_ID).await;
        responder.await.unwrap();

        assert!(plane.registry().lookup(AGENT_ID).is_some());
        // The probe cleans up its own queue entry
        assert!(plane.store().is_empty());
    }

    #[tokio::test]
    async fn silent_agent_is_evicted_with_clean_queue() {
        let (plane, mut conn_rx) = probe_plane(1);
        // Another operation is outstanding for the same agent
        plane.store().open("op-x", OperationCode::Shell, AGENT_ID);

        probe_agent(&plane, AGENT_ID).await;

        assert!(plane.registry().lookup(AGENT_ID).is_none());
        // The PING entry is gone and the leftover operation was failed
        assert!(!plane.store().contains(&conn_frame_operation_id(&mut conn_rx).await));
        assert!(plane.store().is_completed("op-x"));
        let fragments = plane.store().drain("op-x").unwrap();
        assert!(fragments.iter().any(|f| f.completed && f.exit_value != 0));
    }

    async fn conn_frame_operation_id(rx: &mut mpsc::Receiver<Outbound>) -> String {
        match rx.recv().await {
            Some(Outbound::Frame(frame)) => {
                OperationRequest::from_json(&frame).unwrap().operation_id
            }
            other => panic!("expected ping frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn wait_for_completion_returns_early_on_signal() {
        let (plane, _conn_rx) = probe_plane(60);
        plane.store().open("op-1", OperationCode::Ping, AGENT_ID);

        let waiter = {
            let plane = plane.clone();
            tokio::spawn(async move {
                wait_for_completion(&plane, "op-1", Duration::from_secs(30)).await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        plane
            .store()
            .append(OperationFragment::terminal("op-1", OperationCode::Ping, 0))
            .unwrap();

        let answered = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("waiter should finish well before its window")
            .unwrap();
        assert!(answered);
    }

    #[tokio::test]
    async fn ticks_skip_agents_with_a_probe_in_flight() {
        // Probe window (timeout/2 = 2s) spans two 1s ticks; the silent
        // agent must still only ever have one PING outstanding.
        let mut config = Config::default();
        config.operations.timeout_secs = 4;
        config.operations.poll_interval_ms = 20;
        config.heartbeat.interval_secs = 1;
        let plane = Arc::new(ControlPlane::new(config));
        let agent = Agent::from_composite_id(AGENT_ID).unwrap();
        let (tx, mut conn_rx) = mpsc::channel(32);
        plane.registry().register(agent, ConnectionHandle::new(tx));

        let monitor = spawn_heartbeat_task(plane.clone());

        // Well inside the first probe's window: later ticks were skipped
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let mut pings = 0;
        while let Ok(outbound) = conn_rx.try_recv() {
            if matches!(outbound, Outbound::Frame(_)) {
                pings += 1;
            }
        }
        assert_eq!(pings, 1, "expected exactly one in-flight PING");

        // The unanswered probe eventually evicts the agent
        tokio::time::timeout(Duration::from_secs(5), async {
            while plane.registry().lookup(AGENT_ID).is_some() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .expect("silent agent should be evicted");
        assert!(plane.store().is_empty());

        monitor.abort();
    }

    #[tokio::test]
    async fn wait_for_completion_times_out() {
        let (plane, _conn_rx) = probe_plane(60);
        plane.store().open("op-1", OperationCode::Ping, AGENT_ID);

        let answered =
            wait_for_completion(&plane, "op-1", Duration::from_millis(50)).await;
        assert!(!answered);
    }
}
