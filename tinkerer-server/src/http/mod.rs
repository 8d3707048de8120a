//! HTTP surface of the control plane.
//!
//! Serves the fleet listing endpoints, the streaming operation endpoints,
//! the agent WebSocket upgrade, and health/metrics.

pub mod api;
pub mod health;
mod metrics;

use crate::server::ControlPlane;
use crate::ws;
use axum::routing::{get, post};
use axum::{Extension, Router};
use std::sync::Arc;

pub use health::HealthStatus;

/// Build the HTTP router with all endpoints.
pub fn build_router(plane: Arc<ControlPlane>) -> Router {
    let mut router = Router::new()
        .route("/health", get(health::health_handler))
        .route("/agents", get(api::list_agents))
        .route("/test-plans", get(api::list_test_plans))
        .route("/test-plan/:test_plan_id/agents", get(api::list_test_plan_agents))
        .route(
            "/test-plan/:test_plan_id/agent/:instance_name/operation",
            post(api::run_test_plan_operation),
        )
        .route("/agent/:agent_id/operation", post(api::run_agent_operation))
        .route("/agent/:agent_id", get(ws::agent_ws_handler));
    if plane.config().http.metrics_enabled {
        router = router.route("/metrics", get(metrics::metrics_handler));
    }
    router.layer(Extension(plane))
}
