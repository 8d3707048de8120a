//! Fleet listing and operation endpoints.

use crate::error::ControlPlaneError;
use crate::server::ControlPlane;
use crate::stream::{self, StreamTarget};
use axum::extract::{Path, Query};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tinkerer_types::{Agent, OperationCode};

/// JSON error body returned by every failing endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// HTTP status code, repeated in the body.
    pub code: u16,
    /// Human-readable failure description.
    pub message: String,
}

/// Query parameters for the agent listing.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentsQuery {
    /// Restrict the listing to one test plan.
    pub test_plan_id: Option<String>,
}

/// Request body for the operation endpoints.
#[derive(Debug, Deserialize)]
pub struct OperationBody {
    /// Opaque payload, e.g. the shell command line.
    pub request: String,
    /// The kind of operation; defaults to SHELL.
    #[serde(default = "default_operation_code")]
    pub code: OperationCode,
}

fn default_operation_code() -> OperationCode {
    OperationCode::Shell
}

/// `GET /agents`: live agents, optionally filtered by test plan.
pub async fn list_agents(
    Extension(plane): Extension<Arc<ControlPlane>>,
    Query(query): Query<AgentsQuery>,
) -> Json<Vec<Agent>> {
    match query.test_plan_id {
        Some(test_plan_id) => Json(plane.registry().agents_for_test_plan(&test_plan_id)),
        None => Json(plane.registry().agents()),
    }
}

/// `GET /test-plans`: distinct test plans with at least one live agent.
pub async fn list_test_plans(
    Extension(plane): Extension<Arc<ControlPlane>>,
) -> Json<Vec<String>> {
    Json(plane.registry().test_plan_ids())
}

/// `GET /test-plan/{testPlanId}/agents`: live agents of one test plan.
pub async fn list_test_plan_agents(
    Extension(plane): Extension<Arc<ControlPlane>>,
    Path(test_plan_id): Path<String>,
) -> Json<Vec<Agent>> {
    Json(plane.registry().agents_for_test_plan(&test_plan_id))
}

/// `POST /test-plan/{testPlanId}/agent/{instanceName}/operation`
pub async fn run_test_plan_operation(
    Extension(plane): Extension<Arc<ControlPlane>>,
    Path((test_plan_id, instance_name)): Path<(String, String)>,
    Json(body): Json<OperationBody>,
) -> Response {
    run_operation(
        plane,
        StreamTarget::TestPlanInstance {
            test_plan_id,
            instance_name,
        },
        body,
    )
    .await
}

/// `POST /agent/{agentId}/operation`
pub async fn run_agent_operation(
    Extension(plane): Extension<Arc<ControlPlane>>,
    Path(agent_id): Path<String>,
    Json(body): Json<OperationBody>,
) -> Response {
    run_operation(plane, StreamTarget::Agent(agent_id), body).await
}

async fn run_operation(
    plane: Arc<ControlPlane>,
    target: StreamTarget,
    body: OperationBody,
) -> Response {
    match stream::open_stream(plane, target, body.code, body.request).await {
        Ok(body) => ([(CONTENT_TYPE, "application/x-ndjson")], body).into_response(),
        Err(e) => error_response(e),
    }
}

fn error_response(error: ControlPlaneError) -> Response {
    let status = match &error {
        ControlPlaneError::AgentUnreachable { .. } => StatusCode::NOT_FOUND,
        ControlPlaneError::SendFailure { .. } => StatusCode::BAD_GATEWAY,
        ControlPlaneError::CapacityExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            code: status.as_u16(),
            message: error.to_string(),
        }),
    )
        .into_response()
}
