//! Operation requests and result fragments.
//!
//! A request travels server-to-agent; the agent answers with an ordered
//! sequence of fragments, the last of which carries `completed = true` and
//! the process exit value.

use crate::MessageError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What kind of work an operation asks the agent to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationCode {
    /// Execute a shell command and stream its output.
    Shell,
    /// Liveness probe; the agent answers with a single terminal fragment.
    Ping,
    /// Cancel the in-flight operation with the same `operationId`.
    Abort,
}

impl std::fmt::Display for OperationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shell => write!(f, "SHELL"),
            Self::Ping => write!(f, "PING"),
            Self::Abort => write!(f, "ABORT"),
        }
    }
}

/// One unit of work sent to a single agent.
///
/// Immutable once issued. Exactly one request is outstanding per
/// `operation_id`; ids are caller-generated UUIDs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRequest {
    /// Globally unique id correlating the request with its fragments.
    pub operation_id: String,
    /// The kind of work requested.
    pub code: OperationCode,
    /// Opaque payload, e.g. the shell command line.
    #[serde(default)]
    pub request: String,
    /// Optional key/value metadata forwarded verbatim to the agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_data: Option<BTreeMap<String, String>>,
}

impl OperationRequest {
    /// Create a request with a fresh UUID operation id.
    pub fn new(code: OperationCode, request: impl Into<String>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), code, request)
    }

    /// Create a request reusing an existing operation id (e.g. ABORT).
    pub fn with_id(
        operation_id: impl Into<String>,
        code: OperationCode,
        request: impl Into<String>,
    ) -> Self {
        Self {
            operation_id: operation_id.into(),
            code,
            request: request.into(),
            meta_data: None,
        }
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String, MessageError> {
        serde_json::to_string(self).map_err(MessageError::Serialization)
    }

    /// Deserialize from a JSON text frame.
    pub fn from_json(frame: &str) -> Result<Self, MessageError> {
        serde_json::from_str(frame).map_err(MessageError::Deserialization)
    }
}

/// One chunk of an operation's result, as sent by the agent.
///
/// Fragments for one operation are ordered; consumers concatenate the
/// `response` fields in arrival order. `exit_value` is meaningful only on
/// the fragment with `completed = true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationFragment {
    /// Id of the operation this fragment belongs to.
    pub operation_id: String,
    /// The kind of operation that produced the fragment.
    pub code: OperationCode,
    /// Partial output text.
    #[serde(default)]
    pub response: String,
    /// Optional key/value metadata from the agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_data: Option<BTreeMap<String, String>>,
    /// True on the final fragment of the operation.
    #[serde(default)]
    pub completed: bool,
    /// Process exit value; valid only when `completed` is set.
    #[serde(default)]
    pub exit_value: i32,
}

impl OperationFragment {
    /// Create a non-terminal fragment carrying partial output.
    pub fn partial(
        operation_id: impl Into<String>,
        code: OperationCode,
        response: impl Into<String>,
    ) -> Self {
        Self {
            operation_id: operation_id.into(),
            code,
            response: response.into(),
            meta_data: None,
            completed: false,
            exit_value: 0,
        }
    }

    /// Create a terminal fragment with an exit value and no output.
    pub fn terminal(operation_id: impl Into<String>, code: OperationCode, exit_value: i32) -> Self {
        Self {
            operation_id: operation_id.into(),
            code,
            response: String::new(),
            meta_data: None,
            completed: true,
            exit_value,
        }
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String, MessageError> {
        serde_json::to_string(self).map_err(MessageError::Serialization)
    }

    /// Deserialize from a JSON text frame.
    pub fn from_json(frame: &str) -> Result<Self, MessageError> {
        serde_json::from_str(frame).map_err(MessageError::Deserialization)
    }
}
