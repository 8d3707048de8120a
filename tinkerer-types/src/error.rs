//! Wire-level error types.

/// Errors produced while encoding, decoding, or validating wire messages.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// The composite agent id did not have the expected shape.
    #[error("malformed agent id {id:?}: expected provider:region:testPlanId:instanceId:instanceIp")]
    InvalidAgentId {
        /// The id as received on the connection path.
        id: String,
    },

    /// Message serialization failed.
    #[error("message serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// Message deserialization failed.
    #[error("message deserialization failed: {0}")]
    Deserialization(#[source] serde_json::Error),
}
