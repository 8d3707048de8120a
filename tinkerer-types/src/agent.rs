//! Agent identity and instance metadata.

use crate::MessageError;
use serde::{Deserialize, Serialize};

/// One connected agent and the instance it runs on.
///
/// An agent announces itself with a composite id of five colon-separated
/// segments: `provider:region:testPlanId:instanceId:instanceIp`. The
/// instance name and login user are resolved once at registration via the
/// matching infrastructure provider plugin; until then they default to the
/// instance id and the empty string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    /// Composite identity key, unique per connection.
    pub agent_id: String,
    /// The test run that spawned this agent.
    pub test_plan_id: String,
    /// Cloud provider segment (e.g. `aws`, `k8s`).
    pub provider: String,
    /// Provider region the instance lives in.
    pub region: String,
    /// Provider-assigned instance identifier.
    pub instance_id: String,
    /// Human-facing instance name, resolved from the provider.
    pub instance_name: String,
    /// Login user for the instance, resolved from the provider.
    pub instance_user: String,
    /// IP address the agent reported for its instance.
    pub instance_ip: String,
}

impl Agent {
    /// Parse an agent from its composite id.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::InvalidAgentId`] if the id does not have
    /// exactly five non-empty `provider`/`region`/`testPlanId`/`instanceId`
    /// segments (the ip segment may legitimately be empty behind NAT).
    pub fn from_composite_id(agent_id: &str) -> Result<Self, MessageError> {
        let segments: Vec<&str> = agent_id.split(':').collect();
        let invalid = || MessageError::InvalidAgentId {
            id: agent_id.to_string(),
        };
        let &[provider, region, test_plan_id, instance_id, instance_ip] = segments.as_slice()
        else {
            return Err(invalid());
        };
        if provider.is_empty() || region.is_empty() || test_plan_id.is_empty()
            || instance_id.is_empty()
        {
            return Err(invalid());
        }
        Ok(Self {
            agent_id: agent_id.to_string(),
            test_plan_id: test_plan_id.to_string(),
            provider: provider.to_string(),
            region: region.to_string(),
            instance_id: instance_id.to_string(),
            instance_name: instance_id.to_string(),
            instance_user: String::new(),
            instance_ip: instance_ip.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_id_parses_into_segments() {
        let agent = Agent::from_composite_id("aws:us-east-1:plan-42:i-0abc:10.0.1.5").unwrap();
        assert_eq!(agent.provider, "aws");
        assert_eq!(agent.region, "us-east-1");
        assert_eq!(agent.test_plan_id, "plan-42");
        assert_eq!(agent.instance_id, "i-0abc");
        assert_eq!(agent.instance_ip, "10.0.1.5");
        // Name defaults to the instance id until a provider resolves it
        assert_eq!(agent.instance_name, "i-0abc");
        assert!(agent.instance_user.is_empty());
    }

    #[test]
    fn wrong_segment_count_is_rejected() {
        assert!(Agent::from_composite_id("aws:us-east-1:plan-42:i-0abc").is_err());
        assert!(Agent::from_composite_id("aws:us-east-1:plan-42:i-0abc:1.2.3.4:extra").is_err());
        assert!(Agent::from_composite_id("").is_err());
    }

    #[test]
    fn empty_required_segment_is_rejected() {
        assert!(Agent::from_composite_id("aws::plan-42:i-0abc:10.0.1.5").is_err());
        assert!(Agent::from_composite_id(":us-east-1:plan-42:i-0abc:10.0.1.5").is_err());
    }

    #[test]
    fn empty_ip_segment_is_allowed() {
        let agent = Agent::from_composite_id("k8s:local:plan-1:pod-7:").unwrap();
        assert!(agent.instance_ip.is_empty());
    }

    #[test]
    fn serializes_with_camel_case_fields() {
        let agent = Agent::from_composite_id("aws:eu-west-1:plan-9:i-0def:172.16.0.2").unwrap();
        let json = serde_json::to_string(&agent).unwrap();
        assert!(json.contains("\"agentId\""));
        assert!(json.contains("\"testPlanId\""));
        assert!(json.contains("\"instanceName\""));
        assert!(json.contains("\"instanceUser\""));
        assert!(json.contains("\"instanceIp\""));
    }
}
