//! Kubernetes instance metadata mapping.

use super::InfraProvider;
use async_trait::async_trait;

/// Login user recorded for pods, which have no IaaS-level user.
const POD_USER: &str = "root";

/// Identity mapping for Kubernetes-provisioned agents.
///
/// Pods carry no provider-side display name, so the instance id doubles as
/// the instance name.
#[derive(Debug, Default)]
pub struct KubernetesProvider;

#[async_trait]
impl InfraProvider for KubernetesProvider {
    async fn instance_name(&self, _region: &str, instance_id: &str) -> Option<String> {
        Some(instance_id.to_string())
    }

    async fn instance_user(&self, _region: &str, _instance_id: &str) -> Option<String> {
        Some(POD_USER.to_string())
    }
}
