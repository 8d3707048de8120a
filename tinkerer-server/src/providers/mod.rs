//! Infrastructure provider plugins.
//!
//! An agent's composite id names the cloud provider its instance runs on;
//! the matching plugin resolves the human-facing instance name and login
//! user once at registration. Lookups are best effort: a failed or missing
//! lookup leaves the registration defaults in place.

mod aws;
mod kubernetes;

pub use aws::AwsProvider;
pub use kubernetes::KubernetesProvider;

use async_trait::async_trait;

/// Resolves instance metadata for one cloud provider.
#[async_trait]
pub trait InfraProvider: Send + Sync {
    /// The human-facing name of an instance, if the provider knows one.
    async fn instance_name(&self, region: &str, instance_id: &str) -> Option<String>;

    /// The login user for an instance, if the provider knows one.
    async fn instance_user(&self, region: &str, instance_id: &str) -> Option<String>;
}

/// Find the plugin for a provider segment, case-insensitive.
pub fn provider_for(provider: &str) -> Option<Box<dyn InfraProvider>> {
    match provider.to_ascii_lowercase().as_str() {
        "aws" => Some(Box::new(AwsProvider::new())),
        "k8s" | "kubernetes" => Some(Box::new(KubernetesProvider)),
        _ => None,
    }
}
