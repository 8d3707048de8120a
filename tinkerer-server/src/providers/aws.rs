//! AWS EC2 instance metadata lookups.

use super::InfraProvider;
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};

/// Resolves instance metadata through the EC2 API.
///
/// The instance name comes from the instance's `Name` tag; the login user
/// from the `USERNAME` tag on the AMI the instance was launched from.
/// Credentials come from the ambient AWS credential chain.
#[derive(Debug, Default)]
pub struct AwsProvider;

impl AwsProvider {
    /// Create the AWS provider plugin.
    pub fn new() -> Self {
        Self
    }

    async fn client(&self, region: &str) -> aws_sdk_ec2::Client {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;
        aws_sdk_ec2::Client::new(&config)
    }
}

#[async_trait]
impl InfraProvider for AwsProvider {
    async fn instance_name(&self, region: &str, instance_id: &str) -> Option<String> {
        let client = self.client(region).await;
        let output = client
            .describe_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(|e| tracing::warn!(instance_id, error = %e, "DescribeInstances failed"))
            .ok()?;

        output
            .reservations()
            .iter()
            .flat_map(|reservation| reservation.instances())
            .flat_map(|instance| instance.tags())
            .find(|tag| tag.key() == Some("Name"))
            .and_then(|tag| tag.value().map(str::to_string))
    }

    async fn instance_user(&self, region: &str, instance_id: &str) -> Option<String> {
        let client = self.client(region).await;
        let output = client
            .describe_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(|e| tracing::warn!(instance_id, error = %e, "DescribeInstances failed"))
            .ok()?;

        let image_id = output
            .reservations()
            .iter()
            .flat_map(|reservation| reservation.instances())
            .find_map(|instance| instance.image_id().map(str::to_string))?;

        let images = client
            .describe_images()
            .image_ids(&image_id)
            .send()
            .await
            .map_err(|e| tracing::warn!(%image_id, error = %e, "DescribeImages failed"))
            .ok()?;

        images
            .images()
            .iter()
            .flat_map(|image| image.tags())
            .find(|tag| tag.key() == Some("USERNAME"))
            .and_then(|tag| tag.value().map(str::to_string))
    }
}
