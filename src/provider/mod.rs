//! Cloud provider abstraction used for discovery and power control.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{RawInstance, RawScalingGroup};

pub mod aws;
pub mod mock;

pub use aws::AwsProvider;
pub use mock::MockProvider;

/// Name recorded on environments and mixed into every id.
pub const PROVIDER_AWS: &str = "aws";

/// Discovery and control calls against one cloud account.
///
/// Every call is scoped to a region. Errors are returned as-is; retries
/// belong to the implementation's own client, not to callers.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Provider name, e.g. `"aws"`.
    fn name(&self) -> &str;

    /// Instances carrying `tag_key = tag_value` in `region`.
    async fn list_instances(
        &self,
        region: &str,
        tag_key: &str,
        tag_value: &str,
    ) -> Result<Vec<RawInstance>>;

    /// Every scaling group in `region`.
    async fn list_scaling_groups(&self, region: &str) -> Result<Vec<RawScalingGroup>>;

    async fn start_instances(&self, region: &str, instance_ids: &[String]) -> Result<()>;

    async fn stop_instances(&self, region: &str, instance_ids: &[String]) -> Result<()>;

    /// Set a group's minimum size and desired capacity.
    async fn resize_scaling_group(
        &self,
        region: &str,
        group_name: &str,
        min_size: i32,
        desired_capacity: i32,
    ) -> Result<()>;

    /// Whether the provider answers at all in `region`.
    async fn ping(&self, region: &str) -> Result<bool>;
}
