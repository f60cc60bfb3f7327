//! Decides which discovered records belong in the cache.

use crate::config::AwsConfig;
use crate::models::{InstanceState, RawInstance, RawScalingGroup};

/// Tag AWS puts on every member of an auto scaling group.
pub const ASG_MEMBERSHIP_TAG: &str = "aws:autoscaling:groupName";

/// Tag a scaling group must carry (with value `true`) to be managed.
pub const ASG_ENABLE_TAG: &str = "power-toggle-enabled";

#[derive(Debug, Clone, Default)]
pub struct FilterPolicy {
    environment_tag_key: String,
    ignore_instance_types: Vec<String>,
    ignore_environments: Vec<String>,
}

impl FilterPolicy {
    pub fn new(
        environment_tag_key: impl Into<String>,
        ignore_instance_types: Vec<String>,
        ignore_environments: Vec<String>,
    ) -> Self {
        Self {
            environment_tag_key: environment_tag_key.into(),
            ignore_instance_types,
            ignore_environments,
        }
    }

    pub fn from_config(config: &AwsConfig) -> Self {
        Self::new(
            config.environment_tag_key.clone(),
            config.ignore_instance_types.clone(),
            config.ignore_environments.clone(),
        )
    }

    pub fn accept_instance_type(&self, instance_type: &str) -> bool {
        !self.ignore_instance_types.iter().any(|t| t == instance_type)
    }

    /// Empty names are never accepted.
    pub fn accept_environment_name(&self, name: &str) -> bool {
        !name.is_empty() && !self.ignore_environments.iter().any(|n| n == name)
    }

    /// Environment name carried by a record's tags, if any.
    pub fn environment_of<'a>(&self, tags: &'a std::collections::HashMap<String, String>) -> &'a str {
        tags.get(&self.environment_tag_key)
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Whether a plain instance is admitted into the cache.
    ///
    /// Members of a scaling group are skipped; their group stands for them.
    pub fn admit_instance(&self, raw: &RawInstance) -> bool {
        if raw.tags.contains_key(ASG_MEMBERSHIP_TAG) {
            return false;
        }
        if InstanceState::from_provider(&raw.state) == InstanceState::Terminated {
            return false;
        }
        self.accept_instance_type(&raw.instance_type)
            && self.accept_environment_name(self.environment_of(&raw.tags))
    }

    /// Whether a scaling group is admitted. Groups have no single type, so only
    /// the enable flag and the environment name are checked.
    pub fn admit_scaling_group(&self, raw: &RawScalingGroup) -> bool {
        let enabled = raw
            .tags
            .get(ASG_ENABLE_TAG)
            .is_some_and(|v| v == "true");
        enabled && self.accept_environment_name(self.environment_of(&raw.tags))
    }
}
