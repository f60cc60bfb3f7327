//! Data models for discovered instances and the environment cache.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Whether a cache row is a single machine or a whole scaling group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceKind {
    SingleInstance,
    ScalingGroup,
}

/// Power state of an instance as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    Pending,
    Running,
    Stopping,
    Stopped,
    ShuttingDown,
    Terminated,
    #[serde(other)]
    Unknown,
}

impl InstanceState {
    /// Map a provider state name, e.g. `"shutting-down"`.
    pub fn from_provider(name: &str) -> Self {
        match name {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "stopping" => Self::Stopping,
            "stopped" => Self::Stopped,
            "shutting-down" => Self::ShuttingDown,
            "terminated" => Self::Terminated,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::ShuttingDown => "shutting-down",
            Self::Terminated => "terminated",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composite state of an environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentState {
    /// Every instance is running.
    Running,
    /// Every instance is stopped.
    Stopped,
    /// Every instance is running or stopped, but not uniformly.
    Mixed,
    /// At least one instance is in a transitional or unknown state.
    #[default]
    Changing,
}

/// Requested power transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DesiredState {
    Start,
    Stop,
}

impl DesiredState {
    /// Instances in this state are the ones a toggle acts on.
    pub fn source_state(&self) -> InstanceState {
        match self {
            Self::Start => InstanceState::Stopped,
            Self::Stop => InstanceState::Running,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
        }
    }
}

impl FromStr for DesiredState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            other => Err(Error::InvalidState(other.to_string())),
        }
    }
}

impl fmt::Display for DesiredState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capacity of a scaling group at discovery time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCapacity {
    pub instance_count: usize,
    pub min_size: i32,
    pub max_size: i32,
    pub desired_capacity: i32,
}

/// One cache row: a machine or a scaling group treated as a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    /// Local id, hash of provider + region + native id.
    #[serde(default)]
    pub id: String,
    /// Provider instance id, or the group name for a scaling group.
    pub native_id: String,
    pub kind: InstanceKind,
    pub instance_type: String,
    pub name: String,
    pub environment: String,
    pub region: String,
    pub state: InstanceState,
    #[serde(default)]
    pub vcpu: u32,
    #[serde(default)]
    pub memory_gb: f64,
    #[serde(default)]
    pub hourly_price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<GroupCapacity>,
}

impl Instance {
    pub fn is_scaling_group(&self) -> bool {
        self.kind == InstanceKind::ScalingGroup
    }

    /// Number of machines this row stands for.
    pub fn member_count(&self) -> usize {
        match (self.kind, &self.capacity) {
            (InstanceKind::ScalingGroup, Some(c)) => c.instance_count,
            (InstanceKind::ScalingGroup, None) => 0,
            (InstanceKind::SingleInstance, _) => 1,
        }
    }
}

/// Named grouping of instances sharing an environment tag value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub id: String,
    pub provider: String,
    pub region: String,
    pub name: String,
    pub instances: Vec<Instance>,
    pub running_instances: usize,
    pub stopped_instances: usize,
    pub total_instances: usize,
    pub total_vcpu: u32,
    pub total_memory_gb: f64,
    pub state: EnvironmentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bills_accrued: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bills_saved: Option<String>,
}

impl Environment {
    /// Empty environment; aggregates are filled in by the aggregator.
    pub fn new(provider: impl Into<String>, region: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            provider: provider.into(),
            region: region.into(),
            name: name.into(),
            instances: Vec::new(),
            running_instances: 0,
            stopped_instances: 0,
            total_instances: 0,
            total_vcpu: 0,
            total_memory_gb: 0.0,
            state: EnvironmentState::default(),
            bills_accrued: None,
            bills_saved: None,
        }
    }
}

/// Complete view of all environments; replaced as a whole on every refresh.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentCache {
    pub environments: Vec<Environment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_bills_accrued: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_bills_saved: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl EnvironmentCache {
    pub fn environment(&self, id: &str) -> Option<&Environment> {
        self.environments.iter().find(|env| env.id == id)
    }

    /// Resolve an instance by local id together with its environment.
    pub fn instance(&self, id: &str) -> Option<(&Environment, &Instance)> {
        self.environments.iter().find_map(|env| {
            env.instances
                .iter()
                .find(|instance| instance.id == id)
                .map(|instance| (env, instance))
        })
    }
}

/// Compute instance as returned by a discovery adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawInstance {
    pub instance_id: String,
    pub instance_type: String,
    pub state: String,
    pub region: String,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

/// Scaling group as returned by a discovery adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawScalingGroup {
    pub name: String,
    pub region: String,
    pub min_size: i32,
    pub max_size: i32,
    pub desired_capacity: i32,
    /// Instance type of every current member.
    #[serde(default)]
    pub member_types: Vec<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

/// How much of an environment to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum View {
    /// Aggregates only.
    #[default]
    Summary,
    /// Aggregates plus the instance list.
    Details,
}

impl FromStr for View {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "summary" => Ok(Self::Summary),
            "details" => Ok(Self::Details),
            other => Err(Error::config(format!(
                "unknown view: {}. Valid views are: summary, details",
                other
            ))),
        }
    }
}

impl View {
    /// Render one environment. The summary leaves out the instance list.
    pub fn render(&self, env: &Environment) -> Result<serde_json::Value, Error> {
        let mut value = serde_json::to_value(env)?;
        if *self == Self::Summary {
            if let Some(fields) = value.as_object_mut() {
                fields.remove("instances");
            }
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_state_from_provider() {
        assert_eq!(InstanceState::from_provider("running"), InstanceState::Running);
        assert_eq!(
            InstanceState::from_provider("shutting-down"),
            InstanceState::ShuttingDown
        );
        assert_eq!(InstanceState::from_provider("hibernating"), InstanceState::Unknown);
    }

    #[test]
    fn test_desired_state_parse() {
        assert_eq!("start".parse::<DesiredState>().unwrap(), DesiredState::Start);
        assert_eq!("stop".parse::<DesiredState>().unwrap(), DesiredState::Stop);
        assert!(matches!(
            "reboot".parse::<DesiredState>(),
            Err(Error::InvalidState(s)) if s == "reboot"
        ));
        assert!("Start".parse::<DesiredState>().is_err());
    }

    #[test]
    fn test_member_count() {
        let mut instance = Instance {
            id: String::new(),
            native_id: "i-1".into(),
            kind: InstanceKind::SingleInstance,
            instance_type: "t2.medium".into(),
            name: "web".into(),
            environment: "dev".into(),
            region: "us-east-1".into(),
            state: InstanceState::Running,
            vcpu: 2,
            memory_gb: 4.0,
            hourly_price: 0.0464,
            capacity: None,
        };
        assert_eq!(instance.member_count(), 1);

        instance.kind = InstanceKind::ScalingGroup;
        instance.capacity = Some(GroupCapacity {
            instance_count: 3,
            min_size: 1,
            max_size: 5,
            desired_capacity: 3,
        });
        assert_eq!(instance.member_count(), 3);
    }

    #[test]
    fn test_instance_state_serde() {
        let json = serde_json::to_string(&InstanceState::ShuttingDown).unwrap();
        assert_eq!(json, "\"shutting-down\"");
        let parsed: InstanceState = serde_json::from_str("\"rebooting\"").unwrap();
        assert_eq!(parsed, InstanceState::Unknown);
    }

    #[test]
    fn test_summary_view_drops_instances() {
        let env = Environment::new("aws", "us-east-1", "dev");
        let summary = View::Summary.render(&env).unwrap();
        assert!(summary.get("instances").is_none());
        assert_eq!(summary["name"], "dev");

        let details = View::Details.render(&env).unwrap();
        assert!(details["instances"].as_array().unwrap().is_empty());
        assert!("everything".parse::<View>().is_err());
    }
}
