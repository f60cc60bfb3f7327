//! In-memory provider for mock mode and tests.
//!
//! Control calls mutate the inventory, so the next refresh observes them the
//! same way it would observe a real account.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{CloudProvider, PROVIDER_AWS};
use crate::error::{Error, Result};
use crate::models::{RawInstance, RawScalingGroup};

const MOCK_INVENTORY_JSON: &str = include_str!("../../data/mock_inventory.json");

/// Provider call recorded by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    ListInstances { region: String },
    ListScalingGroups { region: String },
    StartInstances { region: String, ids: Vec<String> },
    StopInstances { region: String, ids: Vec<String> },
    ResizeScalingGroup { region: String, name: String, min_size: i32, desired_capacity: i32 },
}

impl MockCall {
    pub fn is_control(&self) -> bool {
        !matches!(self, Self::ListInstances { .. } | Self::ListScalingGroups { .. })
    }
}

#[derive(Debug, Default, Deserialize)]
struct Inventory {
    #[serde(default)]
    instances: Vec<RawInstance>,
    #[serde(default)]
    scaling_groups: Vec<RawScalingGroup>,
}

pub struct MockProvider {
    inventory: Mutex<Inventory>,
    /// Member type used when a group grows, keyed by group name.
    group_member_types: HashMap<String, String>,
    calls: Mutex<Vec<MockCall>>,
    delay: Duration,
    fail_discovery: AtomicBool,
    fail_control: AtomicBool,
}

impl MockProvider {
    pub fn new(instances: Vec<RawInstance>, scaling_groups: Vec<RawScalingGroup>) -> Self {
        let group_member_types = scaling_groups
            .iter()
            .filter_map(|g| Some((g.name.clone(), g.member_types.first()?.clone())))
            .collect();
        Self {
            inventory: Mutex::new(Inventory {
                instances,
                scaling_groups,
            }),
            group_member_types,
            calls: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            fail_discovery: AtomicBool::new(false),
            fail_control: AtomicBool::new(false),
        }
    }

    /// Mock seeded with the inventory bundled with the binary.
    pub fn bundled() -> Result<Self> {
        Self::from_json(MOCK_INVENTORY_JSON)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let inventory: Inventory = serde_json::from_str(json)?;
        info!(
            instances = inventory.instances.len(),
            scaling_groups = inventory.scaling_groups.len(),
            "MOCK: inventory loaded"
        );
        Ok(Self::new(inventory.instances, inventory.scaling_groups))
    }

    /// Add latency to every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Make discovery calls fail until reset.
    pub fn set_fail_discovery(&self, fail: bool) {
        self.fail_discovery.store(fail, Ordering::SeqCst);
    }

    /// Make control calls fail until reset.
    pub fn set_fail_control(&self, fail: bool) {
        self.fail_control.store(fail, Ordering::SeqCst);
    }

    pub async fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().await.clone()
    }

    pub async fn clear_calls(&self) {
        self.calls.lock().await.clear();
    }

    /// Current provider-side state of an instance.
    pub async fn instance_state(&self, instance_id: &str) -> Option<String> {
        self.inventory
            .lock()
            .await
            .instances
            .iter()
            .find(|i| i.instance_id == instance_id)
            .map(|i| i.state.clone())
    }

    /// Current provider-side desired capacity of a group.
    pub async fn group_capacity(&self, name: &str) -> Option<(i32, i32)> {
        self.inventory
            .lock()
            .await
            .scaling_groups
            .iter()
            .find(|g| g.name == name)
            .map(|g| (g.min_size, g.desired_capacity))
    }

    /// Overwrite an instance's state, as if someone else had toggled it.
    pub async fn set_instance_state(&self, instance_id: &str, state: &str) {
        let mut inventory = self.inventory.lock().await;
        if let Some(instance) = inventory
            .instances
            .iter_mut()
            .find(|i| i.instance_id == instance_id)
        {
            instance.state = state.to_string();
        }
    }

    async fn record(&self, call: MockCall) -> Result<()> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let region = match &call {
            MockCall::ListInstances { region }
            | MockCall::ListScalingGroups { region }
            | MockCall::StartInstances { region, .. }
            | MockCall::StopInstances { region, .. }
            | MockCall::ResizeScalingGroup { region, .. } => region.clone(),
        };
        let failing = if call.is_control() {
            self.fail_control.load(Ordering::SeqCst)
        } else {
            self.fail_discovery.load(Ordering::SeqCst)
        };
        self.calls.lock().await.push(call);
        if failing {
            return Err(Error::adapter(region, "MOCK: injected failure"));
        }
        Ok(())
    }

    async fn set_states(&self, region: &str, instance_ids: &[String], state: &str) -> Result<()> {
        let mut inventory = self.inventory.lock().await;
        if let Some(missing) = instance_ids.iter().find(|id| {
            !inventory
                .instances
                .iter()
                .any(|i| &i.instance_id == *id && i.region == region)
        }) {
            return Err(Error::adapter(
                region,
                format!("MOCK: instance {} does not exist", missing),
            ));
        }
        for instance in inventory
            .instances
            .iter_mut()
            .filter(|i| i.region == region && instance_ids.contains(&i.instance_id))
        {
            instance.state = state.to_string();
        }
        debug!(region, ids = ?instance_ids, state, "MOCK: instance states updated");
        Ok(())
    }
}

#[async_trait]
impl CloudProvider for MockProvider {
    fn name(&self) -> &str {
        PROVIDER_AWS
    }

    async fn list_instances(
        &self,
        region: &str,
        tag_key: &str,
        tag_value: &str,
    ) -> Result<Vec<RawInstance>> {
        self.record(MockCall::ListInstances {
            region: region.to_string(),
        })
        .await?;
        let inventory = self.inventory.lock().await;
        Ok(inventory
            .instances
            .iter()
            .filter(|i| i.region == region)
            .filter(|i| i.tags.get(tag_key).is_some_and(|v| v == tag_value))
            .cloned()
            .collect())
    }

    async fn list_scaling_groups(&self, region: &str) -> Result<Vec<RawScalingGroup>> {
        self.record(MockCall::ListScalingGroups {
            region: region.to_string(),
        })
        .await?;
        let inventory = self.inventory.lock().await;
        Ok(inventory
            .scaling_groups
            .iter()
            .filter(|g| g.region == region)
            .cloned()
            .collect())
    }

    async fn start_instances(&self, region: &str, instance_ids: &[String]) -> Result<()> {
        self.record(MockCall::StartInstances {
            region: region.to_string(),
            ids: instance_ids.to_vec(),
        })
        .await?;
        self.set_states(region, instance_ids, "running").await
    }

    async fn stop_instances(&self, region: &str, instance_ids: &[String]) -> Result<()> {
        self.record(MockCall::StopInstances {
            region: region.to_string(),
            ids: instance_ids.to_vec(),
        })
        .await?;
        self.set_states(region, instance_ids, "stopped").await
    }

    async fn resize_scaling_group(
        &self,
        region: &str,
        group_name: &str,
        min_size: i32,
        desired_capacity: i32,
    ) -> Result<()> {
        self.record(MockCall::ResizeScalingGroup {
            region: region.to_string(),
            name: group_name.to_string(),
            min_size,
            desired_capacity,
        })
        .await?;

        let mut inventory = self.inventory.lock().await;
        let group = inventory
            .scaling_groups
            .iter_mut()
            .find(|g| g.name == group_name && g.region == region)
            .ok_or_else(|| {
                Error::adapter(region, format!("MOCK: scaling group {} does not exist", group_name))
            })?;

        group.min_size = min_size;
        group.desired_capacity = desired_capacity;
        let member_type = self
            .group_member_types
            .get(group_name)
            .cloned()
            .unwrap_or_default();
        group.member_types = vec![member_type; desired_capacity.max(0) as usize];
        debug!(region, group = group_name, min_size, desired_capacity, "MOCK: group resized");
        Ok(())
    }

    async fn ping(&self, _region: &str) -> Result<bool> {
        Ok(!self.fail_discovery.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bundled_inventory_filters_by_tag_and_region() {
        let mock = MockProvider::bundled().unwrap();
        let found = mock
            .list_instances("ca-central-1", "power-toggle-enabled", "true")
            .await
            .unwrap();
        assert_eq!(found.len(), 11);

        let none = mock
            .list_instances("us-east-1", "power-toggle-enabled", "true")
            .await
            .unwrap();
        assert!(none.is_empty());

        let none = mock
            .list_instances("ca-central-1", "power-toggle-enabled", "false")
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_stop_then_start_changes_state() {
        let mock = MockProvider::bundled().unwrap();
        let ids = vec!["i-0c8e6b5d0e1b3f7a2".to_string()];

        mock.stop_instances("ca-central-1", &ids).await.unwrap();
        assert_eq!(mock.instance_state(&ids[0]).await.as_deref(), Some("stopped"));

        mock.start_instances("ca-central-1", &ids).await.unwrap();
        assert_eq!(mock.instance_state(&ids[0]).await.as_deref(), Some("running"));
    }

    #[tokio::test]
    async fn test_unknown_instance_is_an_error() {
        let mock = MockProvider::bundled().unwrap();
        let err = mock
            .stop_instances("ca-central-1", &["i-missing".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Adapter { .. }));
    }

    #[tokio::test]
    async fn test_resize_updates_members() {
        let mock = MockProvider::bundled().unwrap();
        mock.resize_scaling_group("ca-central-1", "mockenv3-web", 0, 0)
            .await
            .unwrap();
        let groups = mock.list_scaling_groups("ca-central-1").await.unwrap();
        let web = groups.iter().find(|g| g.name == "mockenv3-web").unwrap();
        assert!(web.member_types.is_empty());

        mock.resize_scaling_group("ca-central-1", "mockenv3-web", 1, 1)
            .await
            .unwrap();
        assert_eq!(mock.group_capacity("mockenv3-web").await, Some((1, 1)));
        let groups = mock.list_scaling_groups("ca-central-1").await.unwrap();
        let web = groups.iter().find(|g| g.name == "mockenv3-web").unwrap();
        assert_eq!(web.member_types, vec!["t2.medium".to_string()]);
    }

    #[tokio::test]
    async fn test_injected_failures_are_recorded() {
        let mock = MockProvider::bundled().unwrap();
        mock.set_fail_discovery(true);
        assert!(mock.list_scaling_groups("ca-central-1").await.is_err());
        assert!(!mock.ping("ca-central-1").await.unwrap());

        mock.set_fail_control(true);
        assert!(mock
            .start_instances("ca-central-1", &["i-0a5c68f08c53f5a81".to_string()])
            .await
            .is_err());
        assert_eq!(
            mock.instance_state("i-0a5c68f08c53f5a81").await.as_deref(),
            Some("stopped")
        );
        assert_eq!(mock.calls().await.len(), 2);
    }
}
