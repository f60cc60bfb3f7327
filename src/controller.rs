//! Safety-gated start/stop of whole environments and single instances.
//!
//! Every call resolves its target against the current snapshot; nothing is
//! cached between calls.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::billing::ToggledOffLedger;
use crate::error::{Error, Result};
use crate::models::{DesiredState, Environment, Instance, InstanceKind};
use crate::notify::Notifier;
use crate::provider::CloudProvider;
use crate::store::CacheStore;

/// Capacity a scaling group is given when started. The previous capacity is
/// not kept across refreshes.
pub const SCALING_GROUP_START_CAPACITY: i32 = 1;

/// What a toggle acted on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToggleOutcome {
    pub action: DesiredState,
    /// Environment or instance local id.
    pub target: String,
    pub instance_ids: Vec<String>,
    pub scaling_groups: Vec<String>,
}

/// Provider calls needed to move one environment to a desired state.
#[derive(Debug, Default)]
struct TogglePlan {
    /// Plain instance ids by region.
    instances: BTreeMap<String, Vec<String>>,
    /// (region, group name)
    groups: Vec<(String, String)>,
    /// Plain instances plus scaling group members.
    machine_count: usize,
}

impl TogglePlan {
    fn for_environment(env: &Environment, desired: DesiredState) -> Self {
        let mut plan = Self::default();
        let source = desired.source_state();
        for instance in env.instances.iter().filter(|i| i.state == source) {
            plan.add(instance);
        }
        plan
    }

    fn for_instance(instance: &Instance) -> Self {
        let mut plan = Self::default();
        plan.add(instance);
        plan
    }

    fn add(&mut self, instance: &Instance) {
        match instance.kind {
            InstanceKind::SingleInstance => {
                self.instances
                    .entry(instance.region.clone())
                    .or_default()
                    .push(instance.native_id.clone());
            }
            InstanceKind::ScalingGroup => {
                self.groups
                    .push((instance.region.clone(), instance.native_id.clone()));
            }
        }
        self.machine_count += instance.member_count();
    }

    fn is_empty(&self) -> bool {
        self.instances.is_empty() && self.groups.is_empty()
    }

    fn call_count(&self) -> usize {
        self.instances.len() + self.groups.len()
    }
}

pub struct PowerController {
    provider: Arc<dyn CloudProvider>,
    store: Arc<CacheStore>,
    toggled_off: Arc<ToggledOffLedger>,
    notifier: Notifier,
    max_instances_to_shutdown: usize,
}

impl PowerController {
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        store: Arc<CacheStore>,
        toggled_off: Arc<ToggledOffLedger>,
        notifier: Notifier,
        max_instances_to_shutdown: usize,
    ) -> Self {
        Self {
            provider,
            store,
            toggled_off,
            notifier,
            max_instances_to_shutdown,
        }
    }

    /// Start every stopped instance and scaling group of an environment.
    pub async fn start_environment(&self, env_id: &str) -> Result<ToggleOutcome> {
        self.toggle_environment(env_id, DesiredState::Start).await
    }

    /// Stop every running instance and scaling group of an environment.
    ///
    /// Refused with [`Error::SafetyLimitExceeded`] before any provider call
    /// when more machines than the configured ceiling would be affected.
    pub async fn stop_environment(&self, env_id: &str) -> Result<ToggleOutcome> {
        self.toggle_environment(env_id, DesiredState::Stop).await
    }

    async fn toggle_environment(&self, env_id: &str, desired: DesiredState) -> Result<ToggleOutcome> {
        let snapshot = self.store.snapshot().await;
        let env = snapshot.environment(env_id).ok_or_else(|| {
            error!(env_id, "environment was not found in the cache");
            Error::environment_not_found(env_id)
        })?;

        let plan = TogglePlan::for_environment(env, desired);

        if desired == DesiredState::Stop && plan.machine_count > self.max_instances_to_shutdown {
            warn!(
                env = %env.name,
                env_id,
                count = plan.machine_count,
                limit = self.max_instances_to_shutdown,
                "SAFETY: refusing to stop environment"
            );
            debug!(instances = ?plan.instances, groups = ?plan.groups, "SAFETY: refused targets");
            return Err(Error::SafetyLimitExceeded {
                id: env_id.to_string(),
                name: env.name.clone(),
                count: plan.machine_count,
                limit: self.max_instances_to_shutdown,
            });
        }

        let outcome = ToggleOutcome {
            action: desired,
            target: env_id.to_string(),
            instance_ids: plan.instances.values().flatten().cloned().collect(),
            scaling_groups: plan.groups.iter().map(|(_, name)| name.clone()).collect(),
        };

        if plan.is_empty() {
            info!(env = %env.name, env_id, action = %desired, "nothing to toggle");
            return Ok(outcome);
        }

        let verb = match desired {
            DesiredState::Start => "STARTING",
            DesiredState::Stop => "STOPPING",
        };
        match self.execute(&plan, desired).await {
            Ok(()) => {
                info!(env = %env.name, env_id, action = %desired, "environment toggled");
                self.notifier.notify(format!(
                    "*{}* environment *`{}`* in region _{}_ --> *{} instance(s)* totaling *{} vCPU(s)* & *{}GB* memory",
                    verb, env.name, env.region, env.total_instances, env.total_vcpu, env.total_memory_gb
                ));
                Ok(outcome)
            }
            Err(e) => {
                error!(env = %env.name, env_id, action = %desired, error = %e, "environment toggle failed");
                self.notifier.notify(format!(
                    "*ERROR {}* environment *`{}`* in region _{}_ --> `{}`",
                    verb, env.name, env.region, e
                ));
                Err(e)
            }
        }
    }

    /// Toggle one instance or scaling group by local id.
    pub async fn toggle_instance(&self, id: &str, desired_state: &str) -> Result<ToggleOutcome> {
        let desired: DesiredState = desired_state.parse()?;

        let snapshot = self.store.snapshot().await;
        let (_, instance) = snapshot
            .instance(id)
            .ok_or_else(|| Error::instance_not_found(id))?;

        let plan = TogglePlan::for_instance(instance);
        match self.execute(&plan, desired).await {
            Ok(()) => {
                info!(id, native_id = %instance.native_id, action = %desired, "instance toggled");
                Ok(ToggleOutcome {
                    action: desired,
                    target: id.to_string(),
                    instance_ids: plan.instances.values().flatten().cloned().collect(),
                    scaling_groups: plan.groups.iter().map(|(_, name)| name.clone()).collect(),
                })
            }
            Err(e) => {
                error!(id, native_id = %instance.native_id, action = %desired, error = %e, "instance toggle failed");
                Err(e)
            }
        }
    }

    /// Issue every call in `plan`. Calls that succeed stay applied when others fail.
    async fn execute(&self, plan: &TogglePlan, desired: DesiredState) -> Result<()> {
        let mut failures = Vec::new();

        for (region, ids) in &plan.instances {
            let result = match desired {
                DesiredState::Start => self.provider.start_instances(region, ids).await,
                DesiredState::Stop => self.provider.stop_instances(region, ids).await,
            };
            match result {
                Ok(()) => match desired {
                    DesiredState::Start => self.toggled_off.clear_toggled_off(ids).await,
                    DesiredState::Stop => self.toggled_off.mark_toggled_off(ids).await,
                },
                Err(e) => {
                    error!(region = %region, ids = ?ids, action = %desired, error = %e, "instance call failed");
                    failures.push(e);
                }
            }
        }

        let capacity = match desired {
            DesiredState::Start => SCALING_GROUP_START_CAPACITY,
            DesiredState::Stop => 0,
        };
        for (region, name) in &plan.groups {
            if let Err(e) = self
                .provider
                .resize_scaling_group(region, name, capacity, capacity)
                .await
            {
                error!(region = %region, group = %name, action = %desired, error = %e, "scaling group call failed");
                failures.push(e);
            }
        }

        let attempted = plan.call_count();
        match failures.len() {
            0 => Ok(()),
            1 if attempted == 1 => Err(failures.remove(0)),
            _ => Err(Error::PartialFailure {
                attempted,
                failures,
            }),
        }
    }
}
