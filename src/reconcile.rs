//! Builds a fresh snapshot from the provider and publishes it atomically.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::aggregate::recompute_aggregates;
use crate::billing::{format_amount, BillingLedger, ToggledOffLedger};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::filter::FilterPolicy;
use crate::models::{
    Environment, EnvironmentCache, GroupCapacity, Instance, InstanceKind, InstanceState,
    RawInstance, RawScalingGroup,
};
use crate::pricing::{PricingTable, TypeDetails};
use crate::provider::CloudProvider;
use crate::store::{CacheStore, Clock};

/// Instance type shown for scaling group rows.
pub const SCALING_GROUP_TYPE: &str = "ASG";

/// Discovery settings taken from the configuration.
#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    pub regions: Vec<String>,
    pub required_tag_key: String,
    pub required_tag_value: String,
    pub scaling_groups_enabled: bool,
    pub billing_enabled: bool,
}

impl DiscoverySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            regions: config.aws.regions.clone(),
            required_tag_key: config.aws.required_tag_key.clone(),
            required_tag_value: config.aws.required_tag_value.clone(),
            scaling_groups_enabled: config.aws.enable_asg_support,
            billing_enabled: config.billing_enabled(),
        }
    }
}

pub struct Reconciler {
    provider: Arc<dyn CloudProvider>,
    store: Arc<CacheStore>,
    toggled_off: Arc<ToggledOffLedger>,
    pricing: Arc<PricingTable>,
    filter: FilterPolicy,
    settings: DiscoverySettings,
    clock: Arc<dyn Clock>,
    /// Serializes refreshes. The billing ledger lives inside so it can only be
    /// touched by the refresh holding the lock.
    refresh_lock: Mutex<BillingLedger>,
}

impl Reconciler {
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        store: Arc<CacheStore>,
        toggled_off: Arc<ToggledOffLedger>,
        pricing: Arc<PricingTable>,
        filter: FilterPolicy,
        settings: DiscoverySettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            provider,
            store,
            toggled_off,
            pricing,
            filter,
            settings,
            clock,
            refresh_lock: Mutex::new(BillingLedger::new()),
        }
    }

    /// Poll every region and replace the snapshot.
    ///
    /// On any provider error the previous snapshot stays in place and the
    /// error is returned. Concurrent callers wait their turn and each run a
    /// full cycle.
    pub async fn refresh(&self) -> Result<()> {
        let mut ledger = self.refresh_lock.lock().await;
        let started = Instant::now();
        let now = self.clock.now();

        if self.settings.billing_enabled {
            let current = self.store.snapshot().await;
            let toggled_off = self.toggled_off.read().await;
            ledger.accrue(&current, &toggled_off, now);
        }

        let (groups, instances) = self.discover().await?;

        let mut environments = self.build_environments(groups, instances);
        let billing = self.settings.billing_enabled.then_some(&*ledger);
        recompute_aggregates(&mut environments, billing);

        let snapshot = EnvironmentCache {
            environments,
            total_bills_accrued: billing.map(|l| format_amount(l.total_accrued())),
            total_bills_saved: billing.map(|l| format_amount(l.total_saved())),
            refreshed_at: Some(now),
        };
        let env_count = snapshot.environments.len();
        self.store.replace(snapshot).await;

        debug!(
            elapsed = ?started.elapsed(),
            environments = env_count,
            "refresh complete"
        );
        Ok(())
    }

    /// Scaling groups for every region first (when enabled), then instances.
    async fn discover(&self) -> Result<(Vec<RawScalingGroup>, Vec<RawInstance>)> {
        let mut groups = Vec::new();
        if self.settings.scaling_groups_enabled {
            for region in &self.settings.regions {
                let started = Instant::now();
                let found = self.provider.list_scaling_groups(region).await.map_err(|e| {
                    error!(region = %region, error = %e, "failed to describe scaling groups");
                    e
                })?;
                debug!(region = %region, count = found.len(), elapsed = ?started.elapsed(), "scaling groups described");
                groups.extend(found);
            }
        }

        let mut instances = Vec::new();
        for region in &self.settings.regions {
            let started = Instant::now();
            let found = self
                .provider
                .list_instances(
                    region,
                    &self.settings.required_tag_key,
                    &self.settings.required_tag_value,
                )
                .await
                .map_err(|e| {
                    error!(region = %region, error = %e, "failed to describe instances");
                    e
                })?;
            debug!(region = %region, count = found.len(), elapsed = ?started.elapsed(), "instances described");
            instances.extend(found);
        }

        Ok((groups, instances))
    }

    /// Filter, normalize and group discovered records, preserving discovery order.
    fn build_environments(
        &self,
        groups: Vec<RawScalingGroup>,
        instances: Vec<RawInstance>,
    ) -> Vec<Environment> {
        let admitted_groups = groups
            .into_iter()
            .filter(|g| self.filter.admit_scaling_group(g))
            .map(|g| self.normalize_group(g));
        let admitted_instances = instances
            .into_iter()
            .filter(|i| {
                let admit = self.filter.admit_instance(i);
                if !admit {
                    debug!(
                        instance = %i.instance_id,
                        instance_type = %i.instance_type,
                        state = %i.state,
                        "instance is being ignored"
                    );
                }
                admit
            })
            .map(|i| self.normalize_instance(i));

        let mut environments: Vec<Environment> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for instance in admitted_groups.chain(admitted_instances) {
            let slot = *index.entry(instance.environment.clone()).or_insert_with(|| {
                environments.push(Environment::new(
                    self.provider.name(),
                    instance.region.clone(),
                    instance.environment.clone(),
                ));
                environments.len() - 1
            });
            environments[slot].instances.push(instance);
        }
        environments
    }

    fn enrich(&self, instance_type: &str, region: &str) -> Option<TypeDetails> {
        match self.pricing.lookup(instance_type, region) {
            Ok(details) => Some(details),
            Err(e @ Error::EnrichmentMiss { .. }) => {
                debug!(error = %e, "enrichment skipped");
                None
            }
            Err(e) => {
                warn!(error = %e, "unexpected pricing lookup failure");
                None
            }
        }
    }

    fn normalize_instance(&self, raw: RawInstance) -> Instance {
        let details = self.enrich(&raw.instance_type, &raw.region);
        let environment = self.filter.environment_of(&raw.tags).to_string();
        let name = raw.tags.get("Name").cloned().unwrap_or_default();
        Instance {
            id: String::new(),
            native_id: raw.instance_id,
            kind: InstanceKind::SingleInstance,
            instance_type: raw.instance_type,
            name,
            environment,
            region: raw.region,
            state: InstanceState::from_provider(&raw.state),
            vcpu: details.map(|d| d.vcpu).unwrap_or_default(),
            memory_gb: details.map(|d| d.memory_gb).unwrap_or_default(),
            hourly_price: details.map(|d| d.hourly_price).unwrap_or_default(),
            capacity: None,
        }
    }

    /// A group is one row whose resources are the sum over its current members.
    fn normalize_group(&self, raw: RawScalingGroup) -> Instance {
        let state = if !raw.member_types.is_empty() && raw.desired_capacity > 0 {
            InstanceState::Running
        } else {
            InstanceState::Stopped
        };

        let (mut vcpu, mut memory_gb, mut hourly_price) = (0, 0.0, 0.0);
        for member_type in &raw.member_types {
            if let Some(details) = self.enrich(member_type, &raw.region) {
                vcpu += details.vcpu;
                memory_gb += details.memory_gb;
                hourly_price += details.hourly_price;
            }
        }

        let environment = self.filter.environment_of(&raw.tags).to_string();
        Instance {
            id: String::new(),
            native_id: raw.name.clone(),
            kind: InstanceKind::ScalingGroup,
            instance_type: SCALING_GROUP_TYPE.to_string(),
            name: raw.name,
            environment,
            region: raw.region,
            state,
            vcpu,
            memory_gb,
            hourly_price,
            capacity: Some(GroupCapacity {
                instance_count: raw.member_types.len(),
                min_size: raw.min_size,
                max_size: raw.max_size,
                desired_capacity: raw.desired_capacity,
            }),
        }
    }

    /// Refresh once now, then every `interval` until the task is aborted.
    pub fn spawn_poller(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        info!(interval = ?interval, "start polling");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = self.refresh().await {
                    error!(error = %e, "scheduled refresh failed");
                }
            }
        })
    }
}
