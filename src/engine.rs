//! Wires discovery, the snapshot store and the power controller together.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use crate::billing::ToggledOffLedger;
use crate::config::Config;
use crate::controller::{PowerController, ToggleOutcome};
use crate::error::{Error, Result};
use crate::filter::FilterPolicy;
use crate::models::{Environment, EnvironmentCache};
use crate::notify::Notifier;
use crate::pricing::PricingTable;
use crate::provider::{AwsProvider, CloudProvider, MockProvider};
use crate::reconcile::{DiscoverySettings, Reconciler};
use crate::store::{CacheStore, Clock, SystemClock};

/// Environment cache plus power control over one provider.
pub struct Engine {
    provider: Arc<dyn CloudProvider>,
    store: Arc<CacheStore>,
    reconciler: Arc<Reconciler>,
    controller: PowerController,
    regions: Vec<String>,
    poll_interval: Duration,
}

impl Engine {
    /// Build against AWS, or the bundled mock inventory in mock mode.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let provider: Arc<dyn CloudProvider> = if config.mock.enabled {
            info!(delay_ms = config.mock.delay_ms, "MOCK: mock mode is enabled");
            Arc::new(
                MockProvider::bundled()?.with_delay(Duration::from_millis(config.mock.delay_ms)),
            )
        } else {
            Arc::new(AwsProvider::new(&config.aws.regions).await)
        };
        let notifier = Notifier::start(&config.slack)?;
        Self::with_provider(config, provider, notifier, Arc::new(SystemClock))
    }

    pub fn with_provider(
        config: &Config,
        provider: Arc<dyn CloudProvider>,
        notifier: Notifier,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let store = Arc::new(CacheStore::new());
        let toggled_off = Arc::new(ToggledOffLedger::new());
        let pricing = Arc::new(PricingTable::bundled()?);
        info!(instance_types = pricing.len(), "instance type table loaded");

        let reconciler = Arc::new(Reconciler::new(
            provider.clone(),
            store.clone(),
            toggled_off.clone(),
            pricing,
            FilterPolicy::from_config(&config.aws),
            DiscoverySettings::from_config(config),
            clock,
        ));
        let controller = PowerController::new(
            provider.clone(),
            store.clone(),
            toggled_off,
            notifier,
            config.aws.max_instances_to_shutdown,
        );

        Ok(Self {
            provider,
            store,
            reconciler,
            controller,
            regions: config.aws.regions.clone(),
            poll_interval: config.poll_interval(),
        })
    }

    pub async fn refresh(&self) -> Result<()> {
        self.reconciler.refresh().await
    }

    pub async fn snapshot(&self) -> Arc<EnvironmentCache> {
        self.store.snapshot().await
    }

    pub async fn environment(&self, id: &str) -> Result<Environment> {
        self.store
            .snapshot()
            .await
            .environment(id)
            .cloned()
            .ok_or_else(|| Error::environment_not_found(id))
    }

    pub async fn start_environment(&self, id: &str) -> Result<ToggleOutcome> {
        self.controller.start_environment(id).await
    }

    pub async fn stop_environment(&self, id: &str) -> Result<ToggleOutcome> {
        self.controller.stop_environment(id).await
    }

    pub async fn toggle_instance(&self, id: &str, desired_state: &str) -> Result<ToggleOutcome> {
        self.controller.toggle_instance(id, desired_state).await
    }

    /// Whether the provider answers in the first configured region.
    pub async fn ping(&self) -> Result<bool> {
        match self.regions.first() {
            Some(region) => self.provider.ping(region).await,
            None => Ok(false),
        }
    }

    /// Start background refreshes at the configured interval.
    pub fn spawn_poller(&self) -> JoinHandle<()> {
        self.reconciler.clone().spawn_poller(self.poll_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ManualClock;

    fn mock_config() -> Config {
        let mut config = Config::default();
        config.aws.regions = vec!["ca-central-1".into()];
        config.aws.required_tag_key = "power-toggle-enabled".into();
        config.aws.required_tag_value = "true".into();
        config.aws.environment_tag_key = "Environment".into();
        config.aws.max_instances_to_shutdown = 10;
        config.aws.enable_asg_support = true;
        config.mock.enabled = true;
        config
    }

    #[tokio::test]
    async fn test_mock_mode_from_config() {
        let engine = Engine::from_config(&mock_config()).await.unwrap();
        assert!(engine.snapshot().await.environments.is_empty());
        assert!(engine.ping().await.unwrap());

        engine.refresh().await.unwrap();
        let snapshot = engine.snapshot().await;
        assert_eq!(snapshot.environments.len(), 3);

        // scaling groups are discovered first
        let first = &snapshot.environments[0];
        assert_eq!(first.name, "mockenv3");
        assert_eq!(engine.environment(&first.id).await.unwrap().total_instances, 3);
        assert!(matches!(
            engine.environment("missing").await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_billing_disabled_leaves_bills_empty() {
        let engine = Engine::with_provider(
            &mock_config(),
            Arc::new(MockProvider::bundled().unwrap()),
            Notifier::disabled(),
            Arc::new(ManualClock::new(chrono::Utc::now())),
        )
        .unwrap();
        engine.refresh().await.unwrap();
        engine.refresh().await.unwrap();
        let snapshot = engine.snapshot().await;
        assert!(snapshot.total_bills_accrued.is_none());
        assert!(snapshot.environments.iter().all(|e| e.bills_accrued.is_none()));
    }
}
