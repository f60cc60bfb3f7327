//! FGP service implementation for the power-toggle daemon.

use anyhow::Result;
use fgp_daemon::service::{HealthStatus, MethodInfo, ParamInfo};
use fgp_daemon::FgpService;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::engine::Engine;
use crate::models::{DesiredState, View};

/// FGP service exposing the environment cache and power controls.
pub struct PowerToggleService {
    engine: Arc<Engine>,
    config: Config,
    poller: Mutex<Option<JoinHandle<()>>>,
    runtime: Runtime,
}

impl PowerToggleService {
    /// Create the service from a validated configuration.
    pub fn new(config: Config) -> Result<Self> {
        let runtime = Runtime::new()?;
        let engine = runtime.block_on(Engine::from_config(&config))?;

        Ok(Self {
            engine: Arc::new(engine),
            config,
            poller: Mutex::new(None),
            runtime,
        })
    }

    /// Helper to get a string parameter.
    fn get_param_str<'a>(params: &'a HashMap<String, Value>, key: &str) -> Option<&'a str> {
        params.get(key).and_then(|v| v.as_str())
    }

    fn required_str(params: &HashMap<String, Value>, key: &str) -> Result<String> {
        Self::get_param_str(params, key)
            .filter(|v| !v.is_empty())
            .map(String::from)
            .ok_or_else(|| anyhow::anyhow!("Missing required parameter: {}", key))
    }

    fn view_param(params: &HashMap<String, Value>) -> Result<View> {
        match Self::get_param_str(params, "group") {
            Some(group) => Ok(group.parse()?),
            None => Ok(View::default()),
        }
    }

    /// Health check implementation.
    fn health(&self) -> Result<Value> {
        let engine = self.engine.clone();
        let (ok, snapshot) = self
            .runtime
            .block_on(async move { (engine.ping().await, engine.snapshot().await) });
        let ok = ok?;

        let age = snapshot
            .refreshed_at
            .map(|at| (chrono::Utc::now() - at).num_seconds());

        Ok(serde_json::json!({
            "status": if ok { "healthy" } else { "unhealthy" },
            "provider_connected": ok,
            "environments": snapshot.environments.len(),
            "refreshed_at": snapshot.refreshed_at,
            "snapshot_age_secs": age,
            "version": env!("CARGO_PKG_VERSION"),
        }))
    }

    fn version_info(&self) -> Value {
        serde_json::json!({
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        })
    }

    /// Refresh implementation.
    fn refresh(&self) -> Result<Value> {
        let engine = self.engine.clone();
        self.runtime.block_on(async move { engine.refresh().await })?;
        Ok(serde_json::json!({ "status": "OK" }))
    }

    /// List environments implementation.
    fn list_envs(&self, params: HashMap<String, Value>) -> Result<Value> {
        let view = Self::view_param(&params)?;
        let engine = self.engine.clone();

        let snapshot = self.runtime.block_on(async move {
            engine.refresh().await?;
            Ok::<_, crate::error::Error>(engine.snapshot().await)
        })?;

        let environments = snapshot
            .environments
            .iter()
            .map(|env| view.render(env))
            .collect::<crate::error::Result<Vec<_>>>()?;

        let mut result = serde_json::json!({
            "environments": environments,
            "count": environments.len(),
            "refreshed_at": snapshot.refreshed_at,
        });
        if let Some(accrued) = &snapshot.total_bills_accrued {
            result["total_bills_accrued"] = Value::from(accrued.as_str());
        }
        if let Some(saved) = &snapshot.total_bills_saved {
            result["total_bills_saved"] = Value::from(saved.as_str());
        }
        Ok(result)
    }

    /// Single environment implementation.
    fn get_env(&self, params: HashMap<String, Value>) -> Result<Value> {
        let id = Self::required_str(&params, "id")?;
        let view = Self::view_param(&params)?;
        let engine = self.engine.clone();

        let env = self.runtime.block_on(async move {
            engine.refresh().await?;
            engine.environment(&id).await
        })?;

        Ok(view.render(&env)?)
    }

    /// Start or stop a whole environment.
    fn power_env(&self, params: HashMap<String, Value>) -> Result<Value> {
        let id = Self::required_str(&params, "id")?;
        let desired: DesiredState = Self::required_str(&params, "state")?.parse()?;
        let engine = self.engine.clone();

        let outcome = self.runtime.block_on(async move {
            match desired {
                DesiredState::Start => engine.start_environment(&id).await,
                DesiredState::Stop => engine.stop_environment(&id).await,
            }
        })?;

        Ok(serde_json::json!({
            "status": "OK",
            "result": outcome,
        }))
    }

    /// Start or stop a single instance or scaling group.
    fn power_instance(&self, params: HashMap<String, Value>) -> Result<Value> {
        let id = Self::required_str(&params, "id")?;
        let state = Self::required_str(&params, "state")?;
        let engine = self.engine.clone();

        let outcome = self
            .runtime
            .block_on(async move { engine.toggle_instance(&id, &state).await })?;

        Ok(serde_json::json!({
            "status": "OK",
            "result": outcome,
        }))
    }
}

fn id_param() -> ParamInfo {
    ParamInfo {
        name: "id".into(),
        param_type: "string".into(),
        required: true,
        default: None,
    }
}

fn group_param() -> ParamInfo {
    ParamInfo {
        name: "group".into(),
        param_type: "string".into(),
        required: false,
        default: Some(serde_json::json!("summary")),
    }
}

fn state_param() -> ParamInfo {
    ParamInfo {
        name: "state".into(),
        param_type: "string".into(),
        required: true,
        default: None,
    }
}

impl FgpService for PowerToggleService {
    fn name(&self) -> &str {
        "power-toggle"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn dispatch(&self, method: &str, params: HashMap<String, Value>) -> Result<Value> {
        match method {
            "health" => self.health(),
            "version" | "power-toggle.version" => Ok(self.version_info()),
            "config" | "power-toggle.config" => Ok(self.config.summary()),
            "refresh" | "power-toggle.refresh" => self.refresh(),
            "envs" | "power-toggle.envs" => self.list_envs(params),
            "env" | "power-toggle.env" => self.get_env(params),
            "env.power" | "power-toggle.env.power" => self.power_env(params),
            "instance.power" | "power-toggle.instance.power" => self.power_instance(params),
            _ => anyhow::bail!("Unknown method: {}", method),
        }
    }

    fn method_list(&self) -> Vec<MethodInfo> {
        vec![
            MethodInfo {
                name: "power-toggle.version".into(),
                description: "Daemon name and version".into(),
                params: vec![],
            },
            MethodInfo {
                name: "power-toggle.config".into(),
                description: "Effective configuration, without webhook URLs".into(),
                params: vec![],
            },
            MethodInfo {
                name: "power-toggle.refresh".into(),
                description: "Rediscover all environments now".into(),
                params: vec![],
            },
            MethodInfo {
                name: "power-toggle.envs".into(),
                description: "Refresh, then list environments (summary or details)".into(),
                params: vec![group_param()],
            },
            MethodInfo {
                name: "power-toggle.env".into(),
                description: "Refresh, then get one environment by id".into(),
                params: vec![id_param(), group_param()],
            },
            MethodInfo {
                name: "power-toggle.env.power".into(),
                description: "Start or stop every instance of an environment".into(),
                params: vec![id_param(), state_param()],
            },
            MethodInfo {
                name: "power-toggle.instance.power".into(),
                description: "Start or stop one instance or scaling group".into(),
                params: vec![id_param(), state_param()],
            },
        ]
    }

    fn on_start(&self) -> Result<()> {
        tracing::info!("PowerToggleService starting, verifying provider connection...");
        let engine = self.engine.clone();
        self.runtime.block_on(async move {
            match engine.ping().await {
                Ok(true) => tracing::info!("provider connection verified"),
                Ok(false) => tracing::warn!("provider is not reachable, serving an empty cache until it is"),
                Err(e) => tracing::error!("Failed to reach provider: {}", e),
            }
        });

        let _guard = self.runtime.enter();
        let handle = self.engine.spawn_poller();
        let mut poller = self.poller.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = poller.replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    fn health_check(&self) -> HashMap<String, HealthStatus> {
        let mut checks = HashMap::new();

        let engine = self.engine.clone();
        let start = std::time::Instant::now();
        let result = self.runtime.block_on(async move { engine.ping().await });

        let latency = start.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok(true) => {
                checks.insert("provider".into(), HealthStatus::healthy_with_latency(latency));
            }
            Ok(false) => {
                checks.insert("provider".into(), HealthStatus::unhealthy("Provider unreachable"));
            }
            Err(e) => {
                checks.insert("provider".into(), HealthStatus::unhealthy(e.to_string()));
            }
        }

        checks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_service(ceiling: usize) -> PowerToggleService {
        let mut config = Config::default();
        config.aws.regions = vec!["ca-central-1".into()];
        config.aws.required_tag_key = "power-toggle-enabled".into();
        config.aws.required_tag_value = "true".into();
        config.aws.environment_tag_key = "Environment".into();
        config.aws.max_instances_to_shutdown = ceiling;
        config.mock.enabled = true;
        PowerToggleService::new(config).unwrap()
    }

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(*v)))
            .collect()
    }

    fn env_id(service: &PowerToggleService, name: &str) -> String {
        let envs = service.dispatch("envs", HashMap::new()).unwrap();
        envs["environments"]
            .as_array()
            .unwrap()
            .iter()
            .find(|e| e["name"] == name)
            .unwrap()["id"]
            .as_str()
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_envs_summary_and_details() {
        let service = mock_service(10);

        let summary = service.dispatch("envs", HashMap::new()).unwrap();
        assert_eq!(summary["count"], 3);
        assert!(summary["environments"][0].get("instances").is_none());
        assert!(summary.get("total_bills_accrued").is_none());

        let details = service
            .dispatch("power-toggle.envs", params(&[("group", "details")]))
            .unwrap();
        assert_eq!(details["environments"][0]["instances"].as_array().unwrap().len(), 4);

        assert!(service
            .dispatch("envs", params(&[("group", "everything")]))
            .is_err());
    }

    #[test]
    fn test_env_power_round_trip() {
        let service = mock_service(10);
        let id = env_id(&service, "mockenv2");

        let stopped = service
            .dispatch("env.power", params(&[("id", id.as_str()), ("state", "stop")]))
            .unwrap();
        assert_eq!(stopped["status"], "OK");
        assert_eq!(stopped["result"]["action"], "stop");

        let env = service.dispatch("env", params(&[("id", id.as_str())])).unwrap();
        assert_eq!(env["state"], "stopped");

        service
            .dispatch("env.power", params(&[("id", id.as_str()), ("state", "start")]))
            .unwrap();
        let env = service.dispatch("env", params(&[("id", id.as_str())])).unwrap();
        assert_eq!(env["state"], "running");
    }

    #[test]
    fn test_env_power_refused_over_ceiling() {
        let service = mock_service(2);
        let id = env_id(&service, "mockenv2");
        let err = service
            .dispatch("env.power", params(&[("id", id.as_str()), ("state", "stop")]))
            .unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn test_parameter_errors() {
        let service = mock_service(10);
        assert!(service.dispatch("env", HashMap::new()).is_err());
        assert!(service
            .dispatch("env.power", params(&[("id", "abc"), ("state", "reboot")]))
            .is_err());
        assert!(service
            .dispatch("instance.power", params(&[("id", "abc"), ("state", "stop")]))
            .is_err());
        assert!(service.dispatch("nope", HashMap::new()).is_err());
    }

    #[test]
    fn test_introspection_methods() {
        let service = mock_service(10);
        assert_eq!(service.dispatch("version", HashMap::new()).unwrap()["version"], env!("CARGO_PKG_VERSION"));
        let config = service.dispatch("config", HashMap::new()).unwrap();
        assert_eq!(config["mock_enabled"], true);
        assert!(config.get("slack_webhook_urls").is_none());

        let health = service.dispatch("health", HashMap::new()).unwrap();
        assert_eq!(health["status"], "healthy");
        assert_eq!(service.dispatch("refresh", HashMap::new()).unwrap()["status"], "OK");
        assert_eq!(service.method_list().len(), 7);
    }
}
