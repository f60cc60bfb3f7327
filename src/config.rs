//! Daemon configuration.
//!
//! Loaded from a JSON file, then overridden by `POWER_TOGGLE_*` environment
//! variables (`POWER_TOGGLE_AWS_REGIONS`, `POWER_TOGGLE_SLACK_ENABLED`, ...),
//! then validated. List values from the environment are space separated.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use crate::error::{Error, Result};

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "POWER_TOGGLE";

/// Default config location, relative to the home directory.
pub const DEFAULT_CONFIG_PATH: &str = "~/.fgp/services/power-toggle/config.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    pub aws: AwsConfig,
    pub slack: SlackConfig,
    pub mock: MockConfig,
    pub experimental: ExperimentalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AwsConfig {
    pub regions: Vec<String>,
    pub required_tag_key: String,
    pub required_tag_value: String,
    pub environment_tag_key: String,
    /// Refuse a bulk stop touching more instances than this.
    pub max_instances_to_shutdown: usize,
    /// Minutes between background refreshes.
    pub polling_interval: u64,
    pub ignore_instance_types: Vec<String>,
    pub ignore_environments: Vec<String>,
    pub enable_asg_support: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SlackConfig {
    pub enabled: bool,
    pub webhook_urls: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MockConfig {
    pub enabled: bool,
    /// Artificial latency added to every mock provider call.
    pub delay_ms: u64,
}

/// Experimental features. Currently only billing estimates.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExperimentalConfig {
    pub enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            aws: AwsConfig::default(),
            slack: SlackConfig::default(),
            mock: MockConfig::default(),
            experimental: ExperimentalConfig::default(),
        }
    }
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            regions: Vec::new(),
            required_tag_key: String::new(),
            required_tag_value: String::new(),
            environment_tag_key: String::new(),
            max_instances_to_shutdown: 0,
            polling_interval: 5,
            ignore_instance_types: Vec::new(),
            ignore_environments: Vec::new(),
            enable_asg_support: false,
        }
    }
}

/// Where a loaded configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    /// No file at this path; defaults plus environment overrides.
    Defaults(PathBuf),
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => write!(f, "config file {}", path.display()),
            Self::Defaults(path) => write!(
                f,
                "environment variables and defaults (no file at {})",
                path.display()
            ),
        }
    }
}

impl Config {
    /// Load from `path` (or the default location), apply environment overrides and validate.
    ///
    /// Nothing is logged here: this runs before the subscriber exists. Callers
    /// report the returned source and [`Config::warnings`] once logging is up.
    pub fn load(path: Option<&str>) -> Result<(Self, ConfigSource)> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    pub fn load_with<F>(path: Option<&str>, lookup: F) -> Result<(Self, ConfigSource)>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = resolve_path(path.unwrap_or(DEFAULT_CONFIG_PATH));
        let (mut config, source) = if path.exists() {
            (Self::from_file(&path)?, ConfigSource::File(path))
        } else {
            (Self::default(), ConfigSource::Defaults(path))
        };

        config.apply_overrides(lookup)?;
        config.validate()?;
        Ok((config, source))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Apply `POWER_TOGGLE_*` overrides looked up through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(&format!("{}_{}", ENV_PREFIX, key));

        if let Some(v) = var("LOG_LEVEL") {
            self.log_level = v;
        }

        let aws = &mut self.aws;
        if let Some(v) = var("AWS_REGIONS") {
            aws.regions = split_list(&v);
        }
        if let Some(v) = var("AWS_REQUIRED_TAG_KEY") {
            aws.required_tag_key = v;
        }
        if let Some(v) = var("AWS_REQUIRED_TAG_VALUE") {
            aws.required_tag_value = v;
        }
        if let Some(v) = var("AWS_ENVIRONMENT_TAG_KEY") {
            aws.environment_tag_key = v;
        }
        if let Some(v) = var("AWS_MAX_INSTANCES_TO_SHUTDOWN") {
            aws.max_instances_to_shutdown = parse_number("AWS_MAX_INSTANCES_TO_SHUTDOWN", &v)?;
        }
        if let Some(v) = var("AWS_POLLING_INTERVAL") {
            aws.polling_interval = parse_number("AWS_POLLING_INTERVAL", &v)?;
        }
        if let Some(v) = var("AWS_IGNORE_INSTANCE_TYPES") {
            aws.ignore_instance_types = split_list(&v);
        }
        if let Some(v) = var("AWS_IGNORE_ENVIRONMENTS") {
            aws.ignore_environments = split_list(&v);
        }
        if let Some(v) = var("AWS_ENABLE_ASG_SUPPORT") {
            aws.enable_asg_support = parse_bool("AWS_ENABLE_ASG_SUPPORT", &v)?;
        }

        if let Some(v) = var("SLACK_ENABLED") {
            self.slack.enabled = parse_bool("SLACK_ENABLED", &v)?;
        }
        if let Some(v) = var("SLACK_WEBHOOK_URLS") {
            self.slack.webhook_urls = split_list(&v);
        }
        if let Some(v) = var("MOCK_ENABLED") {
            self.mock.enabled = parse_bool("MOCK_ENABLED", &v)?;
        }
        if let Some(v) = var("MOCK_DELAY_MS") {
            self.mock.delay_ms = parse_number("MOCK_DELAY_MS", &v)?;
        }
        if let Some(v) = var("EXPERIMENTAL_ENABLED") {
            self.experimental.enabled = parse_bool("EXPERIMENTAL_ENABLED", &v)?;
        }

        Ok(())
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        for (key, value) in [
            ("aws.required_tag_key", &self.aws.required_tag_key),
            ("aws.required_tag_value", &self.aws.required_tag_value),
            ("aws.environment_tag_key", &self.aws.environment_tag_key),
        ] {
            if value.is_empty() {
                return Err(Error::config(format!("{} MUST be defined and not empty", key)));
            }
        }

        if self.aws.regions.is_empty() {
            return Err(Error::config("aws.regions MUST be defined and not empty"));
        }
        if self.aws.max_instances_to_shutdown == 0 {
            return Err(Error::config(
                "aws.max_instances_to_shutdown MUST be greater than 0",
            ));
        }
        if self.aws.polling_interval == 0 {
            return Err(Error::config("aws.polling_interval MUST be greater than 0"));
        }

        Ok(())
    }

    /// Settings that are valid but probably not what was meant.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.slack.enabled && self.slack.webhook_urls.is_empty() {
            warnings.push("slack is ENABLED but slack.webhook_urls is empty".to_string());
        }
        warnings
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.aws.polling_interval * 60)
    }

    pub fn billing_enabled(&self) -> bool {
        self.experimental.enabled
    }

    /// Summary exposed through the `config` method. Webhook URLs are left out.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "aws_polling_interval": self.aws.polling_interval,
            "aws_regions": self.aws.regions,
            "aws_required_tag_key": self.aws.required_tag_key,
            "aws_required_tag_value": self.aws.required_tag_value,
            "aws_environment_tag_key": self.aws.environment_tag_key,
            "aws_max_instances_to_shutdown": self.aws.max_instances_to_shutdown,
            "aws_ignore_instance_types": self.aws.ignore_instance_types,
            "aws_ignore_environments": self.aws.ignore_environments,
            "aws_enable_asg_support": self.aws.enable_asg_support,
            "slack_enabled": self.slack.enabled,
            "mock_enabled": self.mock.enabled,
            "mock_delay_ms": self.mock.delay_ms,
            "experimental_enabled": self.experimental.enabled,
        })
    }
}

/// Expand `~` and environment variables in a config path.
pub fn resolve_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).to_string())
}

fn split_list(value: &str) -> Vec<String> {
    value.split_whitespace().map(String::from).collect()
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::config(format!(
            "{}_{}: expected a boolean, got {:?}",
            ENV_PREFIX, key, value
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        Error::config(format!(
            "{}_{}: expected a number, got {:?}",
            ENV_PREFIX, key, value
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.aws.regions = vec!["ca-central-1".into()];
        config.aws.required_tag_key = "power-toggle-enabled".into();
        config.aws.required_tag_value = "true".into();
        config.aws.environment_tag_key = "Environment".into();
        config.aws.max_instances_to_shutdown = 50;
        config
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_missing_required_tag_fails() {
        let mut config = valid_config();
        config.aws.required_tag_key.clear();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("aws.required_tag_key"));
    }

    #[test]
    fn test_zero_ceiling_and_interval_fail() {
        let mut config = valid_config();
        config.aws.max_instances_to_shutdown = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.aws.polling_interval = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.aws.regions.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("POWER_TOGGLE_AWS_IGNORE_INSTANCE_TYPES", "c5d.18xlarge c5d.9xlarge"),
            ("POWER_TOGGLE_AWS_IGNORE_ENVIRONMENTS", "ignoredEnv1 ignoredEnv2"),
            ("POWER_TOGGLE_AWS_MAX_INSTANCES_TO_SHUTDOWN", "7"),
            ("POWER_TOGGLE_EXPERIMENTAL_ENABLED", "true"),
        ]
        .into_iter()
        .collect();

        let mut config = valid_config();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.aws.ignore_instance_types, vec!["c5d.18xlarge", "c5d.9xlarge"]);
        assert_eq!(config.aws.ignore_environments, vec!["ignoredEnv1", "ignoredEnv2"]);
        assert_eq!(config.aws.max_instances_to_shutdown, 7);
        assert!(config.billing_enabled());
    }

    #[test]
    fn test_bad_override_is_rejected() {
        let mut config = valid_config();
        let err = config
            .apply_overrides(|key| {
                (key == "POWER_TOGGLE_AWS_POLLING_INTERVAL").then(|| "soon".to_string())
            })
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_parse_partial_file() {
        let config: Config = serde_json::from_str(
            r#"{"aws": {"regions": ["us-east-1"], "max_instances_to_shutdown": 3}}"#,
        )
        .unwrap();
        assert_eq!(config.aws.regions, vec!["us-east-1"]);
        assert_eq!(config.aws.max_instances_to_shutdown, 3);
        assert_eq!(config.aws.polling_interval, 5);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_load_reports_source() {
        let missing = std::env::temp_dir().join("power-toggle-no-such-config.json");
        let lookup = |key: &str| match key {
            "POWER_TOGGLE_AWS_REGIONS" => Some("us-east-1".to_string()),
            "POWER_TOGGLE_AWS_REQUIRED_TAG_KEY" => Some("power-toggle-enabled".to_string()),
            "POWER_TOGGLE_AWS_REQUIRED_TAG_VALUE" => Some("true".to_string()),
            "POWER_TOGGLE_AWS_ENVIRONMENT_TAG_KEY" => Some("Environment".to_string()),
            "POWER_TOGGLE_AWS_MAX_INSTANCES_TO_SHUTDOWN" => Some("5".to_string()),
            _ => None,
        };

        let (config, source) = Config::load_with(missing.to_str(), lookup).unwrap();
        assert_eq!(source, ConfigSource::Defaults(missing.clone()));
        assert_eq!(config.aws.regions, vec!["us-east-1"]);

        let file = std::env::temp_dir().join(format!(
            "power-toggle-config-{}.json",
            std::process::id()
        ));
        std::fs::write(&file, r#"{"log_level": "debug"}"#).unwrap();
        let (config, source) = Config::load_with(file.to_str(), lookup).unwrap();
        std::fs::remove_file(&file).unwrap();
        assert_eq!(source, ConfigSource::File(file.clone()));
        assert_eq!(config.log_level, "debug");
        assert!(source.to_string().starts_with("config file"));
    }

    #[test]
    fn test_slack_without_webhooks_is_a_warning() {
        let mut config = valid_config();
        assert!(config.warnings().is_empty());
        config.slack.enabled = true;
        assert!(config.validate().is_ok());
        assert_eq!(config.warnings().len(), 1);
    }

    #[test]
    fn test_poll_interval_is_minutes() {
        assert_eq!(valid_config().poll_interval(), Duration::from_secs(300));
    }
}
