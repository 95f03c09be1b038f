//! Configuration management for Napguard.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::Result;

/// Prefix for environment overrides, e.g. `NAPGUARD__LOGGING__LEVEL=debug`.
const ENV_PREFIX: &str = "NAPGUARD";

/// Main configuration for the Napguard service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log line format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Path to the limiter rules file
    pub rules_path: Option<String>,

    /// How often expired counters are swept, in seconds (0 disables sweeping)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            rules_path: None,
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    300
}

impl RateLimitingConfig {
    /// The sweep interval, or `None` when sweeping is disabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX).separator("__")
}

impl ServiceConfig {
    /// Load configuration from an optional file, overlaid with environment
    /// variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::layered(path, environment())
    }

    fn layered(path: Option<&Path>, env: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let settings = builder.add_source(env).build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Text);
        assert!(config.rate_limiting.rules_path.is_none());
        assert_eq!(
            config.rate_limiting.sweep_interval(),
            Some(Duration::from_secs(300))
        );
    }

    #[test]
    fn test_from_yaml_fills_defaults() {
        let yaml = r#"
rate_limiting:
  rules_path: /etc/napguard/limits.yaml
"#;
        let config = assert_ok!(ServiceConfig::from_yaml(yaml));
        assert_eq!(
            config.rate_limiting.rules_path.as_deref(),
            Some("/etc/napguard/limits.yaml")
        );
        assert_eq!(config.rate_limiting.sweep_interval_secs, 300);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_zero_sweep_interval_disables_sweeping() {
        let yaml = r#"
logging:
  level: debug
  format: json
rate_limiting:
  sweep_interval_secs: 0
"#;
        let config = assert_ok!(ServiceConfig::from_yaml(yaml));
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.rate_limiting.sweep_interval().is_none());
    }

    fn fake_env(vars: &[(&str, &str)]) -> config::Environment {
        let vars: config::Map<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        environment().source(Some(vars))
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = assert_ok!(ServiceConfig::layered(None, fake_env(&[])));
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.rate_limiting.sweep_interval_secs, 300);
    }

    #[test]
    fn test_environment_overrides_defaults() {
        let env = fake_env(&[
            ("NAPGUARD__LOGGING__LEVEL", "debug"),
            ("NAPGUARD__RATE_LIMITING__RULES_PATH", "/etc/napguard/limits.yaml"),
            ("UNRELATED__LOGGING__LEVEL", "trace"),
        ]);

        let config = assert_ok!(ServiceConfig::layered(None, env));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.rate_limiting.rules_path.as_deref(),
            Some("/etc/napguard/limits.yaml")
        );
        assert_eq!(config.rate_limiting.sweep_interval_secs, 300);
    }
}
