//! Limiter rules configuration.
//!
//! Rules name each limiter and its quota. A quota window is given either in
//! milliseconds or as a whole time unit:
//!
//! ```yaml
//! limiters:
//!   - name: free-schedule
//!     max: 5
//!     window_ms: 3600000
//!   - name: login
//!     max: 10
//!     unit: minute
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use super::clock::duration_ms;
use super::limiter::LimitConfig;
use crate::error::{NapguardError, Result};

/// A set of limiter rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitRules {
    /// Limiters to register, in order
    #[serde(default)]
    pub limiters: Vec<LimiterRule>,
}

/// A single named limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterRule {
    /// Limiter name, unique within the rules
    pub name: String,
    /// Maximum events per window
    pub max: u64,
    /// Window length in milliseconds
    #[serde(default)]
    pub window_ms: Option<u64>,
    /// Window length as a whole time unit
    #[serde(default)]
    pub unit: Option<TimeUnit>,
}

/// Time unit for a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    /// Get the duration of this unit.
    pub fn duration(&self) -> Duration {
        match self {
            TimeUnit::Second => Duration::from_secs(1),
            TimeUnit::Minute => Duration::from_secs(60),
            TimeUnit::Hour => Duration::from_secs(3600),
            TimeUnit::Day => Duration::from_secs(86400),
        }
    }
}

impl LimiterRule {
    /// Resolve this rule into a quota policy.
    pub fn limit_config(&self) -> Result<LimitConfig> {
        let window_ms = match (self.window_ms, self.unit) {
            (Some(ms), None) => ms,
            (None, Some(unit)) => duration_ms(unit.duration()),
            (Some(_), Some(_)) => {
                return Err(NapguardError::Config(format!(
                    "limiter '{}' sets both window_ms and unit",
                    self.name
                )))
            }
            (None, None) => {
                return Err(NapguardError::Config(format!(
                    "limiter '{}' needs either window_ms or unit",
                    self.name
                )))
            }
        };
        Ok(LimitConfig::new(self.max, window_ms))
    }
}

impl RateLimitRules {
    /// Create an empty rule set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load rules from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load rules from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let rules: RateLimitRules = serde_yaml::from_str(yaml)
            .map_err(|e| NapguardError::Config(format!("Failed to parse rate limit rules: {}", e)))?;
        rules.validate()?;
        Ok(rules)
    }

    /// Check names are unique and every window is resolvable.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for rule in &self.limiters {
            if !seen.insert(rule.name.as_str()) {
                return Err(NapguardError::Config(format!(
                    "duplicate limiter name '{}'",
                    rule.name
                )));
            }
            rule.limit_config()?;
        }
        Ok(())
    }

    /// Find the rule for a limiter name.
    pub fn get(&self, name: &str) -> Option<&LimiterRule> {
        self.limiters.iter().find(|r| r.name == name)
    }
}
