//! Named limiter handles and the decisions they produce.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, trace};

use super::clock::{duration_ms, Clock};
use super::counter::CounterStore;
use crate::error::{NapguardError, Result};

/// Quota policy for a limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitConfig {
    /// Maximum events allowed per window
    pub max: u64,
    /// Window length in milliseconds
    pub window_ms: u64,
}

impl LimitConfig {
    /// Create a policy allowing `max` events per `window_ms` milliseconds.
    pub fn new(max: u64, window_ms: u64) -> Self {
        Self { max, window_ms }
    }

    /// Create a policy from a window expressed as a `Duration`.
    pub fn per(max: u64, window: Duration) -> Self {
        Self::new(max, duration_ms(window))
    }

    /// Window length as a `Duration`.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Reject quotas that could only ever produce degenerate decisions.
    pub(crate) fn validate(&self, name: &str) -> Result<()> {
        if self.max == 0 {
            return Err(NapguardError::InvalidLimit {
                name: name.to_string(),
                reason: "max must be greater than zero".to_string(),
            });
        }
        if self.window_ms == 0 {
            return Err(NapguardError::InvalidLimit {
                name: name.to_string(),
                reason: "window_ms must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// The answer to a single `check`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "DecisionBody")]
pub enum Decision {
    /// The event fits within the quota.
    Allowed,
    /// The quota is exhausted until the window resets.
    Denied {
        /// Milliseconds until the identity's window resets
        retry_after_ms: u64,
    },
}

impl Decision {
    /// Whether the caller should reject the request.
    pub fn is_limited(&self) -> bool {
        matches!(self, Decision::Denied { .. })
    }

    /// How long to wait before retrying, if denied.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Decision::Allowed => None,
            Decision::Denied { retry_after_ms } => Some(Duration::from_millis(*retry_after_ms)),
        }
    }

    /// Render as `{"limited": false}` or `{"limited": true, "retryAfterMs": N}`.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!(DecisionBody::from(*self))
    }
}

#[derive(Serialize)]
struct DecisionBody {
    limited: bool,
    #[serde(rename = "retryAfterMs", skip_serializing_if = "Option::is_none")]
    retry_after_ms: Option<u64>,
}

impl From<Decision> for DecisionBody {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Allowed => Self {
                limited: false,
                retry_after_ms: None,
            },
            Decision::Denied { retry_after_ms } => Self {
                limited: true,
                retry_after_ms: Some(retry_after_ms),
            },
        }
    }
}

/// A handle to a named limiter.
///
/// Handles are cheap to clone. All handles created under the same name share
/// one counter store.
#[derive(Debug, Clone)]
pub struct Limiter {
    name: Arc<str>,
    config: LimitConfig,
    store: Arc<CounterStore>,
    clock: Arc<dyn Clock>,
}

impl Limiter {
    pub(crate) fn new(
        name: Arc<str>,
        config: LimitConfig,
        store: Arc<CounterStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name,
            config,
            store,
            clock,
        }
    }

    /// Record one event for `identity` and decide whether it may proceed.
    ///
    /// The first event of a window is always allowed. Later events are denied
    /// once the window's count exceeds `max`, with the time left until the
    /// window ends as the retry hint.
    ///
    /// `identity` is logged only at `trace` level. Callers that key on client
    /// addresses should hash them first if trace logs leave the host.
    pub fn check(&self, identity: &str) -> Decision {
        let now = self.clock.now_ms();
        let observed = self.store.observe(identity, now, self.config.window_ms);

        trace!(
            limiter = %self.name,
            identity = identity,
            count = observed.count,
            reset_at = observed.reset_at,
            "Checked rate limit"
        );

        if observed.count > self.config.max {
            // observe() only keeps a window while now <= reset_at
            let retry_after_ms = observed.reset_at.saturating_sub(now);
            debug!(
                limiter = %self.name,
                count = observed.count,
                max = self.config.max,
                retry_after_ms = retry_after_ms,
                "Rate limit exceeded"
            );
            Decision::Denied { retry_after_ms }
        } else {
            Decision::Allowed
        }
    }

    /// Count for `identity` in its active window, or `None` if it has none.
    pub fn count(&self, identity: &str) -> Option<u64> {
        self.store
            .active(identity, self.clock.now_ms())
            .map(|e| e.count)
    }

    /// The limiter's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The policy this handle enforces.
    pub fn config(&self) -> LimitConfig {
        self.config
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &Arc<CounterStore> {
        &self.store
    }
}
