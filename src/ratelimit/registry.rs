//! The limiter registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::counter::CounterStore;
use super::limiter::{LimitConfig, Limiter};
use super::rules::RateLimitRules;
use crate::error::Result;

/// A registered limiter: the policy it was first created with and its store.
#[derive(Debug)]
struct Registration {
    name: Arc<str>,
    config: LimitConfig,
    store: Arc<CounterStore>,
}

/// Owns one counter store per limiter name.
///
/// Construct one per application (or per test) and share it via `Arc`.
/// Stores are never dropped while the registry lives, and are only reachable
/// through the `Limiter` handles the registry hands out:
///
/// ```compile_fail
/// use napguard::ratelimit::CounterStore;
/// ```
#[derive(Debug)]
pub struct LimiterRegistry {
    clock: Arc<dyn Clock>,
    limiters: RwLock<HashMap<String, Registration>>,
}

impl LimiterRegistry {
    /// Create an empty registry reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            limiters: RwLock::new(HashMap::new()),
        }
    }

    /// Create a registry with every limiter described by `rules`.
    pub fn from_rules(rules: &RateLimitRules, clock: Arc<dyn Clock>) -> Result<Self> {
        let registry = Self::new(clock);
        for rule in &rules.limiters {
            registry.create_limiter(&rule.name, rule.limit_config()?)?;
        }
        Ok(registry)
    }

    /// Get a handle to the limiter called `name`, creating its store if needed.
    ///
    /// Registering a name twice returns a handle to the same store. The
    /// returned handle always enforces the `config` passed here.
    pub fn create_limiter(&self, name: &str, config: LimitConfig) -> Result<Limiter> {
        config.validate(name)?;

        if let Some(existing) = self.limiters.read().get(name) {
            return Ok(self.reuse(existing, config));
        }

        let mut limiters = self.limiters.write();
        // Someone may have registered the name while we waited for the lock.
        if let Some(existing) = limiters.get(name) {
            return Ok(self.reuse(existing, config));
        }

        info!(
            limiter = name,
            max = config.max,
            window_ms = config.window_ms,
            "Registering rate limiter"
        );
        let registration = Registration {
            name: Arc::from(name),
            config,
            store: Arc::new(CounterStore::new()),
        };
        let limiter = Limiter::new(
            registration.name.clone(),
            config,
            registration.store.clone(),
            self.clock.clone(),
        );
        limiters.insert(name.to_string(), registration);
        Ok(limiter)
    }

    fn reuse(&self, existing: &Registration, config: LimitConfig) -> Limiter {
        if existing.config != config {
            warn!(
                limiter = %existing.name,
                registered_max = existing.config.max,
                registered_window_ms = existing.config.window_ms,
                max = config.max,
                window_ms = config.window_ms,
                "Limiter re-registered with a different policy; counters are shared"
            );
        } else {
            debug!(limiter = %existing.name, "Reusing registered rate limiter");
        }
        Limiter::new(
            existing.name.clone(),
            config,
            existing.store.clone(),
            self.clock.clone(),
        )
    }

    /// Look up a registered limiter, using the policy it was registered with.
    pub fn limiter(&self, name: &str) -> Option<Limiter> {
        self.limiters.read().get(name).map(|r| {
            Limiter::new(r.name.clone(), r.config, r.store.clone(), self.clock.clone())
        })
    }

    /// Registered limiter names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.limiters.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered limiters.
    pub fn len(&self) -> usize {
        self.limiters.read().len()
    }

    /// Whether no limiters are registered.
    pub fn is_empty(&self) -> bool {
        self.limiters.read().is_empty()
    }

    /// Drop every counter whose window has ended. Returns the number removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let stores: Vec<Arc<CounterStore>> = self
            .limiters
            .read()
            .values()
            .map(|r| r.store.clone())
            .collect();

        stores.iter().map(|store| store.sweep(now)).sum()
    }
}

impl Default for LimiterRegistry {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

/// Periodically sweep expired counters from `registry`.
///
/// The task runs until aborted.
pub fn spawn_sweeper(registry: Arc<LimiterRegistry>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = registry.sweep_expired();
            if removed > 0 {
                debug!(removed = removed, "Swept expired rate limit counters");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NapguardError;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::Decision;

    fn registry() -> (LimiterRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        (LimiterRegistry::new(clock.clone()), clock)
    }

    #[test]
    fn test_registry_creation() {
        let (registry, _clock) = registry();
        assert!(registry.is_empty());
        assert!(registry.limiter("missing").is_none());
    }

    #[test]
    fn test_create_limiter_registers_name() {
        let (registry, _clock) = registry();

        let limiter = registry
            .create_limiter("login", LimitConfig::new(10, 60_000))
            .unwrap();

        assert_eq!(limiter.name(), "login");
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.names(), vec!["login".to_string()]);
    }

    #[test]
    fn test_from_rules_registers_every_limiter() {
        let rules = RateLimitRules::from_yaml(
            r#"
limiters:
  - name: free-schedule
    max: 5
    unit: hour
  - name: login
    max: 10
    window_ms: 900000
"#,
        )
        .unwrap();

        let registry = LimiterRegistry::from_rules(&rules, Arc::new(ManualClock::new(0))).unwrap();

        assert_eq!(registry.names(), vec!["free-schedule", "login"]);
        let login = registry.limiter("login").unwrap();
        assert_eq!(login.config(), LimitConfig::new(10, 900_000));
    }

    #[test]
    fn test_from_rules_rejects_zero_max() {
        let rules = RateLimitRules::from_yaml(
            r#"
limiters:
  - name: broken
    max: 0
    unit: second
"#,
        )
        .unwrap();

        let result = LimiterRegistry::from_rules(&rules, Arc::new(ManualClock::new(0)));

        assert!(matches!(result, Err(NapguardError::InvalidLimit { .. })));
    }

    #[test]
    fn test_create_limiter_rejects_zero_max() {
        let (registry, _clock) = registry();

        let result = registry.create_limiter("broken", LimitConfig::new(0, 1_000));

        assert!(matches!(result, Err(NapguardError::InvalidLimit { .. })));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_create_limiter_rejects_zero_window() {
        let (registry, _clock) = registry();

        let result = registry.create_limiter("broken", LimitConfig::new(1, 0));

        assert!(matches!(result, Err(NapguardError::InvalidLimit { .. })));
    }

    #[test]
    fn test_reregistration_shares_store() {
        let (registry, _clock) = registry();
        let config = LimitConfig::new(2, 1_000);

        let first = registry.create_limiter("chat", config).unwrap();
        let second = registry.create_limiter("chat", config).unwrap();

        assert_eq!(first.check("id"), Decision::Allowed);
        assert_eq!(second.check("id"), Decision::Allowed);
        // Re-registering must not hand out a fresh quota.
        assert!(first.check("id").is_limited());
        assert!(second.check("id").is_limited());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_reregistration_with_new_policy_keeps_counters() {
        let (registry, _clock) = registry();

        let strict = registry
            .create_limiter("chat", LimitConfig::new(1, 1_000))
            .unwrap();
        strict.check("id");

        let loose = registry
            .create_limiter("chat", LimitConfig::new(3, 1_000))
            .unwrap();
        assert_eq!(loose.config().max, 3);
        assert_eq!(loose.check("id"), Decision::Allowed);
        assert_eq!(loose.count("id"), Some(2));

        // Lookups see the first registration's policy.
        assert_eq!(registry.limiter("chat").unwrap().config().max, 1);
    }

    #[test]
    fn test_limiters_are_isolated() {
        let (registry, _clock) = registry();
        let config = LimitConfig::new(1, 1_000);

        let signup = registry.create_limiter("signup", config).unwrap();
        let contact = registry.create_limiter("contact", config).unwrap();

        signup.check("id");
        assert!(signup.check("id").is_limited());

        assert_eq!(contact.check("id"), Decision::Allowed);
    }

    #[test]
    fn test_sweep_expired_preserves_decisions() {
        let (registry, clock) = registry();
        let limiter = registry
            .create_limiter("chat", LimitConfig::new(1, 1_000))
            .unwrap();

        limiter.check("a");
        clock.set(500);
        limiter.check("b");
        assert!(limiter.check("b").is_limited());

        clock.set(1_001);
        assert_eq!(registry.sweep_expired(), 1);

        // "b" still in its window, "a" starts fresh exactly as without a sweep.
        assert!(limiter.check("b").is_limited());
        assert_eq!(limiter.check("a"), Decision::Allowed);
        assert_eq!(limiter.count("a"), Some(1));
    }

    #[test]
    fn test_end_to_end_hourly_quota() {
        let (registry, clock) = registry();
        let limiter = registry
            .create_limiter("free-schedule", LimitConfig::new(5, 3_600_000))
            .unwrap();

        for i in 1..=5 {
            assert_eq!(limiter.check("user1"), Decision::Allowed, "call {}", i);
        }

        clock.advance_ms(12);
        assert_eq!(
            limiter.check("user1"),
            Decision::Denied {
                retry_after_ms: 3_600_000 - 12
            }
        );

        clock.advance_ms(3_600_001);
        assert_eq!(limiter.check("user1"), Decision::Allowed);
        assert_eq!(limiter.check("user1"), Decision::Allowed);
        assert_eq!(limiter.count("user1"), Some(2));
    }

    #[test]
    fn test_concurrent_checks_allow_exactly_max() {
        let clock = Arc::new(ManualClock::new(0));
        let registry = Arc::new(LimiterRegistry::new(clock));
        let limiter = registry
            .create_limiter("burst", LimitConfig::new(100, 60_000))
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || {
                    (0..50)
                        .filter(|_| !limiter.check("shared").is_limited())
                        .count()
                })
            })
            .collect();

        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(allowed, 100);
        assert_eq!(limiter.count("shared"), Some(400));
    }

    #[tokio::test]
    async fn test_sweeper_removes_expired_counters() {
        let clock = Arc::new(ManualClock::new(0));
        let registry = Arc::new(LimiterRegistry::new(clock.clone()));
        let limiter = registry
            .create_limiter("chat", LimitConfig::new(5, 100))
            .unwrap();

        limiter.check("a");
        clock.advance_ms(101);

        let sweeper = spawn_sweeper(registry.clone(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(60)).await;
        sweeper.abort();

        assert!(limiter.store().is_empty());
    }
}
