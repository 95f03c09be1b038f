//! Rate limiting logic and state management.

mod clock;
mod counter;
mod limiter;
mod registry;
mod rules;

pub use clock::{Clock, ManualClock, SystemClock};
pub use limiter::{Decision, LimitConfig, Limiter};
pub use registry::{spawn_sweeper, LimiterRegistry};
pub use rules::{LimiterRule, RateLimitRules, TimeUnit};
