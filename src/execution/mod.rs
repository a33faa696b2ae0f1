pub mod policies;
pub mod rate_limit;
pub mod timeout;

pub use policies::ExecutorPolicies;
pub use rate_limit::{RateLimitConfig, RateLimitGate, RateLimitPolicy};
pub use timeout::{OpKind, OrderTimeoutConfig, TimeoutPolicy, TimeoutTracker};
