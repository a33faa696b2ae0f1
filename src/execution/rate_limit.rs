//! Token-bucket admission for order operations.
//!
//! Every submit/cancel/replace first asks the gate for a token. What
//! happens on exhaustion is the configured policy's call: drop the
//! operation, sleep until a token frees up, or hand the decision back
//! to the caller.

use crate::orders::OrderId;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub type RateLimitCallback = Arc<dyn Fn(OrderId, Duration) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitPolicy {
    /// Drop the operation and log.
    Reject,
    /// Sleep until a token is available, then proceed.
    Wait,
    /// Invoke `on_rate_limited` and drop the operation.
    Callback,
}

#[derive(Clone)]
pub struct RateLimitConfig {
    /// Maximum burst tokens.
    pub capacity: u32,
    /// Tokens refilled per second.
    pub refill_rate: u32,
    pub policy: RateLimitPolicy,
    pub on_rate_limited: Option<RateLimitCallback>,
}

impl RateLimitConfig {
    pub fn new(capacity: u32, refill_rate: u32, policy: RateLimitPolicy) -> Self {
        Self {
            capacity,
            refill_rate,
            policy,
            on_rate_limited: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.capacity > 0 && self.refill_rate > 0
    }
}

impl std::fmt::Debug for RateLimitConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitConfig")
            .field("capacity", &self.capacity)
            .field("refill_rate", &self.refill_rate)
            .field("policy", &self.policy)
            .field("has_callback", &self.on_rate_limited.is_some())
            .finish()
    }
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

pub struct TokenBucket {
    state: Mutex<BucketState>,
    capacity: f64,
    refill_rate: f64,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_rate: u32) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: f64::from(capacity),
                last_refill: Instant::now(),
            }),
            capacity: f64::from(capacity),
            refill_rate: f64::from(refill_rate),
        }
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity);
            state.last_refill = now;
        }
    }

    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().expect("bucket poisoned");
        self.refill(&mut state, Instant::now());
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    pub fn time_until_available(&self) -> Duration {
        let mut state = self.state.lock().expect("bucket poisoned");
        self.refill(&mut state, Instant::now());
        if state.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - state.tokens) / self.refill_rate)
        }
    }
}

/// The per-executor admission gate. Constructed disabled or from a
/// validated config.
pub struct RateLimitGate {
    bucket: Option<TokenBucket>,
    policy: RateLimitPolicy,
    on_rate_limited: Option<RateLimitCallback>,
}

impl RateLimitGate {
    pub fn disabled() -> Self {
        Self {
            bucket: None,
            policy: RateLimitPolicy::Reject,
            on_rate_limited: None,
        }
    }

    pub fn from_config(cfg: RateLimitConfig) -> Self {
        if !cfg.is_valid() {
            tracing::warn!(
                capacity = cfg.capacity,
                refill_rate = cfg.refill_rate,
                "rate limit config invalid, gate disabled"
            );
            return Self::disabled();
        }
        Self {
            bucket: Some(TokenBucket::new(cfg.capacity, cfg.refill_rate)),
            policy: cfg.policy,
            on_rate_limited: cfg.on_rate_limited,
        }
    }

    /// Returns true when the operation may proceed.
    pub async fn admit(&self, order_id: OrderId) -> bool {
        let Some(bucket) = &self.bucket else {
            return true;
        };

        if bucket.try_acquire() {
            return true;
        }

        let wait = bucket.time_until_available();
        match self.policy {
            RateLimitPolicy::Reject => {
                tracing::warn!(
                    orderId = order_id,
                    wait_ms = wait.as_millis() as u64,
                    "rate limit exceeded, rejecting"
                );
                false
            }
            RateLimitPolicy::Wait => {
                tokio::time::sleep(wait).await;
                let _ = bucket.try_acquire();
                true
            }
            RateLimitPolicy::Callback => {
                if let Some(cb) = &self.on_rate_limited {
                    cb(order_id, wait);
                } else {
                    tracing::warn!(orderId = order_id, "rate limit exceeded, no callback set");
                }
                false
            }
        }
    }
}
