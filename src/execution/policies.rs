//! Composition of the two executor policies.
//!
//! Rate limiting and timeout tracking are independent concerns; an
//! executor carries either, both, or neither. Disabled policies cost a
//! branch per operation.

use crate::execution::rate_limit::{RateLimitConfig, RateLimitGate};
use crate::execution::timeout::{OpKind, OrderTimeoutConfig, TimeoutTracker};
use crate::orders::OrderId;

pub struct ExecutorPolicies {
    rate_limit: Option<RateLimitGate>,
    timeout: Option<TimeoutTracker>,
}

impl ExecutorPolicies {
    pub fn disabled() -> Self {
        Self {
            rate_limit: None,
            timeout: None,
        }
    }

    pub fn with_rate_limit(cfg: RateLimitConfig) -> Self {
        Self {
            rate_limit: Some(RateLimitGate::from_config(cfg)),
            timeout: None,
        }
    }

    pub fn with_timeouts(cfg: OrderTimeoutConfig) -> Self {
        Self {
            rate_limit: None,
            timeout: Some(TimeoutTracker::new(cfg)),
        }
    }

    pub fn full(rate_cfg: RateLimitConfig, timeout_cfg: OrderTimeoutConfig) -> Self {
        Self {
            rate_limit: Some(RateLimitGate::from_config(rate_cfg)),
            timeout: Some(TimeoutTracker::new(timeout_cfg)),
        }
    }

    /// Spawns the timeout reaper when timeout tracking is enabled.
    pub fn start(&self) {
        if let Some(timeout) = &self.timeout {
            timeout.start();
        }
    }

    pub async fn stop(&self) {
        if let Some(timeout) = &self.timeout {
            timeout.stop().await;
        }
    }

    /// Rate-limit gate; true when the operation may proceed.
    pub async fn admit(&self, order_id: OrderId) -> bool {
        match &self.rate_limit {
            Some(gate) => gate.admit(order_id).await,
            None => true,
        }
    }

    pub fn track(&self, order_id: OrderId, op: OpKind) {
        if let Some(timeout) = &self.timeout {
            timeout.track(order_id, op);
        }
    }

    /// Clears the pending entry when a venue reply arrives. Returns
    /// false when the reaper extracted the entry first; the caller must
    /// then drop the reply without reporting to the tracker.
    pub fn clear(&self, order_id: OrderId) -> bool {
        match &self.timeout {
            Some(timeout) => timeout.clear_pending(order_id),
            None => true,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.timeout.as_ref().map_or(0, |t| t.pending_count())
    }
}

impl Default for ExecutorPolicies {
    fn default() -> Self {
        Self::disabled()
    }
}
