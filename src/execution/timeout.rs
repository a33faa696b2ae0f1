//! Pending-operation tracking with a background reaper.
//!
//! Each outgoing submit/cancel/replace records a pending entry keyed by
//! order id (the latest operation replaces an earlier one). The venue
//! reply clears the entry; if no reply lands inside the per-operation
//! budget, the reaper extracts it and applies the configured policy.
//! Extraction is atomic: exactly one of reply and reaper wins, and the
//! loser must not report.

use crate::orders::OrderId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub type TimeoutCallback = Arc<dyn Fn(OrderId, &str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPolicy {
    /// Log the timeout and take no further action.
    LogOnly,
    /// Report the order as rejected through `on_reject`.
    Reject,
    /// Hand the timeout to `on_timeout` for custom handling.
    Callback,
    /// Delegate to `on_timeout`; the caller is expected to query the
    /// venue for the order's true state.
    Reconcile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Submit,
    Cancel,
    Replace,
}

impl OpKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OpKind::Submit => "submit",
            OpKind::Cancel => "cancel",
            OpKind::Replace => "replace",
        }
    }
}

#[derive(Clone)]
pub struct OrderTimeoutConfig {
    pub submit_timeout_ms: u64,
    pub cancel_timeout_ms: u64,
    pub replace_timeout_ms: u64,
    pub check_interval_ms: u64,
    pub policy: TimeoutPolicy,
    pub on_timeout: Option<TimeoutCallback>,
    pub on_reject: Option<TimeoutCallback>,
}

impl Default for OrderTimeoutConfig {
    fn default() -> Self {
        Self {
            submit_timeout_ms: 5_000,
            cancel_timeout_ms: 3_000,
            replace_timeout_ms: 5_000,
            check_interval_ms: 100,
            policy: TimeoutPolicy::Reject,
            on_timeout: None,
            on_reject: None,
        }
    }
}

impl OrderTimeoutConfig {
    pub fn is_valid(&self) -> bool {
        self.submit_timeout_ms > 0
            && self.cancel_timeout_ms > 0
            && self.replace_timeout_ms > 0
            && self.check_interval_ms > 0
    }
}

impl std::fmt::Debug for OrderTimeoutConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderTimeoutConfig")
            .field("submit_timeout_ms", &self.submit_timeout_ms)
            .field("cancel_timeout_ms", &self.cancel_timeout_ms)
            .field("replace_timeout_ms", &self.replace_timeout_ms)
            .field("check_interval_ms", &self.check_interval_ms)
            .field("policy", &self.policy)
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingOp {
    op: OpKind,
    started_at: Instant,
}

struct Inner {
    cfg: OrderTimeoutConfig,
    pending: Mutex<HashMap<OrderId, PendingOp>>,
}

impl Inner {
    fn timeout_for(&self, op: OpKind) -> Duration {
        let ms = match op {
            OpKind::Submit => self.cfg.submit_timeout_ms,
            OpKind::Cancel => self.cfg.cancel_timeout_ms,
            OpKind::Replace => self.cfg.replace_timeout_ms,
        };
        Duration::from_millis(ms)
    }

    fn sweep(&self) {
        let now = Instant::now();
        let timed_out: Vec<(OrderId, PendingOp)> = {
            let mut pending = self.pending.lock().expect("pending poisoned");
            let expired: Vec<OrderId> = pending
                .iter()
                .filter(|(_, op)| now.duration_since(op.started_at) >= self.timeout_for(op.op))
                .map(|(id, _)| *id)
                .collect();
            expired
                .into_iter()
                .filter_map(|id| pending.remove(&id).map(|op| (id, op)))
                .collect()
        };

        // Callbacks run outside the lock.
        for (order_id, op) in timed_out {
            let op_name = op.op.as_str();
            match self.cfg.policy {
                TimeoutPolicy::LogOnly => {
                    tracing::warn!(orderId = order_id, op = op_name, "operation timed out");
                }
                TimeoutPolicy::Reject => {
                    tracing::warn!(orderId = order_id, op = op_name, "operation timed out, rejecting");
                    if let Some(cb) = &self.cfg.on_reject {
                        cb(order_id, &format!("{} timeout", op_name));
                    }
                }
                TimeoutPolicy::Callback => {
                    if let Some(cb) = &self.cfg.on_timeout {
                        cb(order_id, op_name);
                    } else {
                        tracing::warn!(orderId = order_id, op = op_name, "timeout with no callback set");
                    }
                }
                TimeoutPolicy::Reconcile => {
                    tracing::info!(orderId = order_id, op = op_name, "timeout, reconcile needed");
                    if let Some(cb) = &self.cfg.on_timeout {
                        cb(order_id, op_name);
                    }
                }
            }
        }
    }
}

pub struct TimeoutTracker {
    inner: Arc<Inner>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

impl TimeoutTracker {
    pub fn new(cfg: OrderTimeoutConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                cfg,
                pending: Mutex::new(HashMap::new()),
            }),
            shutdown_tx,
            shutdown_rx,
            task: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    /// Spawns the reaper task. Safe to call once; later calls no-op.
    pub fn start(&self) {
        if !self.inner.cfg.is_valid() {
            tracing::warn!("timeout config invalid, reaper not started");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let mut shutdown = self.shutdown_rx.clone();
        let interval = Duration::from_millis(self.inner.cfg.check_interval_ms);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(interval) => inner.sweep(),
                }
            }
        });
        *self.task.lock().expect("task lock") = Some(handle);
    }

    /// Idempotent; joins the reaper.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.task.lock().expect("task lock").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn track(&self, order_id: OrderId, op: OpKind) {
        let mut pending = self.inner.pending.lock().expect("pending poisoned");
        pending.insert(
            order_id,
            PendingOp {
                op,
                started_at: Instant::now(),
            },
        );
    }

    /// Removes the pending entry for this order. Returns false when the
    /// entry was already gone, meaning the reaper reported first.
    pub fn clear_pending(&self, order_id: OrderId) -> bool {
        self.inner
            .pending
            .lock()
            .expect("pending poisoned")
            .remove(&order_id)
            .is_some()
    }

    pub fn has_pending(&self, order_id: OrderId) -> bool {
        self.inner
            .pending
            .lock()
            .expect("pending poisoned")
            .contains_key(&order_id)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().expect("pending poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn reject_cfg(submit_ms: u64, hits: Arc<StdMutex<Vec<(OrderId, String)>>>) -> OrderTimeoutConfig {
        OrderTimeoutConfig {
            submit_timeout_ms: submit_ms,
            check_interval_ms: 20,
            policy: TimeoutPolicy::Reject,
            on_reject: Some(Arc::new(move |id, reason| {
                hits.lock().unwrap().push((id, reason.to_string()));
            })),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn reaper_rejects_timed_out_submit() {
        let hits = Arc::new(StdMutex::new(Vec::new()));
        let tracker = TimeoutTracker::new(reject_cfg(200, Arc::clone(&hits)));
        tracker.start();

        tracker.track(5, OpKind::Submit);
        assert!(tracker.has_pending(5));

        tokio::time::sleep(Duration::from_millis(400)).await;

        let got = hits.lock().unwrap().clone();
        assert_eq!(got, vec![(5, "submit timeout".to_string())]);
        assert_eq!(tracker.pending_count(), 0);

        tracker.stop().await;
    }

    #[tokio::test]
    async fn reply_before_timeout_wins() {
        let hits = Arc::new(StdMutex::new(Vec::new()));
        let tracker = TimeoutTracker::new(reject_cfg(200, Arc::clone(&hits)));
        tracker.start();

        tracker.track(6, OpKind::Submit);
        assert!(tracker.clear_pending(6));

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(hits.lock().unwrap().is_empty());

        tracker.stop().await;
    }

    #[tokio::test]
    async fn exactly_one_side_extracts() {
        let hits = Arc::new(StdMutex::new(Vec::new()));
        let tracker = TimeoutTracker::new(reject_cfg(50, Arc::clone(&hits)));
        tracker.start();

        tracker.track(7, OpKind::Submit);
        tokio::time::sleep(Duration::from_millis(250)).await;

        // The reaper already extracted the entry; the late reply loses.
        assert!(!tracker.clear_pending(7));
        assert_eq!(hits.lock().unwrap().len(), 1);

        tracker.stop().await;
    }

    #[tokio::test]
    async fn latest_op_replaces_pending_entry() {
        let tracker = TimeoutTracker::new(OrderTimeoutConfig {
            check_interval_ms: 20,
            ..Default::default()
        });
        tracker.track(9, OpKind::Submit);
        tracker.track(9, OpKind::Cancel);
        assert_eq!(tracker.pending_count(), 1);
        assert!(tracker.clear_pending(9));
        assert!(!tracker.clear_pending(9));
    }

    #[tokio::test]
    async fn callback_policy_passes_op_name() {
        let names = Arc::new(StdMutex::new(Vec::new()));
        let names_cb = Arc::clone(&names);
        let tracker = TimeoutTracker::new(OrderTimeoutConfig {
            cancel_timeout_ms: 50,
            check_interval_ms: 20,
            policy: TimeoutPolicy::Callback,
            on_timeout: Some(Arc::new(move |id, op| {
                names_cb.lock().unwrap().push((id, op.to_string()));
            })),
            ..Default::default()
        });
        tracker.start();

        tracker.track(3, OpKind::Cancel);
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(names.lock().unwrap().clone(), vec![(3, "cancel".to_string())]);
        tracker.stop().await;
    }

    #[tokio::test]
    async fn stop_joins_reaper() {
        let tracker = TimeoutTracker::new(OrderTimeoutConfig::default());
        tracker.start();
        tracker.stop().await;
        // Second stop is a no-op.
        tracker.stop().await;
    }
}
