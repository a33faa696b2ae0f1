//! Polymarket order executor over the external order engine.
//!
//! Engine calls block on network inside the C library, so every call
//! runs on the blocking pool. Amounts convert between the engine's
//! 6-decimal raw units and the crate's 8-decimal fixed point.

use crate::connector::OrderExecutor;
use crate::execution::{ExecutorPolicies, OpKind};
use crate::num::{Price, Quantity, Volume};
use crate::orders::{Order, OrderId, OrderTracker, Side};
use crate::polymarket::ffi::{self, raw, RawOrderResult, POLYMARKET_OK};
use crate::symbols::SymbolRegistry;
use async_trait::async_trait;
use std::ffi::CString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct PolymarketOrderResult {
    pub success: bool,
    pub filled_qty: Quantity,
    pub avg_price: Price,
    pub latency_ms: u64,
    pub error_code: i32,
    pub order_id: String,
}

impl PolymarketOrderResult {
    fn from_raw(result: &RawOrderResult) -> Self {
        Self {
            success: result.success,
            filled_qty: ffi::quantity_from_raw6(result.filled_qty_raw),
            avg_price: ffi::price_from_raw6(result.avg_price_raw),
            latency_ms: result.latency_ms,
            error_code: result.error_code,
            order_id: ffi::order_id_string(result),
        }
    }

    fn error(code: i32) -> Self {
        Self {
            success: false,
            filled_qty: Quantity::ZERO,
            avg_price: Price::ZERO,
            latency_ms: 0,
            error_code: code,
            order_id: String::new(),
        }
    }

    pub fn error_message(&self) -> &'static str {
        ffi::error_message(self.error_code)
    }
}

fn cstring(s: &str) -> Option<CString> {
    match CString::new(s) {
        Ok(c) => Some(c),
        Err(_) => {
            tracing::error!(value = s, "string with interior NUL rejected");
            None
        }
    }
}

pub struct PolymarketOrderExecutor {
    private_key: String,
    funder_wallet: String,
    registry: Arc<SymbolRegistry>,
    tracker: Arc<dyn OrderTracker>,
    policies: ExecutorPolicies,
    initialized: AtomicBool,
}

impl PolymarketOrderExecutor {
    pub fn new(
        private_key: String,
        funder_wallet: String,
        registry: Arc<SymbolRegistry>,
        tracker: Arc<dyn OrderTracker>,
        policies: ExecutorPolicies,
    ) -> Self {
        let executor = Self {
            private_key,
            funder_wallet,
            registry,
            tracker,
            policies,
            initialized: AtomicBool::new(false),
        };
        executor.policies.start();
        executor
    }

    /// One-time engine startup. Must succeed before any order call.
    pub async fn init(&self) -> bool {
        if self.initialized.load(Ordering::SeqCst) {
            return true;
        }
        let (Some(pk), Some(funder)) = (cstring(&self.private_key), cstring(&self.funder_wallet))
        else {
            return false;
        };
        let status =
            tokio::task::spawn_blocking(move || unsafe { raw::polymarket_init(pk.as_ptr(), funder.as_ptr()) })
                .await
                .unwrap_or(ffi::POLYMARKET_ERR_NOT_INITIALIZED);
        if status != POLYMARKET_OK {
            tracing::error!(code = status, message = ffi::error_message(status), "Polymarket init failed");
            return false;
        }
        self.initialized.store(true, Ordering::SeqCst);
        tracing::info!("Polymarket order engine initialized");
        true
    }

    /// Pre-establishes the engine's TLS connections.
    pub async fn warmup(&self) {
        if !self.initialized.load(Ordering::SeqCst) {
            return;
        }
        let status = tokio::task::spawn_blocking(|| unsafe { raw::polymarket_warmup() })
            .await
            .unwrap_or(ffi::POLYMARKET_ERR_NOT_INITIALIZED);
        if status != POLYMARKET_OK {
            tracing::warn!(code = status, "Polymarket warmup failed");
        }
    }

    /// Caches tick size and fee rate so order calls skip the lookup.
    pub async fn prefetch(&self, token_id: &str) {
        if !self.initialized.load(Ordering::SeqCst) {
            return;
        }
        let Some(token) = cstring(token_id) else {
            return;
        };
        let status =
            tokio::task::spawn_blocking(move || unsafe { raw::polymarket_prefetch(token.as_ptr()) })
                .await
                .unwrap_or(ffi::POLYMARKET_ERR_NOT_INITIALIZED);
        if status != POLYMARKET_OK {
            tracing::warn!(token = token_id, code = status, "Polymarket prefetch failed");
        }
    }

    fn ready(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    async fn order_call<F>(&self, token_id: &str, call: F) -> PolymarketOrderResult
    where
        F: FnOnce(CString) -> RawOrderResult + Send + 'static,
    {
        if !self.ready() {
            return PolymarketOrderResult::error(ffi::POLYMARKET_ERR_NOT_INITIALIZED);
        }
        let Some(token) = cstring(token_id) else {
            return PolymarketOrderResult::error(ffi::POLYMARKET_ERR_INVALID_TOKEN);
        };
        let raw_result = tokio::task::spawn_blocking(move || call(token))
            .await
            .unwrap_or_else(|_| RawOrderResult::not_initialized());
        PolymarketOrderResult::from_raw(&raw_result)
    }

    pub async fn market_buy(&self, token_id: &str, usdc: Volume) -> PolymarketOrderResult {
        let amount = usdc.to_double();
        self.order_call(token_id, move |token| unsafe {
            raw::polymarket_market_buy(token.as_ptr(), amount)
        })
        .await
    }

    pub async fn market_sell(&self, token_id: &str, size: Quantity) -> PolymarketOrderResult {
        let shares = size.to_double();
        self.order_call(token_id, move |token| unsafe {
            raw::polymarket_market_sell(token.as_ptr(), shares)
        })
        .await
    }

    pub async fn limit_buy(&self, token_id: &str, price: Price, usdc: Volume) -> PolymarketOrderResult {
        let px = price.to_double();
        let amount = usdc.to_double();
        self.order_call(token_id, move |token| unsafe {
            raw::polymarket_limit_buy(token.as_ptr(), px, amount)
        })
        .await
    }

    pub async fn limit_sell(&self, token_id: &str, price: Price, size: Quantity) -> PolymarketOrderResult {
        let px = price.to_double();
        let shares = size.to_double();
        self.order_call(token_id, move |token| unsafe {
            raw::polymarket_limit_sell(token.as_ptr(), px, shares)
        })
        .await
    }

    pub async fn cancel(&self, order_id: &str) -> bool {
        if !self.ready() {
            return false;
        }
        let Some(order) = cstring(order_id) else {
            return false;
        };
        let status =
            tokio::task::spawn_blocking(move || unsafe { raw::polymarket_cancel(order.as_ptr()) })
                .await
                .unwrap_or(ffi::POLYMARKET_ERR_CANCEL_FAILED);
        status == POLYMARKET_OK
    }

    pub async fn cancel_all(&self) -> bool {
        if !self.ready() {
            return false;
        }
        let status = tokio::task::spawn_blocking(|| unsafe { raw::polymarket_cancel_all() })
            .await
            .unwrap_or(ffi::POLYMARKET_ERR_CANCEL_FAILED);
        status == POLYMARKET_OK
    }

    /// USDC balance, or None on engine error.
    pub async fn balance(&self) -> Option<Volume> {
        if !self.ready() {
            return None;
        }
        let raw_balance = tokio::task::spawn_blocking(|| unsafe { raw::polymarket_get_balance() })
            .await
            .ok()?;
        (raw_balance >= 0).then(|| ffi::volume_from_raw6(raw_balance))
    }

    /// Shares held for a token, or None on engine error.
    pub async fn token_balance(&self, token_id: &str) -> Option<Quantity> {
        if !self.ready() {
            return None;
        }
        let token = cstring(token_id)?;
        let raw_shares =
            tokio::task::spawn_blocking(move || unsafe { raw::polymarket_get_token_balance(token.as_ptr()) })
                .await
                .ok()?;
        (raw_shares >= 0).then(|| ffi::quantity_from_raw6(raw_shares))
    }

    pub async fn shutdown(&self) {
        self.policies.stop().await;
        if self.initialized.swap(false, Ordering::SeqCst) {
            let _ = tokio::task::spawn_blocking(|| unsafe { raw::polymarket_shutdown() }).await;
        }
    }
}

#[async_trait]
impl OrderExecutor for PolymarketOrderExecutor {
    async fn submit_order(&self, order: &Order) {
        if !self.policies.admit(order.id).await {
            return;
        }
        let Some(info) = self.registry.get_info(order.symbol) else {
            tracing::error!(orderId = order.id, symbol = order.symbol, "no symbol info, dropping submit");
            return;
        };

        self.policies.track(order.id, OpKind::Submit);
        let result = match order.side {
            Side::Buy => {
                // The engine takes buys as USDC notional.
                let usdc = Volume::from_double(order.price.to_double() * order.quantity.to_double());
                self.limit_buy(&info.symbol, order.price, usdc).await
            }
            Side::Sell => self.limit_sell(&info.symbol, order.price, order.quantity).await,
        };
        if !self.policies.clear(order.id) {
            tracing::warn!(orderId = order.id, "submit reply after timeout, dropping");
            return;
        }

        if result.success {
            tracing::info!(
                orderId = order.id,
                exchangeOrderId = %result.order_id,
                latency_ms = result.latency_ms,
                "Polymarket order submitted"
            );
            self.tracker.on_submitted(order, &result.order_id, None);
        } else {
            tracing::error!(
                orderId = order.id,
                code = result.error_code,
                message = result.error_message(),
                "Polymarket submit failed"
            );
        }
    }

    async fn cancel_order(&self, order_id: OrderId) {
        if !self.policies.admit(order_id).await {
            return;
        }
        let Some(state) = self.tracker.get(order_id) else {
            tracing::error!(orderId = order_id, "cannot cancel unknown order");
            return;
        };
        if state.exchange_order_id.is_empty() {
            tracing::error!(orderId = order_id, "no venue order id, cannot cancel");
            return;
        }

        self.policies.track(order_id, OpKind::Cancel);
        let ok = self.cancel(&state.exchange_order_id).await;
        if !self.policies.clear(order_id) {
            tracing::warn!(orderId = order_id, "cancel reply after timeout, dropping");
            return;
        }

        if ok {
            tracing::info!(orderId = order_id, "Polymarket cancel confirmed");
            self.tracker.on_canceled(order_id);
        } else {
            tracing::error!(orderId = order_id, "Polymarket cancel failed");
        }
    }

    async fn replace_order(&self, old_order_id: OrderId, new_order: &Order) {
        if !self.policies.admit(new_order.id).await {
            return;
        }
        let Some(state) = self.tracker.get(old_order_id) else {
            tracing::error!(orderId = old_order_id, "cannot replace unknown order");
            return;
        };
        let Some(info) = self.registry.get_info(new_order.symbol) else {
            tracing::error!(orderId = old_order_id, symbol = new_order.symbol, "no symbol info for replace");
            return;
        };

        // The engine has no modify: cancel, then place the new order.
        self.policies.track(old_order_id, OpKind::Replace);
        if !state.exchange_order_id.is_empty() && !self.cancel(&state.exchange_order_id).await {
            self.policies.clear(old_order_id);
            tracing::error!(orderId = old_order_id, "Polymarket replace aborted, cancel failed");
            return;
        }

        let result = match new_order.side {
            Side::Buy => {
                let usdc =
                    Volume::from_double(new_order.price.to_double() * new_order.quantity.to_double());
                self.limit_buy(&info.symbol, new_order.price, usdc).await
            }
            Side::Sell => {
                self.limit_sell(&info.symbol, new_order.price, new_order.quantity)
                    .await
            }
        };
        if !self.policies.clear(old_order_id) {
            tracing::warn!(orderId = old_order_id, "replace reply after timeout, dropping");
            return;
        }

        if result.success {
            tracing::info!(orderId = old_order_id, newOrderId = new_order.id, "Polymarket replace confirmed");
            self.tracker
                .on_replaced(old_order_id, new_order, &result.order_id, None);
        } else {
            tracing::error!(
                orderId = old_order_id,
                code = result.error_code,
                message = result.error_message(),
                "Polymarket replace failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecutorPolicies;
    use crate::orders::MemoryOrderTracker;
    use crate::symbols::{InstrumentType, SymbolInfo};

    fn executor() -> (PolymarketOrderExecutor, Arc<MemoryOrderTracker>, Arc<SymbolRegistry>) {
        let registry = SymbolRegistry::new_shared();
        let tracker = MemoryOrderTracker::new_shared();
        let exec = PolymarketOrderExecutor::new(
            "deadbeef".to_string(),
            "0xfunder".to_string(),
            Arc::clone(&registry),
            tracker.clone(),
            ExecutorPolicies::disabled(),
        );
        (exec, tracker, registry)
    }

    #[test]
    fn result_converts_raw_scales() {
        let mut raw_result = RawOrderResult::not_initialized();
        raw_result.success = true;
        raw_result.error_code = POLYMARKET_OK;
        raw_result.filled_qty_raw = 2_500_000; // 2.5 shares
        raw_result.avg_price_raw = 470_000; // 0.47
        let result = PolymarketOrderResult::from_raw(&raw_result);
        assert_eq!(result.filled_qty, Quantity::from_double(2.5));
        assert_eq!(result.avg_price, Price::from_double(0.47));
    }

    // The suite builds without the engine library; every call must
    // surface not-initialized instead of touching the tracker.
    #[cfg(not(feature = "polymarket-ffi"))]
    mod without_engine {
        use super::*;

        #[tokio::test]
        async fn init_reports_failure() {
            let (exec, _, _) = executor();
            assert!(!exec.init().await);
        }

        #[tokio::test]
        async fn order_calls_report_not_initialized() {
            let (exec, _, _) = executor();
            let result = exec.market_buy("123", Volume::from_double(10.0)).await;
            assert!(!result.success);
            assert_eq!(result.error_code, ffi::POLYMARKET_ERR_NOT_INITIALIZED);
            assert_eq!(result.error_message(), "executor not initialized");
        }

        #[tokio::test]
        async fn submit_leaves_tracker_untouched() {
            let (exec, tracker, registry) = executor();
            let sid = registry.register(SymbolInfo::new("polymarket", "123", InstrumentType::Spot));
            let order = Order::new(
                1,
                sid,
                Side::Buy,
                Price::from_double(0.5),
                Quantity::from_double(10.0),
            );
            exec.submit_order(&order).await;
            assert!(tracker.get(1).is_none());
            exec.shutdown().await;
        }

        #[tokio::test]
        async fn balances_unavailable() {
            let (exec, _, _) = executor();
            assert!(exec.balance().await.is_none());
            assert!(exec.token_balance("123").await.is_none());
        }
    }
}
