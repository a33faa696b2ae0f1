//! Bybit order executor: engine commands to signed V5 REST calls.

use crate::bybit::{category, rest::BybitRestClient};
use crate::connector::OrderExecutor;
use crate::execution::{ExecutorPolicies, OpKind};
use crate::orders::{Order, OrderId, OrderTracker, Side};
use crate::symbols::SymbolRegistry;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

const PATH_CREATE: &str = "/v5/order/create";
const PATH_CANCEL: &str = "/v5/order/cancel";
const PATH_AMEND: &str = "/v5/order/amend";

/// Peels the venue envelope: `retCode == 0` or an error string built
/// from `retMsg`.
fn venue_result(resp: &str) -> Result<Value, String> {
    let v: Value = serde_json::from_str(resp).map_err(|e| e.to_string())?;
    let code = v.get("retCode").and_then(|c| c.as_i64()).unwrap_or(-1);
    if code != 0 {
        let msg = v
            .get("retMsg")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error");
        return Err(format!("retCode={} retMsg={}", code, msg));
    }
    Ok(v)
}

fn result_order_id(v: &Value) -> String {
    v.get("result")
        .and_then(|r| r.get("orderId"))
        .and_then(|o| o.as_str())
        .unwrap_or_default()
        .to_string()
}

pub struct BybitOrderExecutor {
    client: BybitRestClient,
    registry: Arc<SymbolRegistry>,
    tracker: Arc<dyn OrderTracker>,
    policies: ExecutorPolicies,
}

impl BybitOrderExecutor {
    pub fn new(
        client: BybitRestClient,
        registry: Arc<SymbolRegistry>,
        tracker: Arc<dyn OrderTracker>,
        policies: ExecutorPolicies,
    ) -> Self {
        let executor = Self {
            client,
            registry,
            tracker,
            policies,
        };
        executor.policies.start();
        executor
    }

    pub async fn shutdown(&self) {
        self.policies.stop().await;
    }
}

#[async_trait]
impl OrderExecutor for BybitOrderExecutor {
    async fn submit_order(&self, order: &Order) {
        if !self.policies.admit(order.id).await {
            return;
        }
        let Some(info) = self.registry.get_info(order.symbol) else {
            tracing::error!(orderId = order.id, symbol = order.symbol, "no symbol info, dropping submit");
            return;
        };

        let body = json!({
            "category": category(info.instrument),
            "symbol": info.symbol,
            "side": if order.side == Side::Buy { "Buy" } else { "Sell" },
            "orderType": "Limit",
            "qty": order.quantity.to_string(),
            "price": order.price.to_string(),
            "orderLinkId": order.id.to_string(),
        })
        .to_string();

        tracing::info!(
            orderId = order.id,
            symbol = %info.symbol,
            qty = %order.quantity,
            price = %order.price,
            "submitting Bybit order"
        );

        self.policies.track(order.id, OpKind::Submit);
        let result = self.client.post(PATH_CREATE, body).await;
        if !self.policies.clear(order.id) {
            tracing::warn!(orderId = order.id, "submit reply after timeout, dropping");
            return;
        }

        match result {
            Ok(resp) => match venue_result(&resp) {
                Ok(v) => {
                    let exchange_id = result_order_id(&v);
                    tracing::info!(orderId = order.id, exchangeOrderId = %exchange_id, "Bybit order submitted");
                    self.tracker
                        .on_submitted(order, &exchange_id, Some(&order.id.to_string()));
                }
                Err(e) => tracing::error!(orderId = order.id, error = %e, "Bybit submit rejected"),
            },
            Err(e) => tracing::error!(orderId = order.id, error = %e, "Bybit submit transport error"),
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
        let Some(info) = self.registry.get_info(state.order.symbol) else {
            tracing::error!(orderId = order_id, symbol = state.order.symbol, "no symbol info for cancel");
            return;
        };

        let body = if state.exchange_order_id.is_empty() {
            json!({
                "category": category(info.instrument),
                "symbol": info.symbol,
                "orderLinkId": order_id.to_string(),
            })
        } else {
            json!({
                "category": category(info.instrument),
                "symbol": info.symbol,
                "orderId": state.exchange_order_id,
            })
        }
        .to_string();

        self.policies.track(order_id, OpKind::Cancel);
        let result = self.client.post(PATH_CANCEL, body).await;
        if !self.policies.clear(order_id) {
            tracing::warn!(orderId = order_id, "cancel reply after timeout, dropping");
            return;
        }

        match result {
            Ok(resp) => match venue_result(&resp) {
                Ok(_) => {
                    tracing::info!(orderId = order_id, "Bybit cancel confirmed");
                    self.tracker.on_canceled(order_id);
                }
                Err(e) => tracing::error!(orderId = order_id, error = %e, "Bybit cancel rejected"),
            },
            Err(e) => tracing::error!(orderId = order_id, error = %e, "Bybit cancel transport error"),
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

        let body = json!({
            "category": category(info.instrument),
            "symbol": info.symbol,
            "orderId": state.exchange_order_id,
            "qty": new_order.quantity.to_string(),
            "price": new_order.price.to_string(),
        })
        .to_string();

        tracing::info!(
            orderId = old_order_id,
            exchangeOrderId = %state.exchange_order_id,
            newQty = %new_order.quantity,
            newPrice = %new_order.price,
            "replacing Bybit order"
        );

        self.policies.track(old_order_id, OpKind::Replace);
        let result = self.client.post(PATH_AMEND, body).await;
        if !self.policies.clear(old_order_id) {
            tracing::warn!(orderId = old_order_id, "replace reply after timeout, dropping");
            return;
        }

        match result {
            Ok(resp) => match venue_result(&resp) {
                Ok(_) => {
                    tracing::info!(orderId = old_order_id, "Bybit replace confirmed");
                    self.tracker
                        .on_replaced(old_order_id, new_order, &state.exchange_order_id, None);
                }
                Err(e) => tracing::error!(orderId = old_order_id, error = %e, "Bybit replace rejected"),
            },
            Err(e) => {
                tracing::error!(orderId = old_order_id, error = %e, "Bybit replace transport error")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ret_code_zero() {
        let v = venue_result(r#"{"retCode":0,"result":{"orderId":"abc-1"}}"#).unwrap();
        assert_eq!(result_order_id(&v), "abc-1");
    }

    #[test]
    fn rejects_nonzero_ret_code() {
        let err = venue_result(r#"{"retCode":10001,"retMsg":"params error"}"#).unwrap_err();
        assert!(err.contains("10001"));
        assert!(err.contains("params error"));
    }

    #[test]
    fn rejects_malformed_response() {
        assert!(venue_result("nope").is_err());
        assert!(venue_result("{}").is_err());
    }
}
