//! Bitget order executor: engine commands to signed V2 mix-order calls.

use crate::bitget::rest::BitgetRestClient;
use crate::connector::OrderExecutor;
use crate::execution::{ExecutorPolicies, OpKind};
use crate::orders::{Order, OrderId, OrderTracker, Side};
use crate::symbols::SymbolRegistry;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

const PATH_PLACE: &str = "/api/v2/mix/order/place-order";
const PATH_CANCEL: &str = "/api/v2/mix/order/cancel-order";
const PATH_MODIFY: &str = "/api/v2/mix/order/modify-order";

/// Product and margin parameters shared by every mix order.
#[derive(Debug, Clone)]
pub struct BitgetTradeParams {
    pub product_type: String,
    pub margin_mode: String,
    pub margin_coin: String,
    pub force: String,
}

impl Default for BitgetTradeParams {
    fn default() -> Self {
        Self {
            product_type: "USDT-FUTURES".to_string(),
            margin_mode: "isolated".to_string(),
            margin_coin: "USDT".to_string(),
            force: "gtc".to_string(),
        }
    }
}

/// Peels the venue envelope: `code == "00000"` or an error string built
/// from `msg`.
fn venue_result(resp: &str) -> Result<Value, String> {
    let v: Value = serde_json::from_str(resp).map_err(|e| e.to_string())?;
    let code = v.get("code").and_then(|c| c.as_str()).unwrap_or("");
    if code != "00000" {
        let msg = v.get("msg").and_then(|m| m.as_str()).unwrap_or("unknown error");
        return Err(format!("code={} msg={}", code, msg));
    }
    Ok(v)
}

fn data_order_id(v: &Value) -> String {
    v.get("data")
        .and_then(|d| d.get("orderId"))
        .and_then(|o| o.as_str())
        .unwrap_or_default()
        .to_string()
}

pub struct BitgetOrderExecutor {
    client: BitgetRestClient,
    registry: Arc<SymbolRegistry>,
    tracker: Arc<dyn OrderTracker>,
    params: BitgetTradeParams,
    policies: ExecutorPolicies,
}

impl BitgetOrderExecutor {
    pub fn new(
        client: BitgetRestClient,
        registry: Arc<SymbolRegistry>,
        tracker: Arc<dyn OrderTracker>,
        params: BitgetTradeParams,
        policies: ExecutorPolicies,
    ) -> Self {
        let executor = Self {
            client,
            registry,
            tracker,
            params,
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
impl OrderExecutor for BitgetOrderExecutor {
    async fn submit_order(&self, order: &Order) {
        if !self.policies.admit(order.id).await {
            return;
        }
        let Some(info) = self.registry.get_info(order.symbol) else {
            tracing::error!(orderId = order.id, symbol = order.symbol, "no symbol info, dropping submit");
            return;
        };

        let body = json!({
            "symbol": info.symbol,
            "productType": self.params.product_type,
            "marginMode": self.params.margin_mode,
            "marginCoin": self.params.margin_coin,
            "size": order.quantity.to_string(),
            "price": order.price.to_string(),
            "side": if order.side == Side::Buy { "buy" } else { "sell" },
            "tradeSide": "open",
            "orderType": "limit",
            "force": self.params.force,
            "clientOid": order.id.to_string(),
        })
        .to_string();

        tracing::info!(
            orderId = order.id,
            symbol = %info.symbol,
            size = %order.quantity,
            price = %order.price,
            "submitting Bitget order"
        );

        self.policies.track(order.id, OpKind::Submit);
        let result = self.client.post(PATH_PLACE, body).await;
        if !self.policies.clear(order.id) {
            tracing::warn!(orderId = order.id, "submit reply after timeout, dropping");
            return;
        }

        match result {
            Ok(resp) => match venue_result(&resp) {
                Ok(v) => {
                    let exchange_id = data_order_id(&v);
                    tracing::info!(orderId = order.id, exchangeOrderId = %exchange_id, "Bitget order submitted");
                    self.tracker
                        .on_submitted(order, &exchange_id, Some(&order.id.to_string()));
                }
                Err(e) => tracing::error!(orderId = order.id, error = %e, "Bitget submit rejected"),
            },
            Err(e) => tracing::error!(orderId = order.id, error = %e, "Bitget submit transport error"),
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

        // Fall back to our client id when the venue id never arrived.
        let body = if state.exchange_order_id.is_empty() {
            json!({
                "symbol": info.symbol,
                "productType": self.params.product_type,
                "marginCoin": self.params.margin_coin,
                "clientOid": order_id.to_string(),
            })
        } else {
            json!({
                "symbol": info.symbol,
                "productType": self.params.product_type,
                "marginCoin": self.params.margin_coin,
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
                    tracing::info!(orderId = order_id, "Bitget cancel confirmed");
                    self.tracker.on_canceled(order_id);
                }
                Err(e) => tracing::error!(orderId = order_id, error = %e, "Bitget cancel rejected"),
            },
            Err(e) => tracing::error!(orderId = order_id, error = %e, "Bitget cancel transport error"),
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
            "orderId": state.exchange_order_id,
            "symbol": info.symbol,
            "productType": self.params.product_type,
            "marginCoin": self.params.margin_coin,
            "newPrice": new_order.price.to_string(),
            "newSize": new_order.quantity.to_string(),
            "newClientOid": new_order.id.to_string(),
        })
        .to_string();

        self.policies.track(old_order_id, OpKind::Replace);
        let result = self.client.post(PATH_MODIFY, body).await;
        if !self.policies.clear(old_order_id) {
            tracing::warn!(orderId = old_order_id, "replace reply after timeout, dropping");
            return;
        }

        match result {
            Ok(resp) => match venue_result(&resp) {
                Ok(v) => {
                    let exchange_id = data_order_id(&v);
                    tracing::info!(orderId = old_order_id, exchangeOrderId = %exchange_id, "Bitget replace confirmed");
                    self.tracker.on_replaced(
                        old_order_id,
                        new_order,
                        &exchange_id,
                        Some(&new_order.id.to_string()),
                    );
                }
                Err(e) => tracing::error!(orderId = old_order_id, error = %e, "Bitget replace rejected"),
            },
            Err(e) => {
                tracing::error!(orderId = old_order_id, error = %e, "Bitget replace transport error")
            }
        }
    }
}
