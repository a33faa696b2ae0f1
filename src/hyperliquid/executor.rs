//! Hyperliquid order executor.
//!
//! Actions are JSON strings assembled by hand: the signing daemon signs
//! the action bytes as given, so key order is part of the wire format
//! and must not be left to a serializer.

use crate::connector::OrderExecutor;
use crate::execution::{ExecutorPolicies, OpKind};
use crate::hyperliquid::signer::{SignRequest, Signature, SignerClient};
use crate::hyperliquid::HyperliquidConfig;
use crate::net::http::SessionPool;
use crate::orders::{Order, OrderId, OrderTracker, Side};
use crate::symbols::SymbolRegistry;
use crate::utils::{now_ms, trim_fixed};
use crate::DynError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

fn json_headers() -> Vec<(String, String)> {
    vec![("Content-Type".to_string(), "application/json".to_string())]
}

/// 128-bit client order id rendered as 0x + 32 hex chars.
fn gen_cloid() -> String {
    format!("0x{}", uuid::Uuid::new_v4().simple())
}

fn build_order_object(asset: u32, is_buy: bool, px: &str, sz: &str, cloid: &str) -> String {
    format!(
        "{{\"a\":{},\"b\":{},\"p\":\"{}\",\"s\":\"{}\",\"r\":false,\"t\":{{\"limit\":{{\"tif\":\"Gtc\"}}}},\"c\":\"{}\"}}",
        asset, is_buy, px, sz, cloid
    )
}

fn build_body(action: &str, nonce: u64, vault: Option<&str>, sig: &Signature) -> String {
    let mut body = String::with_capacity(action.len() + 256);
    body.push_str("{\"action\":");
    body.push_str(action);
    body.push_str(",\"nonce\":");
    body.push_str(&nonce.to_string());
    if let Some(vault) = vault {
        body.push_str(",\"vaultAddress\":\"");
        body.push_str(vault);
        body.push('"');
    }
    body.push_str(",\"signature\":{\"r\":\"");
    body.push_str(&sig.r);
    body.push_str("\",\"s\":\"");
    body.push_str(&sig.s);
    body.push_str("\",\"v\":");
    body.push_str(&sig.v.to_string());
    body.push_str("}}");
    body
}

fn parse_universe(v: &Value) -> HashMap<String, u32> {
    let mut map = HashMap::new();
    if let Some(universe) = v.get("universe").and_then(|u| u.as_array()) {
        for (idx, coin) in universe.iter().enumerate() {
            if let Some(name) = coin.get("name").and_then(|n| n.as_str()) {
                map.insert(name.to_string(), idx as u32);
            }
        }
    }
    map
}

/// Submit replies carry the venue order id under resting or filled.
fn extract_oid(v: &Value) -> Option<u64> {
    let status = v
        .get("response")?
        .get("data")?
        .get("statuses")?
        .as_array()?
        .first()?;
    let oid = status
        .get("resting")
        .or_else(|| status.get("filled"))?
        .get("oid")?;
    oid.as_u64()
}

fn status_ok(v: &Value) -> bool {
    v.get("status").and_then(|s| s.as_str()) == Some("ok")
}

pub struct HyperliquidOrderExecutor {
    cfg: Arc<HyperliquidConfig>,
    pool: Arc<SessionPool>,
    signer: SignerClient,
    registry: Arc<SymbolRegistry>,
    tracker: Arc<dyn OrderTracker>,
    policies: ExecutorPolicies,
    asset_ids: OnceCell<HashMap<String, u32>>,
}

impl HyperliquidOrderExecutor {
    pub fn new(
        cfg: HyperliquidConfig,
        pool: Arc<SessionPool>,
        signer: SignerClient,
        registry: Arc<SymbolRegistry>,
        tracker: Arc<dyn OrderTracker>,
        policies: ExecutorPolicies,
    ) -> Self {
        let executor = Self {
            cfg: Arc::new(cfg),
            pool,
            signer,
            registry,
            tracker,
            policies,
            asset_ids: OnceCell::new(),
        };
        executor.policies.start();
        executor
    }

    pub async fn shutdown(&self) {
        self.policies.stop().await;
    }

    /// Loaded once per executor from the venue meta endpoint.
    async fn asset_id(&self, coin: &str) -> Option<u32> {
        let map = self
            .asset_ids
            .get_or_try_init(|| self.load_asset_ids())
            .await;
        match map {
            Ok(map) => map.get(coin).copied(),
            Err(e) => {
                tracing::warn!(error = %e, "Hyperliquid meta fetch failed");
                None
            }
        }
    }

    async fn load_asset_ids(&self) -> Result<HashMap<String, u32>, DynError> {
        let resp = self
            .pool
            .post(
                &self.cfg.info_endpoint(),
                "{\"type\":\"meta\"}".to_string(),
                &json_headers(),
            )
            .await?;
        let v: Value = serde_json::from_str(&resp)?;
        let map = parse_universe(&v);
        tracing::info!(assets = map.len(), "Hyperliquid asset map loaded");
        Ok(map)
    }

    async fn sign_action(&self, action: &str, nonce: u64) -> Option<Signature> {
        let request = SignRequest {
            action_json: action,
            nonce,
            is_mainnet: self.cfg.mainnet,
            private_key: &self.cfg.private_key,
            active_pool: self.cfg.vault_address.as_deref().filter(|v| !v.is_empty()),
            expires_after: None,
        };
        match self.signer.sign(&request).await {
            Ok(sig) => Some(sig),
            Err(e) => {
                tracing::error!(error = %e, "Hyperliquid signing failed, dropping action");
                None
            }
        }
    }

    async fn post_exchange(&self, body: String) -> Result<Value, DynError> {
        let resp = self
            .pool
            .post(&self.cfg.rest_endpoint, body, &json_headers())
            .await?;
        Ok(serde_json::from_str(&resp)?)
    }
}

#[async_trait]
impl OrderExecutor for HyperliquidOrderExecutor {
    async fn submit_order(&self, order: &Order) {
        if !self.policies.admit(order.id).await {
            return;
        }
        let Some(info) = self.registry.get_info(order.symbol) else {
            tracing::error!(orderId = order.id, symbol = order.symbol, "no symbol info, dropping submit");
            return;
        };
        let Some(asset) = self.asset_id(&info.symbol).await else {
            tracing::error!(orderId = order.id, coin = %info.symbol, "asset id not cached, dropping submit");
            return;
        };

        let px = trim_fixed(order.price.to_double());
        let sz = trim_fixed(order.quantity.to_double());
        let cloid = gen_cloid();
        let order_obj = build_order_object(asset, order.side == Side::Buy, &px, &sz, &cloid);
        let action = format!(
            "{{\"type\":\"order\",\"orders\":[{}],\"grouping\":\"na\"}}",
            order_obj
        );
        let nonce = now_ms();

        // The pending entry goes in before signing: a dead signer
        // surfaces through the timeout policy.
        self.policies.track(order.id, OpKind::Submit);

        let Some(sig) = self.sign_action(&action, nonce).await else {
            return;
        };
        let body = build_body(&action, nonce, self.cfg.vault_address.as_deref(), &sig);

        tracing::info!(orderId = order.id, coin = %info.symbol, px = %px, sz = %sz, "submitting Hyperliquid order");

        let result = self.post_exchange(body).await;
        if !self.policies.clear(order.id) {
            tracing::warn!(orderId = order.id, "submit reply after timeout, dropping");
            return;
        }

        match result {
            Ok(v) => {
                let exchange_id = extract_oid(&v).map(|o| o.to_string()).unwrap_or_default();
                if exchange_id.is_empty() && !status_ok(&v) {
                    tracing::error!(orderId = order.id, reply = %v, "Hyperliquid submit rejected");
                    return;
                }
                tracing::info!(orderId = order.id, exchangeOrderId = %exchange_id, cloid = %cloid, "Hyperliquid order submitted");
                self.tracker.on_submitted(order, &exchange_id, Some(&cloid));
            }
            Err(e) => tracing::error!(orderId = order.id, error = %e, "Hyperliquid submit transport error"),
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
        if state.client_order_id.is_empty() {
            tracing::error!(orderId = order_id, "no client order id, cannot cancel");
            return;
        }
        let Some(info) = self.registry.get_info(state.order.symbol) else {
            tracing::error!(orderId = order_id, symbol = state.order.symbol, "no symbol info for cancel");
            return;
        };
        let Some(asset) = self.asset_id(&info.symbol).await else {
            tracing::error!(orderId = order_id, coin = %info.symbol, "asset id not cached, dropping cancel");
            return;
        };

        let action = format!(
            "{{\"type\":\"cancelByCloid\",\"cancels\":[{{\"asset\":{},\"cloid\":\"{}\"}}]}}",
            asset, state.client_order_id
        );
        let nonce = now_ms();

        self.policies.track(order_id, OpKind::Cancel);

        let Some(sig) = self.sign_action(&action, nonce).await else {
            return;
        };
        let body = build_body(&action, nonce, self.cfg.vault_address.as_deref(), &sig);

        let result = self.post_exchange(body).await;
        if !self.policies.clear(order_id) {
            tracing::warn!(orderId = order_id, "cancel reply after timeout, dropping");
            return;
        }

        match result {
            Ok(v) if status_ok(&v) => {
                tracing::info!(orderId = order_id, "Hyperliquid cancel confirmed");
                self.tracker.on_canceled(order_id);
            }
            Ok(v) => tracing::error!(orderId = order_id, reply = %v, "Hyperliquid cancel rejected"),
            Err(e) => tracing::error!(orderId = order_id, error = %e, "Hyperliquid cancel transport error"),
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
        let Some(oid) = state.exchange_order_id.parse::<u64>().ok() else {
            tracing::error!(orderId = old_order_id, exchangeOrderId = %state.exchange_order_id, "no numeric venue id, cannot modify");
            return;
        };
        let Some(info) = self.registry.get_info(new_order.symbol) else {
            tracing::error!(orderId = old_order_id, symbol = new_order.symbol, "no symbol info for replace");
            return;
        };
        let Some(asset) = self.asset_id(&info.symbol).await else {
            tracing::error!(orderId = old_order_id, coin = %info.symbol, "asset id not cached, dropping replace");
            return;
        };

        let px = trim_fixed(new_order.price.to_double());
        let sz = trim_fixed(new_order.quantity.to_double());
        let cloid = if state.client_order_id.is_empty() {
            gen_cloid()
        } else {
            state.client_order_id.clone()
        };
        let order_obj = build_order_object(asset, new_order.side == Side::Buy, &px, &sz, &cloid);
        let action = format!("{{\"type\":\"modify\",\"oid\":{},\"order\":{}}}", oid, order_obj);
        let nonce = now_ms();

        self.policies.track(old_order_id, OpKind::Replace);

        let Some(sig) = self.sign_action(&action, nonce).await else {
            return;
        };
        let body = build_body(&action, nonce, self.cfg.vault_address.as_deref(), &sig);

        let result = self.post_exchange(body).await;
        if !self.policies.clear(old_order_id) {
            tracing::warn!(orderId = old_order_id, "replace reply after timeout, dropping");
            return;
        }

        match result {
            Ok(v) if status_ok(&v) => {
                tracing::info!(orderId = old_order_id, "Hyperliquid modify confirmed");
                self.tracker.on_replaced(
                    old_order_id,
                    new_order,
                    &state.exchange_order_id,
                    Some(&cloid),
                );
            }
            Ok(v) => tracing::error!(orderId = old_order_id, reply = %v, "Hyperliquid modify rejected"),
            Err(e) => {
                tracing::error!(orderId = old_order_id, error = %e, "Hyperliquid modify transport error")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloid_is_0x_plus_32_hex() {
        let cloid = gen_cloid();
        assert!(cloid.starts_with("0x"));
        assert_eq!(cloid.len(), 34);
        assert!(cloid[2..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(gen_cloid(), cloid);
    }

    #[test]
    fn order_action_preserves_key_order() {
        let obj = build_order_object(3, true, "43000.5", "1.5", "0xabc");
        assert_eq!(
            obj,
            "{\"a\":3,\"b\":true,\"p\":\"43000.5\",\"s\":\"1.5\",\"r\":false,\"t\":{\"limit\":{\"tif\":\"Gtc\"}},\"c\":\"0xabc\"}"
        );
        let action = format!("{{\"type\":\"order\",\"orders\":[{}],\"grouping\":\"na\"}}", obj);
        assert!(action.starts_with("{\"type\":\"order\",\"orders\":["));
        assert!(action.ends_with("],\"grouping\":\"na\"}"));
        // And it is still valid JSON.
        let v: Value = serde_json::from_str(&action).unwrap();
        assert_eq!(v["orders"][0]["a"], 3);
    }

    #[test]
    fn body_includes_vault_only_when_set() {
        let sig = Signature {
            r: "0x1".to_string(),
            s: "0x2".to_string(),
            v: 27,
        };
        let body = build_body("{\"type\":\"order\"}", 1700000000000, None, &sig);
        assert_eq!(
            body,
            "{\"action\":{\"type\":\"order\"},\"nonce\":1700000000000,\"signature\":{\"r\":\"0x1\",\"s\":\"0x2\",\"v\":27}}"
        );

        let with_vault = build_body("{}", 5, Some("0xvault"), &sig);
        assert!(with_vault.contains(",\"vaultAddress\":\"0xvault\","));
        let v: Value = serde_json::from_str(&with_vault).unwrap();
        assert_eq!(v["signature"]["v"], 27);
    }

    #[test]
    fn universe_parses_to_index_map() {
        let v: Value = serde_json::from_str(
            r#"{"universe":[{"name":"BTC"},{"name":"ETH"},{"name":"SOL"}]}"#,
        )
        .unwrap();
        let map = parse_universe(&v);
        assert_eq!(map.get("BTC"), Some(&0));
        assert_eq!(map.get("SOL"), Some(&2));
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn oid_extraction_resting_and_filled() {
        let resting: Value = serde_json::from_str(
            r#"{"status":"ok","response":{"data":{"statuses":[{"resting":{"oid":77}}]}}}"#,
        )
        .unwrap();
        assert_eq!(extract_oid(&resting), Some(77));

        let filled: Value = serde_json::from_str(
            r#"{"status":"ok","response":{"data":{"statuses":[{"filled":{"oid":88,"totalSz":"1"}}]}}}"#,
        )
        .unwrap();
        assert_eq!(extract_oid(&filled), Some(88));

        let error: Value =
            serde_json::from_str(r#"{"status":"err","response":"bad nonce"}"#).unwrap();
        assert_eq!(extract_oid(&error), None);
        assert!(!status_ok(&error));
    }
}
