//! Polymarket connector: market-channel book/trade streams over
//! websocket, and order execution through an out-of-process order
//! engine behind a narrow C ABI.

pub mod connector;
pub mod executor;
pub mod ffi;

pub use connector::PolymarketConnector;
pub use executor::{PolymarketOrderExecutor, PolymarketOrderResult};

use serde::Deserialize;

pub const POLYMARKET_EXCHANGE_ID: &str = "polymarket";
pub const POLYMARKET_ORIGIN: &str = "https://polymarket.com";

fn default_ws_endpoint() -> String {
    "wss://ws-subscriptions-clob.polymarket.com/ws/market".to_string()
}

fn default_rest_endpoint() -> String {
    "https://clob.polymarket.com".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    2_000
}

fn default_ping_interval_sec() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolymarketConfig {
    #[serde(default = "default_ws_endpoint")]
    pub ws_endpoint: String,
    #[serde(default = "default_rest_endpoint")]
    pub rest_endpoint: String,
    #[serde(default)]
    pub private_key: String,
    #[serde(default)]
    pub funder_wallet: String,
    #[serde(default)]
    pub token_ids: Vec<String>,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_ping_interval_sec")]
    pub ping_interval_sec: u64,
}

impl PolymarketConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.ws_endpoint.is_empty() {
            return Err("ws_endpoint is empty".to_string());
        }
        if self.token_ids.iter().any(|t| t.is_empty()) {
            return Err("empty token id".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_validation() {
        let cfg: PolymarketConfig =
            serde_json::from_str(r#"{"token_ids":["123","456"]}"#).unwrap();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.ping_interval_sec, 10);
        assert!(cfg.ws_endpoint.contains("polymarket"));

        let bad: PolymarketConfig = serde_json::from_str(r#"{"token_ids":[""]}"#).unwrap();
        assert!(bad.validate().is_err());
    }
}
