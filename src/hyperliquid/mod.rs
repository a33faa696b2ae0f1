//! Hyperliquid connector: l2Book/trades streams and the signed order
//! path. Order actions are EIP-712 signed by an out-of-process daemon;
//! this crate only speaks the daemon's framed protocol.

pub mod connector;
pub mod executor;
pub mod signer;

pub use connector::HyperliquidConnector;
pub use executor::HyperliquidOrderExecutor;
pub use signer::{SignRequest, Signature, SignerClient};

use serde::Deserialize;

pub const HYPERLIQUID_EXCHANGE_ID: &str = "hyperliquid";
pub const HYPERLIQUID_ORIGIN: &str = "https://app.hyperliquid.xyz";

pub const SUBSCRIBE_BATCH_COINS: usize = 5;
pub const SUBSCRIBE_BATCH_DELAY_MS: u64 = 50;
pub const PING_INTERVAL_SECS: u64 = 30;

fn default_ws_endpoint() -> String {
    "wss://api.hyperliquid.xyz/ws".to_string()
}

fn default_rest_endpoint() -> String {
    "https://api.hyperliquid.xyz/exchange".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    2_000
}

fn default_mainnet() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct HyperliquidConfig {
    #[serde(default = "default_ws_endpoint")]
    pub ws_endpoint: String,
    #[serde(default = "default_rest_endpoint")]
    pub rest_endpoint: String,
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default)]
    pub private_key: String,
    #[serde(default)]
    pub account_address: String,
    #[serde(default)]
    pub vault_address: Option<String>,
    #[serde(default = "default_mainnet")]
    pub mainnet: bool,
}

impl HyperliquidConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.ws_endpoint.is_empty() {
            return Err("ws_endpoint is empty".to_string());
        }
        if self.rest_endpoint.is_empty() {
            return Err("rest_endpoint is empty".to_string());
        }
        Ok(())
    }

    /// The info endpoint lives next to the exchange endpoint.
    pub fn info_endpoint(&self) -> String {
        format!("{}/info", self.rest_endpoint.trim_end_matches("/exchange"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_mainnet() {
        let cfg: HyperliquidConfig = serde_json::from_str(r#"{"symbols":["BTC"]}"#).unwrap();
        assert!(cfg.mainnet);
        assert_eq!(cfg.ws_endpoint, "wss://api.hyperliquid.xyz/ws");
        assert_eq!(cfg.info_endpoint(), "https://api.hyperliquid.xyz/info");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn info_endpoint_tracks_custom_rest() {
        let cfg: HyperliquidConfig =
            serde_json::from_str(r#"{"rest_endpoint":"http://127.0.0.1:8080/exchange"}"#).unwrap();
        assert_eq!(cfg.info_endpoint(), "http://127.0.0.1:8080/info");
    }
}
