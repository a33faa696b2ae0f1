//! Bybit V5 connector: public orderbook/trade streams, the private
//! order channel, and the signed REST order path.

pub mod connector;
pub mod executor;
pub mod rest;

pub use connector::BybitConnector;
pub use executor::BybitOrderExecutor;
pub use rest::BybitRestClient;

use crate::symbols::InstrumentType;
use serde::Deserialize;

pub const BYBIT_EXCHANGE_ID: &str = "bybit";
pub const BYBIT_ORIGIN: &str = "https://www.bybit.com";

fn default_public_endpoint() -> String {
    "wss://stream.bybit.com/v5/public/linear".to_string()
}

fn default_private_endpoint() -> String {
    "wss://stream.bybit.com/v5/private".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    2_000
}

fn default_depth() -> u16 {
    50
}

#[derive(Debug, Clone, Deserialize)]
pub struct BybitSymbolConfig {
    pub name: String,
    #[serde(default, rename = "type")]
    pub instrument: InstrumentType,
    #[serde(default = "default_depth")]
    pub depth: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BybitConfig {
    #[serde(default = "default_public_endpoint")]
    pub public_endpoint: String,
    #[serde(default = "default_private_endpoint")]
    pub private_endpoint: String,
    #[serde(default)]
    pub symbols: Vec<BybitSymbolConfig>,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    #[serde(default)]
    pub enable_private: bool,
}

impl BybitConfig {
    /// Depth menus differ per product line, so validation is
    /// per-symbol.
    pub fn validate(&self) -> Result<(), String> {
        if self.public_endpoint.is_empty() {
            return Err("public_endpoint is empty".to_string());
        }
        if self.enable_private
            && (self.private_endpoint.is_empty() || self.api_key.is_empty() || self.api_secret.is_empty())
        {
            return Err("private stream enabled without endpoint/key/secret".to_string());
        }
        for s in &self.symbols {
            if s.name.is_empty() {
                return Err("symbol name is empty".to_string());
            }
            let allowed: &[u16] = match s.instrument {
                InstrumentType::Spot => &[1, 50, 200],
                InstrumentType::Future | InstrumentType::Inverse => &[1, 50, 200, 500],
                InstrumentType::Option => &[25, 100],
            };
            if !allowed.contains(&s.depth) {
                return Err(format!(
                    "symbol {} has unsupported depth {} (allowed: {:?})",
                    s.name, s.depth, allowed
                ));
            }
        }
        Ok(())
    }
}

pub(crate) fn category(instrument: InstrumentType) -> &'static str {
    match instrument {
        InstrumentType::Spot => "spot",
        InstrumentType::Future => "linear",
        InstrumentType::Inverse => "inverse",
        InstrumentType::Option => "option",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(name: &str, instrument: InstrumentType, depth: u16) -> BybitSymbolConfig {
        BybitSymbolConfig {
            name: name.to_string(),
            instrument,
            depth,
        }
    }

    fn base_config() -> BybitConfig {
        BybitConfig {
            public_endpoint: default_public_endpoint(),
            private_endpoint: default_private_endpoint(),
            symbols: Vec::new(),
            reconnect_delay_ms: 2_000,
            api_key: String::new(),
            api_secret: String::new(),
            enable_private: false,
        }
    }

    #[test]
    fn validates_depth_per_instrument() {
        let mut cfg = base_config();
        cfg.symbols = vec![
            sym("BTCUSDT", InstrumentType::Future, 50),
            sym("BTC-30AUG24-50000-C", InstrumentType::Option, 25),
        ];
        assert!(cfg.validate().is_ok());

        cfg.symbols.push(sym("ETHUSDT", InstrumentType::Spot, 500));
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn private_requires_credentials() {
        let mut cfg = base_config();
        cfg.enable_private = true;
        assert!(cfg.validate().is_err());
        cfg.api_key = "k".to_string();
        cfg.api_secret = "s".to_string();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn deserializes_from_json() {
        let cfg: BybitConfig = serde_json::from_str(
            r#"{
                "symbols": [{"name": "BTCUSDT", "type": "future", "depth": 50}],
                "api_key": "k",
                "api_secret": "s"
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.symbols[0].instrument, InstrumentType::Future);
        assert_eq!(cfg.reconnect_delay_ms, 2_000);
        assert!(cfg.public_endpoint.starts_with("wss://"));
    }

    #[test]
    fn category_strings() {
        assert_eq!(category(InstrumentType::Spot), "spot");
        assert_eq!(category(InstrumentType::Future), "linear");
        assert_eq!(category(InstrumentType::Inverse), "inverse");
        assert_eq!(category(InstrumentType::Option), "option");
    }
}
