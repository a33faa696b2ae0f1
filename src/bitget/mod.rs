//! Bitget V2 connector: public books/trade streams, the private orders
//! channel, and the signed REST order path.

pub mod connector;
pub mod executor;
pub mod rest;

pub use connector::BitgetConnector;
pub use executor::{BitgetOrderExecutor, BitgetTradeParams};
pub use rest::BitgetRestClient;

use crate::symbols::InstrumentType;
use serde::Deserialize;

pub const BITGET_EXCHANGE_ID: &str = "bitget";
pub const BITGET_ORIGIN: &str = "https://www.bitget.com";
// Bitget rejects websocket upgrades without a browser User-Agent.
pub const BITGET_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

pub const SUBSCRIBE_BATCH_SIZE: usize = 10;
pub const PING_INTERVAL_SECS: u64 = 25;

fn default_public_endpoint() -> String {
    "wss://ws.bitget.com/v2/ws/public".to_string()
}

fn default_private_endpoint() -> String {
    "wss://ws.bitget.com/v2/ws/private".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    2_000
}

fn default_depth() -> u16 {
    15
}

#[derive(Debug, Clone, Deserialize)]
pub struct BitgetSymbolConfig {
    pub name: String,
    #[serde(default, rename = "type")]
    pub instrument: InstrumentType,
    #[serde(default = "default_depth")]
    pub depth: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BitgetConfig {
    #[serde(default = "default_public_endpoint")]
    pub public_endpoint: String,
    #[serde(default = "default_private_endpoint")]
    pub private_endpoint: String,
    #[serde(default)]
    pub symbols: Vec<BitgetSymbolConfig>,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    #[serde(default)]
    pub passphrase: String,
    #[serde(default)]
    pub enable_private: bool,
}

impl BitgetConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.public_endpoint.is_empty() {
            return Err("public_endpoint is empty".to_string());
        }
        if self.enable_private
            && (self.private_endpoint.is_empty()
                || self.api_key.is_empty()
                || self.api_secret.is_empty()
                || self.passphrase.is_empty())
        {
            return Err("private stream enabled without endpoint/key/secret/passphrase".to_string());
        }
        for s in &self.symbols {
            if s.name.is_empty() {
                return Err("symbol name is empty".to_string());
            }
            if !matches!(s.depth, 1 | 5 | 15 | 100) {
                return Err(format!(
                    "symbol {} has unsupported depth {} (allowed: 1, 5, 15, 100)",
                    s.name, s.depth
                ));
            }
        }
        Ok(())
    }
}

pub(crate) fn inst_type(instrument: InstrumentType) -> &'static str {
    match instrument {
        InstrumentType::Spot => "SPOT",
        InstrumentType::Future => "USDT-FUTURES",
        InstrumentType::Inverse => "COIN-FUTURES",
        InstrumentType::Option => "SUSDT-FUTURES",
    }
}

pub(crate) fn book_channel(depth: u16) -> &'static str {
    match depth {
        1 => "books1",
        5 => "books5",
        15 => "books15",
        _ => "books",
    }
}
