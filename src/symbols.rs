//! Process-wide symbol registry.
//!
//! Every venue string is mapped to a stable `SymbolId` the first time it
//! is seen; the id lives for the rest of the process. Receive tasks for
//! different venues register concurrently, so the forward index uses
//! DashMap and the id counter is atomic. The info record is inserted
//! before the id is published, so a reader holding an id always finds
//! its info.

use crate::num::{safe_parse_double, Price};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub type SymbolId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentType {
    Spot,
    Future,
    /// Coin-margined perpetual or future.
    Inverse,
    Option,
}

impl Default for InstrumentType {
    fn default() -> Self {
        InstrumentType::Spot
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionType {
    Call,
    Put,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SymbolInfo {
    pub exchange: String,
    pub symbol: String,
    pub instrument: InstrumentType,
    pub strike: Option<Price>,
    /// Expiry at UTC midnight, milliseconds since the Unix epoch.
    pub expiry_ms: Option<i64>,
    pub option_type: Option<OptionType>,
}

impl SymbolInfo {
    pub fn new(exchange: &str, symbol: &str, instrument: InstrumentType) -> Self {
        Self {
            exchange: exchange.to_string(),
            symbol: symbol.to_string(),
            instrument,
            strike: None,
            expiry_ms: None,
            option_type: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct SymbolRegistry {
    to_id: DashMap<(String, String), SymbolId>,
    from_id: DashMap<SymbolId, Arc<SymbolInfo>>,
    next_id: AtomicU32,
}

impl SymbolRegistry {
    pub fn new() -> Self {
        Self {
            to_id: DashMap::with_capacity(256),
            from_id: DashMap::with_capacity(256),
            next_id: AtomicU32::new(1),
        }
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Registers a symbol, returning the existing id if the
    /// (exchange, symbol) pair is already known.
    pub fn register(&self, info: SymbolInfo) -> SymbolId {
        let key = (info.exchange.clone(), info.symbol.clone());

        if let Some(id) = self.to_id.get(&key) {
            return *id;
        }

        match self.to_id.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(entry) => *entry.get(),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                // Info must be visible before the id is handed out.
                self.from_id.insert(id, Arc::new(info));
                entry.insert(id);
                id
            }
        }
    }

    pub fn get_id(&self, exchange: &str, symbol: &str) -> Option<SymbolId> {
        self.to_id
            .get(&(exchange.to_string(), symbol.to_string()))
            .map(|id| *id)
    }

    pub fn get_info(&self, id: SymbolId) -> Option<Arc<SymbolInfo>> {
        self.from_id.get(&id).map(|e| Arc::clone(e.value()))
    }

    pub fn len(&self) -> usize {
        self.to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_id.is_empty()
    }
}

fn month_number(m: &str) -> Option<u32> {
    match m.to_ascii_uppercase().as_str() {
        "JAN" => Some(1),
        "FEB" => Some(2),
        "MAR" => Some(3),
        "APR" => Some(4),
        "MAY" => Some(5),
        "JUN" => Some(6),
        "JUL" => Some(7),
        "AUG" => Some(8),
        "SEP" => Some(9),
        "OCT" => Some(10),
        "NOV" => Some(11),
        "DEC" => Some(12),
        _ => None,
    }
}

/// Parses an option symbol of the form `UNDERLYING-DDMMMYY-STRIKE-{C|P}`
/// with an optional `-USDT` suffix, e.g. `BTC-30AUG24-50000-C`.
pub fn parse_option_symbol(full_symbol: &str, exchange: &str) -> Option<SymbolInfo> {
    let trimmed = full_symbol.strip_suffix("-USDT").unwrap_or(full_symbol);

    let mut parts = trimmed.split('-');
    let underlying = parts.next()?;
    let expiry = parts.next()?;
    let strike = parts.next()?;
    let side = parts.next()?;
    if parts.next().is_some() || underlying.is_empty() {
        return None;
    }

    // DDMMMYY, e.g. 30AUG24
    if expiry.len() != 7 || !expiry.is_ascii() {
        return None;
    }
    let day: u32 = expiry[0..2].parse().ok()?;
    let month = month_number(&expiry[2..5])?;
    let year: i32 = expiry[5..7].parse::<i32>().ok()? + 2000;
    let date = chrono::NaiveDate::from_ymd_opt(year, month, day)?;
    let expiry_ms = date.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis();

    let strike_px = safe_parse_double(strike).filter(|v| *v > 0.0)?;

    let option_type = match side {
        "C" => OptionType::Call,
        "P" => OptionType::Put,
        _ => return None,
    };

    Some(SymbolInfo {
        exchange: exchange.to_string(),
        symbol: trimmed.to_string(),
        instrument: InstrumentType::Option,
        strike: Some(Price::from_double(strike_px)),
        expiry_ms: Some(expiry_ms),
        option_type: Some(option_type),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn register_is_idempotent() {
        let reg = SymbolRegistry::new();
        let a = reg.register(SymbolInfo::new("bybit", "BTCUSDT", InstrumentType::Spot));
        let b = reg.register(SymbolInfo::new("bybit", "BTCUSDT", InstrumentType::Future));
        assert_eq!(a, b);
        // First registration wins.
        assert_eq!(reg.get_info(a).unwrap().instrument, InstrumentType::Spot);
    }

    #[test]
    fn ids_are_unique_per_pair() {
        let reg = SymbolRegistry::new();
        let a = reg.register(SymbolInfo::new("bybit", "BTCUSDT", InstrumentType::Spot));
        let b = reg.register(SymbolInfo::new("bitget", "BTCUSDT", InstrumentType::Spot));
        let c = reg.register(SymbolInfo::new("bybit", "ETHUSDT", InstrumentType::Spot));
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
        assert_eq!(reg.get_id("bitget", "BTCUSDT"), Some(b));
        assert_eq!(reg.get_id("okx", "BTCUSDT"), None);
    }

    #[test]
    fn info_visible_for_returned_id() {
        let reg = SymbolRegistry::new();
        let id = reg.register(SymbolInfo::new("hyperliquid", "BTC", InstrumentType::Future));
        let info = reg.get_info(id).unwrap();
        assert_eq!(info.exchange, "hyperliquid");
        assert_eq!(info.symbol, "BTC");
        assert!(reg.get_info(9999).is_none());
    }

    #[test]
    fn concurrent_registration_converges() {
        let reg = SymbolRegistry::new_shared();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let reg = Arc::clone(&reg);
                thread::spawn(move || {
                    let id = reg.register(SymbolInfo::new("bybit", "SOLUSDT", InstrumentType::Spot));
                    // The id must resolve immediately on this thread.
                    assert!(reg.get_info(id).is_some());
                    id
                })
            })
            .collect();

        let ids: Vec<SymbolId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn parses_option_symbols() {
        let info = parse_option_symbol("BTC-30AUG24-50000-C-USDT", "bybit").unwrap();
        assert_eq!(info.instrument, InstrumentType::Option);
        assert_eq!(info.symbol, "BTC-30AUG24-50000-C");
        assert_eq!(info.strike, Some(Price::from_double(50000.0)));
        assert_eq!(info.option_type, Some(OptionType::Call));
        let expiry = chrono::DateTime::from_timestamp_millis(info.expiry_ms.unwrap()).unwrap();
        assert_eq!(expiry.format("%Y-%m-%d").to_string(), "2024-08-30");

        let put = parse_option_symbol("ETH-01JAN25-2400-P", "bybit").unwrap();
        assert_eq!(put.option_type, Some(OptionType::Put));
    }

    #[test]
    fn rejects_non_option_symbols() {
        assert!(parse_option_symbol("BTCUSDT", "bybit").is_none());
        assert!(parse_option_symbol("BTC-30AUG24-50000-X", "bybit").is_none());
        assert!(parse_option_symbol("BTC-99ZZZ24-50000-C", "bybit").is_none());
        assert!(parse_option_symbol("BTC-30AUG24-0-C", "bybit").is_none());
        assert!(parse_option_symbol("BTC-30AUG24--C", "bybit").is_none());
    }
}
