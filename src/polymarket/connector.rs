//! Polymarket websocket market data: book snapshots and trades on the
//! market channel.

use crate::bus::{BookUpdateBus, TradeBus};
use crate::connector::ExchangeConnector;
use crate::events::{BookEventPool, BookUpdateType, TradeEvent};
use crate::net::ws::{PingPolicy, WsClient, WsConfig, WsHandler, WsSender};
use crate::num::{safe_parse_double, Price, Quantity};
use crate::polymarket::{PolymarketConfig, POLYMARKET_EXCHANGE_ID, POLYMARKET_ORIGIN};
use crate::symbols::{InstrumentType, SymbolId, SymbolInfo, SymbolRegistry};
use crate::utils::now_ns_monotonic;
use crate::DynError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct PolymarketConnector {
    decoder: PolymarketDecoder,
    ws: WsClient,
    started: AtomicBool,
}

impl PolymarketConnector {
    pub fn new(
        cfg: PolymarketConfig,
        registry: Arc<SymbolRegistry>,
        book_bus: Arc<BookUpdateBus>,
        trade_bus: Arc<TradeBus>,
    ) -> Self {
        let cfg = Arc::new(cfg);

        // Zero disables pings so the embedding app can run its own.
        let ping = if cfg.ping_interval_sec == 0 {
            PingPolicy::None
        } else {
            PingPolicy::Protocol {
                interval: Duration::from_secs(cfg.ping_interval_sec),
            }
        };
        let ws = WsClient::new(WsConfig {
            url: cfg.ws_endpoint.clone(),
            origin: POLYMARKET_ORIGIN.to_string(),
            reconnect_delay_ms: cfg.reconnect_delay_ms,
            ping,
            headers: Vec::new(),
        });

        let decoder = PolymarketDecoder {
            cfg,
            registry,
            book_bus,
            trade_bus,
            pool: Arc::new(BookEventPool::with_default_capacity()),
        };

        Self {
            decoder,
            ws,
            started: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ExchangeConnector for PolymarketConnector {
    fn exchange_id(&self) -> &'static str {
        POLYMARKET_EXCHANGE_ID
    }

    async fn start(&self) -> Result<(), DynError> {
        if let Err(e) = self.decoder.cfg.validate() {
            tracing::error!(error = %e, "invalid Polymarket config");
            return Err(e.into());
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.ws.start(self.decoder.clone());
        Ok(())
    }

    async fn stop(&self) {
        self.ws.stop().await;
    }
}

/// Price and size arrive as strings in book levels but as either
/// strings or numbers in trade frames.
fn value_as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::String(s) => safe_parse_double(s),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

#[derive(Clone)]
pub(crate) struct PolymarketDecoder {
    pub(crate) cfg: Arc<PolymarketConfig>,
    registry: Arc<SymbolRegistry>,
    book_bus: Arc<BookUpdateBus>,
    trade_bus: Arc<TradeBus>,
    pool: Arc<BookEventPool>,
}

impl PolymarketDecoder {
    fn resolve_symbol_id(&self, token_id: &str) -> SymbolId {
        if let Some(id) = self.registry.get_id(POLYMARKET_EXCHANGE_ID, token_id) {
            return id;
        }
        self.registry.register(SymbolInfo::new(
            POLYMARKET_EXCHANGE_ID,
            token_id,
            InstrumentType::Spot,
        ))
    }

    pub(crate) fn handle_message(&self, payload: &str) {
        let recv_ns = now_ns_monotonic();

        let v: Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "Polymarket json parse error");
                return;
            }
        };

        // The first frame after subscribing is an array of full books.
        if let Some(items) = v.as_array() {
            for item in items {
                self.process_book_snapshot(item, recv_ns);
            }
            return;
        }

        // Incremental price_changes are left to the book event stream.
        if v.get("price_changes").is_some() {
            return;
        }

        match v.get("event_type").and_then(|e| e.as_str()) {
            Some("book") => self.process_book_snapshot(&v, recv_ns),
            Some("trade") | Some("last_trade_price") => self.process_trade(&v),
            _ => {}
        }
    }

    fn process_book_snapshot(&self, obj: &Value, recv_ns: u64) {
        let Some(token_id) = obj.get("asset_id").and_then(|a| a.as_str()) else {
            return;
        };

        let Some(mut ev) = self.pool.acquire() else {
            if self.pool.note_exhausted() {
                tracing::warn!("Polymarket book pool exhausted, dropping frames");
            }
            return;
        };

        let sid = self.resolve_symbol_id(token_id);
        ev.symbol = sid;
        ev.kind = BookUpdateType::Snapshot;
        ev.recv_ns = recv_ns;
        ev.exchange_ts_ns = obj
            .get("timestamp")
            .and_then(value_as_f64)
            .map(|ms| (ms as u64) * 1_000_000)
            .unwrap_or(0);
        ev.instrument = InstrumentType::Spot;

        for (field, out) in [("bids", true), ("asks", false)] {
            let Some(levels) = obj.get(field).and_then(|b| b.as_array()) else {
                continue;
            };
            for level in levels {
                let price = level.get("price").and_then(value_as_f64).unwrap_or(0.0);
                let size = level.get("size").and_then(value_as_f64).unwrap_or(0.0);
                if price > 0.0 && size > 0.0 {
                    let entry = (Price::from_double(price), Quantity::from_double(size));
                    if out {
                        ev.bids.push(entry);
                    } else {
                        ev.asks.push(entry);
                    }
                }
            }
        }

        if ev.bids.is_empty() && ev.asks.is_empty() {
            return;
        }
        ev.publish_ns = now_ns_monotonic();
        self.book_bus.publish(ev);
    }

    fn process_trade(&self, obj: &Value) {
        let Some(token_id) = obj.get("asset_id").and_then(|a| a.as_str()) else {
            return;
        };
        let price = obj.get("price").and_then(value_as_f64);
        let size = obj.get("size").and_then(value_as_f64);
        let (Some(price), Some(size)) = (price, size) else {
            return;
        };

        let sid = self.resolve_symbol_id(token_id);
        self.trade_bus.publish(TradeEvent {
            symbol: sid,
            price: Price::from_double(price),
            quantity: Quantity::from_double(size),
            is_buy: obj.get("side").and_then(|s| s.as_str()) == Some("BUY"),
            exchange_ts_ns: obj
                .get("timestamp")
                .and_then(value_as_f64)
                .map(|ms| (ms as u64) * 1_000_000)
                .unwrap_or(0),
            instrument: InstrumentType::Spot,
        });
    }
}

#[async_trait]
impl WsHandler for PolymarketDecoder {
    async fn on_open(&mut self, sender: &WsSender) {
        if self.cfg.token_ids.is_empty() {
            return;
        }
        let ids: Vec<String> = self
            .cfg
            .token_ids
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect();
        let frame = format!(
            "{{\"assets_ids\":[{}],\"type\":\"market\",\"operation\":\"subscribe\"}}",
            ids.join(",")
        );
        tracing::info!(tokens = self.cfg.token_ids.len(), "Polymarket connected, subscribing");
        if let Err(e) = sender.send_text(frame).await {
            tracing::warn!(error = %e, "Polymarket subscribe send failed");
        }
    }

    async fn on_message(&mut self, payload: &str) {
        self.handle_message(payload);
    }

    async fn on_close(&mut self, code: Option<u16>, reason: &str) {
        tracing::info!(?code, reason, "Polymarket websocket closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;

    fn decoder() -> (
        PolymarketDecoder,
        Arc<BookUpdateBus>,
        Arc<TradeBus>,
        Arc<SymbolRegistry>,
    ) {
        let registry = SymbolRegistry::new_shared();
        let book_bus = EventBus::new_shared(64);
        let trade_bus = EventBus::new_shared(64);
        let cfg: PolymarketConfig =
            serde_json::from_str(r#"{"token_ids":["11111","22222"]}"#).unwrap();
        let dec = PolymarketDecoder {
            cfg: Arc::new(cfg),
            registry: Arc::clone(&registry),
            book_bus: Arc::clone(&book_bus),
            trade_bus: Arc::clone(&trade_bus),
            pool: Arc::new(BookEventPool::new(8)),
        };
        (dec, book_bus, trade_bus, registry)
    }

    #[test]
    fn array_root_is_initial_snapshots() {
        let (dec, book_bus, _, registry) = decoder();
        dec.handle_message(
            r#"[{"event_type":"book","asset_id":"11111","timestamp":"1700000000000","bids":[{"price":"0.45","size":"100"}],"asks":[{"price":"0.55","size":"80"}]},{"event_type":"book","asset_id":"22222","bids":[{"price":"0.30","size":"10"}],"asks":[]}]"#,
        );
        let first = book_bus.try_pop().unwrap();
        let second = book_bus.try_pop().unwrap();
        assert!(book_bus.try_pop().is_none());
        assert_eq!(first.kind, BookUpdateType::Snapshot);
        assert_eq!(
            first.bids,
            vec![(Price::from_double(0.45), Quantity::from_double(100.0))]
        );
        assert_eq!(first.exchange_ts_ns, 1_700_000_000_000_000_000);
        assert_eq!(Some(first.symbol), registry.get_id("polymarket", "11111"));
        assert_eq!(Some(second.symbol), registry.get_id("polymarket", "22222"));
    }

    #[test]
    fn book_event_object() {
        let (dec, book_bus, _, _) = decoder();
        dec.handle_message(
            r#"{"event_type":"book","asset_id":"11111","bids":[{"price":"0.42","size":"5"}],"asks":[{"price":"0.58","size":"5"}]}"#,
        );
        let ev = book_bus.try_pop().unwrap();
        assert_eq!(ev.bids.len(), 1);
        assert_eq!(ev.asks.len(), 1);
        assert_eq!(ev.instrument, InstrumentType::Spot);
    }

    #[test]
    fn zero_levels_filtered_and_empty_not_published() {
        let (dec, book_bus, _, _) = decoder();
        dec.handle_message(
            r#"{"event_type":"book","asset_id":"11111","bids":[{"price":"0","size":"5"},{"price":"0.4","size":"0"}],"asks":[]}"#,
        );
        assert!(book_bus.try_pop().is_none());
    }

    #[test]
    fn trade_and_last_trade_price() {
        let (dec, _, trade_bus, _) = decoder();
        dec.handle_message(
            r#"{"event_type":"last_trade_price","asset_id":"11111","price":"0.47","size":"25","side":"BUY","timestamp":"1700000000123"}"#,
        );
        dec.handle_message(
            r#"{"event_type":"trade","asset_id":"11111","price":0.48,"size":10,"side":"SELL"}"#,
        );
        let first = trade_bus.try_pop().unwrap();
        let second = trade_bus.try_pop().unwrap();
        assert!(first.is_buy);
        assert!(!second.is_buy);
        assert_eq!(first.price, Price::from_double(0.47));
        assert_eq!(second.quantity, Quantity::from_double(10.0));
        assert_eq!(first.exchange_ts_ns, 1_700_000_000_123_000_000);
    }

    #[test]
    fn price_changes_ignored() {
        let (dec, book_bus, trade_bus, _) = decoder();
        dec.handle_message(
            r#"{"asset_id":"11111","price_changes":[{"price":"0.45","size":"10","side":"BUY"}]}"#,
        );
        assert!(book_bus.try_pop().is_none());
        assert!(trade_bus.try_pop().is_none());
    }
}
