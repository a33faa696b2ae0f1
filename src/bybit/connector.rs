//! Bybit websocket market data and private order stream.

use crate::bus::{BookUpdateBus, OrderEventBus, TradeBus};
use crate::bybit::{rest, BybitConfig, BYBIT_EXCHANGE_ID, BYBIT_ORIGIN};
use crate::connector::ExchangeConnector;
use crate::events::{BookEventPool, BookUpdateType, OrderEvent, OrderEventStatus, TradeEvent};
use crate::net::ws::{PingPolicy, WsClient, WsConfig, WsHandler, WsSender};
use crate::num::{Price, Quantity};
use crate::orders::{Order, Side};
use crate::symbols::{parse_option_symbol, SymbolId, SymbolInfo, SymbolRegistry};
use crate::utils::{now_ms, now_ns_monotonic};
use crate::DynError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct BybitConnector {
    decoder: BybitDecoder,
    public_ws: WsClient,
    private_ws: Option<WsClient>,
    private_decoder: Option<BybitPrivateDecoder>,
    started: AtomicBool,
}

impl BybitConnector {
    pub fn new(
        cfg: BybitConfig,
        registry: Arc<SymbolRegistry>,
        book_bus: Arc<BookUpdateBus>,
        trade_bus: Arc<TradeBus>,
        order_bus: Arc<OrderEventBus>,
    ) -> Self {
        let cfg = Arc::new(cfg);

        let decoder = BybitDecoder {
            cfg: Arc::clone(&cfg),
            registry: Arc::clone(&registry),
            book_bus,
            trade_bus,
            pool: Arc::new(BookEventPool::with_default_capacity()),
        };

        let public_ws = WsClient::new(WsConfig {
            url: cfg.public_endpoint.clone(),
            origin: BYBIT_ORIGIN.to_string(),
            reconnect_delay_ms: cfg.reconnect_delay_ms,
            ping: PingPolicy::Protocol {
                interval: Duration::from_secs(20),
            },
            headers: Vec::new(),
        });

        let (private_ws, private_decoder) = if cfg.enable_private {
            let ws = WsClient::new(WsConfig {
                url: cfg.private_endpoint.clone(),
                origin: BYBIT_ORIGIN.to_string(),
                reconnect_delay_ms: cfg.reconnect_delay_ms,
                ping: PingPolicy::Protocol {
                    interval: Duration::from_secs(20),
                },
                headers: Vec::new(),
            });
            let dec = BybitPrivateDecoder {
                cfg: Arc::clone(&cfg),
                registry,
                order_bus,
            };
            (Some(ws), Some(dec))
        } else {
            (None, None)
        };

        Self {
            decoder,
            public_ws,
            private_ws,
            private_decoder,
            started: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ExchangeConnector for BybitConnector {
    fn exchange_id(&self) -> &'static str {
        BYBIT_EXCHANGE_ID
    }

    async fn start(&self) -> Result<(), DynError> {
        if let Err(e) = self.decoder.cfg.validate() {
            tracing::error!(error = %e, "invalid Bybit config");
            return Err(e.into());
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.public_ws.start(self.decoder.clone());
        if let (Some(ws), Some(dec)) = (&self.private_ws, &self.private_decoder) {
            ws.start(dec.clone());
        }
        Ok(())
    }

    async fn stop(&self) {
        if let Some(ws) = &self.private_ws {
            ws.stop().await;
        }
        self.public_ws.stop().await;
    }
}

fn resolve_symbol_id(cfg: &BybitConfig, registry: &SymbolRegistry, symbol: &str) -> SymbolId {
    if let Some(id) = registry.get_id(BYBIT_EXCHANGE_ID, symbol) {
        return id;
    }
    if let Some(info) = parse_option_symbol(symbol, BYBIT_EXCHANGE_ID) {
        return registry.register(info);
    }
    let instrument = cfg
        .symbols
        .iter()
        .find(|s| s.name == symbol)
        .map(|s| s.instrument)
        .unwrap_or_default();
    registry.register(SymbolInfo::new(BYBIT_EXCHANGE_ID, symbol, instrument))
}

fn parse_levels(value: Option<&Value>, out: &mut Vec<(Price, Quantity)>) {
    let Some(levels) = value.and_then(|v| v.as_array()) else {
        return;
    };
    for level in levels {
        let pair = level.as_array().filter(|a| a.len() >= 2);
        let parsed = pair.and_then(|a| {
            let px = a[0].as_str().and_then(|s| Price::from_decimal_str(s).ok())?;
            let qty = a[1].as_str().and_then(|s| Quantity::from_decimal_str(s).ok())?;
            Some((px, qty))
        });
        match parsed {
            Some(entry) => out.push(entry),
            // A bad level is skipped, never the whole frame.
            None => tracing::warn!(level = %level, "unparseable book level, skipping"),
        }
    }
}

#[derive(Clone)]
pub(crate) struct BybitDecoder {
    pub(crate) cfg: Arc<BybitConfig>,
    registry: Arc<SymbolRegistry>,
    book_bus: Arc<BookUpdateBus>,
    trade_bus: Arc<TradeBus>,
    pool: Arc<BookEventPool>,
}

impl BybitDecoder {
    pub(crate) fn handle_message(&self, payload: &str) {
        let recv_ns = now_ns_monotonic();

        let v: Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "Bybit json parse error");
                return;
            }
        };

        // Subscribe acks and pongs carry no topic.
        let Some(topic) = v.get("topic").and_then(|t| t.as_str()) else {
            return;
        };
        let exchange_ts_ns = v
            .get("ts")
            .and_then(|t| t.as_u64())
            .map(|ms| ms * 1_000_000)
            .unwrap_or(0);

        if topic.starts_with("orderbook.") {
            self.handle_book(&v, recv_ns, exchange_ts_ns);
        } else if topic.starts_with("publicTrade.") {
            self.handle_trades(&v, exchange_ts_ns);
        }
    }

    fn handle_book(&self, v: &Value, recv_ns: u64, exchange_ts_ns: u64) {
        let Some(data) = v.get("data") else {
            return;
        };
        let Some(symbol) = data.get("s").and_then(|s| s.as_str()) else {
            return;
        };

        let Some(mut ev) = self.pool.acquire() else {
            if self.pool.note_exhausted() {
                tracing::warn!("Bybit book pool exhausted, dropping frames");
            }
            return;
        };

        let sid = resolve_symbol_id(&self.cfg, &self.registry, symbol);
        ev.symbol = sid;
        ev.kind = if v.get("type").and_then(|t| t.as_str()) == Some("delta") {
            BookUpdateType::Delta
        } else {
            BookUpdateType::Snapshot
        };
        ev.recv_ns = recv_ns;
        ev.exchange_ts_ns = exchange_ts_ns;
        if let Some(info) = self.registry.get_info(sid) {
            ev.instrument = info.instrument;
            ev.strike = info.strike;
            ev.expiry_ms = info.expiry_ms;
            ev.option_type = info.option_type;
        }

        parse_levels(data.get("b"), &mut ev.bids);
        parse_levels(data.get("a"), &mut ev.asks);

        if ev.bids.is_empty() && ev.asks.is_empty() {
            return;
        }
        ev.publish_ns = now_ns_monotonic();
        self.book_bus.publish(ev);
    }

    fn handle_trades(&self, v: &Value, frame_ts_ns: u64) {
        let Some(items) = v.get("data").and_then(|d| d.as_array()) else {
            return;
        };
        for t in items {
            let Some(symbol) = t.get("s").and_then(|s| s.as_str()) else {
                continue;
            };
            let price = t
                .get("p")
                .and_then(|p| p.as_str())
                .and_then(|s| Price::from_decimal_str(s).ok());
            let qty = t
                .get("v")
                .and_then(|q| q.as_str())
                .and_then(|s| Quantity::from_decimal_str(s).ok());
            let (Some(price), Some(qty)) = (price, qty) else {
                tracing::warn!(trade = %t, "unparseable Bybit trade, skipping");
                continue;
            };

            let sid = resolve_symbol_id(&self.cfg, &self.registry, symbol);
            let instrument = self
                .registry
                .get_info(sid)
                .map(|i| i.instrument)
                .unwrap_or_default();

            self.trade_bus.publish(TradeEvent {
                symbol: sid,
                price,
                quantity: qty,
                is_buy: t.get("S").and_then(|s| s.as_str()) == Some("Buy"),
                exchange_ts_ns: t
                    .get("T")
                    .and_then(|ts| ts.as_u64())
                    .map(|ms| ms * 1_000_000)
                    .unwrap_or(frame_ts_ns),
                instrument,
            });
        }
    }
}

#[async_trait]
impl WsHandler for BybitDecoder {
    async fn on_open(&mut self, sender: &WsSender) {
        let mut args = Vec::with_capacity(self.cfg.symbols.len() * 2);
        for s in &self.cfg.symbols {
            args.push(format!("\"orderbook.{}.{}\"", s.depth, s.name));
            args.push(format!("\"publicTrade.{}\"", s.name));
        }
        let frame = format!("{{\"op\":\"subscribe\",\"args\":[{}]}}", args.join(","));
        tracing::info!(topics = args.len(), "Bybit connected, subscribing");
        if let Err(e) = sender.send_text(frame).await {
            tracing::warn!(error = %e, "Bybit subscribe send failed");
        }
    }

    async fn on_message(&mut self, payload: &str) {
        self.handle_message(payload);
    }

    async fn on_close(&mut self, code: Option<u16>, reason: &str) {
        tracing::info!(?code, reason, "Bybit websocket closed");
    }
}

fn map_order_status(status: &str) -> OrderEventStatus {
    match status {
        "PartiallyFilled" => OrderEventStatus::PartiallyFilled,
        "Filled" => OrderEventStatus::Filled,
        "Cancelled" | "PartiallyFilledCanceled" => OrderEventStatus::Canceled,
        "Rejected" => OrderEventStatus::Rejected,
        "Deactivated" | "Expired" => OrderEventStatus::Expired,
        _ => OrderEventStatus::Submitted,
    }
}

#[derive(Clone)]
pub(crate) struct BybitPrivateDecoder {
    cfg: Arc<BybitConfig>,
    registry: Arc<SymbolRegistry>,
    order_bus: Arc<OrderEventBus>,
}

impl BybitPrivateDecoder {
    pub(crate) fn handle_message(&self, payload: &str) {
        let v: Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "Bybit private json parse error");
                return;
            }
        };

        if v.get("op").and_then(|o| o.as_str()) == Some("auth") {
            let ok = v.get("success").and_then(|s| s.as_bool()).unwrap_or(false);
            if ok {
                tracing::info!("Bybit private stream authenticated");
            } else {
                tracing::error!(frame = %v, "Bybit private auth failed");
            }
            return;
        }

        if v.get("topic").and_then(|t| t.as_str()) != Some("order") {
            return;
        }
        let Some(items) = v.get("data").and_then(|d| d.as_array()) else {
            return;
        };

        for d in items {
            let Some(symbol) = d.get("symbol").and_then(|s| s.as_str()) else {
                continue;
            };
            let id = d
                .get("orderLinkId")
                .and_then(|c| c.as_str())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(0);
            let price = d
                .get("price")
                .and_then(|p| p.as_str())
                .and_then(|s| Price::from_decimal_str(s).ok())
                .unwrap_or(Price::ZERO);
            let qty = d
                .get("qty")
                .and_then(|q| q.as_str())
                .and_then(|s| Quantity::from_decimal_str(s).ok())
                .unwrap_or(Quantity::ZERO);
            let filled = d
                .get("cumExecQty")
                .and_then(|q| q.as_str())
                .and_then(|s| Quantity::from_decimal_str(s).ok())
                .unwrap_or(Quantity::ZERO);
            let side = if d.get("side").and_then(|s| s.as_str()) == Some("Buy") {
                Side::Buy
            } else {
                Side::Sell
            };
            let status = d
                .get("orderStatus")
                .and_then(|s| s.as_str())
                .map(map_order_status)
                .unwrap_or(OrderEventStatus::Submitted);

            let sid = resolve_symbol_id(&self.cfg, &self.registry, symbol);
            self.order_bus.publish(OrderEvent {
                order: Order::new(id, sid, side, price, qty),
                filled_qty: filled,
                status,
            });
        }
    }
}

#[async_trait]
impl WsHandler for BybitPrivateDecoder {
    async fn on_open(&mut self, sender: &WsSender) {
        let expires = now_ms() + 10_000;
        let sig = rest::sign_ws_auth(&self.cfg.api_secret, expires);
        let auth = format!(
            "{{\"op\":\"auth\",\"args\":[\"{}\",{},\"{}\"]}}",
            self.cfg.api_key, expires, sig
        );
        if let Err(e) = sender.send_text(auth).await {
            tracing::warn!(error = %e, "Bybit private auth send failed");
            return;
        }
        let sub = "{\"op\":\"subscribe\",\"args\":[\"order\"]}".to_string();
        if let Err(e) = sender.send_text(sub).await {
            tracing::warn!(error = %e, "Bybit private subscribe send failed");
        }
    }

    async fn on_message(&mut self, payload: &str) {
        self.handle_message(payload);
    }

    async fn on_close(&mut self, code: Option<u16>, reason: &str) {
        tracing::info!(?code, reason, "Bybit private websocket closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::bybit::BybitSymbolConfig;
    use crate::symbols::InstrumentType;

    fn decoder() -> (BybitDecoder, Arc<BookUpdateBus>, Arc<TradeBus>, Arc<SymbolRegistry>) {
        let registry = SymbolRegistry::new_shared();
        let book_bus = EventBus::new_shared(64);
        let trade_bus = EventBus::new_shared(64);
        let cfg = Arc::new(BybitConfig {
            public_endpoint: "wss://example".to_string(),
            private_endpoint: String::new(),
            symbols: vec![BybitSymbolConfig {
                name: "BTCUSDT".to_string(),
                instrument: InstrumentType::Future,
                depth: 50,
            }],
            reconnect_delay_ms: 100,
            api_key: String::new(),
            api_secret: String::new(),
            enable_private: false,
        });
        let dec = BybitDecoder {
            cfg,
            registry: Arc::clone(&registry),
            book_bus: Arc::clone(&book_bus),
            trade_bus: Arc::clone(&trade_bus),
            pool: Arc::new(BookEventPool::new(8)),
        };
        (dec, book_bus, trade_bus, registry)
    }

    #[test]
    fn decodes_book_delta() {
        let (dec, book_bus, _, registry) = decoder();
        dec.handle_message(
            r#"{"topic":"orderbook.50.BTCUSDT","type":"delta","data":{"s":"BTCUSDT","b":[["65000.5","0.01"]],"a":[]}}"#,
        );

        let ev = book_bus.try_pop().expect("one book event");
        assert!(book_bus.try_pop().is_none());
        assert_eq!(ev.kind, BookUpdateType::Delta);
        assert_eq!(
            ev.bids,
            vec![(Price::from_double(65000.5), Quantity::from_double(0.01))]
        );
        assert!(ev.asks.is_empty());
        assert_eq!(Some(ev.symbol), registry.get_id("bybit", "BTCUSDT"));
        assert_eq!(ev.instrument, InstrumentType::Future);
    }

    #[test]
    fn snapshot_type_and_timestamps() {
        let (dec, book_bus, _, _) = decoder();
        dec.handle_message(
            r#"{"topic":"orderbook.50.BTCUSDT","type":"snapshot","ts":1700000000000,"data":{"s":"BTCUSDT","b":[["1","2"]],"a":[["3","4"]]}}"#,
        );
        let ev = book_bus.try_pop().unwrap();
        assert_eq!(ev.kind, BookUpdateType::Snapshot);
        assert_eq!(ev.exchange_ts_ns, 1_700_000_000_000_000_000);
        assert!(ev.publish_ns >= ev.recv_ns);
    }

    #[test]
    fn empty_book_not_published() {
        let (dec, book_bus, _, _) = decoder();
        dec.handle_message(
            r#"{"topic":"orderbook.50.BTCUSDT","type":"delta","data":{"s":"BTCUSDT","b":[],"a":[]}}"#,
        );
        assert!(book_bus.try_pop().is_none());
    }

    #[test]
    fn bad_level_skipped_not_frame() {
        let (dec, book_bus, _, _) = decoder();
        dec.handle_message(
            r#"{"topic":"orderbook.50.BTCUSDT","type":"delta","data":{"s":"BTCUSDT","b":[["oops","1"],["2","3"]],"a":[]}}"#,
        );
        let ev = book_bus.try_pop().unwrap();
        assert_eq!(ev.bids.len(), 1);
        assert_eq!(ev.bids[0].0, Price::from_double(2.0));
    }

    #[test]
    fn decodes_trades() {
        let (dec, _, trade_bus, registry) = decoder();
        dec.handle_message(
            r#"{"topic":"publicTrade.BTCUSDT","data":[{"s":"BTCUSDT","p":"65001","v":"0.5","S":"Buy","T":1700000000123},{"s":"BTCUSDT","p":"65002","v":"0.25","S":"Sell","T":1700000000124}]}"#,
        );
        let first = trade_bus.try_pop().unwrap();
        let second = trade_bus.try_pop().unwrap();
        assert!(trade_bus.try_pop().is_none());
        assert!(first.is_buy);
        assert!(!second.is_buy);
        assert_eq!(first.price, Price::from_double(65001.0));
        assert_eq!(first.exchange_ts_ns, 1_700_000_000_123_000_000);
        assert_eq!(Some(first.symbol), registry.get_id("bybit", "BTCUSDT"));
    }

    #[test]
    fn ignores_acks_and_garbage() {
        let (dec, book_bus, trade_bus, _) = decoder();
        dec.handle_message(r#"{"success":true,"op":"subscribe"}"#);
        dec.handle_message("not json at all");
        assert!(book_bus.try_pop().is_none());
        assert!(trade_bus.try_pop().is_none());
    }

    #[test]
    fn registers_unknown_option_symbol() {
        let (dec, book_bus, _, registry) = decoder();
        dec.handle_message(
            r#"{"topic":"orderbook.25.BTC-30AUG24-50000-C","type":"snapshot","data":{"s":"BTC-30AUG24-50000-C","b":[["100","1"]],"a":[]}}"#,
        );
        let ev = book_bus.try_pop().unwrap();
        assert_eq!(ev.instrument, InstrumentType::Option);
        let info = registry.get_info(ev.symbol).unwrap();
        assert_eq!(info.strike, Some(Price::from_double(50000.0)));
    }

    #[test]
    fn private_order_events() {
        let registry = SymbolRegistry::new_shared();
        let order_bus: Arc<OrderEventBus> = EventBus::new_shared(16);
        let dec = BybitPrivateDecoder {
            cfg: Arc::new(BybitConfig {
                public_endpoint: "wss://example".to_string(),
                private_endpoint: "wss://example".to_string(),
                symbols: Vec::new(),
                reconnect_delay_ms: 100,
                api_key: "k".to_string(),
                api_secret: "s".to_string(),
                enable_private: true,
            }),
            registry,
            order_bus: Arc::clone(&order_bus),
        };

        dec.handle_message(
            r#"{"topic":"order","data":[{"symbol":"BTCUSDT","orderLinkId":"42","side":"Buy","price":"65000","qty":"1","cumExecQty":"0.4","orderStatus":"PartiallyFilled"}]}"#,
        );
        let ev = order_bus.try_pop().unwrap();
        assert_eq!(ev.order.id, 42);
        assert_eq!(ev.status, OrderEventStatus::PartiallyFilled);
        assert_eq!(ev.filled_qty, Quantity::from_double(0.4));
        assert_eq!(ev.order.side, Side::Buy);
    }

    #[test]
    fn order_status_mapping() {
        assert_eq!(map_order_status("New"), OrderEventStatus::Submitted);
        assert_eq!(map_order_status("Filled"), OrderEventStatus::Filled);
        assert_eq!(map_order_status("Cancelled"), OrderEventStatus::Canceled);
        assert_eq!(map_order_status("Rejected"), OrderEventStatus::Rejected);
        assert_eq!(map_order_status("Deactivated"), OrderEventStatus::Expired);
    }
}
