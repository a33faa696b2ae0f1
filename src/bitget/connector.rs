//! Bitget websocket market data and private orders stream.

use crate::bitget::{
    book_channel, inst_type, rest, BitgetConfig, BITGET_EXCHANGE_ID, BITGET_ORIGIN,
    BITGET_USER_AGENT, PING_INTERVAL_SECS, SUBSCRIBE_BATCH_SIZE,
};
use crate::bus::{BookUpdateBus, OrderEventBus, TradeBus};
use crate::connector::ExchangeConnector;
use crate::events::{BookEventPool, BookUpdateType, OrderEvent, OrderEventStatus, TradeEvent};
use crate::net::ws::{PingPolicy, WsClient, WsConfig, WsHandler, WsSender};
use crate::num::{Price, Quantity};
use crate::orders::{Order, Side};
use crate::symbols::{SymbolId, SymbolInfo, SymbolRegistry};
use crate::utils::{chunk_vec, now_ns_monotonic};
use crate::DynError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const SUBSCRIBE_BATCH_DELAY_MS: u64 = 50;

fn ws_config(cfg: &BitgetConfig, url: String) -> WsConfig {
    WsConfig {
        url,
        origin: BITGET_ORIGIN.to_string(),
        reconnect_delay_ms: cfg.reconnect_delay_ms,
        ping: PingPolicy::Text {
            payload: "ping".to_string(),
            interval: Duration::from_secs(PING_INTERVAL_SECS),
            initial_delay: Duration::from_secs(5),
        },
        headers: vec![("User-Agent".to_string(), BITGET_USER_AGENT.to_string())],
    }
}

pub struct BitgetConnector {
    decoder: BitgetDecoder,
    public_ws: WsClient,
    private_ws: Option<WsClient>,
    private_decoder: Option<BitgetPrivateDecoder>,
    started: AtomicBool,
}

impl BitgetConnector {
    pub fn new(
        cfg: BitgetConfig,
        registry: Arc<SymbolRegistry>,
        book_bus: Arc<BookUpdateBus>,
        trade_bus: Arc<TradeBus>,
        order_bus: Arc<OrderEventBus>,
    ) -> Self {
        let cfg = Arc::new(cfg);

        let decoder = BitgetDecoder {
            cfg: Arc::clone(&cfg),
            registry: Arc::clone(&registry),
            book_bus,
            trade_bus,
            pool: Arc::new(BookEventPool::with_default_capacity()),
        };

        let public_ws = WsClient::new(ws_config(&cfg, cfg.public_endpoint.clone()));

        let (private_ws, private_decoder) = if cfg.enable_private {
            let ws = WsClient::new(ws_config(&cfg, cfg.private_endpoint.clone()));
            let dec = BitgetPrivateDecoder {
                cfg: Arc::clone(&cfg),
                registry,
                order_bus,
                sender: None,
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
impl ExchangeConnector for BitgetConnector {
    fn exchange_id(&self) -> &'static str {
        BITGET_EXCHANGE_ID
    }

    async fn start(&self) -> Result<(), DynError> {
        if let Err(e) = self.decoder.cfg.validate() {
            tracing::error!(error = %e, "invalid Bitget config");
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

fn resolve_symbol_id(cfg: &BitgetConfig, registry: &SymbolRegistry, symbol: &str) -> SymbolId {
    if let Some(id) = registry.get_id(BITGET_EXCHANGE_ID, symbol) {
        return id;
    }
    let instrument = cfg
        .symbols
        .iter()
        .find(|s| s.name == symbol)
        .map(|s| s.instrument)
        .unwrap_or_default();
    registry.register(SymbolInfo::new(BITGET_EXCHANGE_ID, symbol, instrument))
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
            None => tracing::warn!(level = %level, "unparseable book level, skipping"),
        }
    }
}

#[derive(Clone)]
pub(crate) struct BitgetDecoder {
    pub(crate) cfg: Arc<BitgetConfig>,
    registry: Arc<SymbolRegistry>,
    book_bus: Arc<BookUpdateBus>,
    trade_bus: Arc<TradeBus>,
    pool: Arc<BookEventPool>,
}

impl BitgetDecoder {
    pub(crate) fn handle_message(&self, payload: &str) {
        // App-level heartbeat reply.
        if payload == "pong" {
            return;
        }
        let recv_ns = now_ns_monotonic();

        let v: Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "Bitget json parse error");
                return;
            }
        };

        // Subscribe/err acks carry an "event" field and no data.
        if v.get("data").is_none() {
            if v.get("event").and_then(|e| e.as_str()) == Some("error") {
                tracing::warn!(frame = %v, "Bitget error frame");
            }
            return;
        }

        let Some(arg) = v.get("arg") else {
            return;
        };
        let Some(channel) = arg.get("channel").and_then(|c| c.as_str()) else {
            return;
        };
        let Some(inst_id) = arg.get("instId").and_then(|i| i.as_str()) else {
            return;
        };

        let exchange_ts_ns = v
            .get("ts")
            .and_then(|t| {
                t.as_u64()
                    .or_else(|| t.as_str().and_then(|s| s.parse::<u64>().ok()))
            })
            .map(|ms| ms * 1_000_000)
            .unwrap_or(0);

        if channel.starts_with("books") {
            self.handle_book(&v, inst_id, recv_ns, exchange_ts_ns);
        } else if channel == "trade" {
            self.handle_trades(&v, inst_id, exchange_ts_ns);
        }
    }

    fn handle_book(&self, v: &Value, inst_id: &str, recv_ns: u64, exchange_ts_ns: u64) {
        let Some(data) = v.get("data").and_then(|d| d.as_array()) else {
            return;
        };

        let Some(mut ev) = self.pool.acquire() else {
            if self.pool.note_exhausted() {
                tracing::warn!("Bitget book pool exhausted, dropping frames");
            }
            return;
        };

        let sid = resolve_symbol_id(&self.cfg, &self.registry, inst_id);
        ev.symbol = sid;
        ev.kind = if v.get("action").and_then(|a| a.as_str()) == Some("update") {
            BookUpdateType::Delta
        } else {
            BookUpdateType::Snapshot
        };
        ev.recv_ns = recv_ns;
        ev.exchange_ts_ns = exchange_ts_ns;
        if let Some(info) = self.registry.get_info(sid) {
            ev.instrument = info.instrument;
        }

        for d in data {
            parse_levels(d.get("bids"), &mut ev.bids);
            parse_levels(d.get("asks"), &mut ev.asks);
        }

        if ev.bids.is_empty() && ev.asks.is_empty() {
            return;
        }
        ev.publish_ns = now_ns_monotonic();
        self.book_bus.publish(ev);
    }

    fn handle_trades(&self, v: &Value, inst_id: &str, frame_ts_ns: u64) {
        let Some(data) = v.get("data").and_then(|d| d.as_array()) else {
            return;
        };

        let sid = resolve_symbol_id(&self.cfg, &self.registry, inst_id);
        let instrument = self
            .registry
            .get_info(sid)
            .map(|i| i.instrument)
            .unwrap_or_default();

        for row in data {
            // Rows arrive either positional [ts, price, size, side] or as
            // {"ts","price","size","side"} objects.
            let (ts, price, size, side) = if let Some(a) = row.as_array() {
                if a.len() < 4 {
                    continue;
                }
                (a[0].as_str(), a[1].as_str(), a[2].as_str(), a[3].as_str())
            } else {
                (
                    row.get("ts").and_then(|x| x.as_str()),
                    row.get("price").and_then(|x| x.as_str()),
                    row.get("size").and_then(|x| x.as_str()),
                    row.get("side").and_then(|x| x.as_str()),
                )
            };

            let price = price.and_then(|s| Price::from_decimal_str(s).ok());
            let size = size.and_then(|s| Quantity::from_decimal_str(s).ok());
            let (Some(price), Some(quantity)) = (price, size) else {
                tracing::warn!(trade = %row, "unparseable Bitget trade, skipping");
                continue;
            };

            self.trade_bus.publish(TradeEvent {
                symbol: sid,
                price,
                quantity,
                is_buy: matches!(side, Some("buy") | Some("BUY") | Some("Buy")),
                exchange_ts_ns: ts
                    .and_then(|s| s.parse::<u64>().ok())
                    .map(|ms| ms * 1_000_000)
                    .unwrap_or(frame_ts_ns),
                instrument,
            });
        }
    }
}

#[async_trait]
impl WsHandler for BitgetDecoder {
    async fn on_open(&mut self, sender: &WsSender) {
        tracing::info!(symbols = self.cfg.symbols.len(), "Bitget connected, subscribing");
        let batches = chunk_vec(&self.cfg.symbols, SUBSCRIBE_BATCH_SIZE);
        let total = batches.len();
        for (i, batch) in batches.into_iter().enumerate() {
            let mut args = Vec::with_capacity(batch.len() * 2);
            for s in &batch {
                let itype = inst_type(s.instrument);
                args.push(format!(
                    "{{\"instType\":\"{}\",\"channel\":\"{}\",\"instId\":\"{}\"}}",
                    itype,
                    book_channel(s.depth),
                    s.name
                ));
                args.push(format!(
                    "{{\"instType\":\"{}\",\"channel\":\"trade\",\"instId\":\"{}\"}}",
                    itype, s.name
                ));
            }
            let frame = format!("{{\"op\":\"subscribe\",\"args\":[{}]}}", args.join(","));
            if let Err(e) = sender.send_text(frame).await {
                tracing::warn!(error = %e, "Bitget subscribe send failed");
                return;
            }
            if i + 1 < total {
                tokio::time::sleep(Duration::from_millis(SUBSCRIBE_BATCH_DELAY_MS)).await;
            }
        }
    }

    async fn on_message(&mut self, payload: &str) {
        self.handle_message(payload);
    }

    async fn on_close(&mut self, code: Option<u16>, reason: &str) {
        tracing::info!(?code, reason, "Bitget websocket closed");
    }
}

fn map_order_status(status: &str) -> OrderEventStatus {
    match status {
        "partially_filled" | "partial-fill" => OrderEventStatus::PartiallyFilled,
        "filled" | "full-fill" => OrderEventStatus::Filled,
        "canceled" | "cancelled" => OrderEventStatus::Canceled,
        "rejected" => OrderEventStatus::Rejected,
        "expired" => OrderEventStatus::Expired,
        _ => OrderEventStatus::Submitted,
    }
}

#[derive(Clone)]
pub(crate) struct BitgetPrivateDecoder {
    cfg: Arc<BitgetConfig>,
    registry: Arc<SymbolRegistry>,
    order_bus: Arc<OrderEventBus>,
    sender: Option<WsSender>,
}

impl BitgetPrivateDecoder {
    async fn subscribe_orders(&self) {
        let Some(sender) = &self.sender else {
            return;
        };
        let frame = format!(
            "{{\"op\":\"subscribe\",\"args\":[{{\"instType\":\"{}\",\"channel\":\"orders\",\"instId\":\"default\"}}]}}",
            inst_type(crate::symbols::InstrumentType::Future)
        );
        if let Err(e) = sender.send_text(frame).await {
            tracing::warn!(error = %e, "Bitget orders subscribe send failed");
        }
    }

    pub(crate) fn decode_orders(&self, v: &Value) {
        let Some(items) = v.get("data").and_then(|d| d.as_array()) else {
            return;
        };
        for d in items {
            let Some(inst_id) = d.get("instId").and_then(|i| i.as_str()) else {
                continue;
            };
            let id = d
                .get("clientOid")
                .and_then(|c| c.as_str())
                .and_then(|s| s.parse::<u64>().ok())
                .or_else(|| {
                    d.get("orderId")
                        .and_then(|o| o.as_str())
                        .and_then(|s| s.parse::<u64>().ok())
                })
                .unwrap_or(0);
            let side = if d.get("side").and_then(|s| s.as_str()) == Some("buy") {
                Side::Buy
            } else {
                Side::Sell
            };
            let price = d
                .get("price")
                .and_then(|p| p.as_str())
                .and_then(|s| Price::from_decimal_str(s).ok())
                .unwrap_or(Price::ZERO);
            let qty = d
                .get("size")
                .and_then(|q| q.as_str())
                .and_then(|s| Quantity::from_decimal_str(s).ok())
                .unwrap_or(Quantity::ZERO);
            let filled = d
                .get("accBaseVolume")
                .and_then(|q| q.as_str())
                .and_then(|s| Quantity::from_decimal_str(s).ok())
                .unwrap_or(Quantity::ZERO);
            let status = d
                .get("status")
                .and_then(|s| s.as_str())
                .map(map_order_status)
                .unwrap_or(OrderEventStatus::Submitted);

            let sid = resolve_symbol_id(&self.cfg, &self.registry, inst_id);
            self.order_bus.publish(OrderEvent {
                order: Order::new(id, sid, side, price, qty),
                filled_qty: filled,
                status,
            });
        }
    }
}

#[async_trait]
impl WsHandler for BitgetPrivateDecoder {
    async fn on_open(&mut self, sender: &WsSender) {
        self.sender = Some(sender.clone());
        let login = rest::login_payload(&self.cfg.api_key, &self.cfg.api_secret, &self.cfg.passphrase);
        if let Err(e) = sender.send_text(login).await {
            tracing::warn!(error = %e, "Bitget login send failed");
        }
    }

    async fn on_message(&mut self, payload: &str) {
        if payload == "pong" {
            return;
        }
        let v: Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "Bitget private json parse error");
                return;
            }
        };

        if v.get("event").and_then(|e| e.as_str()) == Some("login") {
            let code = v
                .get("code")
                .and_then(|c| c.as_str().map(str::to_string).or_else(|| c.as_i64().map(|n| n.to_string())))
                .unwrap_or_default();
            if code == "0" {
                tracing::info!("Bitget private stream authenticated");
                self.subscribe_orders().await;
            } else {
                tracing::error!(frame = %v, "Bitget login failed");
            }
            return;
        }

        if v.get("arg")
            .and_then(|a| a.get("channel"))
            .and_then(|c| c.as_str())
            == Some("orders")
        {
            self.decode_orders(&v);
        }
    }

    async fn on_close(&mut self, code: Option<u16>, reason: &str) {
        tracing::info!(?code, reason, "Bitget private websocket closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitget::BitgetSymbolConfig;
    use crate::bus::EventBus;
    use crate::symbols::InstrumentType;

    fn decoder() -> (BitgetDecoder, Arc<BookUpdateBus>, Arc<TradeBus>, Arc<SymbolRegistry>) {
        let registry = SymbolRegistry::new_shared();
        let book_bus = EventBus::new_shared(64);
        let trade_bus = EventBus::new_shared(64);
        let cfg: BitgetConfig = serde_json::from_str(
            r#"{"symbols":[{"name":"BTCUSDT","type":"future","depth":15}]}"#,
        )
        .unwrap();
        let dec = BitgetDecoder {
            cfg: Arc::new(cfg),
            registry: Arc::clone(&registry),
            book_bus: Arc::clone(&book_bus),
            trade_bus: Arc::clone(&trade_bus),
            pool: Arc::new(BookEventPool::new(8)),
        };
        (dec, book_bus, trade_bus, registry)
    }

    #[test]
    fn pong_dropped_silently() {
        let (dec, book_bus, trade_bus, _) = decoder();
        dec.handle_message("pong");
        assert!(book_bus.try_pop().is_none());
        assert!(trade_bus.try_pop().is_none());
    }

    #[test]
    fn decodes_book_snapshot_and_update() {
        let (dec, book_bus, _, registry) = decoder();
        dec.handle_message(
            r#"{"action":"snapshot","arg":{"instType":"USDT-FUTURES","channel":"books15","instId":"BTCUSDT"},"data":[{"bids":[["65000.5","0.01"]],"asks":[["65001","0.5"]]}],"ts":1700000000000}"#,
        );
        let ev = book_bus.try_pop().unwrap();
        assert_eq!(ev.kind, BookUpdateType::Snapshot);
        assert_eq!(ev.bids, vec![(Price::from_double(65000.5), Quantity::from_double(0.01))]);
        assert_eq!(ev.exchange_ts_ns, 1_700_000_000_000_000_000);
        assert_eq!(Some(ev.symbol), registry.get_id("bitget", "BTCUSDT"));
        assert_eq!(ev.instrument, InstrumentType::Future);

        dec.handle_message(
            r#"{"action":"update","arg":{"instType":"USDT-FUTURES","channel":"books15","instId":"BTCUSDT"},"data":[{"bids":[["64999","1"]],"asks":[]}],"ts":"1700000000001"}"#,
        );
        let ev = book_bus.try_pop().unwrap();
        assert_eq!(ev.kind, BookUpdateType::Delta);
        assert_eq!(ev.exchange_ts_ns, 1_700_000_000_001_000_000);
    }

    #[test]
    fn empty_book_not_published() {
        let (dec, book_bus, _, _) = decoder();
        dec.handle_message(
            r#"{"action":"update","arg":{"channel":"books15","instId":"BTCUSDT"},"data":[{"bids":[],"asks":[]}]}"#,
        );
        assert!(book_bus.try_pop().is_none());
    }

    #[test]
    fn decodes_positional_trade_rows() {
        let (dec, _, trade_bus, _) = decoder();
        dec.handle_message(
            r#"{"action":"update","arg":{"channel":"trade","instId":"BTCUSDT"},"data":[["1700000000123","65001","0.5","buy"],["1700000000124","65002","0.2","sell"]]}"#,
        );
        let first = trade_bus.try_pop().unwrap();
        let second = trade_bus.try_pop().unwrap();
        assert!(first.is_buy);
        assert!(!second.is_buy);
        assert_eq!(first.exchange_ts_ns, 1_700_000_000_123_000_000);
        assert_eq!(first.price, Price::from_double(65001.0));
    }

    #[test]
    fn decodes_object_trade_rows() {
        let (dec, _, trade_bus, _) = decoder();
        dec.handle_message(
            r#"{"action":"update","arg":{"channel":"trade","instId":"BTCUSDT"},"data":[{"ts":"1700000000500","price":"65010","size":"0.1","side":"buy"}]}"#,
        );
        let ev = trade_bus.try_pop().unwrap();
        assert!(ev.is_buy);
        assert_eq!(ev.quantity, Quantity::from_double(0.1));
        assert_eq!(ev.exchange_ts_ns, 1_700_000_000_500_000_000);
    }

    #[test]
    fn subscribe_acks_ignored() {
        let (dec, book_bus, trade_bus, _) = decoder();
        dec.handle_message(r#"{"event":"subscribe","arg":{"channel":"books15","instId":"BTCUSDT"}}"#);
        assert!(book_bus.try_pop().is_none());
        assert!(trade_bus.try_pop().is_none());
    }

    #[test]
    fn private_orders_decoded() {
        let registry = SymbolRegistry::new_shared();
        let order_bus: Arc<OrderEventBus> = EventBus::new_shared(16);
        let dec = BitgetPrivateDecoder {
            cfg: Arc::new(
                serde_json::from_str::<BitgetConfig>(
                    r#"{"api_key":"k","api_secret":"s","passphrase":"p","enable_private":true}"#,
                )
                .unwrap(),
            ),
            registry,
            order_bus: Arc::clone(&order_bus),
            sender: None,
        };

        let v: Value = serde_json::from_str(
            r#"{"arg":{"channel":"orders","instType":"USDT-FUTURES"},"data":[{"instId":"BTCUSDT","clientOid":"42","orderId":"123456789","side":"buy","price":"65000","size":"1","accBaseVolume":"1","status":"filled"}]}"#,
        )
        .unwrap();
        dec.decode_orders(&v);

        let ev = order_bus.try_pop().unwrap();
        assert_eq!(ev.order.id, 42);
        assert_eq!(ev.status, OrderEventStatus::Filled);
        assert_eq!(ev.filled_qty, Quantity::from_double(1.0));
    }

    #[test]
    fn config_symbol_batching() {
        let symbols: Vec<BitgetSymbolConfig> = (0..23)
            .map(|i| BitgetSymbolConfig {
                name: format!("S{}USDT", i),
                instrument: InstrumentType::Future,
                depth: 15,
            })
            .collect();
        let batches = chunk_vec(&symbols, SUBSCRIBE_BATCH_SIZE);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 10);
        assert_eq!(batches[2].len(), 3);
    }
}
