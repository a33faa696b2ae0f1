//! Hyperliquid websocket market data: l2Book snapshots and trades.

use crate::bus::{BookUpdateBus, TradeBus};
use crate::connector::ExchangeConnector;
use crate::events::{BookEventPool, BookUpdateType, TradeEvent};
use crate::hyperliquid::{
    HyperliquidConfig, HYPERLIQUID_EXCHANGE_ID, HYPERLIQUID_ORIGIN, PING_INTERVAL_SECS,
    SUBSCRIBE_BATCH_COINS, SUBSCRIBE_BATCH_DELAY_MS,
};
use crate::net::ws::{PingPolicy, WsClient, WsConfig, WsHandler, WsSender};
use crate::num::{Price, Quantity};
use crate::symbols::{InstrumentType, SymbolId, SymbolInfo, SymbolRegistry};
use crate::utils::{chunk_vec, now_ns_monotonic};
use crate::DynError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct HyperliquidConnector {
    decoder: HyperliquidDecoder,
    ws: WsClient,
    started: AtomicBool,
}

impl HyperliquidConnector {
    pub fn new(
        cfg: HyperliquidConfig,
        registry: Arc<SymbolRegistry>,
        book_bus: Arc<BookUpdateBus>,
        trade_bus: Arc<TradeBus>,
    ) -> Self {
        let cfg = Arc::new(cfg);

        let ws = WsClient::new(WsConfig {
            url: cfg.ws_endpoint.clone(),
            origin: HYPERLIQUID_ORIGIN.to_string(),
            reconnect_delay_ms: cfg.reconnect_delay_ms,
            ping: PingPolicy::Text {
                payload: "{\"method\":\"ping\"}".to_string(),
                interval: Duration::from_secs(PING_INTERVAL_SECS),
                initial_delay: Duration::from_secs(5),
            },
            headers: Vec::new(),
        });

        let decoder = HyperliquidDecoder {
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
impl ExchangeConnector for HyperliquidConnector {
    fn exchange_id(&self) -> &'static str {
        HYPERLIQUID_EXCHANGE_ID
    }

    async fn start(&self) -> Result<(), DynError> {
        if let Err(e) = self.decoder.cfg.validate() {
            tracing::error!(error = %e, "invalid Hyperliquid config");
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

fn resolve_symbol_id(registry: &SymbolRegistry, coin: &str) -> SymbolId {
    if let Some(id) = registry.get_id(HYPERLIQUID_EXCHANGE_ID, coin) {
        return id;
    }
    registry.register(SymbolInfo::new(
        HYPERLIQUID_EXCHANGE_ID,
        coin,
        InstrumentType::Future,
    ))
}

fn parse_levels(value: Option<&Value>, out: &mut Vec<(Price, Quantity)>) {
    let Some(levels) = value.and_then(|v| v.as_array()) else {
        return;
    };
    for level in levels {
        let parsed = (|| {
            let px = level.get("px")?.as_str()?;
            let sz = level.get("sz")?.as_str()?;
            Some((
                Price::from_decimal_str(px).ok()?,
                Quantity::from_decimal_str(sz).ok()?,
            ))
        })();
        match parsed {
            Some(entry) => out.push(entry),
            None => tracing::warn!(level = %level, "unparseable book level, skipping"),
        }
    }
}

#[derive(Clone)]
pub(crate) struct HyperliquidDecoder {
    pub(crate) cfg: Arc<HyperliquidConfig>,
    registry: Arc<SymbolRegistry>,
    book_bus: Arc<BookUpdateBus>,
    trade_bus: Arc<TradeBus>,
    pool: Arc<BookEventPool>,
}

impl HyperliquidDecoder {
    pub(crate) fn handle_message(&self, payload: &str) {
        let recv_ns = now_ns_monotonic();

        let v: Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "Hyperliquid json parse error");
                return;
            }
        };

        // Heartbeat echoes and subscribe acks.
        if v.get("method").and_then(|m| m.as_str()) == Some("ping") {
            return;
        }
        let Some(channel) = v.get("channel").and_then(|c| c.as_str()) else {
            return;
        };
        match channel {
            "pong" | "subscriptionResponse" => {}
            "l2Book" => self.handle_book(&v, recv_ns),
            "trades" => self.handle_trades(&v),
            _ => {}
        }
    }

    fn handle_book(&self, v: &Value, recv_ns: u64) {
        let Some(data) = v.get("data") else {
            return;
        };
        let Some(coin) = data.get("coin").and_then(|c| c.as_str()) else {
            return;
        };

        let Some(mut ev) = self.pool.acquire() else {
            if self.pool.note_exhausted() {
                tracing::warn!("Hyperliquid book pool exhausted, dropping frames");
            }
            return;
        };

        let sid = resolve_symbol_id(&self.registry, coin);
        ev.symbol = sid;
        // The venue resends the full book every update.
        ev.kind = BookUpdateType::Snapshot;
        ev.recv_ns = recv_ns;
        ev.exchange_ts_ns = data
            .get("time")
            .and_then(|t| t.as_u64())
            .map(|ms| ms * 1_000_000)
            .unwrap_or(0);
        if let Some(info) = self.registry.get_info(sid) {
            ev.instrument = info.instrument;
        }

        if let Some(levels) = data.get("levels").and_then(|l| l.as_array()) {
            parse_levels(levels.first(), &mut ev.bids);
            parse_levels(levels.get(1), &mut ev.asks);
        }

        if ev.bids.is_empty() && ev.asks.is_empty() {
            return;
        }
        ev.publish_ns = now_ns_monotonic();
        self.book_bus.publish(ev);
    }

    fn handle_trades(&self, v: &Value) {
        let Some(items) = v.get("data").and_then(|d| d.as_array()) else {
            return;
        };
        for t in items {
            let Some(coin) = t.get("coin").and_then(|c| c.as_str()) else {
                continue;
            };
            let price = t
                .get("px")
                .and_then(|p| p.as_str())
                .and_then(|s| Price::from_decimal_str(s).ok());
            let qty = t
                .get("sz")
                .and_then(|q| q.as_str())
                .and_then(|s| Quantity::from_decimal_str(s).ok());
            let (Some(price), Some(qty)) = (price, qty) else {
                tracing::warn!(trade = %t, "unparseable Hyperliquid trade, skipping");
                continue;
            };

            // TODO: confirm with the venue whether side is always "B"/"A"
            // or "buy"/"sell"; both appear in captures.
            let side = t.get("side").and_then(|s| s.as_str()).unwrap_or("");
            let is_buy = side == "B" || side == "buy";

            let sid = resolve_symbol_id(&self.registry, coin);
            let instrument = self
                .registry
                .get_info(sid)
                .map(|i| i.instrument)
                .unwrap_or(InstrumentType::Future);

            self.trade_bus.publish(TradeEvent {
                symbol: sid,
                price,
                quantity: qty,
                is_buy,
                exchange_ts_ns: t
                    .get("time")
                    .and_then(|ts| ts.as_u64())
                    .map(|ms| ms * 1_000_000)
                    .unwrap_or(0),
                instrument,
            });
        }
    }
}

#[async_trait]
impl WsHandler for HyperliquidDecoder {
    async fn on_open(&mut self, sender: &WsSender) {
        tracing::info!(coins = self.cfg.symbols.len(), "Hyperliquid connected, subscribing");
        // The venue drops sockets that fire too many subscribes at once.
        let batches = chunk_vec(&self.cfg.symbols, SUBSCRIBE_BATCH_COINS);
        let total = batches.len();
        for (i, batch) in batches.into_iter().enumerate() {
            for coin in &batch {
                for sub_type in ["l2Book", "trades"] {
                    let frame = format!(
                        "{{\"method\":\"subscribe\",\"subscription\":{{\"type\":\"{}\",\"coin\":\"{}\"}}}}",
                        sub_type, coin
                    );
                    if let Err(e) = sender.send_text(frame).await {
                        tracing::warn!(error = %e, "Hyperliquid subscribe send failed");
                        return;
                    }
                }
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
        tracing::info!(?code, reason, "Hyperliquid websocket closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;

    fn decoder() -> (
        HyperliquidDecoder,
        Arc<BookUpdateBus>,
        Arc<TradeBus>,
        Arc<SymbolRegistry>,
    ) {
        let registry = SymbolRegistry::new_shared();
        let book_bus = EventBus::new_shared(64);
        let trade_bus = EventBus::new_shared(64);
        let cfg: HyperliquidConfig =
            serde_json::from_str(r#"{"symbols":["BTC","ETH"]}"#).unwrap();
        let dec = HyperliquidDecoder {
            cfg: Arc::new(cfg),
            registry: Arc::clone(&registry),
            book_bus: Arc::clone(&book_bus),
            trade_bus: Arc::clone(&trade_bus),
            pool: Arc::new(BookEventPool::new(8)),
        };
        (dec, book_bus, trade_bus, registry)
    }

    #[test]
    fn decodes_l2_snapshot() {
        let (dec, book_bus, _, registry) = decoder();
        dec.handle_message(
            r#"{"channel":"l2Book","data":{"coin":"BTC","time":1700000000000,"levels":[[{"px":"43000.0","sz":"1.5"}],[{"px":"43001.0","sz":"2.0"}]]}}"#,
        );

        let ev = book_bus.try_pop().expect("one snapshot");
        assert!(book_bus.try_pop().is_none());
        assert_eq!(ev.kind, BookUpdateType::Snapshot);
        assert_eq!(
            ev.bids,
            vec![(Price::from_double(43000.0), Quantity::from_double(1.5))]
        );
        assert_eq!(
            ev.asks,
            vec![(Price::from_double(43001.0), Quantity::from_double(2.0))]
        );
        assert_eq!(ev.exchange_ts_ns, 1_700_000_000_000_000_000);
        assert_eq!(Some(ev.symbol), registry.get_id("hyperliquid", "BTC"));
        assert_eq!(ev.instrument, InstrumentType::Future);
    }

    #[test]
    fn trade_side_codes() {
        let (dec, _, trade_bus, _) = decoder();
        dec.handle_message(
            r#"{"channel":"trades","data":[{"coin":"BTC","px":"43000","sz":"1","side":"B","time":1700000000001},{"coin":"BTC","px":"43001","sz":"1","side":"buy","time":1700000000002},{"coin":"BTC","px":"43002","sz":"1","side":"A","time":1700000000003},{"coin":"BTC","px":"43003","sz":"1","side":"sell","time":1700000000004}]}"#,
        );
        let sides: Vec<bool> = std::iter::from_fn(|| trade_bus.try_pop())
            .map(|t| t.is_buy)
            .collect();
        assert_eq!(sides, vec![true, true, false, false]);
    }

    #[test]
    fn pong_and_acks_dropped() {
        let (dec, book_bus, trade_bus, _) = decoder();
        dec.handle_message(r#"{"channel":"pong"}"#);
        dec.handle_message(r#"{"method":"ping"}"#);
        dec.handle_message(
            r#"{"channel":"subscriptionResponse","data":{"method":"subscribe"}}"#,
        );
        assert!(book_bus.try_pop().is_none());
        assert!(trade_bus.try_pop().is_none());
    }

    #[test]
    fn empty_book_not_published() {
        let (dec, book_bus, _, _) = decoder();
        dec.handle_message(
            r#"{"channel":"l2Book","data":{"coin":"BTC","time":1,"levels":[[],[]]}}"#,
        );
        assert!(book_bus.try_pop().is_none());
    }

    #[test]
    fn coins_register_as_futures() {
        let (dec, book_bus, _, registry) = decoder();
        dec.handle_message(
            r#"{"channel":"l2Book","data":{"coin":"SOL","time":1,"levels":[[{"px":"100","sz":"1"}],[]]}}"#,
        );
        let ev = book_bus.try_pop().unwrap();
        let info = registry.get_info(ev.symbol).unwrap();
        assert_eq!(info.instrument, InstrumentType::Future);
        assert_eq!(info.symbol, "SOL");
    }
}
