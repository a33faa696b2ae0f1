//! Reconnecting websocket session.
//!
//! One spawned task owns the connection: it connects, hands the sender
//! to the handler for subscriptions, then drives a select loop over
//! inbound frames, the ping tick, and shutdown. On disconnect it sleeps
//! the configured delay and reconnects. Handler callbacks run on the
//! session task and must not block; publishing goes through the bounded
//! buses.

use crate::DynError;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

#[derive(Debug, Clone)]
pub enum PingPolicy {
    /// No pings from this side; the venue's protocol pings suffice.
    None,
    /// Protocol-level ping frames on a fixed cadence.
    Protocol { interval: Duration },
    /// Venue-specific application ping payload. The first tick waits
    /// out `initial_delay` so subscriptions settle before heartbeats.
    Text {
        payload: String,
        interval: Duration,
        initial_delay: Duration,
    },
}

#[derive(Debug, Clone)]
pub struct WsConfig {
    pub url: String,
    pub origin: String,
    pub reconnect_delay_ms: u64,
    pub ping: PingPolicy,
    pub headers: Vec<(String, String)>,
}

/// Session callbacks. All of them run on the session task.
#[async_trait]
pub trait WsHandler: Send {
    async fn on_open(&mut self, sender: &WsSender);
    async fn on_message(&mut self, payload: &str);
    async fn on_close(&mut self, _code: Option<u16>, _reason: &str) {}
}

/// Cloneable write handle. A single async mutex serializes writes to
/// the socket.
#[derive(Clone)]
pub struct WsSender {
    sink: Arc<Mutex<Option<WsWrite>>>,
}

impl WsSender {
    fn new() -> Self {
        Self {
            sink: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn send_text(&self, text: String) -> Result<(), DynError> {
        self.send_raw(Message::Text(text)).await
    }

    async fn send_raw(&self, message: Message) -> Result<(), DynError> {
        let mut guard = self.sink.lock().await;
        match guard.as_mut() {
            Some(sink) => sink.send(message).await.map_err(Into::into),
            None => Err("websocket not connected".into()),
        }
    }

    async fn install(&self, sink: WsWrite) {
        *self.sink.lock().await = Some(sink);
    }

    async fn clear(&self) {
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.close().await;
        }
    }
}

pub struct WsClient {
    cfg: WsConfig,
    sender: WsSender,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl WsClient {
    pub fn new(cfg: WsConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            cfg,
            sender: WsSender::new(),
            shutdown_tx,
            shutdown_rx,
            task: std::sync::Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    pub fn sender(&self) -> WsSender {
        self.sender.clone()
    }

    pub fn start<H: WsHandler + 'static>(&self, handler: H) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let cfg = self.cfg.clone();
        let sender = self.sender.clone();
        let shutdown = self.shutdown_rx.clone();
        let handle = tokio::spawn(run_session(cfg, sender, shutdown, handler));
        *self.task.lock().expect("ws task lock") = Some(handle);
    }

    /// Idempotent. Awaits the session task; after return no callback
    /// fires again.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.task.lock().expect("ws task lock").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

async fn connect(cfg: &WsConfig) -> Result<WsStream, DynError> {
    let mut request = cfg.url.as_str().into_client_request()?;
    {
        let headers = request.headers_mut();
        if !cfg.origin.is_empty() {
            headers.insert("Origin", HeaderValue::from_str(&cfg.origin)?);
        }
        for (name, value) in &cfg.headers {
            headers.insert(
                HeaderName::from_bytes(name.as_bytes())?,
                HeaderValue::from_str(value)?,
            );
        }
    }
    let (ws, _) = connect_async(request).await?;
    Ok(ws)
}

enum SessionEnd {
    Shutdown,
    Disconnected,
}

async fn run_session<H: WsHandler>(
    cfg: WsConfig,
    sender: WsSender,
    mut shutdown: watch::Receiver<bool>,
    mut handler: H,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let ws = tokio::select! {
            _ = shutdown.changed() => break,
            res = connect(&cfg) => match res {
                Ok(ws) => ws,
                Err(e) => {
                    tracing::warn!(url = %cfg.url, error = %e, "websocket connect failed");
                    if sleep_or_shutdown(&mut shutdown, cfg.reconnect_delay_ms).await {
                        break;
                    }
                    continue;
                }
            }
        };

        let (write, read) = ws.split();
        sender.install(write).await;
        handler.on_open(&sender).await;

        let end = drive(&cfg, &sender, &mut shutdown, &mut handler, read).await;
        sender.clear().await;

        match end {
            SessionEnd::Shutdown => break,
            SessionEnd::Disconnected => {
                tracing::warn!(
                    url = %cfg.url,
                    delay_ms = cfg.reconnect_delay_ms,
                    "websocket disconnected, retrying"
                );
                if sleep_or_shutdown(&mut shutdown, cfg.reconnect_delay_ms).await {
                    break;
                }
            }
        }
    }
}

async fn drive<H: WsHandler>(
    cfg: &WsConfig,
    sender: &WsSender,
    shutdown: &mut watch::Receiver<bool>,
    handler: &mut H,
    mut read: WsRead,
) -> SessionEnd {
    let (ping_enabled, ping_payload, period, start_delay) = match &cfg.ping {
        PingPolicy::None => (false, None, Duration::from_secs(3600), Duration::from_secs(3600)),
        PingPolicy::Protocol { interval } => (true, None, *interval, *interval),
        PingPolicy::Text { payload, interval, initial_delay } => {
            (true, Some(payload.clone()), *interval, *initial_delay)
        }
    };
    let mut ping_tick = tokio::time::interval_at(tokio::time::Instant::now() + start_delay, period);

    loop {
        tokio::select! {
            _ = shutdown.changed() => return SessionEnd::Shutdown,
            _ = ping_tick.tick(), if ping_enabled => {
                let frame = match &ping_payload {
                    Some(payload) => Message::Text(payload.clone()),
                    None => Message::Ping(Vec::new()),
                };
                if sender.send_raw(frame).await.is_err() {
                    handler.on_close(None, "ping send failed").await;
                    return SessionEnd::Disconnected;
                }
            }
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => handler.on_message(&text).await,
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(f) => (Some(u16::from(f.code)), f.reason.to_string()),
                        None => (None, String::new()),
                    };
                    handler.on_close(code, &reason).await;
                    return SessionEnd::Disconnected;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "websocket read error");
                    handler.on_close(None, "read error").await;
                    return SessionEnd::Disconnected;
                }
                None => {
                    handler.on_close(None, "stream ended").await;
                    return SessionEnd::Disconnected;
                }
            }
        }
    }
}

/// Returns true when shutdown fired during the sleep.
async fn sleep_or_shutdown(shutdown: &mut watch::Receiver<bool>, delay_ms: u64) -> bool {
    tokio::select! {
        _ = shutdown.changed() => true,
        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => false,
    }
}
