//! Pooled HTTP transport for the order path.
//!
//! A fixed budget of client handles is shared by all callers of one
//! venue. Each handle keeps its TCP connection and TLS session alive
//! across requests to the venue host, which is what makes repeated
//! order submits cheap. `post` is synchronous with respect to its
//! caller; concurrency comes from callers on different tasks.

use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;

const MIN_TIMEOUT_MS: u64 = 1_000;
const ERROR_BODY_LIMIT: usize = 1024;

#[derive(Debug, Clone)]
pub struct HttpPoolConfig {
    pub initial_size: usize,
    pub max_size: usize,
    pub acquire_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for HttpPoolConfig {
    fn default() -> Self {
        Self {
            initial_size: 2,
            max_size: 8,
            acquire_timeout_ms: 1_000,
            connect_timeout_ms: 1_000,
            request_timeout_ms: 3_000,
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection pool exhausted or timeout")]
    PoolExhausted,
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("{0}")]
    Network(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub free: usize,
    pub outstanding: usize,
    pub total_created: usize,
}

#[derive(Debug)]
struct PoolState {
    free: Vec<reqwest::Client>,
    total: usize,
}

#[derive(Debug)]
pub struct SessionPool {
    cfg: HttpPoolConfig,
    state: Mutex<PoolState>,
    returned: Notify,
}

#[derive(Debug)]
struct SessionGuard<'a> {
    client: Option<reqwest::Client>,
    pool: &'a SessionPool,
}

impl SessionGuard<'_> {
    fn client(&self) -> &reqwest::Client {
        self.client.as_ref().expect("session taken")
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            self.pool.release(client);
        }
    }
}

impl SessionPool {
    pub fn new(cfg: HttpPoolConfig) -> Result<Self, TransportError> {
        let mut free = Vec::with_capacity(cfg.max_size);
        let initial = cfg.initial_size.min(cfg.max_size);
        for _ in 0..initial {
            free.push(build_client(&cfg)?);
        }
        let total = free.len();
        Ok(Self {
            cfg,
            state: Mutex::new(PoolState { free, total }),
            returned: Notify::new(),
        })
    }

    async fn acquire(&self) -> Result<SessionGuard<'_>, TransportError> {
        let deadline = Instant::now() + Duration::from_millis(self.cfg.acquire_timeout_ms);
        loop {
            {
                let mut state = self.state.lock().expect("pool poisoned");
                if let Some(client) = state.free.pop() {
                    return Ok(SessionGuard { client: Some(client), pool: self });
                }
                if state.total < self.cfg.max_size {
                    state.total += 1;
                    drop(state);
                    match build_client(&self.cfg) {
                        Ok(client) => return Ok(SessionGuard { client: Some(client), pool: self }),
                        Err(e) => {
                            self.state.lock().expect("pool poisoned").total -= 1;
                            self.returned.notify_one();
                            return Err(e);
                        }
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(TransportError::PoolExhausted);
            }
            if tokio::time::timeout(deadline - now, self.returned.notified())
                .await
                .is_err()
            {
                return Err(TransportError::PoolExhausted);
            }
        }
    }

    fn release(&self, client: reqwest::Client) {
        let mut state = self.state.lock().expect("pool poisoned");
        if state.free.len() < self.cfg.max_size {
            state.free.push(client);
        } else {
            state.total -= 1;
        }
        drop(state);
        self.returned.notify_one();
    }

    pub async fn post(
        &self,
        url: &str,
        body: String,
        headers: &[(String, String)],
    ) -> Result<String, TransportError> {
        self.post_with_timeout(url, body, headers, None).await
    }

    pub async fn post_with_timeout(
        &self,
        url: &str,
        body: String,
        headers: &[(String, String)],
        request_timeout: Option<Duration>,
    ) -> Result<String, TransportError> {
        let session = self.acquire().await?;

        let mut request = session
            .client()
            .post(url)
            .header(reqwest::header::CONNECTION, "keep-alive")
            .body(body);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(timeout) = request_timeout {
            request = request.timeout(timeout.max(Duration::from_millis(MIN_TIMEOUT_MS)));
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        if status.is_success() {
            Ok(text)
        } else {
            Err(TransportError::Status {
                status: status.as_u16(),
                body: truncate_body(text),
            })
        }
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock().expect("pool poisoned");
        PoolStats {
            free: state.free.len(),
            outstanding: state.total - state.free.len(),
            total_created: state.total,
        }
    }
}

fn build_client(cfg: &HttpPoolConfig) -> Result<reqwest::Client, TransportError> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms.max(MIN_TIMEOUT_MS)))
        .timeout(Duration::from_millis(cfg.request_timeout_ms.max(MIN_TIMEOUT_MS)))
        .tcp_keepalive(Duration::from_secs(30))
        .build()
        .map_err(|e| TransportError::Network(e.to_string()))
}

fn truncate_body(mut body: String) -> String {
    if body.len() > ERROR_BODY_LIMIT {
        let mut end = ERROR_BODY_LIMIT;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}
