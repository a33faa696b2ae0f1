//! Authenticated Bybit V5 REST client.
//!
//! Signature: lowercase hex of
//! HMAC-SHA256(secret, timestamp || api_key || recv_window || body).

use crate::net::http::{SessionPool, TransportError};
use crate::utils::now_ms;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

pub const RECV_WINDOW: &str = "10000";

pub fn sign_v5(api_secret: &str, timestamp: &str, api_key: &str, recv_window: &str, body: &str) -> String {
    let message = format!("{}{}{}{}", timestamp, api_key, recv_window, body);
    let mut mac =
        HmacSha256::new_from_slice(api_secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Signature for the private websocket auth frame:
/// HMAC-SHA256(secret, "GET/realtime" || expires_ms), lowercase hex.
pub fn sign_ws_auth(api_secret: &str, expires_ms: u64) -> String {
    let message = format!("GET/realtime{}", expires_ms);
    let mut mac =
        HmacSha256::new_from_slice(api_secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub struct BybitRestClient {
    pool: Arc<SessionPool>,
    endpoint: String,
    api_key: String,
    api_secret: String,
}

impl BybitRestClient {
    pub fn new(pool: Arc<SessionPool>, endpoint: String, api_key: String, api_secret: String) -> Self {
        Self {
            pool,
            endpoint,
            api_key,
            api_secret,
        }
    }

    pub async fn post(&self, path: &str, body: String) -> Result<String, TransportError> {
        let timestamp = now_ms().to_string();
        let signature = sign_v5(&self.api_secret, &timestamp, &self.api_key, RECV_WINDOW, &body);

        let headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("X-BAPI-API-KEY".to_string(), self.api_key.clone()),
            ("X-BAPI-SIGN".to_string(), signature),
            ("X-BAPI-SIGN-TYPE".to_string(), "2".to_string()),
            ("X-BAPI-TIMESTAMP".to_string(), timestamp),
            ("X-BAPI-RECV-WINDOW".to_string(), RECV_WINDOW.to_string()),
        ];

        let url = format!("{}{}", self.endpoint, path);
        self.pool.post(&url, body, &headers).await
    }
}
