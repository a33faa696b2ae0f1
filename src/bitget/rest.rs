//! Authenticated Bitget V2 REST client.
//!
//! Signature: base64 of
//! HMAC-SHA256(secret, timestamp_ms || "POST" || path || body).
//! The websocket login reuses the pattern over `GET/user/verify`.

use crate::net::http::{SessionPool, TransportError};
use crate::utils::now_ms;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

fn hmac_b64(secret: &str, message: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(message.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

pub fn sign_request(secret: &str, timestamp: &str, path: &str, body: &str) -> String {
    hmac_b64(secret, &format!("{}POST{}{}", timestamp, path, body))
}

pub fn sign_ws_login(secret: &str, timestamp: &str) -> String {
    hmac_b64(secret, &format!("{}GET/user/verify", timestamp))
}

/// The websocket login frame shared by the private stream.
pub fn login_payload(api_key: &str, api_secret: &str, passphrase: &str) -> String {
    let timestamp = now_ms().to_string();
    let sign = sign_ws_login(api_secret, &timestamp);
    format!(
        "{{\"op\":\"login\",\"args\":[{{\"apiKey\":\"{}\",\"passphrase\":\"{}\",\"timestamp\":\"{}\",\"sign\":\"{}\"}}]}}",
        api_key, passphrase, timestamp, sign
    )
}

pub struct BitgetRestClient {
    pool: Arc<SessionPool>,
    endpoint: String,
    api_key: String,
    api_secret: String,
    passphrase: String,
}

impl BitgetRestClient {
    pub fn new(
        pool: Arc<SessionPool>,
        endpoint: String,
        api_key: String,
        api_secret: String,
        passphrase: String,
    ) -> Self {
        Self {
            pool,
            endpoint,
            api_key,
            api_secret,
            passphrase,
        }
    }

    pub async fn post(&self, path: &str, body: String) -> Result<String, TransportError> {
        let timestamp = now_ms().to_string();
        let signature = sign_request(&self.api_secret, &timestamp, path, &body);

        let headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("ACCESS-KEY".to_string(), self.api_key.clone()),
            ("ACCESS-SIGN".to_string(), signature),
            ("ACCESS-TIMESTAMP".to_string(), timestamp),
            ("ACCESS-PASSPHRASE".to_string(), self.passphrase.clone()),
        ];

        let url = format!("{}{}", self.endpoint, path);
        self.pool.post(&url, body, &headers).await
    }
}
