//! Client for the out-of-process EIP-712 signing daemon.
//!
//! Protocol: u32 big-endian length prefix, then UTF-8 JSON, both ways.
//! Transport is the unix socket when it exists, TCP loopback otherwise.
//! The whole exchange runs under a hard 50 ms budget; a slow signer
//! drops the order rather than stalling the executor.

use crate::DynError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const SIGNER_SOCKET_PATH: &str = "/dev/shm/hl_sign.sock";
pub const SIGNER_TCP_PORT: u16 = 19847;
pub const SIGNER_TIMEOUT_MS: u64 = 50;

const MAX_REPLY_BYTES: u32 = 1 << 20;

#[derive(Debug, Serialize)]
pub struct SignRequest<'a> {
    pub action_json: &'a str,
    pub nonce: u64,
    pub is_mainnet: bool,
    pub private_key: &'a str,
    pub active_pool: Option<&'a str>,
    pub expires_after: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Signature {
    pub r: String,
    pub s: String,
    pub v: i64,
}

#[derive(Debug, Clone)]
pub struct SignerClient {
    socket_path: String,
    tcp_port: u16,
    timeout: Duration,
}

impl Default for SignerClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SignerClient {
    pub fn new() -> Self {
        Self {
            socket_path: SIGNER_SOCKET_PATH.to_string(),
            tcp_port: SIGNER_TCP_PORT,
            timeout: Duration::from_millis(SIGNER_TIMEOUT_MS),
        }
    }

    pub fn with_endpoints(socket_path: String, tcp_port: u16) -> Self {
        Self {
            socket_path,
            tcp_port,
            timeout: Duration::from_millis(SIGNER_TIMEOUT_MS),
        }
    }

    pub async fn sign(&self, request: &SignRequest<'_>) -> Result<Signature, DynError> {
        let payload = serde_json::to_vec(request)?;
        tokio::time::timeout(self.timeout, self.exchange(&payload))
            .await
            .map_err(|_| DynError::from("signer timed out"))?
    }

    async fn exchange(&self, payload: &[u8]) -> Result<Signature, DynError> {
        #[cfg(unix)]
        {
            match tokio::net::UnixStream::connect(&self.socket_path).await {
                Ok(stream) => return round_trip(stream, payload).await,
                Err(e) => {
                    tracing::debug!(path = %self.socket_path, error = %e, "signer unix socket unavailable, trying tcp");
                }
            }
        }
        let stream = tokio::net::TcpStream::connect(("127.0.0.1", self.tcp_port)).await?;
        round_trip(stream, payload).await
    }
}

async fn round_trip<S>(mut stream: S, payload: &[u8]) -> Result<Signature, DynError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_u32(payload.len() as u32).await?;
    stream.write_all(payload).await?;
    stream.flush().await?;

    let len = stream.read_u32().await?;
    if len > MAX_REPLY_BYTES {
        return Err(format!("signer reply too large: {} bytes", len).into());
    }
    let mut reply = vec![0u8; len as usize];
    stream.read_exact(&mut reply).await?;

    let sig: Signature = serde_json::from_slice(&reply)?;
    Ok(sig)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn spawn_signer(reply: &'static [u8], respond: bool) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let len = stream.read_u32().await.unwrap();
                    let mut buf = vec![0u8; len as usize];
                    stream.read_exact(&mut buf).await.unwrap();
                    // The request must be valid frame JSON.
                    let req: serde_json::Value = serde_json::from_slice(&buf).unwrap();
                    assert!(req.get("action_json").is_some());
                    assert!(req.get("nonce").is_some());
                    if respond {
                        stream.write_u32(reply.len() as u32).await.unwrap();
                        stream.write_all(reply).await.unwrap();
                    } else {
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                });
            }
        });
        port
    }

    fn request(action: &str) -> SignRequest<'_> {
        SignRequest {
            action_json: action,
            nonce: 1_700_000_000_000,
            is_mainnet: true,
            private_key: "deadbeef",
            active_pool: None,
            expires_after: None,
        }
    }

    #[tokio::test]
    async fn signs_over_tcp_fallback() {
        let port =
            spawn_signer(br#"{"r":"0xabc","s":"0xdef","v":27}"#, true).await;
        let client = SignerClient::with_endpoints("/nonexistent/hl.sock".to_string(), port);

        let sig = client
            .sign(&request(r#"{"type":"order"}"#))
            .await
            .unwrap();
        assert_eq!(
            sig,
            Signature {
                r: "0xabc".to_string(),
                s: "0xdef".to_string(),
                v: 27
            }
        );
    }

    #[tokio::test]
    async fn unresponsive_signer_times_out() {
        let port = spawn_signer(b"", false).await;
        let client = SignerClient::with_endpoints("/nonexistent/hl.sock".to_string(), port);

        let started = std::time::Instant::now();
        let err = client.sign(&request("{}")).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn unreachable_signer_errors() {
        let client = SignerClient::with_endpoints("/nonexistent/hl.sock".to_string(), 1);
        assert!(client.sign(&request("{}")).await.is_err());
    }

    #[test]
    fn request_serializes_with_nulls() {
        let json = serde_json::to_value(request("{\"a\":1}")).unwrap();
        assert_eq!(json["nonce"], 1_700_000_000_000u64);
        assert!(json["active_pool"].is_null());
        assert!(json["expires_after"].is_null());
        assert_eq!(json["is_mainnet"], true);
    }
}
