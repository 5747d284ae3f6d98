//! Ethereum JSON-RPC over HTTP.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tiplock_ipc::{RpcRequest, RpcResponse};
use tracing::trace;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RpcCallError {
    /// The request may or may not have reached the node.
    #[error("transport: {0}")]
    Transport(String),
    /// The node answered with a JSON-RPC error object.
    #[error("node error {code}: {message}")]
    Rpc { code: i32, message: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Sends one JSON-RPC call and returns its `result` (`Null` when the node
/// answers `"result": null`).
#[async_trait::async_trait]
pub trait RpcTransport: Send + Sync {
    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcCallError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, RpcCallError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcCallError::Transport(format!("http client: {e}")))?;
        Ok(Self {
            client,
            url: url.to_string(),
            next_id: AtomicU64::new(1),
        })
    }
}

#[async_trait::async_trait]
impl RpcTransport for HttpTransport {
    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcCallError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest::new(method, Some(params), id);
        trace!(method, id, "eth rpc call");

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RpcCallError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RpcCallError::Transport(format!("HTTP {status}")));
        }

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| RpcCallError::InvalidResponse(e.to_string()))?;
        body.into_result().map_err(|e| RpcCallError::Rpc {
            code: e.code,
            message: e.message,
        })
    }
}

/// Parse a hex quantity such as `"0x1bc16d674ec80000"`.
pub fn parse_quantity(value: &Value) -> Result<u128, RpcCallError> {
    let s = value
        .as_str()
        .ok_or_else(|| RpcCallError::InvalidResponse(format!("expected hex quantity, got {value}")))?;
    let digits = s
        .strip_prefix("0x")
        .ok_or_else(|| RpcCallError::InvalidResponse(format!("quantity without 0x: {s}")))?;
    if digits.is_empty() {
        return Err(RpcCallError::InvalidResponse("empty quantity".to_string()));
    }
    u128::from_str_radix(digits, 16)
        .map_err(|e| RpcCallError::InvalidResponse(format!("bad quantity {s}: {e}")))
}

pub fn to_quantity(value: u128) -> String {
    format!("0x{value:x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_quantities() {
        assert_eq!(parse_quantity(&json!("0x0")).unwrap(), 0);
        assert_eq!(parse_quantity(&json!("0x6fc23ac00")).unwrap(), 30_000_000_000);
        assert!(parse_quantity(&json!("12")).is_err());
        assert!(parse_quantity(&json!("0x")).is_err());
        assert!(parse_quantity(&json!(12)).is_err());
        assert_eq!(to_quantity(0), "0x0");
        assert_eq!(to_quantity(80002), "0x13882");
    }

    async fn serve_once(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let _ = stream.read(&mut buf).await.unwrap();
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_http_result() {
        let url = serve_once(r#"{"jsonrpc":"2.0","id":1,"result":"0x3b9aca00"}"#).await;
        let transport = HttpTransport::new(&url, Duration::from_secs(5)).unwrap();
        let result = transport.call("eth_gasPrice", json!([])).await.unwrap();
        assert_eq!(parse_quantity(&result).unwrap(), 1_000_000_000);
    }

    #[tokio::test]
    async fn test_http_null_result() {
        let url = serve_once(r#"{"jsonrpc":"2.0","id":1,"result":null}"#).await;
        let transport = HttpTransport::new(&url, Duration::from_secs(5)).unwrap();
        let result = transport
            .call("eth_getTransactionReceipt", json!(["0x01"]))
            .await
            .unwrap();
        assert!(result.is_null());
    }

    #[tokio::test]
    async fn test_http_node_error() {
        let url = serve_once(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"insufficient funds for gas * price + value"}}"#,
        )
        .await;
        let transport = HttpTransport::new(&url, Duration::from_secs(5)).unwrap();
        let err = transport
            .call("eth_sendRawTransaction", json!(["0xf8"]))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcCallError::Rpc { code: -32000, .. }));
    }
}
