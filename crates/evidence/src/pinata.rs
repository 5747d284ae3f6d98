//! Pinata pinning-service backend.
//!
//! `POST {api_url}/pinning/pinFileToIPFS` with a multipart `file` part and a
//! `pinataMetadata` part; the response's `IpfsHash` is the content address.

use std::sync::Arc;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use tiplock_core::{normalize_gateway_base, EvidenceLocator};
use tracing::{debug, info, warn};

use crate::naming::{staged_name, TokenSource};
use crate::{EvidenceStore, StoreError};

/// Longest backend error body kept in a [`StoreError::Rejected`].
const MAX_ERROR_BODY: usize = 512;

/// Evidence store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Pinning API base URL.
    pub api_url: String,
    /// Gateway used to build resolvable URLs (bare host or full URL).
    pub gateway_base: String,
    /// Bearer token for the pinning API. Usually supplied through the
    /// environment rather than the settings file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.pinata.cloud".to_string(),
            gateway_base: "https://gateway.pinata.cloud".to_string(),
            jwt: None,
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PinResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: String,
    #[serde(rename = "PinSize", default)]
    pin_size: u64,
    #[serde(rename = "isDuplicate", default)]
    is_duplicate: bool,
}

pub struct PinataStore {
    client: reqwest::Client,
    endpoint: String,
    gateway_base: String,
    jwt: String,
    tokens: Arc<dyn TokenSource>,
}

impl PinataStore {
    pub fn new(config: &StoreConfig, tokens: Arc<dyn TokenSource>) -> Result<Self, StoreError> {
        let jwt = config
            .jwt
            .as_deref()
            .map(str::trim)
            .filter(|j| !j.is_empty())
            .ok_or_else(|| StoreError::Config("pinning JWT is not set".to_string()))?
            .to_string();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .map_err(|e| StoreError::Config(format!("http client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/pinning/pinFileToIPFS",
                config.api_url.trim_end_matches('/')
            ),
            gateway_base: normalize_gateway_base(&config.gateway_base),
            jwt,
            tokens,
        })
    }

    fn file_part(bytes: &[u8], name: &str, mime_type: &str) -> Part {
        let part = Part::bytes(bytes.to_vec()).file_name(name.to_string());
        match part.mime_str(mime_type) {
            Ok(part) => part,
            Err(_) => {
                warn!(mime_type, "unparseable mime type, sending without one");
                Part::bytes(bytes.to_vec()).file_name(name.to_string())
            }
        }
    }
}

#[async_trait::async_trait]
impl EvidenceStore for PinataStore {
    async fn store(
        &self,
        bytes: &[u8],
        original_name: &str,
        mime_type: &str,
    ) -> Result<EvidenceLocator, StoreError> {
        if bytes.is_empty() {
            return Err(StoreError::EmptyPayload);
        }

        let name = staged_name(original_name, &self.tokens.token());
        let metadata = serde_json::json!({ "name": name }).to_string();
        let form = Form::new()
            .part("file", Self::file_part(bytes, &name, mime_type))
            .text("pinataMetadata", metadata);

        debug!(name = %name, size = bytes.len(), "pinning evidence");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.jwt)
            .multipart(form)
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let pin: PinResponse = response
            .json()
            .await
            .map_err(|e| StoreError::InvalidResponse(e.to_string()))?;
        if pin.ipfs_hash.trim().is_empty() {
            return Err(StoreError::InvalidResponse("empty IpfsHash".to_string()));
        }

        let locator = EvidenceLocator::new(pin.ipfs_hash.trim(), &self.gateway_base);
        info!(
            name = %name,
            cid = %locator.content_address(),
            pin_size = pin.pin_size,
            duplicate = pin.is_duplicate,
            "evidence pinned"
        );
        Ok(locator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::SequenceTokenSource;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// Serve one canned HTTP response and hand back the raw request.
    async fn one_shot_server(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                if request_complete(&request) {
                    break;
                }
            }
            let response = format!(
                "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            let _ = tx.send(String::from_utf8_lossy(&request).to_string());
        });

        (format!("http://{addr}"), rx)
    }

    fn request_complete(raw: &[u8]) -> bool {
        let text = String::from_utf8_lossy(raw);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let headers = text[..header_end].to_ascii_lowercase();
        let body = &raw[header_end + 4..];
        if headers.contains("transfer-encoding: chunked") {
            return body.ends_with(b"0\r\n\r\n");
        }
        let length = headers
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        body.len() >= length
    }

    fn config(api_url: &str) -> StoreConfig {
        StoreConfig {
            api_url: api_url.to_string(),
            gateway_base: "gw.example".to_string(),
            jwt: Some("test-jwt".to_string()),
            request_timeout_secs: 5,
        }
    }

    #[test]
    fn test_missing_jwt_is_config_error() {
        let mut cfg = config("http://127.0.0.1:1");
        cfg.jwt = Some("  ".to_string());
        let result = PinataStore::new(&cfg, Arc::new(SequenceTokenSource::new("t")));
        assert!(matches!(result, Err(StoreError::Config(_))));
    }

    #[tokio::test]
    async fn test_empty_payload_never_hits_network() {
        let store =
            PinataStore::new(&config("http://127.0.0.1:1"), Arc::new(SequenceTokenSource::new("t")))
                .unwrap();
        let result = store.store(b"", "photo.jpg", "image/jpeg").await;
        assert!(matches!(result, Err(StoreError::EmptyPayload)));
    }

    #[tokio::test]
    async fn test_pin_success_builds_gateway_url() {
        let (url, request_rx) =
            one_shot_server("HTTP/1.1 200 OK", r#"{"IpfsHash":"QmTestHash","PinSize":11}"#).await;
        let store = PinataStore::new(&config(&url), Arc::new(SequenceTokenSource::new("tok")))
            .unwrap();

        let locator = store.store(b"photo bytes", "photo.jpg", "image/jpeg").await.unwrap();
        assert_eq!(locator.content_address(), "QmTestHash");
        assert_eq!(locator.url(), "https://gw.example/ipfs/QmTestHash");

        let request = request_rx.await.unwrap();
        assert!(request.starts_with("POST /pinning/pinFileToIPFS"));
        assert!(request.contains("Bearer test-jwt"));
        assert!(request.contains("photo_tok-0.jpg"));
        assert!(request.contains("pinataMetadata"));
    }

    #[tokio::test]
    async fn test_backend_rejection_is_reported() {
        let (url, _rx) =
            one_shot_server("HTTP/1.1 401 Unauthorized", r#"{"error":"bad jwt"}"#).await;
        let store =
            PinataStore::new(&config(&url), Arc::new(SequenceTokenSource::new("t"))).unwrap();

        match store.store(b"x", "a.png", "image/png").await {
            Err(StoreError::Rejected { status, body }) => {
                assert_eq!(status, 401);
                assert!(body.contains("bad jwt"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_transport_error() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };
        let store = PinataStore::new(
            &config(&format!("http://127.0.0.1:{port}")),
            Arc::new(SequenceTokenSource::new("t")),
        )
        .unwrap();
        let result = store.store(b"x", "a.png", "image/png").await;
        assert!(matches!(result, Err(StoreError::Transport(_))));
    }
}
