//! IPC client
//!
//! Connects to the daemon's Unix socket and sends one JSON-RPC request per
//! connection. Event notifications that arrive before the reply are skipped.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::debug;

use crate::protocol::{RpcRequest, RpcResponse};

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("Daemon not running at {0}")]
    DaemonNotRunning(String),
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Daemon error: code={code}, message={message}")]
    DaemonError { code: i32, message: String },
}

pub type Result<T> = std::result::Result<T, IpcError>;

pub struct IpcClient {
    socket_path: PathBuf,
    next_id: AtomicU64,
}

impl IpcClient {
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Send a JSON-RPC request and return the result.
    #[cfg(unix)]
    pub async fn send_request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        use tokio::net::UnixStream;

        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|_| IpcError::DaemonNotRunning(self.socket_path.display().to_string()))?;
        let (reader, mut writer) = stream.into_split();

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest::new(method, params, id);
        let json = serde_json::to_string(&request)
            .map_err(|e| IpcError::ConnectionFailed(e.to_string()))?;

        debug!(method, id, "IPC request");
        writer
            .write_all(format!("{json}\n").as_bytes())
            .await
            .map_err(|e| IpcError::ConnectionFailed(e.to_string()))?;

        let mut reader = BufReader::new(reader);
        loop {
            let mut line = String::new();
            let n = reader
                .read_line(&mut line)
                .await
                .map_err(|e| IpcError::ConnectionFailed(e.to_string()))?;
            if n == 0 {
                return Err(IpcError::ConnectionFailed(
                    "connection closed before reply".to_string(),
                ));
            }

            let value: Value = serde_json::from_str(line.trim())
                .map_err(|e| IpcError::InvalidResponse(e.to_string()))?;
            // Notifications carry no id.
            if value.get("id").is_none() {
                continue;
            }

            let response: RpcResponse = serde_json::from_value(value)
                .map_err(|e| IpcError::InvalidResponse(e.to_string()))?;
            if response.id.is_some() && response.id != Some(id) {
                continue;
            }
            debug!(id, "IPC response");
            return response.into_result().map_err(|err| IpcError::DaemonError {
                code: err.code,
                message: err.message,
            });
        }
    }

    /// Check if the daemon is running by attempting a connection.
    #[cfg(unix)]
    pub async fn is_daemon_running(&self) -> bool {
        tokio::net::UnixStream::connect(&self.socket_path)
            .await
            .is_ok()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_daemon_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let client = IpcClient::new(dir.path().join("absent.sock"));
        let result = client.send_request("status", None).await;
        assert!(matches!(result, Err(IpcError::DaemonNotRunning(_))));
        assert!(!client.is_daemon_running().await);
    }
}
