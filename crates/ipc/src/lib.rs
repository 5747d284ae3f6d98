//! Tiplock IPC
//!
//! JSON-RPC 2.0 server and client over a Unix socket, with namespaced
//! method routing (`report.*`, `case.*`). The protocol types are also used by
//! the ledger client to talk to an EVM node over HTTP.

pub mod client;
pub mod namespace;
pub mod protocol;
pub mod server;

pub use client::{IpcClient, IpcError};
pub use namespace::NamespacedHandler;
pub use protocol::{codes, event_to_notification, RpcError, RpcNotification, RpcRequest, RpcResponse};
pub use server::{HandlerResult, IpcHandler, ServerBuilder, DEFAULT_MAX_LINE_BYTES};

use std::path::PathBuf;

/// Get the default socket path for a service.
///
/// - Linux: `$XDG_RUNTIME_DIR/{service}.sock` or `/tmp/{service}.sock`
/// - elsewhere: `/tmp/{service}.sock`
pub fn default_socket_path(service: &str) -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
            if !dir.trim().is_empty() {
                return PathBuf::from(dir).join(format!("{service}.sock"));
            }
        }
    }
    PathBuf::from(format!("/tmp/{service}.sock"))
}
