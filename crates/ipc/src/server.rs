//! IPC server
//!
//! Binds a Unix socket, accepts connections and dispatches newline-delimited
//! JSON-RPC requests to an [`IpcHandler`]. Events pushed through the
//! broadcast sender are written to every connected client as notifications.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::namespace::NamespacedHandler;
use crate::protocol::{codes, RpcError, RpcRequest, RpcResponse};

/// Longest accepted request line. Large enough for a base64 attachment at the
/// default upload limit.
pub const DEFAULT_MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

pub type HandlerResult<'a> = Pin<Box<dyn Future<Output = Result<Value, RpcError>> + Send + 'a>>;

/// Implemented by services that answer IPC requests.
pub trait IpcHandler: Send + Sync + 'static {
    fn handle(&self, method: &str, params: Option<Value>) -> HandlerResult<'_>;
}

/// Builds and runs a namespaced IPC server.
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use tiplock_ipc::{IpcHandler, ServerBuilder};
/// # async fn example(reports: Arc<dyn IpcHandler>, cases: Arc<dyn IpcHandler>) {
/// let ipc = ServerBuilder::new("/tmp/tiplock.sock")
///     .namespace("report", reports)
///     .namespace("case", cases);
/// ipc.run().await.unwrap();
/// # }
/// ```
pub struct ServerBuilder {
    socket_path: PathBuf,
    max_line_bytes: usize,
    handler: NamespacedHandler,
    event_tx: broadcast::Sender<String>,
}

impl ServerBuilder {
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            handler: NamespacedHandler::new(),
            event_tx,
        }
    }

    pub fn max_line_bytes(mut self, max: usize) -> Self {
        self.max_line_bytes = max.max(1);
        self
    }

    /// Register a handler for `prefix.*` methods.
    pub fn namespace(mut self, prefix: &str, handler: Arc<dyn IpcHandler>) -> Self {
        self.handler.add_namespace(prefix, handler);
        self
    }

    /// Handler for methods without a registered namespace.
    pub fn default_handler(mut self, handler: Arc<dyn IpcHandler>) -> Self {
        self.handler.set_default(handler);
        self
    }

    /// Lines sent here are forwarded to all connected clients.
    pub fn event_sender(&self) -> broadcast::Sender<String> {
        self.event_tx.clone()
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Serve until the process is stopped.
    #[cfg(unix)]
    pub async fn run(self) -> std::io::Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serve until `shutdown` resolves, then remove the socket file.
    #[cfg(unix)]
    pub async fn run_until<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        use tokio::net::UnixListener;

        // Remove stale socket
        let _ = std::fs::remove_file(&self.socket_path);
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(&self.socket_path)?;
        info!(
            socket = %self.socket_path.display(),
            namespaces = ?self.handler.namespaces(),
            "IPC server listening"
        );

        let handler: Arc<dyn IpcHandler> = Arc::new(self.handler);
        let max_line = self.max_line_bytes;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        let rx = self.event_tx.subscribe();
                        tokio::spawn(handle_connection(stream, handler.clone(), rx, max_line));
                    }
                    Err(e) => error!(error = %e, "failed to accept IPC connection"),
                },
                _ = &mut shutdown => break,
            }
        }

        let _ = std::fs::remove_file(&self.socket_path);
        info!(socket = %self.socket_path.display(), "IPC server stopped");
        Ok(())
    }
}

/// Dispatch one parsed line to the handler.
async fn dispatch(handler: &dyn IpcHandler, line: &str) -> RpcResponse {
    match serde_json::from_str::<RpcRequest>(line) {
        Ok(req) => {
            debug!(method = %req.method, id = req.id, "IPC request");
            match handler.handle(&req.method, req.params).await {
                Ok(result) => RpcResponse::success(req.id, result),
                Err(err) => {
                    debug!(method = %req.method, code = err.code, "IPC request failed");
                    RpcResponse::error(Some(req.id), err)
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "invalid JSON-RPC request");
            RpcResponse::error(
                None,
                RpcError::new(codes::PARSE_ERROR, format!("Parse error: {e}")),
            )
        }
    }
}

#[cfg(unix)]
async fn handle_connection(
    stream: tokio::net::UnixStream,
    handler: Arc<dyn IpcHandler>,
    mut event_rx: broadcast::Receiver<String>,
    max_line: usize,
) {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let (local_tx, mut local_rx) = mpsc::channel::<String>(64);
    tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(msg) => {
                    if local_tx.send(msg).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
            }
        }
    });

    // Kept across iterations: bytes read before an event wins the select stay here.
    let mut buf: Vec<u8> = Vec::new();
    loop {
        let budget = (max_line + 1).saturating_sub(buf.len()) as u64;
        let mut limited = (&mut reader).take(budget);
        tokio::select! {
            result = limited.read_until(b'\n', &mut buf) => {
                match result {
                    Ok(0) if buf.is_empty() => {
                        debug!("IPC client disconnected");
                        break;
                    }
                    Ok(_) => {
                        let complete = buf.last() == Some(&b'\n');
                        if !complete && buf.len() > max_line {
                            warn!(limit = max_line, "IPC request line too long, closing connection");
                            let response = RpcResponse::error(
                                None,
                                RpcError::new(
                                    codes::INVALID_REQUEST,
                                    format!("request exceeds {max_line} bytes"),
                                ),
                            );
                            let _ = write_response(&mut writer, &response).await;
                            break;
                        }

                        let response = match String::from_utf8(std::mem::take(&mut buf)) {
                            Ok(text) => {
                                let request = text.trim();
                                if request.is_empty() {
                                    None
                                } else {
                                    Some(dispatch(handler.as_ref(), request).await)
                                }
                            }
                            Err(_) => {
                                warn!("IPC request is not valid UTF-8");
                                Some(RpcResponse::error(
                                    None,
                                    RpcError::new(codes::PARSE_ERROR, "Parse error: request is not valid UTF-8"),
                                ))
                            }
                        };
                        if let Some(response) = response {
                            if write_response(&mut writer, &response).await.is_err() {
                                break;
                            }
                        }
                        // Unterminated line: the client closed its side.
                        if !complete {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "IPC read error");
                        break;
                    }
                }
            }
            Some(event) = local_rx.recv() => {
                if writer.write_all(format!("{event}\n").as_bytes()).await.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(unix)]
async fn write_response<W>(writer: &mut W, response: &RpcResponse) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_string(response).unwrap_or_default();
    writer.write_all(format!("{json}\n").as_bytes()).await
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::client::{IpcClient, IpcError};
    use tokio::net::UnixStream;
    use tokio::sync::oneshot;

    struct Echo;

    impl IpcHandler for Echo {
        fn handle(&self, method: &str, params: Option<Value>) -> HandlerResult<'_> {
            let method = method.to_string();
            Box::pin(async move {
                match method.as_str() {
                    "echo" => Ok(params.unwrap_or(Value::Null)),
                    "fail" => Err(RpcError::invalid_params("text must not be empty")),
                    other => Err(RpcError::method_not_found(other)),
                }
            })
        }
    }

    async fn start(
        builder: ServerBuilder,
    ) -> (PathBuf, oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
        let path = builder.socket_path().to_path_buf();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            builder
                .run_until(async {
                    let _ = stop_rx.await;
                })
                .await
                .unwrap();
        });
        for _ in 0..50 {
            if UnixStream::connect(&path).await.is_ok() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        (path, stop_tx, task)
    }

    #[tokio::test]
    async fn test_request_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let builder = ServerBuilder::new(dir.path().join("t.sock")).namespace("test", Arc::new(Echo));
        let (path, stop, task) = start(builder).await;

        let client = IpcClient::new(&path);
        let result = client
            .send_request("test.echo", Some(serde_json::json!({"text": "hi"})))
            .await
            .unwrap();
        assert_eq!(result["text"], "hi");

        let err = client.send_request("test.fail", None).await.unwrap_err();
        match err {
            IpcError::DaemonError { code, message } => {
                assert_eq!(code, codes::INVALID_PARAMS);
                assert!(message.contains("empty"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = client.send_request("other.thing", None).await.unwrap_err();
        assert!(matches!(err, IpcError::DaemonError { code, .. } if code == codes::METHOD_NOT_FOUND));

        stop.send(()).unwrap();
        task.await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_oversized_line_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let builder = ServerBuilder::new(dir.path().join("t.sock"))
            .max_line_bytes(64)
            .namespace("test", Arc::new(Echo));
        let (path, stop, task) = start(builder).await;

        let client = IpcClient::new(&path);
        let big = "x".repeat(200);
        let err = client
            .send_request("test.echo", Some(serde_json::json!({ "text": big })))
            .await
            .unwrap_err();
        assert!(matches!(err, IpcError::DaemonError { code, .. } if code == codes::INVALID_REQUEST));

        stop.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_parse_error_reply() {
        let dir = tempfile::tempdir().unwrap();
        let builder = ServerBuilder::new(dir.path().join("t.sock")).namespace("test", Arc::new(Echo));
        let (path, stop, task) = start(builder).await;

        let stream = UnixStream::connect(&path).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        writer.write_all(b"{not json\n").await.unwrap();
        let mut line = String::new();
        BufReader::new(reader).read_line(&mut line).await.unwrap();
        let response: RpcResponse = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(response.id, None);
        assert_eq!(response.error.unwrap().code, codes::PARSE_ERROR);

        stop.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_events_reach_connected_clients() {
        let dir = tempfile::tempdir().unwrap();
        let builder = ServerBuilder::new(dir.path().join("t.sock")).namespace("test", Arc::new(Echo));
        let events = builder.event_sender();
        let (path, stop, task) = start(builder).await;

        let stream = UnixStream::connect(&path).await.unwrap();
        let (reader, _writer) = stream.into_split();
        // Give the connection task time to subscribe.
        for _ in 0..50 {
            if events.receiver_count() > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        events
            .send(crate::protocol::event_to_notification(
                "report.committed",
                serde_json::json!({"submissionId": "0x01"}),
            ))
            .unwrap();

        let mut line = String::new();
        BufReader::new(reader).read_line(&mut line).await.unwrap();
        assert!(line.contains("report.committed"));

        stop.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_event_between_request_halves_keeps_request() {
        let dir = tempfile::tempdir().unwrap();
        let builder = ServerBuilder::new(dir.path().join("t.sock")).namespace("test", Arc::new(Echo));
        let events = builder.event_sender();
        let (path, stop, task) = start(builder).await;

        let stream = UnixStream::connect(&path).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        // A round trip proves this connection is subscribed to events.
        writer
            .write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"test.echo\",\"id\":1}\n")
            .await
            .unwrap();
        let reply = lines.next_line().await.unwrap().unwrap();
        assert!(reply.contains("\"id\":1"));

        let request = r#"{"jsonrpc":"2.0","method":"test.echo","params":{"text":"hi"},"id":7}"#;
        let (head, tail) = request.split_at(request.len() / 2);
        writer.write_all(head.as_bytes()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        events
            .send(crate::protocol::event_to_notification(
                "report.committed",
                serde_json::json!({"submissionId": "0x01"}),
            ))
            .unwrap();
        let pushed = lines.next_line().await.unwrap().unwrap();
        assert!(pushed.contains("report.committed"));

        writer.write_all(format!("{tail}\n").as_bytes()).await.unwrap();
        let reply = lines.next_line().await.unwrap().unwrap();
        let response: RpcResponse = serde_json::from_str(&reply).unwrap();
        assert_eq!(response.id, Some(7));
        assert_eq!(response.result.unwrap()["text"], "hi");

        stop.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_utf8_gets_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let builder = ServerBuilder::new(dir.path().join("t.sock")).namespace("test", Arc::new(Echo));
        let (path, stop, task) = start(builder).await;

        let stream = UnixStream::connect(&path).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        writer.write_all(b"{\"method\":\"\xff\xfe\"}\n").await.unwrap();
        let mut line = String::new();
        BufReader::new(reader).read_line(&mut line).await.unwrap();
        let response: RpcResponse = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(response.error.unwrap().code, codes::PARSE_ERROR);

        stop.send(()).unwrap();
        task.await.unwrap();
    }
}
