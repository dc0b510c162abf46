//! JSON-RPC transports to remote providers.
//!
//! - `StdioTransport`: line-delimited JSON over a child process's stdio
//! - `SseTransport`: legacy MCP HTTP+SSE (GET an event stream, POST requests
//!   to the endpoint it announces, read responses back off the stream)
//!
//! Both are single-owner and used for exactly one session.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::{Client as HttpClient, Url};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};

use super::errors::McpError;
use super::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::inference::streaming::{SseDecoder, SseEvent};

// ─── Request ID Generator ────────────────────────────────────────────────────

/// Global monotonic request ID counter.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a unique request ID.
pub fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// Inherited variables that break provider subprocesses.
const STRIPPED_ENV_VARS: &[&str] = &["VIRTUAL_ENV"];

// ─── RpcChannel ──────────────────────────────────────────────────────────────

/// A bidirectional JSON-RPC channel to one provider.
#[async_trait]
pub trait RpcChannel: Send {
    /// Send a request and wait for the response with the matching id.
    async fn request(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError>;

    /// Send a notification (no response expected).
    async fn notify(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError>;

    /// Tear the channel down.
    async fn close(&mut self);
}

// ─── Stdio ───────────────────────────────────────────────────────────────────

type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;
type BoxedReader = Box<dyn AsyncBufRead + Unpin + Send>;

/// Line-delimited JSON-RPC over a subprocess's stdin/stdout.
pub struct StdioTransport {
    server_name: String,
    writer: BoxedWriter,
    reader: BoxedReader,
    child: Option<Child>,
}

impl StdioTransport {
    /// Launch the provider process.
    pub fn spawn(
        server_name: &str,
        command: &str,
        args: &[String],
        envs: &HashMap<String, String>,
    ) -> Result<Self, McpError> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .env_clear()
            .envs(merged_env(std::env::vars(), envs))
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
            name: server_name.to_string(),
            reason: format!("{command}: {e}"),
        })?;

        let stdin = child.stdin.take().ok_or(McpError::SpawnFailed {
            name: server_name.to_string(),
            reason: "failed to capture stdin".into(),
        })?;
        let stdout = child.stdout.take().ok_or(McpError::SpawnFailed {
            name: server_name.to_string(),
            reason: "failed to capture stdout".into(),
        })?;

        tracing::debug!(server = server_name, command, "spawned provider process");

        let mut transport = Self::from_io(server_name, stdin, BufReader::new(stdout));
        transport.child = Some(child);
        Ok(transport)
    }

    /// Wrap an arbitrary writer/reader pair.
    pub fn from_io<W, R>(server_name: &str, writer: W, reader: R) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        Self {
            server_name: server_name.to_string(),
            writer: Box::new(writer),
            reader: Box::new(reader),
            child: None,
        }
    }

    fn transport_error(&self, reason: String) -> McpError {
        McpError::TransportError {
            server: self.server_name.clone(),
            reason,
        }
    }

    async fn write_line<T: serde::Serialize>(&mut self, message: &T) -> Result<(), McpError> {
        let mut json = serde_json::to_string(message)
            .map_err(|e| self.transport_error(format!("failed to serialize message: {e}")))?;
        json.push('\n');

        if let Err(e) = self.writer.write_all(json.as_bytes()).await {
            return Err(self.transport_error(format!("failed to write to stdin: {e}")));
        }
        if let Err(e) = self.writer.flush().await {
            return Err(self.transport_error(format!("failed to flush stdin: {e}")));
        }
        Ok(())
    }
}

#[async_trait]
impl RpcChannel for StdioTransport {
    async fn request(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = next_request_id();
        self.write_line(&JsonRpcRequest::new(id, method, params)).await?;

        // Read response lines until we find one with matching id
        let mut line_buf = String::new();
        loop {
            line_buf.clear();
            let bytes_read = match self.reader.read_line(&mut line_buf).await {
                Ok(n) => n,
                Err(e) => return Err(self.transport_error(format!("failed to read from stdout: {e}"))),
            };

            if bytes_read == 0 {
                return Err(self.transport_error(
                    "provider stdout closed (process may have exited)".into(),
                ));
            }

            let trimmed = line_buf.trim();
            if trimmed.is_empty() {
                continue;
            }

            // Non-JSON lines are provider log output; other ids are stale
            match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                Ok(resp) if resp.id == Some(id) => return Ok(resp),
                _ => continue,
            }
        }
    }

    async fn notify(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        self.write_line(&JsonRpcNotification::new(method, params)).await
    }

    async fn close(&mut self) {
        let _ = self.writer.shutdown().await;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill().await;
        }
    }
}

/// Build a subprocess environment: the ambient variables minus the
/// problematic ones, overlaid with the provider's non-empty variables.
pub fn merged_env<I>(ambient: I, overrides: &HashMap<String, String>) -> HashMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut env: HashMap<String, String> = ambient
        .into_iter()
        .filter(|(k, _)| !STRIPPED_ENV_VARS.contains(&k.as_str()))
        .collect();
    for (k, v) in overrides {
        if !v.is_empty() {
            env.insert(k.clone(), v.clone());
        }
    }
    env
}

// ─── SSE ─────────────────────────────────────────────────────────────────────

type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, reqwest::Error>> + Send>>;

/// Legacy MCP HTTP+SSE transport.
pub struct SseTransport {
    server_name: String,
    http: HttpClient,
    endpoint: Url,
    events: ByteStream,
    decoder: SseDecoder,
}

impl SseTransport {
    /// Open the event stream and wait for the `endpoint` announcement.
    pub async fn connect(
        server_name: &str,
        server_uri: &str,
        http: HttpClient,
    ) -> Result<Self, McpError> {
        let transport_error = |reason: String| McpError::TransportError {
            server: server_name.to_string(),
            reason,
        };

        let base = Url::parse(server_uri)
            .map_err(|e| transport_error(format!("invalid server uri '{server_uri}': {e}")))?;

        let response = http
            .get(base.clone())
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| transport_error(format!("failed to open event stream: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(transport_error(format!("event stream returned HTTP {status}")));
        }

        let events: ByteStream =
            Box::pin(response.bytes_stream().map(|chunk| chunk.map(|b| b.to_vec())));

        let mut transport = Self {
            server_name: server_name.to_string(),
            http,
            endpoint: base.clone(),
            events,
            decoder: SseDecoder::new(),
        };

        loop {
            let event = transport.next_event().await?;
            if event.event.as_deref() == Some("endpoint") {
                transport.endpoint = resolve_endpoint(&base, &event.data)
                    .map_err(|e| transport_error(format!("invalid endpoint event: {e}")))?;
                break;
            }
        }

        tracing::debug!(
            server = server_name,
            endpoint = %transport.endpoint,
            "SSE session established"
        );
        Ok(transport)
    }

    fn transport_error(&self, reason: String) -> McpError {
        McpError::TransportError {
            server: self.server_name.clone(),
            reason,
        }
    }

    async fn next_event(&mut self) -> Result<SseEvent, McpError> {
        loop {
            if let Some(event) = self.decoder.next_event() {
                return Ok(event);
            }
            match self.events.next().await {
                Some(Ok(bytes)) => self.decoder.push(&bytes),
                Some(Err(e)) => return Err(self.transport_error(format!("stream read error: {e}"))),
                None => return Err(self.transport_error("event stream closed".into())),
            }
        }
    }

    async fn post<T: serde::Serialize + Sync>(&mut self, message: &T) -> Result<(), McpError> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .json(message)
            .send()
            .await
            .map_err(|e| self.transport_error(format!("failed to post message: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.transport_error(format!("post returned HTTP {status}: {body}")));
        }
        Ok(())
    }
}

#[async_trait]
impl RpcChannel for SseTransport {
    async fn request(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = next_request_id();
        self.post(&JsonRpcRequest::new(id, method, params)).await?;

        loop {
            let event = self.next_event().await?;
            if let Some(resp) = match_response(&event, id) {
                return Ok(resp);
            }
        }
    }

    async fn notify(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        self.post(&JsonRpcNotification::new(method, params)).await
    }

    async fn close(&mut self) {
        // Dropping the body stream closes the GET connection
        self.events = Box::pin(futures::stream::empty());
    }
}

/// Resolve the `endpoint` event payload against the stream URI.
pub fn resolve_endpoint(base: &Url, data: &str) -> Result<Url, String> {
    base.join(data.trim()).map_err(|e| e.to_string())
}

/// Interpret an SSE event as the response to request `id`, if it is one.
pub fn match_response(event: &SseEvent, id: u64) -> Option<JsonRpcResponse> {
    if !matches!(event.event.as_deref(), None | Some("message")) {
        return None;
    }
    serde_json::from_str::<JsonRpcResponse>(&event.data)
        .ok()
        .filter(|resp| resp.id == Some(id))
}

// ─── Response Helpers ────────────────────────────────────────────────────────

/// Extract the result from a JSON-RPC response, converting errors to `McpError`.
pub fn extract_result(response: JsonRpcResponse) -> Result<serde_json::Value, McpError> {
    if let Some(err) = response.error {
        return Err(McpError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }

    response.result.ok_or(McpError::ServerError {
        code: -32603,
        message: "response missing both result and error".into(),
        data: None,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
