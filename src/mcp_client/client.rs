//! MCP Client: per-call sessions against remote tool providers.
//!
//! Every operation opens a fresh session (spawn or connect), performs the
//! `initialize` handshake, issues exactly one request and tears the session
//! down. The whole sequence runs under a single deadline.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;

use super::errors::McpError;
use super::transport::{extract_result, RpcChannel, SseTransport, StdioTransport};
use super::types::{
    CallToolResult, InitializeResult, ListToolsResult, McpInfo, McpToolDefinition, Transport,
    PROTOCOL_VERSION,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Deadline for one session (handshake plus operation).
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30);

const CLIENT_NAME: &str = "mydba";

// ─── ToolProvider ────────────────────────────────────────────────────────────

/// Discovery and invocation against a configured provider.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// List the tools the provider currently exposes.
    async fn list_tools(&self, info: &McpInfo) -> Result<Vec<McpToolDefinition>, McpError>;

    /// Invoke one tool and return the text of its result.
    async fn call_tool(
        &self,
        info: &McpInfo,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<String, McpError>;
}

// ─── McpClient ───────────────────────────────────────────────────────────────

/// Stateless MCP client. Holds only the shared HTTP client and the timeout.
#[derive(Clone)]
pub struct McpClient {
    http: HttpClient,
    timeout: Duration,
}

impl Default for McpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl McpClient {
    pub fn new() -> Self {
        Self {
            http: HttpClient::new(),
            timeout: DEFAULT_SESSION_TIMEOUT,
        }
    }

    /// Override the per-session deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn open(&self, info: &McpInfo) -> Result<Box<dyn RpcChannel>, McpError> {
        match info.transport {
            Transport::Stdio => {
                let command = info.command.as_deref().ok_or_else(|| McpError::ConfigError {
                    reason: format!("stdio provider '{}' has no command", info.name),
                })?;
                let transport = StdioTransport::spawn(&info.name, command, &info.args, &info.envs)?;
                Ok(Box::new(transport))
            }
            Transport::Sse => {
                let uri = info.server_uri.as_deref().ok_or_else(|| McpError::ConfigError {
                    reason: format!("sse provider '{}' has no server_uri", info.name),
                })?;
                let transport = SseTransport::connect(&info.name, uri, self.http.clone()).await?;
                Ok(Box::new(transport))
            }
        }
    }

    /// Run `method` inside a fresh, initialized session bounded by the timeout.
    async fn with_session(
        &self,
        info: &McpInfo,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, McpError> {
        let session = async {
            let mut channel = self.open(info).await?;
            let result = run_session(channel.as_mut(), &info.name, method, params).await;
            channel.close().await;
            result
        };

        match tokio::time::timeout(self.timeout, session).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    provider = %info.name,
                    method,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "provider session timed out"
                );
                Err(McpError::Timeout {
                    server: info.name.clone(),
                    operation: method.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }
}

#[async_trait]
impl ToolProvider for McpClient {
    async fn list_tools(&self, info: &McpInfo) -> Result<Vec<McpToolDefinition>, McpError> {
        let result = self.with_session(info, "tools/list", None).await?;
        let list: ListToolsResult =
            serde_json::from_value(result).map_err(|e| McpError::TransportError {
                server: info.name.clone(),
                reason: format!("invalid tools/list result: {e}"),
            })?;
        tracing::debug!(provider = %info.name, tools = list.tools.len(), "listed provider tools");
        Ok(list.tools)
    }

    async fn call_tool(
        &self,
        info: &McpInfo,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<String, McpError> {
        let params = serde_json::json!({ "name": tool, "arguments": arguments });
        let result = self.with_session(info, "tools/call", Some(params)).await?;
        call_result_text(&info.name, tool, result)
    }
}

// ─── Session ─────────────────────────────────────────────────────────────────

/// Handshake, then one request.
pub async fn run_session(
    channel: &mut dyn RpcChannel,
    server: &str,
    method: &str,
    params: Option<serde_json::Value>,
) -> Result<serde_json::Value, McpError> {
    initialize(channel, server).await?;
    let response = channel.request(method, params).await?;
    extract_result(response)
}

async fn initialize(channel: &mut dyn RpcChannel, server: &str) -> Result<(), McpError> {
    let params = serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": CLIENT_NAME,
            "version": env!("CARGO_PKG_VERSION"),
        },
    });

    let response = channel.request("initialize", Some(params)).await?;
    let result = extract_result(response).map_err(|e| McpError::InitFailed {
        name: server.to_string(),
        reason: e.to_string(),
    })?;

    let init: InitializeResult =
        serde_json::from_value(result).map_err(|e| McpError::InitFailed {
            name: server.to_string(),
            reason: format!("invalid initialize result: {e}"),
        })?;
    tracing::trace!(
        provider = server,
        protocol = init.protocol_version.as_deref().unwrap_or("?"),
        "provider initialized"
    );

    channel.notify("notifications/initialized", None).await
}

/// Turn a `tools/call` result into the text handed back to the model.
pub fn call_result_text(
    server: &str,
    tool: &str,
    result: serde_json::Value,
) -> Result<String, McpError> {
    let call: CallToolResult =
        serde_json::from_value(result).map_err(|e| McpError::TransportError {
            server: server.to_string(),
            reason: format!("invalid tools/call result: {e}"),
        })?;

    if call.is_error {
        return Err(McpError::ToolError {
            server: server.to_string(),
            tool: tool.to_string(),
            message: call.first_text().unwrap_or_default().to_string(),
        });
    }

    call.first_text()
        .map(str::to_string)
        .ok_or_else(|| McpError::EmptyResult {
            server: server.to_string(),
            tool: tool.to_string(),
        })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;

    /// Minimal line-delimited MCP server answering on the other end of a duplex pipe.
    fn fake_server(
        io: tokio::io::DuplexStream,
        tools_call_result: serde_json::Value,
    ) -> tokio::task::JoinHandle<Vec<String>> {
        tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(io);
            let mut lines = BufReader::new(read).lines();
            let mut methods = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                let msg: serde_json::Value = serde_json::from_str(&line).unwrap();
                let method = msg["method"].as_str().unwrap_or_default().to_string();
                methods.push(method.clone());
                let Some(id) = msg.get("id").and_then(|v| v.as_u64()) else {
                    continue;
                };
                let result = match method.as_str() {
                    "initialize" => serde_json::json!({
                        "protocolVersion": PROTOCOL_VERSION,
                        "capabilities": {},
                        "serverInfo": {"name": "fake", "version": "0"}
                    }),
                    "tools/list" => serde_json::json!({
                        "tools": [{"name": "describe_db_instances", "description": "d", "inputSchema": {"type": "object"}}]
                    }),
                    _ => tools_call_result.clone(),
                };
                let reply = serde_json::json!({"jsonrpc": "2.0", "id": id, "result": result});
                write
                    .write_all(format!("{reply}\n").as_bytes())
                    .await
                    .unwrap();
            }
            methods
        })
    }

    #[tokio::test]
    async fn test_session_performs_handshake_then_request() {
        let (client_io, server_io) = tokio::io::duplex(8192);
        let server = fake_server(server_io, serde_json::json!({}));

        let (read, write) = tokio::io::split(client_io);
        let mut channel = StdioTransport::from_io("fake", write, BufReader::new(read));
        let result = run_session(&mut channel, "fake", "tools/list", None)
            .await
            .unwrap();
        let list: ListToolsResult = serde_json::from_value(result).unwrap();
        assert_eq!(list.tools[0].name, "describe_db_instances");

        channel.close().await;
        let methods = server.await.unwrap();
        assert_eq!(
            methods,
            vec!["initialize", "notifications/initialized", "tools/list"]
        );
    }

    #[test]
    fn test_call_result_text_variants() {
        let ok = serde_json::json!({"content": [{"type": "text", "text": "3 instances"}]});
        assert_eq!(call_result_text("rds", "t", ok).unwrap(), "3 instances");

        let failed = serde_json::json!({"content": [{"type": "text", "text": "denied"}], "isError": true});
        match call_result_text("rds", "t", failed).unwrap_err() {
            McpError::ToolError { message, .. } => assert_eq!(message, "denied"),
            other => panic!("expected ToolError, got {other:?}"),
        }

        let empty = serde_json::json!({"content": []});
        assert!(matches!(
            call_result_text("rds", "t", empty).unwrap_err(),
            McpError::EmptyResult { .. }
        ));
    }

    #[tokio::test]
    async fn test_missing_command_is_config_error() {
        let info = McpInfo {
            name: "broken".into(),
            transport: Transport::Stdio,
            description: None,
            server_uri: None,
            command: None,
            args: vec![],
            envs: HashMap::new(),
        };
        let err = McpClient::new().list_tools(&info).await.unwrap_err();
        assert!(matches!(err, McpError::ConfigError { .. }));
    }

    #[tokio::test]
    async fn test_unresponsive_provider_times_out() {
        // Accepts the connection but never sends the endpoint event
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\n\r\n")
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let info = McpInfo {
            name: "slow".into(),
            transport: Transport::Sse,
            description: None,
            server_uri: Some(format!("http://{addr}/sse")),
            command: None,
            args: vec![],
            envs: HashMap::new(),
        };
        let client = McpClient::new().with_timeout(Duration::from_millis(200));
        let err = client.list_tools(&info).await.unwrap_err();
        assert!(err.is_timeout());
    }

    // ─── SSE provider ────────────────────────────────────────────────────────

    type SessionSender = Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>;

    /// Read one HTTP request, returning its head and body.
    async fn read_request(socket: &mut TcpStream) -> (String, Vec<u8>) {
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            request.extend_from_slice(&buf[..n]);
            if let Some(header_end) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&request[..header_end]).to_string();
                let length = head
                    .lines()
                    .find_map(|l| {
                        l.to_ascii_lowercase()
                            .strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap())
                    })
                    .unwrap_or(0);
                let body_start = header_end + 4;
                if request.len() >= body_start + length {
                    return (head, request[body_start..body_start + length].to_vec());
                }
            }
            if n == 0 {
                return (String::from_utf8_lossy(&request).to_string(), Vec::new());
            }
        }
    }

    async fn write_chunk(socket: &mut TcpStream, part: &str) -> std::io::Result<()> {
        let frame = format!("{:x}\r\n{part}\r\n", part.len());
        socket.write_all(frame.as_bytes()).await
    }

    /// Legacy HTTP+SSE provider. Each GET opens a session stream that starts
    /// with the `endpoint` event; replies to POSTed requests are pushed onto
    /// the latest stream as CRLF-framed `message` events, preceded by a
    /// keep-alive comment and a reply for an unrelated id.
    async fn serve_sse_provider(methods: Arc<Mutex<Vec<String>>>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let session: SessionSender = Arc::default();
        tokio::spawn(async move {
            loop {
                let (socket, _) = listener.accept().await.unwrap();
                tokio::spawn(handle_sse_connection(
                    socket,
                    Arc::clone(&session),
                    Arc::clone(&methods),
                ));
            }
        });
        format!("http://{addr}/sse")
    }

    async fn handle_sse_connection(
        mut socket: TcpStream,
        session: SessionSender,
        methods: Arc<Mutex<Vec<String>>>,
    ) {
        let (head, body) = read_request(&mut socket).await;

        if head.starts_with("GET") {
            let (tx, mut rx) = mpsc::unbounded_channel::<String>();
            *session.lock().unwrap() = Some(tx);
            let opened = socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n",
                )
                .await;
            if opened.is_err()
                || write_chunk(&mut socket, "event: endpoint\r\ndata: /messages?session_id=s1\r\n\r\n")
                    .await
                    .is_err()
            {
                return;
            }
            while let Some(part) = rx.recv().await {
                if write_chunk(&mut socket, &part).await.is_err() {
                    return;
                }
            }
            return;
        }

        assert!(head.starts_with("POST /messages?session_id=s1 "), "{head}");
        let request: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let method = request["method"].as_str().unwrap_or_default().to_string();
        methods.lock().unwrap().push(method.clone());
        let _ = socket
            .write_all(b"HTTP/1.1 202 Accepted\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
            .await;

        let Some(id) = request.get("id").and_then(|v| v.as_u64()) else {
            return;
        };
        let result = match method.as_str() {
            "initialize" => serde_json::json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "serverInfo": {"name": "fake", "version": "0"}
            }),
            "tools/list" => serde_json::json!({
                "tools": [{"name": "describe_db_instances", "description": "d", "inputSchema": {"type": "object"}}]
            }),
            _ => serde_json::json!({
                "content": [{
                    "type": "text",
                    "text": format!(
                        "{} {}",
                        request["params"]["name"].as_str().unwrap_or_default(),
                        request["params"]["arguments"]
                    )
                }]
            }),
        };
        let reply = serde_json::json!({"jsonrpc": "2.0", "id": id, "result": result});
        let unrelated = serde_json::json!({"jsonrpc": "2.0", "id": id + 1000, "result": {}});

        let tx = session.lock().unwrap().clone();
        if let Some(tx) = tx {
            let _ = tx.send(format!(": ping\r\n\r\nevent: message\r\ndata: {unrelated}\r\n\r\n"));
            // Blank-line CRLF split across two chunks
            let _ = tx.send(format!("event: message\r\ndata: {reply}\r\n\r"));
            let _ = tx.send("\n".to_string());
        }
    }

    #[tokio::test]
    async fn test_sse_provider_lists_and_calls_tools() {
        let methods = Arc::new(Mutex::new(Vec::new()));
        let uri = serve_sse_provider(Arc::clone(&methods)).await;
        let info = McpInfo {
            name: "rds".into(),
            transport: Transport::Sse,
            description: None,
            server_uri: Some(uri),
            command: None,
            args: vec![],
            envs: HashMap::new(),
        };
        let client = McpClient::new().with_timeout(Duration::from_secs(5));

        let tools = client.list_tools(&info).await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "describe_db_instances");

        let text = client
            .call_tool(
                &info,
                "describe_db_instances",
                serde_json::json!({"region": "杭州"}),
            )
            .await
            .unwrap();
        assert_eq!(text, "describe_db_instances {\"region\":\"杭州\"}");

        assert_eq!(
            *methods.lock().unwrap(),
            vec![
                "initialize",
                "notifications/initialized",
                "tools/list",
                "initialize",
                "notifications/initialized",
                "tools/call",
            ]
        );
    }
}
