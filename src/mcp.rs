//! Client side of the registry channel.
//!
//! The registry speaks JSON-RPC 2.0 in the Model Context Protocol shape
//! (`initialize`, `tools/list`, `tools/call`, `prompts/list`, `prompts/get`).
//!
//! # Transport Types
//! - **Stdio**: launch the registry as a subprocess, one JSON frame per line
//! - **HTTP**: POST each frame to a registry endpoint
//! - **Local**: hand frames to an in-process [`McpServer`]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use crate::error::{Result, VoiceAgentError};
use crate::server::McpServer;
use crate::tool::{ContentItem, PromptDescriptor, PromptMessage, ToolDescriptor};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

// ─────────────────────────────────────────────────────────────────────────────
// Protocol Types
// ─────────────────────────────────────────────────────────────────────────────

/// JSON-RPC request or notification (no `id`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: None,
            method: method.into(),
            params,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    fn answers(&self, id: u64) -> bool {
        self.id.as_ref().and_then(Value::as_u64) == Some(id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<ToolDescriptor>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListPromptsResult {
    pub prompts: Vec<PromptDescriptor>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetPromptResult {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub messages: Vec<PromptMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ContentItem>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// First content item's text. Without content, the serialized result.
    pub fn text(&self) -> String {
        match self.content.first() {
            Some(ContentItem::Text { text }) => text.clone(),
            Some(other) => serde_json::to_string(other).unwrap_or_default(),
            None => serde_json::to_string(self).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServerCapabilities {
    #[serde(default)]
    pub tools: Option<Value>,
    #[serde(default)]
    pub prompts: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport Trait
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a request (the transport assigns the id) and wait for its response.
    async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse>;

    /// Send a notification; nothing is read back.
    async fn notify(&self, notification: JsonRpcRequest) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Stdio Transport
// ─────────────────────────────────────────────────────────────────────────────

/// Registry subprocess reached over its stdin/stdout.
///
/// The child is spawned with `kill_on_drop`, so dropping the transport without
/// calling [`McpTransport::close`] still reaps the process.
pub struct StdioTransport {
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    stdout: Mutex<Option<BufReader<ChildStdout>>>,
    request_id: AtomicU64,
    request_timeout: Duration,
    shutdown_grace: Duration,
}

impl StdioTransport {
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        request_timeout: Duration,
        shutdown_grace: Duration,
    ) -> Result<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            VoiceAgentError::Mcp(format!("failed to spawn registry `{command}`: {e}"))
        })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take().map(BufReader::new);
        tracing::debug!(command, pid = child.id(), "registry process started");

        Ok(Self {
            child: Mutex::new(Some(child)),
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(stdout),
            request_id: AtomicU64::new(1),
            request_timeout,
            shutdown_grace,
        })
    }

    async fn write_frame(&self, frame: &JsonRpcRequest) -> Result<()> {
        let mut payload = serde_json::to_string(frame)?;
        payload.push('\n');

        let mut stdin_guard = self.stdin.lock().await;
        let stdin = stdin_guard
            .as_mut()
            .ok_or_else(|| VoiceAgentError::Mcp("registry stdin not available".into()))?;
        stdin
            .write_all(payload.as_bytes())
            .await
            .map_err(|e| VoiceAgentError::Mcp(format!("failed to write to registry: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| VoiceAgentError::Mcp(format!("failed to flush registry stdin: {e}")))
    }

    async fn read_response(&self, id: u64) -> Result<JsonRpcResponse> {
        let mut stdout_guard = self.stdout.lock().await;
        let stdout = stdout_guard
            .as_mut()
            .ok_or_else(|| VoiceAgentError::Mcp("registry stdout not available".into()))?;

        let mut line = String::new();
        loop {
            line.clear();
            let read = stdout
                .read_line(&mut line)
                .await
                .map_err(|e| VoiceAgentError::Mcp(format!("failed to read from registry: {e}")))?;
            if read == 0 {
                return Err(VoiceAgentError::Mcp("registry closed its output".into()));
            }
            let frame = line.trim();
            if frame.is_empty() {
                continue;
            }

            let value: Value = match serde_json::from_str(frame) {
                Ok(value) => value,
                Err(err) => {
                    tracing::warn!(%err, "skipping unparsable registry frame");
                    continue;
                }
            };
            if value.get("method").is_some() {
                tracing::debug!(frame, "skipping registry-initiated message");
                continue;
            }

            let response: JsonRpcResponse = serde_json::from_value(value)?;
            if response.answers(id) {
                return Ok(response);
            }
            tracing::debug!(expected = id, got = ?response.id, "skipping stale registry response");
        }
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn send(&self, mut request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        request.id = Some(Value::from(id));

        let exchange = async {
            self.write_frame(&request).await?;
            self.read_response(id).await
        };

        tokio::time::timeout(self.request_timeout, exchange)
            .await
            .map_err(|_| {
                VoiceAgentError::Mcp(format!(
                    "`{}` timed out after {}s",
                    request.method,
                    self.request_timeout.as_secs()
                ))
            })?
    }

    async fn notify(&self, mut notification: JsonRpcRequest) -> Result<()> {
        notification.id = None;
        self.write_frame(&notification).await
    }

    async fn close(&self) -> Result<()> {
        // Closing stdin is the shutdown signal for a stdio server.
        drop(self.stdin.lock().await.take());

        let mut child_guard = self.child.lock().await;
        if let Some(mut child) = child_guard.take() {
            match tokio::time::timeout(self.shutdown_grace, child.wait()).await {
                Ok(Ok(status)) => tracing::debug!(%status, "registry process exited"),
                Ok(Err(err)) => {
                    return Err(VoiceAgentError::Mcp(format!(
                        "failed to wait for registry: {err}"
                    )))
                }
                Err(_) => {
                    tracing::debug!("registry did not exit in time, killing it");
                    child.kill().await.map_err(|e| {
                        VoiceAgentError::Mcp(format!("failed to kill registry: {e}"))
                    })?;
                }
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Transport
// ─────────────────────────────────────────────────────────────────────────────

/// Registry reached by POSTing JSON-RPC frames to a URL.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    request_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| VoiceAgentError::Mcp(format!("http client error: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            request_id: AtomicU64::new(1),
        })
    }

    async fn post(&self, frame: &JsonRpcRequest) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(&self.url)
            .json(frame)
            .send()
            .await
            .map_err(|e| VoiceAgentError::Mcp(format!("registry request failed: {e}")))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceAgentError::Mcp(format!(
                "registry answered {status}: {body}"
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn send(&self, mut request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        request.id = Some(Value::from(id));

        self.post(&request)
            .await?
            .json()
            .await
            .map_err(|e| VoiceAgentError::Mcp(format!("failed to parse registry response: {e}")))
    }

    async fn notify(&self, mut notification: JsonRpcRequest) -> Result<()> {
        notification.id = None;
        self.post(&notification).await.map(|_| ())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Local Transport
// ─────────────────────────────────────────────────────────────────────────────

/// In-process channel to an [`McpServer`]. Frames still go through JSON so the
/// wire shapes are the same as over stdio.
pub struct LocalTransport {
    server: Arc<McpServer>,
    request_id: AtomicU64,
    closed: AtomicBool,
}

impl LocalTransport {
    pub fn new(server: Arc<McpServer>) -> Self {
        Self {
            server,
            request_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    async fn dispatch(&self, frame: &JsonRpcRequest) -> Result<Option<JsonRpcResponse>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(VoiceAgentError::Mcp("channel already closed".into()));
        }
        let raw = serde_json::to_string(frame)?;
        let reply = self.server.handle_frame(&raw).await;
        reply
            .map(|line| serde_json::from_str(&line).map_err(VoiceAgentError::from))
            .transpose()
    }
}

#[async_trait]
impl McpTransport for LocalTransport {
    async fn send(&self, mut request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        request.id = Some(Value::from(id));
        self.dispatch(&request).await?.ok_or_else(|| {
            VoiceAgentError::Mcp(format!("no response to `{}`", request.method))
        })
    }

    async fn notify(&self, mut notification: JsonRpcRequest) -> Result<()> {
        notification.id = None;
        self.dispatch(&notification).await.map(|_| ())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MCP Client
// ─────────────────────────────────────────────────────────────────────────────

pub struct McpClient<T: McpTransport> {
    transport: T,
    initialized: bool,
    server_info: Option<ServerInfo>,
}

impl<T: McpTransport> McpClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            initialized: false,
            server_info: None,
        }
    }

    /// Perform the `initialize` handshake and announce readiness.
    pub async fn initialize(&mut self) -> Result<&ServerInfo> {
        if !self.initialized {
            let result: InitializeResult = self
                .request(
                    "initialize",
                    Some(json!({
                        "protocolVersion": PROTOCOL_VERSION,
                        "capabilities": {},
                        "clientInfo": {
                            "name": env!("CARGO_PKG_NAME"),
                            "version": env!("CARGO_PKG_VERSION")
                        }
                    })),
                )
                .await?;

            tracing::debug!(
                server = %result.server_info.name,
                protocol = %result.protocol_version,
                "registry initialized"
            );
            self.server_info = Some(result.server_info);
            self.initialized = true;

            self.transport
                .notify(JsonRpcRequest::new("notifications/initialized", None))
                .await?;
        }

        self.server_info
            .as_ref()
            .ok_or_else(|| VoiceAgentError::Mcp("server info not available".into()))
    }

    pub async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>> {
        self.ensure_initialized().await?;
        let result: ListToolsResult = self.request("tools/list", None).await?;
        Ok(result.tools)
    }

    pub async fn list_prompts(&mut self) -> Result<Vec<PromptDescriptor>> {
        self.ensure_initialized().await?;
        let result: ListPromptsResult = self.request("prompts/list", None).await?;
        Ok(result.prompts)
    }

    pub async fn get_prompt(
        &mut self,
        name: &str,
        arguments: &HashMap<String, String>,
    ) -> Result<GetPromptResult> {
        self.ensure_initialized().await?;
        self.request(
            "prompts/get",
            Some(json!({ "name": name, "arguments": arguments })),
        )
        .await
    }

    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<CallToolResult> {
        self.ensure_initialized().await?;
        self.request(
            "tools/call",
            Some(json!({ "name": name, "arguments": arguments })),
        )
        .await
    }

    pub async fn close(&self) -> Result<()> {
        self.transport.close().await
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    async fn ensure_initialized(&mut self) -> Result<()> {
        if !self.initialized {
            self.initialize().await?;
        }
        Ok(())
    }

    async fn request<R: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<R> {
        let response = self
            .transport
            .send(JsonRpcRequest::new(method, params))
            .await?;

        if let Some(error) = response.error {
            return Err(VoiceAgentError::Remote {
                code: error.code,
                message: error.message,
            });
        }

        serde_json::from_value(response.result.unwrap_or_default()).map_err(|e| {
            VoiceAgentError::Mcp(format!("failed to parse `{method}` result: {e}"))
        })
    }
}
