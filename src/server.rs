//! Registry server: exposes a [`Registry`] over JSON-RPC.
//!
//! Two front doors share one dispatcher: newline-delimited frames on
//! stdin/stdout, and an axum `POST /mcp` endpoint.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::error::{Result, VoiceAgentError};
use crate::mcp::{JsonRpcRequest, JsonRpcResponse, ServerInfo, PROTOCOL_VERSION};
use crate::tool::{value_to_text, ContentItem, Registry};

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;

pub struct McpServer {
    registry: Registry,
    info: ServerInfo,
}

#[derive(Debug, Deserialize)]
struct CallParams {
    name: Option<String>,
    #[serde(default)]
    arguments: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct PromptParams {
    name: Option<String>,
    #[serde(default)]
    arguments: HashMap<String, Value>,
}

impl McpServer {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            info: ServerInfo {
                name: "email-registry".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            },
        }
    }

    /// Dispatch one request. Notifications get no response.
    pub async fn handle(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.jsonrpc != "2.0" {
            return Some(JsonRpcResponse::failure(
                request.id,
                INVALID_REQUEST,
                "jsonrpc must be \"2.0\"",
            ));
        }

        if request.is_notification() {
            tracing::debug!(method = %request.method, "notification received");
            return None;
        }

        let id = request.id.clone();
        let outcome = match request.method.as_str() {
            "initialize" => Ok(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {}, "prompts": {} },
                "serverInfo": self.info,
            })),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": self.registry.list_tools() })),
            "tools/call" => self.call_tool(request.params).await,
            "prompts/list" => Ok(json!({ "prompts": self.registry.list_prompts() })),
            "prompts/get" => self.get_prompt(request.params),
            other => Err((METHOD_NOT_FOUND, format!("Method not found: {other}"))),
        };

        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err((code, message)) => JsonRpcResponse::failure(id, code, message),
        })
    }

    /// Dispatch one raw frame, returning the serialized reply if any.
    pub async fn handle_frame(&self, raw: &str) -> Option<String> {
        let reply = match serde_json::from_str::<JsonRpcRequest>(raw) {
            Ok(request) => self.handle(request).await?,
            Err(err) => JsonRpcResponse::failure(None, PARSE_ERROR, format!("Parse error: {err}")),
        };

        match serde_json::to_string(&reply) {
            Ok(line) => Some(line),
            Err(err) => {
                tracing::error!(%err, "failed to serialize registry reply");
                None
            }
        }
    }

    async fn call_tool(&self, params: Option<Value>) -> std::result::Result<Value, (i32, String)> {
        let params: CallParams = parse_params(params)?;
        let name = params
            .name
            .ok_or_else(|| (INVALID_PARAMS, "missing tool name".to_string()))?;
        if !self.registry.has_tool(&name) {
            return Err((INVALID_PARAMS, format!("Unknown tool: {name}")));
        }

        let arguments = params.arguments.unwrap_or_else(|| json!({}));
        tracing::info!(tool = %name, "tool call");

        let (text, is_error) = match self.registry.call_tool(&name, arguments).await {
            Ok(value) => (value_to_text(value), false),
            Err(err) => {
                tracing::warn!(tool = %name, error = %err, "tool call failed");
                (err.to_string(), true)
            }
        };

        Ok(json!({
            "content": [ContentItem::text(text)],
            "isError": is_error,
        }))
    }

    fn get_prompt(&self, params: Option<Value>) -> std::result::Result<Value, (i32, String)> {
        let params: PromptParams = parse_params(params)?;
        let name = params
            .name
            .ok_or_else(|| (INVALID_PARAMS, "missing prompt name".to_string()))?;

        let arguments: HashMap<String, String> = params
            .arguments
            .into_iter()
            .map(|(key, value)| (key, value_to_text(value)))
            .collect();

        match self.registry.get_prompt(&name, &arguments) {
            Ok(messages) => Ok(json!({ "messages": messages })),
            Err(VoiceAgentError::PromptNotFound(name)) => {
                Err((INVALID_PARAMS, format!("Unknown prompt: {name}")))
            }
            Err(err) => Err((INVALID_PARAMS, err.to_string())),
        }
    }

    /// Serve newline-delimited frames on stdin/stdout until stdin closes.
    pub async fn serve_stdio(&self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();
        tracing::info!(server = %self.info.name, "registry serving on stdio");

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            if let Some(mut reply) = self.handle_frame(&line).await {
                reply.push('\n');
                stdout.write_all(reply.as_bytes()).await?;
                stdout.flush().await?;
            }
        }

        tracing::info!("stdin closed, registry shutting down");
        Ok(())
    }

    /// Serve `POST /mcp` and `GET /health` on `addr`.
    pub async fn serve_http(self: Arc<Self>, addr: SocketAddr) -> Result<()> {
        let app = Router::new()
            .route("/health", get(|| async { "ok" }))
            .route("/mcp", post(http_frame))
            .with_state(self);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(%addr, "registry serving over http");
        axum::serve(listener, app.into_make_service())
            .await
            .map_err(|err| VoiceAgentError::Mcp(format!("server error: {err}")))
    }
}

async fn http_frame(State(server): State<Arc<McpServer>>, Json(request): Json<JsonRpcRequest>) -> Response {
    match server.handle(request).await {
        Some(reply) => Json(reply).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(
    params: Option<Value>,
) -> std::result::Result<T, (i32, String)> {
    serde_json::from_value(params.unwrap_or_else(|| json!({})))
        .map_err(|err| (INVALID_PARAMS, format!("invalid params: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{PromptTemplate, Tool};
    use async_trait::async_trait;

    struct Upper;

    #[async_trait]
    impl Tool for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn description(&self) -> &str {
            "Uppercases `text`"
        }

        async fn call(&self, input: Value) -> Result<Value> {
            match input.get("text").and_then(Value::as_str) {
                Some(text) => Ok(Value::String(text.to_uppercase())),
                None => Err(VoiceAgentError::Http("text is required".into())),
            }
        }
    }

    struct Span;

    impl PromptTemplate for Span {
        fn name(&self) -> &str {
            "span"
        }

        fn description(&self) -> &str {
            "Echo the timespan"
        }

        fn render(&self, arguments: &HashMap<String, String>) -> Result<String> {
            Ok(format!("span={}", arguments.get("timespan").cloned().unwrap_or_default()))
        }
    }

    fn server() -> McpServer {
        let mut registry = Registry::new();
        registry.register(Upper);
        registry.register_prompt(Span);
        McpServer::new(registry)
    }

    fn request(id: u64, method: &str, params: Value) -> JsonRpcRequest {
        JsonRpcRequest {
            id: Some(Value::from(id)),
            ..JsonRpcRequest::new(method, Some(params))
        }
    }

    #[tokio::test]
    async fn echoes_request_ids() {
        let reply = server().handle(request(42, "ping", json!({}))).await.unwrap();
        assert_eq!(reply.id, Some(Value::from(42)));
        assert_eq!(reply.result, Some(json!({})));
    }

    #[tokio::test]
    async fn tool_failures_become_error_results() {
        let server = server();
        let ok = server
            .handle(request(1, "tools/call", json!({"name": "upper", "arguments": {"text": "hi"}})))
            .await
            .unwrap();
        assert_eq!(ok.result.unwrap()["content"][0]["text"], "HI");

        let failed = server
            .handle(request(2, "tools/call", json!({"name": "upper", "arguments": {}})))
            .await
            .unwrap();
        let result = failed.result.unwrap();
        assert_eq!(result["isError"], true);
        assert!(result["content"][0]["text"].as_str().unwrap().contains("text is required"));
    }

    #[tokio::test]
    async fn unknown_names_are_invalid_params() {
        let server = server();
        let tool = server
            .handle(request(1, "tools/call", json!({"name": "nope"})))
            .await
            .unwrap();
        assert_eq!(tool.error.unwrap().code, INVALID_PARAMS);

        let prompt = server
            .handle(request(2, "prompts/get", json!({"name": "nope"})))
            .await
            .unwrap();
        assert_eq!(prompt.error.unwrap().code, INVALID_PARAMS);

        let method = server.handle(request(3, "resources/list", json!({}))).await.unwrap();
        assert_eq!(method.error.unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn notifications_get_no_reply() {
        let frame = JsonRpcRequest::new("notifications/initialized", None);
        assert!(server().handle(frame).await.is_none());
    }

    #[tokio::test]
    async fn garbage_frames_get_parse_errors() {
        let reply = server().handle_frame("{not json").await.unwrap();
        let value: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(value["error"]["code"], PARSE_ERROR);
        assert_eq!(value["id"], Value::Null);
    }

    #[tokio::test]
    async fn prompt_arguments_are_stringified() {
        let reply = server()
            .handle(request(5, "prompts/get", json!({"name": "span", "arguments": {"timespan": "today"}})))
            .await
            .unwrap();
        let result = reply.result.unwrap();
        assert_eq!(result["messages"][0]["role"], "user");
        assert_eq!(result["messages"][0]["content"]["text"], "span=today");
    }
}
