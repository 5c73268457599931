//! Scoped channels to the tool/prompt registry.
//!
//! A [`SessionProvider`] opens a ready (handshaken) [`CapabilitySession`].
//! The session is single-owner; whoever opens it must call
//! [`CapabilitySession::close`]. Dropping an unclosed stdio session still
//! kills the registry process.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::{AppConfig, RegistryConfig, RegistryTransport};
use crate::error::{Result, VoiceAgentError};
use crate::mcp::{HttpTransport, LocalTransport, McpClient, McpTransport, StdioTransport};
use crate::server::McpServer;
use crate::tool::{PromptDescriptor, PromptMessage, ToolDescriptor};

/// Result of a tool call that reached the tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    Success(String),
    /// The tool ran and reported an error (`isError: true`).
    Failure(String),
}

impl ToolOutcome {
    pub fn text(&self) -> &str {
        match self {
            ToolOutcome::Success(text) | ToolOutcome::Failure(text) => text,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ToolOutcome::Failure(_))
    }

    pub fn into_result(self, tool: &str) -> Result<String> {
        match self {
            ToolOutcome::Success(text) => Ok(text),
            ToolOutcome::Failure(message) => Err(VoiceAgentError::tool_failed(tool, message)),
        }
    }
}

#[async_trait]
pub trait CapabilitySession: Send {
    async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>>;

    async fn list_prompts(&mut self) -> Result<Vec<PromptDescriptor>>;

    async fn get_prompt(
        &mut self,
        name: &str,
        arguments: &HashMap<String, String>,
    ) -> Result<Vec<PromptMessage>>;

    /// `Err` means the channel failed; a tool-level failure is
    /// `Ok(ToolOutcome::Failure)`.
    async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<ToolOutcome>;

    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
impl<T: McpTransport + 'static> CapabilitySession for McpClient<T> {
    async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>> {
        McpClient::list_tools(self).await
    }

    async fn list_prompts(&mut self) -> Result<Vec<PromptDescriptor>> {
        McpClient::list_prompts(self).await
    }

    async fn get_prompt(
        &mut self,
        name: &str,
        arguments: &HashMap<String, String>,
    ) -> Result<Vec<PromptMessage>> {
        Ok(McpClient::get_prompt(self, name, arguments).await?.messages)
    }

    async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<ToolOutcome> {
        let result = McpClient::call_tool(self, name, arguments).await?;
        let text = result.text();
        Ok(if result.is_error {
            ToolOutcome::Failure(text)
        } else {
            ToolOutcome::Success(text)
        })
    }

    async fn close(&mut self) -> Result<()> {
        McpClient::close(self).await
    }
}

#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn open(&self) -> Result<Box<dyn CapabilitySession>>;
}

/// Close `session`, keeping the operation's error over a close error.
pub async fn release<T>(mut session: Box<dyn CapabilitySession>, result: Result<T>) -> Result<T> {
    let closed = session.close().await;
    match (result, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(close_err)) => Err(close_err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(close_err)) => {
            tracing::warn!(error = %close_err, "failed to close registry session after error");
            Err(err)
        }
    }
}

/// Handshake on a fresh client; the transport is closed if that fails.
async fn handshake<T: McpTransport + 'static>(transport: T) -> Result<Box<dyn CapabilitySession>> {
    let mut client = McpClient::new(transport);
    if let Err(err) = client.initialize().await {
        if let Err(close_err) = client.close().await {
            tracing::warn!(error = %close_err, "failed to release registry after handshake error");
        }
        return Err(err);
    }
    tracing::debug!("registry session opened");
    Ok(Box::new(client))
}

/// Launches the registry as a subprocess per session.
#[derive(Debug, Clone)]
pub struct StdioSessionProvider {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    request_timeout: Duration,
    shutdown_grace: Duration,
}

impl StdioSessionProvider {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        let defaults = RegistryConfig::default();
        Self {
            command: command.into(),
            args,
            env: HashMap::new(),
            request_timeout: defaults.request_timeout(),
            shutdown_grace: defaults.shutdown_grace(),
        }
    }

    /// Use `registry.command`, or this executable's own `registry`
    /// subcommand (forwarding `config_path`) when unset.
    pub fn from_config(cfg: &RegistryConfig, config_path: Option<&Path>) -> Result<Self> {
        let (command, args) = match &cfg.command {
            Some(command) => (command.clone(), cfg.args.clone()),
            None => {
                let exe = std::env::current_exe()?;
                let mut args = Vec::new();
                if let Some(path) = config_path {
                    args.push("--config".to_string());
                    args.push(path.display().to_string());
                }
                args.push("registry".to_string());
                (exe.display().to_string(), args)
            }
        };

        Ok(Self::new(command, args)
            .with_timeouts(cfg.request_timeout(), cfg.shutdown_grace()))
    }

    pub fn with_timeouts(mut self, request_timeout: Duration, shutdown_grace: Duration) -> Self {
        self.request_timeout = request_timeout;
        self.shutdown_grace = shutdown_grace;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
impl SessionProvider for StdioSessionProvider {
    async fn open(&self) -> Result<Box<dyn CapabilitySession>> {
        let transport = StdioTransport::spawn(
            &self.command,
            &self.args,
            &self.env,
            self.request_timeout,
            self.shutdown_grace,
        )?;
        handshake(transport).await
    }
}

/// Talks to an in-process registry server.
#[derive(Clone)]
pub struct LocalSessionProvider {
    server: Arc<McpServer>,
}

impl LocalSessionProvider {
    pub fn new(server: Arc<McpServer>) -> Self {
        Self { server }
    }
}

#[async_trait]
impl SessionProvider for LocalSessionProvider {
    async fn open(&self) -> Result<Box<dyn CapabilitySession>> {
        handshake(LocalTransport::new(Arc::clone(&self.server))).await
    }
}

/// Talks to a registry served over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSessionProvider {
    url: String,
    request_timeout: Duration,
}

impl HttpSessionProvider {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            request_timeout,
        }
    }
}

#[async_trait]
impl SessionProvider for HttpSessionProvider {
    async fn open(&self) -> Result<Box<dyn CapabilitySession>> {
        handshake(HttpTransport::new(&self.url, self.request_timeout)?).await
    }
}

/// Pick the session provider named by `registry.transport`.
pub fn provider_from_config(
    cfg: &AppConfig,
    config_path: Option<&Path>,
) -> Result<Arc<dyn SessionProvider>> {
    let provider: Arc<dyn SessionProvider> = match cfg.registry.transport {
        RegistryTransport::Stdio => {
            Arc::new(StdioSessionProvider::from_config(&cfg.registry, config_path)?)
        }
        RegistryTransport::InProcess => {
            let server = McpServer::new(crate::tools::email_registry(cfg));
            Arc::new(LocalSessionProvider::new(Arc::new(server)))
        }
        RegistryTransport::Http => {
            let url = cfg.registry.url.clone().ok_or_else(|| {
                VoiceAgentError::Configuration("registry.url is required for the http transport".into())
            })?;
            Arc::new(HttpSessionProvider::new(url, cfg.registry.request_timeout()))
        }
    };
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{Registry, Tool};
    use serde_json::json;

    struct Fails;

    #[async_trait]
    impl Tool for Fails {
        fn name(&self) -> &str {
            "fails"
        }

        fn description(&self) -> &str {
            "Always fails"
        }

        async fn call(&self, _input: Value) -> Result<Value> {
            Err(VoiceAgentError::Http("quota exhausted".into()))
        }
    }

    fn provider() -> LocalSessionProvider {
        let mut registry = Registry::new();
        registry.register(Fails);
        LocalSessionProvider::new(Arc::new(McpServer::new(registry)))
    }

    #[tokio::test]
    async fn tool_errors_are_failure_values() {
        let mut session = provider().open().await.unwrap();
        let outcome = session.call_tool("fails", json!({})).await.unwrap();
        assert!(outcome.is_failure());
        assert!(outcome.text().contains("quota exhausted"));
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn unknown_tools_are_channel_errors() {
        let mut session = provider().open().await.unwrap();
        let err = session.call_tool("missing", json!({})).await.unwrap_err();
        assert!(matches!(err, VoiceAgentError::Remote { code: -32602, .. }));
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn closed_sessions_reject_calls() {
        let mut session = provider().open().await.unwrap();
        session.close().await.unwrap();
        assert!(session.list_tools().await.is_err());
    }

    #[tokio::test]
    async fn spawn_failures_surface_as_channel_errors() {
        let provider = StdioSessionProvider::new("/nonexistent/registry-binary", Vec::new());
        let err = provider.open().await.err().unwrap();
        assert!(matches!(err, VoiceAgentError::Mcp(_)));
    }

    struct CloseFails;

    #[async_trait]
    impl CapabilitySession for CloseFails {
        async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>> {
            Ok(Vec::new())
        }

        async fn list_prompts(&mut self) -> Result<Vec<PromptDescriptor>> {
            Err(VoiceAgentError::Mcp("pipe closed".into()))
        }

        async fn get_prompt(
            &mut self,
            name: &str,
            _arguments: &HashMap<String, String>,
        ) -> Result<Vec<PromptMessage>> {
            Err(VoiceAgentError::PromptNotFound(name.into()))
        }

        async fn call_tool(&mut self, _name: &str, _arguments: Value) -> Result<ToolOutcome> {
            Ok(ToolOutcome::Success(String::new()))
        }

        async fn close(&mut self) -> Result<()> {
            Err(VoiceAgentError::Mcp("close failed".into()))
        }
    }

    #[tokio::test]
    async fn release_keeps_the_operation_error() {
        let mut session: Box<dyn CapabilitySession> = Box::new(CloseFails);
        let listed = session.list_prompts().await;
        let err = release(session, listed).await.unwrap_err();
        assert_eq!(err.to_string(), "registry channel error: pipe closed");

        let session: Box<dyn CapabilitySession> = Box::new(CloseFails);
        let err = release(session, Ok(())).await.unwrap_err();
        assert_eq!(err.to_string(), "registry channel error: close failed");
    }

    #[test]
    fn http_transport_requires_a_url() {
        let mut cfg = AppConfig::default();
        cfg.registry.transport = RegistryTransport::Http;
        assert!(matches!(
            provider_from_config(&cfg, None).err().unwrap(),
            VoiceAgentError::Configuration(_)
        ));
    }

    #[test]
    fn failure_outcomes_convert_to_tool_errors() {
        let err = ToolOutcome::Failure("boom".into())
            .into_result("get_emails")
            .unwrap_err();
        assert_eq!(err.to_string(), "tool `get_emails` invocation failed: boom");
    }
}
