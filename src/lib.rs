//! Email summarization assistant built around a tool-calling agent loop.
//!
//! The crate provides:
//! - A language model abstraction (`LanguageModel`) with an OpenAI client.
//! - A tool/prompt `Registry` served over an MCP-style JSON-RPC channel.
//! - `VoiceAgent`, which runs bounded model/tool rounds over a registry session
//!   and falls back to built-in prompts when the registry lacks them.
//! - Gmail and Text-to-Speech tools, and a Telegram front end.

mod agent;
mod bot;
mod config;
mod error;
mod llm;
mod mcp;
mod message;
mod prompts;
mod server;
mod session;
mod telemetry;
mod tool;
pub mod tools;

pub use agent::{parse_arguments, tool_schemas, VoiceAgent, AUDIO_PLACEHOLDER, ROUND_LIMIT_MESSAGE};
pub use bot::{
    chunk_text, parse_command, render_error, wants_agent, ChatReplies, Command, EmailSummaryBot,
    TelegramApi, HELP_TEXT,
};
pub use config::{
    AgentConfig, AppConfig, GoogleConfig, OpenAiConfig, PromptNames, RegistryConfig,
    RegistryTransport, TelegramConfig, ToolNames,
};
pub use error::{Result, VoiceAgentError};
pub use llm::{
    CompletionOptions, FunctionTool, LanguageModel, ModelCompletion, OpenAIClient, RecordedRequest,
    ScriptedModel,
};
pub use mcp::{
    CallToolResult, HttpTransport, JsonRpcRequest, JsonRpcResponse, LocalTransport, McpClient,
    McpTransport, StdioTransport, PROTOCOL_VERSION,
};
pub use message::{AgentOutcome, Message, Role, ToolCall, ToolResult};
pub use prompts::{
    fallback_prompt, register_email_prompts, PromptPurpose, StaticPrompt, DEFAULT_TIMESPAN,
};
pub use server::McpServer;
pub use session::{
    provider_from_config, release, CapabilitySession, HttpSessionProvider, LocalSessionProvider,
    SessionProvider, StdioSessionProvider, ToolOutcome,
};
pub use telemetry::init_tracing;
pub use tool::{
    ContentItem, PromptArgument, PromptDescriptor, PromptMessage, PromptTemplate, Registry, Tool,
    ToolDescriptor,
};
pub use tools::email_registry;
