//! Chat-completion providers.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::OpenAiConfig;
use crate::error::{Result, VoiceAgentError};
use crate::message::{Message, Role, ToolCall};

/// Tool declaration in the model's function-calling format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionTool {
    pub r#type: String,
    pub function: FunctionSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl FunctionTool {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            r#type: "function".to_string(),
            function: FunctionSpec {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    pub temperature: f32,
    /// Sent only when tools are offered.
    pub tool_choice: String,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            tool_choice: "auto".to_string(),
        }
    }
}

impl CompletionOptions {
    pub fn with_temperature(temperature: f32) -> Self {
        Self {
            temperature,
            ..Self::default()
        }
    }
}

/// Result of a chat completion request.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ModelCompletion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl ModelCompletion {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            content: None,
            tool_calls: calls,
        }
    }

    pub fn tool_call(name: impl Into<String>, arguments: Value) -> Self {
        let id = format!("call_{}", uuid::Uuid::new_v4().simple());
        Self::tool_calls(vec![ToolCall::new(id, name, arguments.to_string())])
    }
}

/// Minimal abstraction around a chat completion provider.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete_chat(
        &self,
        messages: &[Message],
        tools: &[FunctionTool],
        options: &CompletionOptions,
    ) -> Result<ModelCompletion>;
}

fn coalesce_error(status: reqwest::StatusCode, body: &str, provider: &str) -> VoiceAgentError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return VoiceAgentError::LanguageModel(format!("{provider} rate limit exceeded: {body}"));
    }
    VoiceAgentError::LanguageModel(format!("{provider} request failed with {status}: {body}"))
}

#[derive(Clone)]
pub struct OpenAIClient {
    http: reqwest::Client,
    model: String,
    api_key: String,
    base_url: String,
    organization: Option<String>,
}

impl OpenAIClient {
    pub fn from_config(cfg: &OpenAiConfig) -> Result<Self> {
        let api_key = cfg
            .api_key
            .clone()
            .ok_or_else(|| VoiceAgentError::Configuration("OPENAI_API_KEY is not set".into()))?;
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(cfg.timeout_secs))
                .build()
                .map_err(|err| VoiceAgentError::LanguageModel(format!("http client error: {err}")))?,
            model: cfg.model.clone(),
            api_key,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            organization: cfg.organization.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn to_openai_messages(&self, messages: &[Message]) -> Vec<OpenAiMessage> {
        messages
            .iter()
            .map(|message| {
                let role = match message.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::Tool => "tool",
                }
                .to_string();

                let tool_calls = (!message.tool_calls.is_empty()).then(|| {
                    message
                        .tool_calls
                        .iter()
                        .map(|call| OpenAiToolCall {
                            id: Some(call.id.clone()),
                            r#type: "function".to_string(),
                            function: OpenAiFunctionCall {
                                name: call.name.clone(),
                                arguments: call.arguments.clone(),
                            },
                        })
                        .collect()
                });

                // Assistant turns that only carry tool calls go out with null content.
                let content = if message.role == Role::Assistant
                    && message.content.is_empty()
                    && tool_calls.is_some()
                {
                    None
                } else {
                    Some(message.content.clone())
                };

                OpenAiMessage {
                    role,
                    content,
                    tool_call_id: message.tool_result.as_ref().map(|r| r.tool_call_id.clone()),
                    name: message.tool_result.as_ref().map(|r| r.name.clone()),
                    tool_calls,
                }
            })
            .collect()
    }

    fn build_payload(
        &self,
        messages: &[Message],
        tools: &[FunctionTool],
        options: &CompletionOptions,
    ) -> Result<Value> {
        let mut payload = json!({
            "model": self.model,
            "messages": self.to_openai_messages(messages),
            "temperature": options.temperature,
        });
        if !tools.is_empty() {
            payload["tools"] = serde_json::to_value(tools)?;
            payload["tool_choice"] = Value::String(options.tool_choice.clone());
        }
        Ok(payload)
    }
}

#[async_trait]
impl LanguageModel for OpenAIClient {
    async fn complete_chat(
        &self,
        messages: &[Message],
        tools: &[FunctionTool],
        options: &CompletionOptions,
    ) -> Result<ModelCompletion> {
        let payload = self.build_payload(messages, tools, options)?;

        let mut builder = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", self.api_key),
            );
        if let Some(org) = &self.organization {
            builder = builder.header("OpenAI-Organization", org);
        }

        tracing::debug!(model = %self.model, messages = messages.len(), tools = tools.len(), "chat completion request");
        let resp = builder
            .json(&payload)
            .send()
            .await
            .map_err(|err| VoiceAgentError::LanguageModel(format!("OpenAI request error: {err}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(coalesce_error(status, &body, "openai"));
        }

        let body: OpenAiResponse = resp.json().await.map_err(|err| {
            VoiceAgentError::LanguageModel(format!("OpenAI response parse error: {err}"))
        })?;

        let first = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| VoiceAgentError::LanguageModel("OpenAI returned no choices".into()))?;

        let tool_calls = first
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| {
                let id = call
                    .id
                    .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
                ToolCall::new(id, call.function.name, call.function.arguments)
            })
            .collect();

        Ok(ModelCompletion {
            content: first.message.content,
            tool_calls,
        })
    }
}

/// One recorded `complete_chat` invocation.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<FunctionTool>,
    pub options: CompletionOptions,
}

/// A deterministic model used for tests and demos. Replays scripted
/// completions in order and records every request it receives.
#[derive(Default)]
pub struct ScriptedModel {
    responses: Mutex<VecDeque<ModelCompletion>>,
    repeat: Option<ModelCompletion>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<ModelCompletion>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            ..Self::default()
        })
    }

    /// A model that answers every request with the same completion.
    pub fn repeating(completion: ModelCompletion) -> Arc<Self> {
        Arc::new(Self {
            repeat: Some(completion),
            ..Self::default()
        })
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete_chat(
        &self,
        messages: &[Message],
        tools: &[FunctionTool],
        options: &CompletionOptions,
    ) -> Result<ModelCompletion> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(RecordedRequest {
                messages: messages.to_vec(),
                tools: tools.to_vec(),
                options: options.clone(),
            });

        let next = self
            .responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front();
        next.or_else(|| self.repeat.clone()).ok_or_else(|| {
            VoiceAgentError::LanguageModel("ScriptedModel ran out of scripted responses".into())
        })
    }
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: String,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default = "function_type")]
    r#type: String,
    function: OpenAiFunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiToolCall>>,
}
