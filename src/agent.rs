//! The email assistant: a bounded tool-calling loop over a registry session.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::config::{AppConfig, PromptNames, ToolNames};
use crate::error::{Result, VoiceAgentError};
use crate::llm::{CompletionOptions, FunctionTool, LanguageModel, OpenAIClient};
use crate::message::{AgentOutcome, Message, ToolCall, ToolResult};
use crate::prompts::{fallback_prompt, PromptPurpose, DEFAULT_TIMESPAN};
use crate::session::{release, CapabilitySession, SessionProvider, ToolOutcome};
use crate::telemetry::preview;
use crate::tool::{first_message_text, ToolDescriptor};

/// Final answer when every round ended in tool calls.
pub const ROUND_LIMIT_MESSAGE: &str = "Sorry, I couldn't complete the request.";

/// What the model sees in place of synthesized audio.
pub const AUDIO_PLACEHOLDER: &str = "[Audio generated successfully]";

pub struct VoiceAgent {
    model: Option<Arc<dyn LanguageModel>>,
    sessions: Arc<dyn SessionProvider>,
    max_rounds: usize,
    temperature: f32,
    tools: ToolNames,
    prompts: PromptNames,
}

impl VoiceAgent {
    pub fn new(sessions: Arc<dyn SessionProvider>) -> Self {
        Self {
            model: None,
            sessions,
            max_rounds: 4,
            temperature: 0.2,
            tools: ToolNames::default(),
            prompts: PromptNames::default(),
        }
    }

    /// Build from configuration. Without an OpenAI key the agent still serves
    /// prompt lookups and direct tool calls, but agentic queries fail.
    pub fn from_config(cfg: &AppConfig, sessions: Arc<dyn SessionProvider>) -> Result<Self> {
        let agent = Self::new(sessions)
            .with_max_rounds(cfg.agent.max_rounds)
            .with_temperature(cfg.agent.temperature)
            .with_tool_names(cfg.tools.clone())
            .with_prompt_names(cfg.prompts.clone());

        if cfg.openai.api_key.is_none() {
            tracing::warn!("OPENAI_API_KEY not set; agentic queries are disabled");
            return Ok(agent);
        }
        let client = OpenAIClient::from_config(&cfg.openai)?;
        tracing::info!(model = %client.model(), "language model configured");
        Ok(agent.with_model(Arc::new(client)))
    }

    pub fn with_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_tool_names(mut self, tools: ToolNames) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_prompt_names(mut self, prompts: PromptNames) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn tool_names(&self) -> &ToolNames {
        &self.tools
    }

    fn model(&self) -> Result<&Arc<dyn LanguageModel>> {
        self.model.as_ref().ok_or_else(|| {
            VoiceAgentError::Configuration("a language model must be set for agentic queries".into())
        })
    }

    /// Answer `query` in a fresh registry session.
    pub async fn run_agentic_query(&self, query: &str) -> Result<AgentOutcome> {
        self.model()?;
        let mut session = self.sessions.open().await?;
        let result = self.run_agentic_query_in(session.as_mut(), query).await;
        release(session, result).await
    }

    /// Answer `query` using a session the caller owns and will close.
    pub async fn run_agentic_query_in(
        &self,
        session: &mut dyn CapabilitySession,
        query: &str,
    ) -> Result<AgentOutcome> {
        let model = Arc::clone(self.model()?);

        let tools = tool_schemas(&session.list_tools().await?);
        let system_prompt = self.assistant_prompt(session).await;
        let options = CompletionOptions::with_temperature(self.temperature);

        let mut messages = vec![Message::system(system_prompt), Message::user(query)];
        let mut audio = None;

        for round in 1..=self.max_rounds {
            tracing::debug!(round, messages = messages.len(), "completion round");
            let completion = model.complete_chat(&messages, &tools, &options).await?;

            if completion.tool_calls.is_empty() {
                let text = completion.content.unwrap_or_default();
                tracing::info!(round, audio = audio.is_some(), "agent answered");
                return Ok(AgentOutcome::new(text, audio));
            }

            messages.push(Message::assistant_with_tool_calls(
                completion.content.unwrap_or_default(),
                completion.tool_calls.clone(),
            ));

            for call in completion.tool_calls {
                let text = self.execute_call(session, &call, &mut audio).await;
                messages.push(Message::tool(ToolResult {
                    tool_call_id: call.id,
                    name: call.name,
                    text,
                }));
            }
        }

        tracing::warn!(rounds = self.max_rounds, "round limit reached without a final answer");
        Ok(AgentOutcome::new(ROUND_LIMIT_MESSAGE, None))
    }

    async fn execute_call(
        &self,
        session: &mut dyn CapabilitySession,
        call: &ToolCall,
        audio: &mut Option<String>,
    ) -> String {
        let arguments = parse_arguments(&call.arguments);
        tracing::info!(tool = %call.name, call_id = %call.id, "calling tool");

        match session.call_tool(&call.name, arguments).await {
            Ok(ToolOutcome::Success(text)) if call.name == self.tools.tts_tool => {
                tracing::debug!(tool = %call.name, audio = %preview(&text, 32), "audio captured");
                *audio = Some(text);
                AUDIO_PLACEHOLDER.to_string()
            }
            Ok(ToolOutcome::Success(text)) => {
                tracing::debug!(tool = %call.name, result = %preview(&text, 200), "tool succeeded");
                text
            }
            Ok(ToolOutcome::Failure(message)) => {
                tracing::warn!(tool = %call.name, error = %message, "tool reported failure");
                format!("ERROR: {message}")
            }
            Err(err) => {
                tracing::warn!(tool = %call.name, error = %err, "tool call failed");
                format!("ERROR: {err}")
            }
        }
    }

    async fn assistant_prompt(&self, session: &mut dyn CapabilitySession) -> String {
        match self.registry_assistant_prompt(session).await {
            Ok(Some(text)) => text,
            Ok(None) => {
                tracing::debug!(prompt = %self.prompts.assistant_prompt, "assistant prompt not listed, using fallback");
                fallback_prompt(PromptPurpose::Assistant, None)
            }
            Err(err) => {
                tracing::warn!(error = %err, "assistant prompt lookup failed, using fallback");
                fallback_prompt(PromptPurpose::Assistant, None)
            }
        }
    }

    async fn registry_assistant_prompt(
        &self,
        session: &mut dyn CapabilitySession,
    ) -> Result<Option<String>> {
        let name = &self.prompts.assistant_prompt;
        let listed = session.list_prompts().await?;
        if !listed.iter().any(|prompt| &prompt.name == name) {
            return Ok(None);
        }
        let messages = session.get_prompt(name, &HashMap::new()).await?;
        Ok(first_message_text(&messages))
    }

    /// Summary format prompt from the registry, or the static text for the
    /// same purpose when the registry cannot be reached or lacks it.
    pub async fn get_summary_prompt(&self, timespan: Option<&str>, for_audio: bool) -> String {
        let purpose = PromptPurpose::summary(for_audio);
        let mut session = match self.sessions.open().await {
            Ok(session) => session,
            Err(err) => {
                tracing::warn!(error = %err, "could not open registry session, using fallback prompt");
                return fallback_prompt(purpose, timespan);
            }
        };
        let prompt = self.get_summary_prompt_in(session.as_mut(), timespan, for_audio).await;
        if let Err(err) = session.close().await {
            tracing::warn!(error = %err, "failed to close registry session");
        }
        prompt
    }

    pub async fn get_summary_prompt_in(
        &self,
        session: &mut dyn CapabilitySession,
        timespan: Option<&str>,
        for_audio: bool,
    ) -> String {
        let timespan = timespan.unwrap_or(DEFAULT_TIMESPAN);
        let purpose = PromptPurpose::summary(for_audio);
        let name = if for_audio {
            &self.prompts.summary_audio_prompt
        } else {
            &self.prompts.summary_prompt
        };

        let arguments = HashMap::from([("timespan".to_string(), timespan.to_string())]);
        match session.get_prompt(name, &arguments).await {
            Ok(messages) => first_message_text(&messages).unwrap_or_else(|| {
                tracing::debug!(prompt = %name, "summary prompt returned no text, using fallback");
                fallback_prompt(purpose, Some(timespan))
            }),
            Err(err) => {
                tracing::warn!(prompt = %name, error = %err, "summary prompt lookup failed, using fallback");
                fallback_prompt(purpose, Some(timespan))
            }
        }
    }

    /// Invoke one registry tool directly, in its own session.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<String> {
        let mut session = self.sessions.open().await?;
        let result = match session.call_tool(name, arguments).await {
            Ok(outcome) => outcome.into_result(name),
            Err(err) => Err(err),
        };
        release(session, result).await
    }

    /// One tool-free completion: `system_prompt` plus the emails as the user turn.
    pub async fn summarize(&self, system_prompt: &str, emails_json: &str) -> Result<String> {
        let model = self.model()?;
        let messages = vec![Message::system(system_prompt), Message::user(emails_json)];
        let options = CompletionOptions::with_temperature(self.temperature);
        let completion = model.complete_chat(&messages, &[], &options).await?;
        Ok(completion.content.unwrap_or_default())
    }

    /// Fetch the last `days` of mail, summarize it for `timespan` and, for
    /// audio, synthesize the summary. Runs in one session.
    pub async fn summarize_period(
        &self,
        days: u32,
        timespan: &str,
        for_audio: bool,
    ) -> Result<AgentOutcome> {
        self.model()?;
        let mut session = self.sessions.open().await?;
        let result = self
            .summarize_period_in(session.as_mut(), days, timespan, for_audio)
            .await;
        release(session, result).await
    }

    async fn summarize_period_in(
        &self,
        session: &mut dyn CapabilitySession,
        days: u32,
        timespan: &str,
        for_audio: bool,
    ) -> Result<AgentOutcome> {
        let emails = session
            .call_tool(&self.tools.get_emails_tool, json!({ "days": days }))
            .await?
            .into_result(&self.tools.get_emails_tool)?;
        tracing::debug!(emails = %preview(&emails, 200), "emails fetched");

        let prompt = self.get_summary_prompt_in(session, Some(timespan), for_audio).await;
        let summary = self.summarize(&prompt, &emails).await?;
        if !for_audio {
            return Ok(AgentOutcome::new(summary, None));
        }

        let audio = session
            .call_tool(&self.tools.tts_tool, json!({ "text": summary }))
            .await?
            .into_result(&self.tools.tts_tool)?;
        Ok(AgentOutcome::new(summary, Some(audio)))
    }
}

fn empty_object_schema() -> Value {
    json!({
        "type": "object",
        "properties": {},
        "additionalProperties": false
    })
}

/// Model-facing declarations for the registry's tools, in listing order.
pub fn tool_schemas(descriptors: &[ToolDescriptor]) -> Vec<FunctionTool> {
    descriptors
        .iter()
        .map(|tool| {
            let description = tool
                .description
                .clone()
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| format!("Execute {}", tool.name));
            let parameters = match &tool.input_schema {
                Some(Value::Object(schema)) if !schema.is_empty() => Value::Object(schema.clone()),
                Some(Value::Null) | Some(Value::Object(_)) | None => empty_object_schema(),
                Some(other) => other.clone(),
            };
            FunctionTool::new(tool.name.clone(), description, parameters)
        })
        .collect()
}

/// Parse a model-supplied argument string. Anything that is not a JSON
/// object becomes `{}`.
pub fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Value::Object(map),
        Ok(other) => {
            tracing::debug!(arguments = %other, "tool arguments are not an object, using {{}}");
            Value::Object(Map::new())
        }
        Err(err) => {
            tracing::debug!(%err, "unparsable tool arguments, using {{}}");
            Value::Object(Map::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ModelCompletion, ScriptedModel};
    use crate::server::McpServer;
    use crate::session::LocalSessionProvider;
    use crate::tool::{Registry, Tool};
    use async_trait::async_trait;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes the `text` argument"
        }

        async fn call(&self, input: Value) -> Result<Value> {
            Ok(input.get("text").cloned().unwrap_or(Value::Null))
        }
    }

    fn agent_with(model: Arc<ScriptedModel>) -> VoiceAgent {
        let mut registry = Registry::new();
        registry.register(EchoTool);
        let provider = LocalSessionProvider::new(Arc::new(McpServer::new(registry)));
        VoiceAgent::new(Arc::new(provider)).with_model(model)
    }

    #[test]
    fn schemas_fill_in_missing_metadata() {
        let descriptors = vec![
            ToolDescriptor {
                name: "bare".into(),
                description: Some(String::new()),
                input_schema: Some(json!({})),
            },
            ToolDescriptor {
                name: "typed".into(),
                description: Some("Typed".into()),
                input_schema: Some(json!({"type": "object", "properties": {"days": {"type": "integer"}}})),
            },
        ];

        let schemas = tool_schemas(&descriptors);
        assert_eq!(schemas[0].function.description, "Execute bare");
        assert_eq!(schemas[0].function.parameters, empty_object_schema());
        assert_eq!(schemas[1].function.parameters, descriptors[1].input_schema.clone().unwrap());
    }

    #[test]
    fn malformed_arguments_become_empty_objects() {
        assert_eq!(parse_arguments(""), json!({}));
        assert_eq!(parse_arguments("{\"days\": 0"), json!({}));
        assert_eq!(parse_arguments("[1, 2]"), json!({}));
        assert_eq!(parse_arguments("{\"days\": 2}"), json!({"days": 2}));
    }

    #[tokio::test]
    async fn feeds_tool_results_back_by_call_id() {
        let model = ScriptedModel::new(vec![
            ModelCompletion::tool_calls(vec![ToolCall::new("c1", "echo", "{\"text\":\"ping\"}")]),
            ModelCompletion::text("pong"),
        ]);
        let outcome = agent_with(model.clone()).run_agentic_query("say ping").await.unwrap();

        assert_eq!(outcome, AgentOutcome::new("pong", None));
        let last = model.requests().pop().unwrap();
        let tool_msg = last.messages.last().unwrap();
        assert_eq!(tool_msg.tool_call_id(), Some("c1"));
        assert_eq!(tool_msg.content, "ping");
    }

    #[tokio::test]
    async fn missing_model_is_a_configuration_error() {
        let provider = LocalSessionProvider::new(Arc::new(McpServer::new(Registry::new())));
        let err = VoiceAgent::new(Arc::new(provider))
            .run_agentic_query("hi")
            .await
            .unwrap_err();
        assert!(matches!(err, VoiceAgentError::Configuration(_)));
    }

    #[tokio::test]
    async fn honours_configured_round_cap() {
        let model = ScriptedModel::repeating(ModelCompletion::tool_call("echo", json!({"text": "x"})));
        let outcome = agent_with(model.clone())
            .with_max_rounds(2)
            .run_agentic_query("loop")
            .await
            .unwrap();

        assert_eq!(outcome.text, ROUND_LIMIT_MESSAGE);
        assert_eq!(model.request_count(), 2);
    }
}
