//! Name-keyed catalog of callable tools and renderable prompt templates.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, VoiceAgentError};

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;

    /// Optionally return a JSON Schema object describing the expected arguments.
    fn parameters(&self) -> Option<Value> {
        None
    }

    async fn call(&self, input: Value) -> Result<Value>;
}

/// A parameterized prompt. Rendering substitutes string arguments into a
/// template and yields the prompt text.
pub trait PromptTemplate: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;

    fn arguments(&self) -> Vec<PromptArgument> {
        Vec::new()
    }

    fn render(&self, arguments: &HashMap<String, String>) -> Result<String>;
}

/// Tool metadata as listed by the registry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PromptDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<PromptArgument>,
}

/// One content block of a tool result or prompt message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentItem {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image {
        data: String,
        #[serde(rename = "mimeType", default)]
        mime_type: Option<String>,
    },
    #[serde(rename = "resource")]
    Resource { resource: Value },
}

impl ContentItem {
    pub fn text(text: impl Into<String>) -> Self {
        ContentItem::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentItem::Text { text } => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: String,
    pub content: ContentItem,
}

impl PromptMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: ContentItem::text(text),
        }
    }
}

/// Text of the first rendered prompt message, the only part this system uses.
pub fn first_message_text(messages: &[PromptMessage]) -> Option<String> {
    messages
        .first()
        .and_then(|m| m.content.as_text())
        .map(str::to_string)
}

#[derive(Default, Clone)]
pub struct Registry {
    tools: HashMap<String, Arc<dyn Tool>>,
    prompts: HashMap<String, Arc<dyn PromptTemplate>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn register_prompt<P: PromptTemplate + 'static>(&mut self, prompt: P) {
        self.prompts
            .insert(prompt.name().to_string(), Arc::new(prompt));
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        let mut descriptors: Vec<ToolDescriptor> = self
            .tools
            .values()
            .map(|tool| ToolDescriptor {
                name: tool.name().to_string(),
                description: Some(tool.description().to_string()),
                input_schema: tool.parameters(),
            })
            .collect();

        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    pub fn list_prompts(&self) -> Vec<PromptDescriptor> {
        let mut descriptors: Vec<PromptDescriptor> = self
            .prompts
            .values()
            .map(|prompt| PromptDescriptor {
                name: prompt.name().to_string(),
                description: Some(prompt.description().to_string()),
                arguments: prompt.arguments(),
            })
            .collect();

        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub async fn call_tool(&self, name: &str, input: Value) -> Result<Value> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| VoiceAgentError::ToolNotFound(name.to_string()))?;
        tool.call(input)
            .await
            .map_err(|source| VoiceAgentError::ToolInvocation {
                name: name.to_string(),
                source: Box::new(source),
            })
    }

    pub fn get_prompt(
        &self,
        name: &str,
        arguments: &HashMap<String, String>,
    ) -> Result<Vec<PromptMessage>> {
        let prompt = self
            .prompts
            .get(name)
            .ok_or_else(|| VoiceAgentError::PromptNotFound(name.to_string()))?;
        let text = prompt.render(arguments)?;
        Ok(vec![PromptMessage::user(text)])
    }
}

/// Plain-text rendering of a tool's return value.
pub fn value_to_text(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct First;
    struct Second;

    #[async_trait]
    impl Tool for First {
        fn name(&self) -> &str {
            "a_first"
        }

        fn description(&self) -> &str {
            "First tool"
        }

        async fn call(&self, input: Value) -> Result<Value> {
            Ok(input)
        }
    }

    #[async_trait]
    impl Tool for Second {
        fn name(&self) -> &str {
            "second"
        }

        fn description(&self) -> &str {
            "Second tool"
        }

        fn parameters(&self) -> Option<Value> {
            Some(json!({"type": "object", "properties": {"n": {"type": "integer"}}}))
        }

        async fn call(&self, _input: Value) -> Result<Value> {
            Err(VoiceAgentError::Http("upstream 503".into()))
        }
    }

    struct Greeting;

    impl PromptTemplate for Greeting {
        fn name(&self) -> &str {
            "greeting"
        }

        fn description(&self) -> &str {
            "Says hello"
        }

        fn render(&self, arguments: &HashMap<String, String>) -> Result<String> {
            let who = arguments.get("who").map(String::as_str).unwrap_or("world");
            Ok(format!("hello {who}"))
        }
    }

    #[tokio::test]
    async fn returns_sorted_descriptions() {
        let mut registry = Registry::new();
        registry.register(Second);
        registry.register(First);

        let names: Vec<String> = registry.list_tools().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["a_first", "second"]);
        assert_eq!(registry.list_tools()[0].input_schema, None);
    }

    #[tokio::test]
    async fn wraps_tool_failures_with_the_tool_name() {
        let mut registry = Registry::new();
        registry.register(Second);

        let err = registry.call_tool("second", json!({})).await.unwrap_err();
        assert!(err.to_string().contains("tool `second` invocation failed"));

        let missing = registry.call_tool("nope", json!({})).await.unwrap_err();
        assert!(matches!(missing, VoiceAgentError::ToolNotFound(name) if name == "nope"));
    }

    #[test]
    fn renders_prompts_as_a_single_user_message() {
        let mut registry = Registry::new();
        registry.register_prompt(Greeting);

        let args = HashMap::from([("who".to_string(), "inbox".to_string())]);
        let messages = registry.get_prompt("greeting", &args).unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(first_message_text(&messages).as_deref(), Some("hello inbox"));
        assert!(matches!(
            registry.get_prompt("other", &HashMap::new()),
            Err(VoiceAgentError::PromptNotFound(_))
        ));
    }

    #[test]
    fn tool_descriptor_uses_mcp_field_names() {
        let descriptor: ToolDescriptor = serde_json::from_value(json!({
            "name": "read_file",
            "inputSchema": {"type": "object"}
        }))
        .unwrap();
        assert_eq!(descriptor.description, None);
        assert_eq!(descriptor.input_schema, Some(json!({"type": "object"})));
    }
}
