//! Conversation messages exchanged with the language model.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by the model.
///
/// `arguments` is kept exactly as the model produced it; it is only parsed
/// when the call is executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// Textual result of one executed tool call, correlated by call id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub name: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResult>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant_with_tool_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: calls,
            tool_result: None,
        }
    }

    pub fn tool(result: ToolResult) -> Self {
        Self {
            role: Role::Tool,
            content: result.text.clone(),
            tool_calls: Vec::new(),
            tool_result: Some(result),
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_result: None,
        }
    }

    pub fn tool_call_id(&self) -> Option<&str> {
        self.tool_result.as_ref().map(|r| r.tool_call_id.as_str())
    }
}

/// What a single agent query hands back to the front end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentOutcome {
    pub text: String,
    /// Base64 MP3 captured from the speech tool, if it ran.
    pub audio: Option<String>,
}

impl AgentOutcome {
    pub fn new(text: impl Into<String>, audio: Option<String>) -> Self {
        Self {
            text: text.into(),
            audio,
        }
    }

    pub fn into_parts(self) -> (String, Option<String>) {
        (self.text, self.audio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_message_mirrors_result_text() {
        let msg = Message::tool(ToolResult {
            tool_call_id: "call_1".into(),
            name: "get_emails".into(),
            text: "[]".into(),
        });

        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.content, "[]");
        assert_eq!(msg.tool_call_id(), Some("call_1"));
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
    }
}
