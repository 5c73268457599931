use thiserror::Error;

pub type Result<T> = std::result::Result<T, VoiceAgentError>;

#[derive(Debug, Error)]
pub enum VoiceAgentError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("tool `{0}` not found")]
    ToolNotFound(String),

    #[error("prompt `{0}` not found")]
    PromptNotFound(String),

    #[error("tool `{name}` invocation failed: {source}")]
    ToolInvocation {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("language model error: {0}")]
    LanguageModel(String),

    /// The registry channel itself failed: spawn, framing, timeout, closed pipe.
    #[error("registry channel error: {0}")]
    Mcp(String),

    /// The registry answered with a JSON-RPC error object.
    #[error("registry error {code}: {message}")]
    Remote { code: i32, message: String },

    #[error("http error: {0}")]
    Http(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl VoiceAgentError {
    pub fn tool_failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        let message: String = message.into();
        VoiceAgentError::ToolInvocation {
            name: name.into(),
            source: message.into(),
        }
    }
}
