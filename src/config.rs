use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VoiceAgentError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default = "default_telegram_api")]
    pub api_base: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            api_base: default_telegram_api(),
        }
    }
}

fn default_telegram_api() -> String {
    "https://api.telegram.org".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpenAiConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            base_url: default_openai_base_url(),
            organization: None,
            timeout_secs: default_http_timeout(),
        }
    }
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_http_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GoogleConfig {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Authorized-user token JSON (the `GMAIL_TOKEN` format).
    #[serde(default)]
    pub gmail_token: Option<String>,
    #[serde(default)]
    pub gmail_access_token: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default = "default_gmail_base_url")]
    pub gmail_base_url: String,
    #[serde(default)]
    pub tts_api_key: Option<String>,
    #[serde(default = "default_tts_endpoint")]
    pub tts_endpoint: String,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            gmail_token: None,
            gmail_access_token: None,
            token_uri: default_token_uri(),
            gmail_base_url: default_gmail_base_url(),
            tts_api_key: None,
            tts_endpoint: default_tts_endpoint(),
        }
    }
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".into()
}

fn default_gmail_base_url() -> String {
    "https://gmail.googleapis.com/gmail/v1".into()
}

fn default_tts_endpoint() -> String {
    "https://texttospeech.googleapis.com/v1/text:synthesize".into()
}

/// Registry names of the two tools the agent cares about.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolNames {
    #[serde(default = "default_get_emails_tool")]
    pub get_emails_tool: String,
    #[serde(default = "default_tts_tool")]
    pub tts_tool: String,
}

impl Default for ToolNames {
    fn default() -> Self {
        Self {
            get_emails_tool: default_get_emails_tool(),
            tts_tool: default_tts_tool(),
        }
    }
}

fn default_get_emails_tool() -> String {
    "get_emails".into()
}

fn default_tts_tool() -> String {
    "tts_instagram_audio".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptNames {
    #[serde(default = "default_assistant_prompt")]
    pub assistant_prompt: String,
    #[serde(default = "default_summary_prompt")]
    pub summary_prompt: String,
    #[serde(default = "default_summary_audio_prompt")]
    pub summary_audio_prompt: String,
}

impl Default for PromptNames {
    fn default() -> Self {
        Self {
            assistant_prompt: default_assistant_prompt(),
            summary_prompt: default_summary_prompt(),
            summary_audio_prompt: default_summary_audio_prompt(),
        }
    }
}

fn default_assistant_prompt() -> String {
    "email_assistant_system_prompt".into()
}

fn default_summary_prompt() -> String {
    "email_summary_format_prompt".into()
}

fn default_summary_audio_prompt() -> String {
    "email_summary_audio_format_prompt".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            temperature: default_temperature(),
        }
    }
}

fn default_max_rounds() -> usize {
    4
}

fn default_temperature() -> f32 {
    0.2
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RegistryTransport {
    #[default]
    Stdio,
    InProcess,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegistryConfig {
    #[serde(default)]
    pub transport: RegistryTransport,
    /// Registry executable. Unset means this binary's own `registry` subcommand.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Endpoint for the `http` transport.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            transport: RegistryTransport::default(),
            command: None,
            args: Vec::new(),
            url: None,
            request_timeout_secs: default_request_timeout(),
            shutdown_grace_ms: default_shutdown_grace(),
        }
    }
}

impl RegistryConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn default_request_timeout() -> u64 {
    120
}

fn default_shutdown_grace() -> u64 {
    500
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub google: GoogleConfig,
    #[serde(default)]
    pub tools: ToolNames,
    #[serde(default)]
    pub prompts: PromptNames,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let cfg: Self = toml::from_str(&raw).map_err(|err| {
            VoiceAgentError::Configuration(format!("failed to parse configuration: {err}"))
        })?;
        Ok(cfg)
    }

    /// Load the optional TOML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        cfg.apply_env();
        Ok(cfg)
    }

    pub fn apply_env(&mut self) {
        if let Some(token) = non_empty_var("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = Some(token);
        }
        if let Some(key) = non_empty_var("OPENAI_API_KEY") {
            self.openai.api_key = Some(key);
        }
        if let Some(model) = non_empty_var("OPENAI_MODEL") {
            self.openai.model = model;
        }
        if let Some(url) = non_empty_var("OPENAI_BASE_URL") {
            self.openai.base_url = url;
        }
        if let Some(id) = non_empty_var("GOOGLE_CLIENT_ID") {
            self.google.client_id = Some(id);
        }
        if let Some(secret) = non_empty_var("GOOGLE_CLIENT_SECRET") {
            self.google.client_secret = Some(secret);
        }
        if let Some(token) = non_empty_var("GMAIL_TOKEN") {
            self.google.gmail_token = Some(token);
        }
        if let Some(token) = non_empty_var("GMAIL_ACCESS_TOKEN") {
            self.google.gmail_access_token = Some(token);
        }
        if let Some(key) = non_empty_var("GOOGLE_TTS_API_KEY") {
            self.google.tts_api_key = Some(key);
        }
        if let Some(rounds) = non_empty_var("VOICE_AGENT_MAX_ROUNDS") {
            if let Ok(parsed) = rounds.parse::<usize>() {
                self.agent.max_rounds = parsed.max(1);
            }
        }
        if let Some(temperature) = non_empty_var("VOICE_AGENT_TEMPERATURE") {
            if let Ok(parsed) = temperature.parse::<f32>() {
                self.agent.temperature = parsed.clamp(0.0, 2.0);
            }
        }
        if let Some(command) = non_empty_var("VOICE_AGENT_REGISTRY_COMMAND") {
            self.registry.command = Some(command);
        }
        if let Some(url) = non_empty_var("VOICE_AGENT_REGISTRY_URL") {
            self.registry.url = Some(url);
        }
        if let Some(transport) = non_empty_var("VOICE_AGENT_REGISTRY_TRANSPORT") {
            self.registry.transport = match transport.to_ascii_lowercase().as_str() {
                "in_process" | "in-process" | "inprocess" => RegistryTransport::InProcess,
                "http" => RegistryTransport::Http,
                _ => RegistryTransport::Stdio,
            };
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_match_deployment_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.agent.max_rounds, 4);
        assert!((cfg.agent.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(cfg.tools.tts_tool, "tts_instagram_audio");
        assert_eq!(cfg.prompts.assistant_prompt, "email_assistant_system_prompt");
        assert_eq!(cfg.registry.transport, RegistryTransport::Stdio);
        assert_eq!(cfg.openai.model, "gpt-4o-mini");
    }

    #[test]
    fn loads_and_overrides() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[openai]\nmodel='gpt-4.1-mini'\n[agent]\nmax_rounds=6\n[registry]\ntransport='in_process'"
        )
        .unwrap();

        env::set_var("VOICE_AGENT_TEMPERATURE", "0.7");
        let cfg = AppConfig::load(Some(file.path())).unwrap();
        env::remove_var("VOICE_AGENT_TEMPERATURE");

        assert_eq!(cfg.openai.model, "gpt-4.1-mini");
        assert_eq!(cfg.agent.max_rounds, 6);
        assert!((cfg.agent.temperature - 0.7).abs() < 1e-6);
        assert_eq!(cfg.registry.transport, RegistryTransport::InProcess);
        assert_eq!(cfg.prompts.summary_prompt, "email_summary_format_prompt");
    }

    #[test]
    fn telegram_endpoint_defaults_without_a_telegram_table() {
        let cfg = AppConfig::load(None).unwrap();
        assert_eq!(cfg.telegram.api_base, "https://api.telegram.org");

        let cfg: AppConfig = toml::from_str("[openai]\nmodel='x'").unwrap();
        assert_eq!(cfg.telegram.api_base, "https://api.telegram.org");
    }

    #[test]
    fn rejects_malformed_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[agent\nmax_rounds=").unwrap();

        let err = AppConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, VoiceAgentError::Configuration(_)));
    }
}
