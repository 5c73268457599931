//! Registry contents for the email assistant:
//! - `get_emails`: recent Gmail messages as JSON
//! - `tts_instagram_audio`: MP3 speech synthesis
//! - the assistant, summary and audio-summary prompts

pub mod email_text;
pub mod gmail;
pub mod google_auth;
pub mod tts;

use std::sync::Arc;

pub use gmail::{EmailSummary, GetEmailsTool, GmailClient};
pub use google_auth::GoogleCredentials;
pub use tts::{TtsClient, TtsTool};

use crate::config::AppConfig;
use crate::prompts::register_email_prompts;
use crate::tool::Registry;

/// The registry served to the agent: two tools and three prompts, under the
/// configured names.
pub fn email_registry(cfg: &AppConfig) -> Registry {
    let credentials = Arc::new(GoogleCredentials::from_config(&cfg.google));

    let mut registry = Registry::new();
    registry.register(GetEmailsTool::new(
        &cfg.tools.get_emails_tool,
        GmailClient::from_config(&cfg.google, Arc::clone(&credentials)),
    ));
    registry.register(TtsTool::new(
        &cfg.tools.tts_tool,
        TtsClient::from_config(&cfg.google, credentials),
    ));
    register_email_prompts(&mut registry, &cfg.prompts);

    tracing::debug!(tools = ?registry.tool_names(), "email registry assembled");
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_two_tools_and_three_prompts() {
        let registry = email_registry(&AppConfig::default());
        assert_eq!(registry.tool_names(), vec!["get_emails", "tts_instagram_audio"]);
        assert_eq!(registry.list_prompts().len(), 3);
    }

    #[test]
    fn tool_schemas_are_declared() {
        let registry = email_registry(&AppConfig::default());
        for tool in registry.list_tools() {
            let schema = tool.input_schema.expect("schema");
            assert_eq!(schema["type"], "object");
        }
    }
}
