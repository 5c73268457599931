//! Process-wide logging setup.
//!
//! Everything goes to stderr: in registry mode stdout carries JSON-RPC frames
//! and must stay clean.

use tracing_subscriber::EnvFilter;

use crate::error::{Result, VoiceAgentError};

const DEFAULT_FILTER: &str = "voice_agent=info,warn";

/// Install the global `tracing` subscriber. `verbose` forces debug level for
/// this crate regardless of `RUST_LOG`.
pub fn init_tracing(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("voice_agent=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
        .map_err(|err| VoiceAgentError::Configuration(format!("tracing init failed: {err}")))
}

/// Shorten long payloads (base64 audio, email dumps) before they hit the log.
pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}… ({} chars)", text.chars().count())
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_keeps_short_text() {
        assert_eq!(preview("hello", 10), "hello");
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        let shortened = preview("ééééé", 2);
        assert!(shortened.starts_with("éé…"));
        assert!(shortened.ends_with("(5 chars)"));
    }
}
