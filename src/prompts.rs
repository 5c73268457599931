//! Static prompt texts and their registry templates.
//!
//! The registry serves these texts by name; the agent falls back to the same
//! texts through [`fallback_prompt`] whenever the registry cannot provide them.

use std::collections::HashMap;

use crate::config::PromptNames;
use crate::error::Result;
use crate::tool::{PromptArgument, PromptTemplate, Registry};

pub const DEFAULT_TIMESPAN: &str = "today";

const EMAIL_ASSISTANT_SYSTEM_PROMPT: &str = r#"You are an intelligent email assistant with
    - access to Gmail tools and,
    - text-to-speech capabilities.

YOUR TASK:
    - Analyze the user's request and automatically select the appropriate tool(s) to fulfill it.

AVAILABLE TOOLS:
    1. get_emails(days, max_results)
        - This is your PRIMARY tool for fetching emails
        - Fetch emails from the last N days
        - The "days" parameter determines the timeframe
        - You MUST decide the number of days based on the user's request

       HOW TO CHOOSE THE "days" PARAMETER FOR get_emails:
        - "today" or "today's emails" → days=0
        - "yesterday" → days=1
        - "last 2 days" → days=2
        - "last 3 days" → days=3
        - "last week" → days=7
        - "last 2 weeks" → days=14
        - "last 3 weeks" → days=21
        - "last month" → days=30
        - "recent" or "recent emails" → days=7 (default to a week)

    2. tts_instagram_audio(text) - Generate audio (MP3) from text
        - Use ONLY when user explicitly requests: "audio", "with audio", "read it to me"
        - Do NOT generate audio unless explicitly requested

WORKFLOW:
    1. Parse user request to determine timeframe (number of days)
    2. Call get_emails with appropriate "days" parameter
    3. Summarize the email data
    4. If user requested audio, call tts_instagram_audio with the summary text

OUTPUT FORMAT WHEN USER WANTS AUDIO:
    - Generate a CONVERSATIONAL, NATURAL-SOUNDING summary in spoken style
    - Write as if talking to a friend, use flowing sentences (not bullet points)
    - Say things like "You got an email from...", "Then...", "Also..."
    - Use natural transitions: "Next,", "Then,", "And finally,"
    - For dates, say them naturally: "on Tuesday", "last Friday"
    - Avoid formal markers like "Subject:", "From:", numbered lists
    - Use contractions and natural speech patterns
    - ABSOLUTELY NO MARKDOWN: No asterisks (**bold**), no underscores, no hashtags, no brackets
    - Plain text only - write as if speaking aloud
    - Then call tts_instagram_audio tool with the conversational summary

OUTPUT FORMAT FOR TEXT ONLY:
    - Plain text only. NO markdown, NO asterisks, NO brackets, NO code blocks
    - Use UPPERCASE section headers (e.g., SECURITY ALERTS, IMPORTANT ACTIONS)
    - Use numbered items and hyphen bullets for clarity
    - Show fields as 'From: ...', 'Subject: ...', 'Date: ...', 'Details: ...', 'Action: ...'
    - For links, include raw URLs as 'URL: https://...'
    - Group emails by topic/sender when it makes sense
    - Highlight action items, deadlines, and important numbers
    - Be specific and do not invent information beyond provided content
    - Keep summaries concise but informative
"#;

const EMAIL_SUMMARY_PROMPT: &str = r#"You summarize user emails. You receive a JSON array of emails with keys:
    - id, from, subject, date, body.

YOUR TASK:
    - Produce a concise, structured summary for {timespan}.

STRICT OUTPUT FORMAT:
    - Plain text only.
    - NO markdown, NO asterisks, NO brackets, NO code blocks.

FORMAT GUIDELINES:
    - Use UPPERCASE section headers (e.g., SECURITY ALERTS, IMPORTANT ACTIONS).
    - Use numbered items and hyphen bullets for clarity.
    - Show fields as 'From: ...', 'Subject: ...', 'Date: ...', 'Details: ...', 'Action: ...'.
    - For links, include raw URLs as 'URL: https://...'.
    - Group emails by topic/sender when it makes sense.
    - Highlight action items, deadlines, and important numbers.
    - Be specific and do not invent information beyond provided content.
    - Keep summaries concise but informative.
"#;

const EMAIL_SUMMARY_AUDIO_PROMPT: &str = r#"You summarize user emails for AUDIO playback. You receive a JSON array of emails with keys:
    - id, from, subject, date, body.

YOUR TASK:
    - Produce a CONVERSATIONAL, NATURAL-SOUNDING summary for {timespan}
      that will be spoken aloud.

AUDIO-FRIENDLY FORMAT:
    - Write in a CONVERSATIONAL, spoken style as if talking to a friend.
    - Use complete, flowing sentences (not bullet points or lists).
    - Say things like 'You got an email from...', 'There's a message from...',
      'Also, someone from X company reached out...'.
    - Use natural transitions: 'Next,', 'Also,', 'Then,', 'And finally,'.
    - For dates, say them naturally: 'on Tuesday', 'last Friday', 'earlier this week'.
    - Avoid formal structure markers like 'Number 1', 'Subject:', 'From:', 'Details:'.
    - Keep it brief but informative, imagine explaining to someone while driving.
    - Use contractions and natural speech patterns.
    - ABSOLUTELY NO MARKDOWN:
        - No asterisks (**bold**),
        - No underscores (__),
        - No hashtags (#),
        - No brackets,
        - No code blocks.
    - NO uppercase headers, just natural paragraph flow.
    - Plain text only, as if you're speaking, not writing.

EXAMPLE GOOD AUDIO FORMAT:
You have three emails from the last week.

First, OpenAI sent you a quick message on Tuesday asking you to give them a call.

Then on Sunday, you got a welcome email from Google
introducing their Gemini text-to-speech model with links to their documentation.

And finally, Anthropic sent you a welcome email on Friday with
your account setup confirmation and a temporary API key, along with links to their docs.

Be conversational and natural - this will be listened to, not read.
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptPurpose {
    Assistant,
    Summary,
    SummaryForAudio,
}

impl PromptPurpose {
    pub fn summary(for_audio: bool) -> Self {
        if for_audio {
            PromptPurpose::SummaryForAudio
        } else {
            PromptPurpose::Summary
        }
    }

    fn template(self) -> &'static str {
        match self {
            PromptPurpose::Assistant => EMAIL_ASSISTANT_SYSTEM_PROMPT,
            PromptPurpose::Summary => EMAIL_SUMMARY_PROMPT,
            PromptPurpose::SummaryForAudio => EMAIL_SUMMARY_AUDIO_PROMPT,
        }
    }

    fn takes_timespan(self) -> bool {
        !matches!(self, PromptPurpose::Assistant)
    }
}

/// Static text for `purpose` with `{timespan}` filled in (default `today`).
pub fn fallback_prompt(purpose: PromptPurpose, timespan: Option<&str>) -> String {
    purpose
        .template()
        .replace("{timespan}", timespan.unwrap_or(DEFAULT_TIMESPAN))
}

/// A registry prompt backed by one of the static texts.
pub struct StaticPrompt {
    name: String,
    description: &'static str,
    purpose: PromptPurpose,
}

impl StaticPrompt {
    pub fn new(name: impl Into<String>, purpose: PromptPurpose) -> Self {
        let description = match purpose {
            PromptPurpose::Assistant => {
                "System prompt for the email assistant agent with automatic tool selection."
            }
            PromptPurpose::Summary => "Format instructions for a structured email summary.",
            PromptPurpose::SummaryForAudio => {
                "Format instructions for an email summary meant to be spoken aloud."
            }
        };
        Self {
            name: name.into(),
            description,
            purpose,
        }
    }
}

impl PromptTemplate for StaticPrompt {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn arguments(&self) -> Vec<PromptArgument> {
        if !self.purpose.takes_timespan() {
            return Vec::new();
        }
        vec![PromptArgument {
            name: "timespan".into(),
            description: Some("Period the summary covers, e.g. `today` or `last week`".into()),
            required: false,
        }]
    }

    fn render(&self, arguments: &HashMap<String, String>) -> Result<String> {
        let timespan = arguments
            .get("timespan")
            .map(String::as_str)
            .filter(|span| !span.trim().is_empty());
        Ok(fallback_prompt(self.purpose, timespan))
    }
}

/// Register the assistant, summary and audio-summary prompts under `names`.
pub fn register_email_prompts(registry: &mut Registry, names: &PromptNames) {
    registry.register_prompt(StaticPrompt::new(&names.assistant_prompt, PromptPurpose::Assistant));
    registry.register_prompt(StaticPrompt::new(&names.summary_prompt, PromptPurpose::Summary));
    registry.register_prompt(StaticPrompt::new(
        &names.summary_audio_prompt,
        PromptPurpose::SummaryForAudio,
    ));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_timespan_with_today_by_default() {
        let text = fallback_prompt(PromptPurpose::Summary, None);
        assert!(text.contains("summary for today."));
        assert!(!text.contains("{timespan}"));

        let week = fallback_prompt(PromptPurpose::SummaryForAudio, Some("last week"));
        assert!(week.contains("summary for last week"));
    }

    #[test]
    fn fallback_is_deterministic() {
        for purpose in [
            PromptPurpose::Assistant,
            PromptPurpose::Summary,
            PromptPurpose::SummaryForAudio,
        ] {
            assert_eq!(
                fallback_prompt(purpose, Some("yesterday")),
                fallback_prompt(purpose, Some("yesterday"))
            );
        }
        assert_eq!(
            fallback_prompt(PromptPurpose::Assistant, Some("ignored")),
            fallback_prompt(PromptPurpose::Assistant, None)
        );
    }

    #[test]
    fn registers_three_prompts_under_configured_names() {
        let mut registry = Registry::new();
        register_email_prompts(&mut registry, &PromptNames::default());

        let prompts = registry.list_prompts();
        let names: Vec<&str> = prompts.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "email_assistant_system_prompt",
                "email_summary_audio_format_prompt",
                "email_summary_format_prompt"
            ]
        );
        assert!(prompts[0].arguments.is_empty());
        assert_eq!(prompts[1].arguments[0].name, "timespan");
    }

    #[test]
    fn blank_timespan_uses_default() {
        let prompt = StaticPrompt::new("s", PromptPurpose::Summary);
        let args = HashMap::from([("timespan".to_string(), "  ".to_string())]);
        assert_eq!(
            prompt.render(&args).unwrap(),
            fallback_prompt(PromptPurpose::Summary, None)
        );
    }
}
