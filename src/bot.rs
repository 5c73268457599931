//! Telegram front end: long polling, command routing, reply rendering.

use std::error::Error as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::agent::VoiceAgent;
use crate::config::TelegramConfig;
use crate::error::{Result, VoiceAgentError};

/// Telegram rejects messages longer than 4096 characters.
pub const MESSAGE_CHUNK_CHARS: usize = 4000;
const ERROR_SUMMARY_CHARS: usize = 500;
const ERROR_DETAILS_CHARS: usize = 3500;
const POLL_TIMEOUT_SECS: u64 = 30;
const RETRY_DELAY: Duration = Duration::from_secs(5);

pub const HELP_TEXT: &str = "👋 Hello! I'm your Email Summary Bot!\n\n\
Commands:\n\
/start - Show this message\n\
/summary <request> - Smart agent; decides timeframe & format (text/audio/both)\n\
/summary_today - Quick text summary of today's emails\n\
/audio_today - Quick audio summary of today's emails\n\n\
Examples:\n\
/summary summarize last 2 days with audio\n\
/summary summarize emails of the last week\n";

const AGENT_KEYWORDS: [&str; 12] = [
    "summary",
    "summarize",
    "audio",
    "email",
    "today",
    "yesterday",
    "last",
    "recent",
    "what",
    "show",
    "get",
    "fetch",
];

// ─────────────────────────────────────────────────────────────────────────────
// Reply channel
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait ChatReplies: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()>;

    async fn send_audio(&self, chat_id: i64, audio: Vec<u8>, filename: &str, caption: &str)
        -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<IncomingMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<Sender>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Sender {
    #[serde(default)]
    pub first_name: String,
}

/// Minimal Bot API client.
pub struct TelegramApi {
    http: reqwest::Client,
    base: String,
}

impl TelegramApi {
    pub fn new(api_base: &str, token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS * 2))
            .build()
            .map_err(|e| VoiceAgentError::Http(format!("http client error: {e}")))?;
        Ok(Self {
            http,
            base: format!("{}/bot{token}", api_base.trim_end_matches('/')),
        })
    }

    pub fn from_config(cfg: &TelegramConfig) -> Result<Self> {
        let token = cfg.bot_token.as_deref().ok_or_else(|| {
            VoiceAgentError::Configuration("No TELEGRAM_BOT_TOKEN found in environment variables".into())
        })?;
        Self::new(&cfg.api_base, token)
    }

    async fn decode<T: DeserializeOwned>(method: &str, response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let body: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| VoiceAgentError::Http(format!("telegram {method}: bad response ({status}): {e}")))?;
        if !body.ok {
            let reason = body.description.unwrap_or_else(|| status.to_string());
            return Err(VoiceAgentError::Http(format!("telegram {method} failed: {reason}")));
        }
        body.result
            .ok_or_else(|| VoiceAgentError::Http(format!("telegram {method}: missing result")))
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, payload: Value) -> Result<T> {
        let response = self
            .http
            .post(format!("{}/{method}", self.base))
            .json(&payload)
            .send()
            .await
            .map_err(|e| VoiceAgentError::Http(format!("telegram {method} request failed: {e}")))?;
        Self::decode(method, response).await
    }

    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        self.call(
            "getUpdates",
            json!({
                "offset": offset,
                "timeout": POLL_TIMEOUT_SECS,
                "allowed_updates": ["message"]
            }),
        )
        .await
    }
}

#[async_trait]
impl ChatReplies for TelegramApi {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()> {
        let _: Value = self
            .call("sendMessage", json!({ "chat_id": chat_id, "text": text }))
            .await?;
        Ok(())
    }

    async fn send_audio(
        &self,
        chat_id: i64,
        audio: Vec<u8>,
        filename: &str,
        caption: &str,
    ) -> Result<()> {
        let part = reqwest::multipart::Part::bytes(audio)
            .file_name(filename.to_string())
            .mime_str("audio/mpeg")
            .map_err(|e| VoiceAgentError::Http(format!("invalid audio part: {e}")))?;
        let form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .part("audio", part);

        let response = self
            .http
            .post(format!("{}/sendAudio", self.base))
            .multipart(form)
            .send()
            .await
            .map_err(|e| VoiceAgentError::Http(format!("telegram sendAudio request failed: {e}")))?;
        let _: Value = Self::decode("sendAudio", response).await?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Summary(String),
    SummaryToday,
    AudioToday,
    /// Free text, not a command.
    Text(String),
}

/// Parse an incoming message. Unknown slash commands yield `None`.
pub fn parse_command(text: &str) -> Option<Command> {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix('/') else {
        return Some(Command::Text(trimmed.to_string()));
    };

    let (head, args) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    // "/summary@MyBot" in group chats.
    let name = head.split('@').next().unwrap_or(head);
    match name {
        "start" => Some(Command::Start),
        "summary" => Some(Command::Summary(args.split_whitespace().collect::<Vec<_>>().join(" "))),
        "summary_today" => Some(Command::SummaryToday),
        "audio_today" => Some(Command::AudioToday),
        _ => None,
    }
}

/// Does free text look like a request for the agent?
pub fn wants_agent(text: &str) -> bool {
    let lowered = text.to_lowercase();
    AGENT_KEYWORDS.iter().any(|keyword| lowered.contains(keyword))
}

/// Split `text` into pieces of at most `max_chars` characters.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_chars.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// The headline and details messages for an error that escaped the agent.
pub fn render_error(err: &VoiceAgentError) -> (String, String) {
    let message = err.to_string();
    let headline = format!("❌ Error running agent: {message}");
    let headline = if headline.chars().count() < MESSAGE_CHUNK_CHARS {
        headline
    } else {
        format!("❌ Error: {}...", truncate_chars(&message, ERROR_SUMMARY_CHARS))
    };

    let mut chain = vec![format!("{err:?}")];
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push(format!("caused by: {cause}"));
        source = cause.source();
    }
    let details = chain.join("\n");
    let details = if details.chars().count() < MESSAGE_CHUNK_CHARS {
        format!("Details:\n{details}")
    } else {
        format!("Details:\n{}...", truncate_chars(&details, ERROR_DETAILS_CHARS))
    };

    (headline, details)
}

// ─────────────────────────────────────────────────────────────────────────────
// Bot
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct EmailSummaryBot {
    agent: Arc<VoiceAgent>,
    replies: Arc<dyn ChatReplies>,
}

impl EmailSummaryBot {
    pub fn new(agent: Arc<VoiceAgent>, replies: Arc<dyn ChatReplies>) -> Self {
        Self { agent, replies }
    }

    /// Send a reply, logging instead of failing when Telegram refuses it.
    async fn say(&self, chat_id: i64, text: &str) {
        if let Err(err) = self.replies.send_text(chat_id, text).await {
            tracing::error!(chat_id, error = %err, "failed to send message");
        }
    }

    pub async fn handle_message(&self, chat_id: i64, sender: &str, text: &str) {
        let Some(command) = parse_command(text) else {
            tracing::debug!(chat_id, text, "ignoring unknown command");
            return;
        };
        tracing::info!(chat_id, ?command, "bot command");

        match command {
            Command::Start => self.start(chat_id).await,
            Command::Summary(request) => self.summary(chat_id, &request, false).await,
            Command::SummaryToday => self.summary_today(chat_id).await,
            Command::AudioToday => self.audio_today(chat_id).await,
            Command::Text(text) if wants_agent(&text) => {
                self.say(chat_id, &format!("Okay {sender}, processing your request... ⏳"))
                    .await;
                let request = text.to_lowercase();
                self.summary(chat_id, &request, true).await;
            }
            Command::Text(_) => self.start(chat_id).await,
        }
    }

    pub async fn start(&self, chat_id: i64) {
        self.say(chat_id, HELP_TEXT).await;
    }

    pub async fn summary(&self, chat_id: i64, request: &str, already_notified: bool) {
        let request = request.trim();
        if request.is_empty() {
            self.say(
                chat_id,
                "What would you like me to do? (e.g., 'summarize today' or 'summarize last 2 days with audio')",
            )
            .await;
            return;
        }
        if !already_notified {
            self.say(chat_id, "🧠 Running agent with your instruction... ⏳").await;
        }

        tracing::info!(chat_id, request, "running agentic query");
        let (answer, audio) = match self.agent.run_agentic_query(request).await {
            Ok(outcome) => outcome.into_parts(),
            Err(err) => {
                tracing::error!(chat_id, error = %err, "agent query failed");
                let (headline, details) = render_error(&err);
                self.say(chat_id, &headline).await;
                self.say(chat_id, &details).await;
                return;
            }
        };
        tracing::info!(chat_id, chars = answer.chars().count(), audio = audio.is_some(), "agent response");

        self.send_answer(chat_id, &answer).await;

        if let Some(audio) = audio {
            if let Err(err) = self.send_mp3(chat_id, &audio, "summary.mp3", "🎧 Audio summary").await {
                tracing::error!(chat_id, error = %err, "error sending audio");
                self.say(
                    chat_id,
                    &format!("⚠️ Audio generation completed but failed to send: {err}"),
                )
                .await;
            }
        }
    }

    /// Send `answer` in chunks, or a placeholder when it is blank.
    async fn send_answer(&self, chat_id: i64, answer: &str) {
        if answer.trim().is_empty() {
            self.say(chat_id, "(No response from agent)").await;
            return;
        }
        for chunk in chunk_text(answer, MESSAGE_CHUNK_CHARS) {
            self.say(chat_id, &chunk).await;
        }
    }

    pub async fn summary_today(&self, chat_id: i64) {
        self.say(chat_id, "📧 Summarizing today's emails... ⏳").await;
        match self.agent.summarize_period(0, "today", false).await {
            Ok(outcome) => self.send_answer(chat_id, &outcome.text).await,
            Err(err) => {
                tracing::error!(chat_id, error = %err, "summary_today failed");
                self.say(chat_id, &format!("❌ Error summarizing today: {err}")).await;
            }
        }
    }

    pub async fn audio_today(&self, chat_id: i64) {
        self.say(chat_id, "🎧 Creating audio summary for today... ⏳").await;
        let sent = match self.agent.summarize_period(0, "today", true).await {
            Ok(outcome) => match outcome.audio {
                Some(audio) => {
                    self.send_mp3(chat_id, &audio, "summary_today.mp3", "Audio summary (today)")
                        .await
                }
                None => Err(VoiceAgentError::Http("no audio was produced".into())),
            },
            Err(err) => Err(err),
        };
        if let Err(err) = sent {
            tracing::error!(chat_id, error = %err, "audio_today failed");
            self.say(chat_id, &format!("❌ Error generating audio summary: {err}")).await;
        }
    }

    async fn send_mp3(&self, chat_id: i64, audio_b64: &str, filename: &str, caption: &str) -> Result<()> {
        let bytes = STANDARD
            .decode(audio_b64.trim())
            .map_err(|e| VoiceAgentError::Http(format!("audio is not valid base64: {e}")))?;
        tracing::info!(chat_id, bytes = bytes.len(), filename, "sending audio");
        self.replies.send_audio(chat_id, bytes, filename, caption).await
    }

    /// Long-poll `api` for updates, handling each message on its own task,
    /// until Ctrl-C.
    pub async fn run_polling(self, api: Arc<TelegramApi>) -> Result<()> {
        let mut offset = 0;
        tracing::info!("bot polling for updates");

        loop {
            let updates = tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutdown requested");
                    return Ok(());
                }
                updates = api.get_updates(offset) => updates,
            };

            let updates = match updates {
                Ok(updates) => updates,
                Err(err) => {
                    tracing::warn!(error = %err, "getUpdates failed, retrying");
                    tokio::time::sleep(RETRY_DELAY).await;
                    continue;
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                let Some(message) = update.message else {
                    continue;
                };
                let Some(text) = message.text else {
                    continue;
                };
                let sender = message.from.map(|f| f.first_name).unwrap_or_default();
                let bot = self.clone();
                tokio::spawn(async move {
                    bot.handle_message(message.chat.id, &sender, &text).await;
                });
            }
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
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Sent {
        Text(String),
        Audio { filename: String, caption: String, len: usize },
    }

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<Sent>>,
    }

    impl Recorder {
        fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatReplies for Recorder {
        async fn send_text(&self, _chat_id: i64, text: &str) -> Result<()> {
            self.sent.lock().unwrap().push(Sent::Text(text.to_string()));
            Ok(())
        }

        async fn send_audio(
            &self,
            _chat_id: i64,
            audio: Vec<u8>,
            filename: &str,
            caption: &str,
        ) -> Result<()> {
            self.sent.lock().unwrap().push(Sent::Audio {
                filename: filename.into(),
                caption: caption.into(),
                len: audio.len(),
            });
            Ok(())
        }
    }

    struct FakeSpeech;

    #[async_trait]
    impl Tool for FakeSpeech {
        fn name(&self) -> &str {
            "tts_instagram_audio"
        }

        fn description(&self) -> &str {
            "fake speech"
        }

        async fn call(&self, _input: Value) -> Result<Value> {
            Ok(Value::String("SUQzBA==".into()))
        }
    }

    struct EmptyInbox;

    #[async_trait]
    impl Tool for EmptyInbox {
        fn name(&self) -> &str {
            "get_emails"
        }

        fn description(&self) -> &str {
            "no mail"
        }

        async fn call(&self, _input: Value) -> Result<Value> {
            Ok(Value::String("[]".into()))
        }
    }

    fn bot(model: Arc<ScriptedModel>) -> (EmailSummaryBot, Arc<Recorder>) {
        let mut registry = Registry::new();
        registry.register(FakeSpeech);
        registry.register(EmptyInbox);
        let sessions = LocalSessionProvider::new(Arc::new(McpServer::new(registry)));
        let agent = VoiceAgent::new(Arc::new(sessions)).with_model(model);
        let recorder = Arc::new(Recorder::default());
        (EmailSummaryBot::new(Arc::new(agent), recorder.clone()), recorder)
    }

    #[test]
    fn parses_commands() {
        assert_eq!(parse_command("/start"), Some(Command::Start));
        assert_eq!(
            parse_command("/summary@MailBot  last   week "),
            Some(Command::Summary("last week".into()))
        );
        assert_eq!(parse_command("/audio_today"), Some(Command::AudioToday));
        assert_eq!(parse_command("/unknown"), None);
        assert_eq!(parse_command(" hi there "), Some(Command::Text("hi there".into())));
    }

    #[test]
    fn keyword_routing() {
        assert!(wants_agent("What came in TODAY?"));
        assert!(!wants_agent("hello bot"));
    }

    #[test]
    fn chunks_by_characters() {
        let text = "é".repeat(9001);
        let chunks = chunk_text(&text, MESSAGE_CHUNK_CHARS);
        let sizes: Vec<usize> = chunks.iter().map(|c| c.chars().count()).collect();
        assert_eq!(sizes, vec![4000, 4000, 1001]);
        assert!(chunk_text("", MESSAGE_CHUNK_CHARS).is_empty());
    }

    #[test]
    fn long_errors_are_truncated() {
        let err = VoiceAgentError::LanguageModel("x".repeat(5000));
        let (headline, details) = render_error(&err);
        assert!(headline.starts_with("❌ Error: "));
        assert_eq!(headline.chars().count(), "❌ Error: ".chars().count() + 500 + 3);
        assert!(details.starts_with("Details:\n"));
        assert!(details.ends_with("..."));

        let (short, _) = render_error(&VoiceAgentError::Http("timeout".into()));
        assert_eq!(short, "❌ Error running agent: http error: timeout");
    }

    #[tokio::test]
    async fn summary_sends_text_then_audio() {
        let model = ScriptedModel::new(vec![
            ModelCompletion::tool_call("tts_instagram_audio", json!({"text": "hello"})),
            ModelCompletion::text("Here you go."),
        ]);
        let (bot, recorder) = bot(model);

        bot.handle_message(7, "Ana", "/summary read today's mail to me").await;

        assert_eq!(
            recorder.sent(),
            vec![
                Sent::Text("🧠 Running agent with your instruction... ⏳".into()),
                Sent::Text("Here you go.".into()),
                Sent::Audio {
                    filename: "summary.mp3".into(),
                    caption: "🎧 Audio summary".into(),
                    len: 4
                },
            ]
        );
    }

    #[tokio::test]
    async fn free_text_is_routed_to_the_agent() {
        let (bot, recorder) = bot(ScriptedModel::new(vec![ModelCompletion::text("")]));

        bot.handle_message(7, "Ana", "Show me recent emails").await;

        let sent = recorder.sent();
        assert_eq!(sent[0], Sent::Text("Okay Ana, processing your request... ⏳".into()));
        assert_eq!(sent[1], Sent::Text("(No response from agent)".into()));
        assert_eq!(sent.len(), 2);
    }

    #[tokio::test]
    async fn blank_daily_summary_gets_a_placeholder() {
        let (bot, recorder) = bot(ScriptedModel::new(vec![ModelCompletion::text("  ")]));

        bot.handle_message(3, "Ana", "/summary_today").await;

        assert_eq!(
            recorder.sent(),
            vec![
                Sent::Text("📧 Summarizing today's emails... ⏳".into()),
                Sent::Text("(No response from agent)".into()),
            ]
        );
    }

    #[tokio::test]
    async fn agent_errors_are_rendered() {
        let (bot, recorder) = bot(ScriptedModel::new(Vec::new()));

        bot.summary(1, "summarize today", true).await;

        let sent = recorder.sent();
        assert_eq!(sent.len(), 2);
        assert!(matches!(&sent[0], Sent::Text(t) if t.starts_with("❌ Error running agent: language model error")));
        assert!(matches!(&sent[1], Sent::Text(t) if t.starts_with("Details:\n")));
    }

    #[tokio::test]
    async fn empty_summary_request_asks_for_instructions() {
        let (bot, recorder) = bot(ScriptedModel::new(Vec::new()));
        bot.handle_message(1, "Ana", "/summary").await;
        assert!(matches!(&recorder.sent()[0], Sent::Text(t) if t.starts_with("What would you like me to do?")));
    }

    #[tokio::test]
    async fn telegram_api_posts_messages() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/botTOKEN/sendMessage")
            .match_body(mockito::Matcher::Json(json!({"chat_id": 42, "text": "hi"})))
            .with_status(200)
            .with_body(r#"{"ok":true,"result":{"message_id":1}}"#)
            .create_async()
            .await;

        let api = TelegramApi::new(&server.url(), "TOKEN").unwrap();
        api.send_text(42, "hi").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn telegram_api_surfaces_failures() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/botTOKEN/getUpdates")
            .with_status(401)
            .with_body(r#"{"ok":false,"error_code":401,"description":"Unauthorized"}"#)
            .create_async()
            .await;

        let api = TelegramApi::new(&server.url(), "TOKEN").unwrap();
        let err = api.get_updates(0).await.unwrap_err();
        assert!(err.to_string().contains("Unauthorized"));
    }
}
