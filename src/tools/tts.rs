//! The speech tool: Google Cloud Text-to-Speech, MP3 out, base64 back.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};

use super::google_auth::GoogleCredentials;
use crate::config::GoogleConfig;
use crate::error::{Result, VoiceAgentError};
use crate::tool::Tool;

pub const DEFAULT_LANGUAGE_CODE: &str = "en-US";
pub const DEFAULT_VOICE: &str = "en-US-Chirp3-HD-Aoede";
const SAMPLE_RATE_HERTZ: u32 = 24_000;

#[derive(Debug, Deserialize)]
struct SynthesizeResponse {
    #[serde(rename = "audioContent", default)]
    audio_content: String,
}

pub struct TtsClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    credentials: Arc<GoogleCredentials>,
}

impl TtsClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        credentials: Arc<GoogleCredentials>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
            credentials,
        }
    }

    pub fn from_config(cfg: &GoogleConfig, credentials: Arc<GoogleCredentials>) -> Self {
        Self::new(cfg.tts_endpoint.clone(), cfg.tts_api_key.clone(), credentials)
    }

    /// Base64 MP3 for `text`.
    pub async fn synthesize(&self, text: &str, language_code: &str, voice: &str) -> Result<String> {
        let body = json!({
            "input": { "text": text },
            "voice": { "languageCode": language_code, "name": voice },
            "audioConfig": { "audioEncoding": "MP3", "sampleRateHertz": SAMPLE_RATE_HERTZ }
        });

        let mut request = self.http.post(&self.endpoint).json(&body);
        request = match &self.api_key {
            Some(key) => request.query(&[("key", key)]),
            None => request.bearer_auth(self.credentials.bearer(&self.http).await?),
        };

        let response = request
            .send()
            .await
            .map_err(|e| VoiceAgentError::Http(format!("TTS request failed: {e}")))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceAgentError::Http(format!("TTS API error ({status}): {body}")));
        }

        let parsed: SynthesizeResponse = response
            .json()
            .await
            .map_err(|e| VoiceAgentError::Http(format!("Failed to parse TTS response: {e}")))?;
        if parsed.audio_content.is_empty() {
            return Err(VoiceAgentError::Http("TTS response carried no audio".into()));
        }
        // Reject anything that is not base64 here rather than in the chat.
        STANDARD
            .decode(&parsed.audio_content)
            .map_err(|e| VoiceAgentError::Http(format!("TTS audio is not base64: {e}")))?;
        Ok(parsed.audio_content)
    }
}

pub struct TtsTool {
    name: String,
    client: TtsClient,
}

impl TtsTool {
    pub fn new(name: impl Into<String>, client: TtsClient) -> Self {
        Self {
            name: name.into(),
            client,
        }
    }
}

#[async_trait]
impl Tool for TtsTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Generate audio (MP3) from text using Google Text-to-Speech. Only use this tool when \
         the user explicitly asks for audio (\"audio\", \"with audio\", \"read it to me\", \
         \"voice\"). Pass the finished summary text. Returns a base64-encoded MP3."
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "text": {
                    "type": "string",
                    "description": "Full text to synthesize into a single MP3"
                },
                "language_code": {
                    "type": "string",
                    "default": DEFAULT_LANGUAGE_CODE
                },
                "voice_name": {
                    "type": "string",
                    "default": DEFAULT_VOICE
                }
            },
            "required": ["text"]
        }))
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let text = input["text"]
            .as_str()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| VoiceAgentError::tool_failed(&self.name, "`text` is required"))?;
        let language_code = input["language_code"].as_str().unwrap_or(DEFAULT_LANGUAGE_CODE);
        let voice = input["voice_name"].as_str().unwrap_or(DEFAULT_VOICE);

        tracing::info!(chars = text.chars().count(), voice, "synthesizing speech");
        let audio = self.client.synthesize(text, language_code, voice).await?;
        tracing::info!(encoded_len = audio.len(), "speech synthesized");
        Ok(Value::String(audio))
    }
}
