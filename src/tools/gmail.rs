//! The `get_emails` tool: recent Gmail messages as a JSON array.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::email_text::{clean_text, decode_body_data, format_email_date, html_to_text};
use super::google_auth::GoogleCredentials;
use crate::config::GoogleConfig;
use crate::error::{Result, VoiceAgentError};
use crate::tool::Tool;

const DEFAULT_DAYS: i64 = 1;
const DEFAULT_MAX_RESULTS: i64 = 50;

// ─────────────────────────────────────────────────────────────────────────────
// Gmail API shapes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ListMessagesResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
pub struct GmailMessage {
    pub id: String,
    #[serde(default)]
    pub payload: Option<MessagePart>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MessagePart {
    #[serde(rename = "mimeType", default)]
    pub mime_type: String,
    #[serde(default)]
    pub headers: Vec<MessageHeader>,
    #[serde(default)]
    pub body: Option<MessagePartBody>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Deserialize)]
pub struct MessageHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct MessagePartBody {
    #[serde(default)]
    pub data: Option<String>,
}

impl MessagePart {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Decoded body of the first part with `mime_type`, depth first.
    fn first_body(&self, mime_type: &str) -> Option<String> {
        if self.mime_type.eq_ignore_ascii_case(mime_type) {
            if let Some(text) = self
                .body
                .as_ref()
                .and_then(|b| b.data.as_deref())
                .and_then(decode_body_data)
            {
                return Some(text);
            }
        }
        self.parts.iter().find_map(|part| part.first_body(mime_type))
    }
}

/// One summarized message, in the shape the model receives.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailSummary {
    pub id: String,
    pub from: String,
    pub subject: String,
    pub date: Option<String>,
    pub body: String,
}

impl EmailSummary {
    pub fn from_message(message: &GmailMessage) -> Self {
        let fallback = MessagePart::default();
        let payload = message.payload.as_ref().unwrap_or(&fallback);

        let text = payload
            .first_body("text/plain")
            .filter(|text| !text.trim().is_empty())
            .or_else(|| payload.first_body("text/html").map(|html| html_to_text(&html)));

        Self {
            id: message.id.clone(),
            from: payload.header("From").unwrap_or("Unknown").to_string(),
            subject: payload.header("Subject").unwrap_or("No Subject").to_string(),
            date: payload.header("Date").map(format_email_date),
            body: text.map(|t| clean_text(&t)).unwrap_or_default(),
        }
    }
}

/// Gmail search query for the last `days` days; `0` means today (local date).
pub fn search_query(days: u32) -> String {
    if days == 0 {
        format!("after:{}", chrono::Local::now().format("%Y/%m/%d"))
    } else {
        format!("newer_than:{days}d")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Gmail Client
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct GmailClient {
    http: reqwest::Client,
    credentials: Arc<GoogleCredentials>,
    base_url: String,
}

impl GmailClient {
    pub fn new(credentials: Arc<GoogleCredentials>, base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            credentials,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(cfg: &GoogleConfig, credentials: Arc<GoogleCredentials>) -> Self {
        Self::new(credentials, cfg.gmail_base_url.clone())
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        let token = self.credentials.bearer(&self.http).await?;
        let response = self
            .http
            .get(format!("{}{}", self.base_url, endpoint))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| VoiceAgentError::Http(format!("Gmail request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceAgentError::Http(format!("Gmail API error {status}: {body}")));
        }

        response
            .json()
            .await
            .map_err(|e| VoiceAgentError::Http(format!("Failed to parse Gmail response: {e}")))
    }

    pub async fn list_message_ids(&self, query: &str, max_results: u32) -> Result<Vec<String>> {
        let endpoint = format!(
            "/users/me/messages?maxResults={max_results}&q={}",
            urlencoding::encode(query)
        );
        let listed: ListMessagesResponse = self.get(&endpoint).await?;
        Ok(listed.messages.into_iter().map(|m| m.id).collect())
    }

    pub async fn get_message(&self, id: &str) -> Result<GmailMessage> {
        self.get(&format!("/users/me/messages/{}?format=full", urlencoding::encode(id)))
            .await
    }

    pub async fn recent_emails(&self, days: u32, max_results: u32) -> Result<Vec<EmailSummary>> {
        let query = search_query(days);
        let ids = self.list_message_ids(&query, max_results).await?;
        tracing::debug!(%query, count = ids.len(), "gmail messages listed");

        let mut emails = Vec::with_capacity(ids.len());
        for id in ids {
            let message = self.get_message(&id).await?;
            emails.push(EmailSummary::from_message(&message));
        }
        Ok(emails)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// get_emails Tool
// ─────────────────────────────────────────────────────────────────────────────

pub struct GetEmailsTool {
    name: String,
    client: GmailClient,
}

impl GetEmailsTool {
    pub fn new(name: impl Into<String>, client: GmailClient) -> Self {
        Self {
            name: name.into(),
            client,
        }
    }
}

#[async_trait]
impl Tool for GetEmailsTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Fetch emails from the last N days with full body content. Use days=0 for today only, \
         1 for yesterday, 7 for the last week, 30 for the last month. Returns a JSON array of \
         emails with id, from, subject, date and body fields."
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "days": {
                    "type": "integer",
                    "minimum": 0,
                    "default": DEFAULT_DAYS,
                    "description": "Number of days to look back (0 for today only)"
                },
                "max_results": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": 100,
                    "default": DEFAULT_MAX_RESULTS,
                    "description": "Maximum number of emails to fetch"
                }
            }
        }))
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let days = integer_arg(&input["days"]).unwrap_or(DEFAULT_DAYS).max(0);
        let days = u32::try_from(days).unwrap_or(u32::MAX);
        let max_results = integer_arg(&input["max_results"])
            .unwrap_or(DEFAULT_MAX_RESULTS)
            .clamp(1, 100) as u32;

        tracing::info!(days, max_results, "fetching emails");
        let emails = self.client.recent_emails(days, max_results).await?;
        tracing::info!(count = emails.len(), "emails prepared");

        Ok(Value::String(serde_json::to_string(&emails)?))
    }
}

/// Whole-number argument sent as an integer, a float or a numeric string.
/// Out-of-range values saturate.
fn integer_arg(value: &Value) -> Option<i64> {
    let float = match value {
        Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                return Some(int);
            }
            if number.as_u64().is_some() {
                return Some(i64::MAX);
            }
            number.as_f64()?
        }
        Value::String(text) => text.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    float.is_finite().then(|| float.trunc() as i64)
}
