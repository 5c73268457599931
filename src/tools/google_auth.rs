//! Google OAuth access tokens for the Gmail and speech tools.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::config::GoogleConfig;
use crate::error::{Result, VoiceAgentError};

/// Refresh this long before the token actually expires.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Authorized-user token JSON, as written by Google's client libraries.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizedUser {
    #[serde(default)]
    pub token: Option<String>,
    pub refresh_token: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub token_uri: Option<String>,
    #[serde(default)]
    pub expiry: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        Instant::now() + EXPIRY_MARGIN < self.expires_at
    }
}

#[derive(Debug)]
enum Source {
    Static(String),
    Refreshing {
        refresh_token: String,
        client_id: String,
        client_secret: String,
        token_uri: String,
        cached: Mutex<Option<CachedToken>>,
    },
    Unavailable(String),
}

/// Where access tokens come from. Problems with the configuration are
/// reported when a token is requested, not at construction.
#[derive(Debug)]
pub struct GoogleCredentials {
    source: Source,
}

impl GoogleCredentials {
    pub fn access_token(token: impl Into<String>) -> Self {
        Self {
            source: Source::Static(token.into()),
        }
    }

    pub fn from_config(cfg: &GoogleConfig) -> Self {
        if let Some(token) = &cfg.gmail_access_token {
            return Self::access_token(token.clone());
        }
        let Some(raw) = &cfg.gmail_token else {
            return Self::unavailable("set GMAIL_ACCESS_TOKEN or GMAIL_TOKEN");
        };

        match serde_json::from_str::<AuthorizedUser>(raw) {
            Ok(user) => Self::from_authorized_user(user, cfg),
            Err(err) => Self::unavailable(format!("GMAIL_TOKEN is not valid token JSON: {err}")),
        }
    }

    fn from_authorized_user(user: AuthorizedUser, cfg: &GoogleConfig) -> Self {
        let client_id = user.client_id.or_else(|| cfg.client_id.clone());
        let client_secret = user.client_secret.or_else(|| cfg.client_secret.clone());
        let (Some(client_id), Some(client_secret)) = (client_id, client_secret) else {
            return Self::unavailable("missing GOOGLE_CLIENT_ID/GOOGLE_CLIENT_SECRET");
        };

        let cached = user.token.and_then(|value| {
            let expiry = user.expiry.as_deref()?;
            let expires_at = instant_for(expiry)?;
            Some(CachedToken { value, expires_at })
        });

        Self {
            source: Source::Refreshing {
                refresh_token: user.refresh_token,
                client_id,
                client_secret,
                token_uri: user.token_uri.unwrap_or_else(|| cfg.token_uri.clone()),
                cached: Mutex::new(cached),
            },
        }
    }

    fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            source: Source::Unavailable(reason.into()),
        }
    }

    /// A bearer token, refreshed through the token endpoint when needed.
    pub async fn bearer(&self, http: &reqwest::Client) -> Result<String> {
        match &self.source {
            Source::Static(token) => Ok(token.clone()),
            Source::Unavailable(reason) => Err(VoiceAgentError::Configuration(reason.clone())),
            Source::Refreshing {
                refresh_token,
                client_id,
                client_secret,
                token_uri,
                cached,
            } => {
                let mut cached = cached.lock().await;
                if let Some(token) = cached.as_ref().filter(|t| t.is_fresh()) {
                    return Ok(token.value.clone());
                }

                tracing::debug!(token_uri = %token_uri, "refreshing Google access token");
                let response = http
                    .post(token_uri)
                    .form(&[
                        ("client_id", client_id.as_str()),
                        ("client_secret", client_secret.as_str()),
                        ("refresh_token", refresh_token.as_str()),
                        ("grant_type", "refresh_token"),
                    ])
                    .send()
                    .await
                    .map_err(|e| VoiceAgentError::Http(format!("token refresh failed: {e}")))?;

                if !response.status().is_success() {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    return Err(VoiceAgentError::Http(format!(
                        "token refresh rejected {status}: {body}"
                    )));
                }

                let token: TokenResponse = response.json().await.map_err(|e| {
                    VoiceAgentError::Http(format!("failed to parse token response: {e}"))
                })?;
                let lifetime = Duration::from_secs(token.expires_in.unwrap_or(3600));
                *cached = Some(CachedToken {
                    value: token.access_token.clone(),
                    expires_at: Instant::now() + lifetime,
                });
                Ok(token.access_token)
            }
        }
    }
}

fn instant_for(expiry: &str) -> Option<Instant> {
    let expiry = DateTime::parse_from_rfc3339(expiry).ok()?.with_timezone(&Utc);
    let remaining = (expiry - Utc::now()).to_std().ok()?;
    Some(Instant::now() + remaining)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_token(token: &str) -> GoogleConfig {
        GoogleConfig {
            gmail_token: Some(token.to_string()),
            ..GoogleConfig::default()
        }
    }

    #[tokio::test]
    async fn static_tokens_are_returned_as_is() {
        let creds = GoogleCredentials::access_token("ya29.static");
        assert_eq!(creds.bearer(&reqwest::Client::new()).await.unwrap(), "ya29.static");
    }

    #[tokio::test]
    async fn missing_credentials_fail_on_use() {
        let creds = GoogleCredentials::from_config(&GoogleConfig::default());
        let err = creds.bearer(&reqwest::Client::new()).await.unwrap_err();
        assert!(matches!(err, VoiceAgentError::Configuration(_)));
    }

    #[tokio::test]
    async fn fresh_stored_token_skips_refresh() {
        let expiry = (Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
        let raw = serde_json::json!({
            "token": "ya29.cached",
            "refresh_token": "1//r",
            "client_id": "id",
            "client_secret": "secret",
            "token_uri": "http://127.0.0.1:9/unreachable",
            "expiry": expiry,
        })
        .to_string();

        let creds = GoogleCredentials::from_config(&config_with_token(&raw));
        assert_eq!(creds.bearer(&reqwest::Client::new()).await.unwrap(), "ya29.cached");
    }

    #[tokio::test]
    async fn refreshes_and_caches_expired_tokens() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_body(mockito::Matcher::UrlEncoded(
                "grant_type".into(),
                "refresh_token".into(),
            ))
            .with_status(200)
            .with_body(r#"{"access_token":"ya29.fresh","expires_in":3599,"token_type":"Bearer"}"#)
            .expect(1)
            .create_async()
            .await;

        let raw = serde_json::json!({
            "token": "ya29.stale",
            "refresh_token": "1//r",
            "token_uri": format!("{}/token", server.url()),
            "expiry": "2020-01-01T00:00:00Z",
        })
        .to_string();
        let cfg = GoogleConfig {
            client_id: Some("id".into()),
            client_secret: Some("secret".into()),
            ..config_with_token(&raw)
        };

        let creds = GoogleCredentials::from_config(&cfg);
        let http = reqwest::Client::new();
        assert_eq!(creds.bearer(&http).await.unwrap(), "ya29.fresh");
        assert_eq!(creds.bearer(&http).await.unwrap(), "ya29.fresh");
        mock.assert_async().await;
    }
}
