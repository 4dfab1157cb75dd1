//! HTTP client for the Bot API.

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::types::{ApiResponse, File, SendMessage, Update};

/// Bot API errors
#[derive(thiserror::Error, Debug)]
pub enum BotApiError {
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),
    #[error("Bot API error {code:?}: {description}")]
    Api {
        code: Option<i64>,
        description: String,
    },
    #[error("Bot API returned no result for {0}")]
    MissingResult(&'static str),
    #[error("Invalid API base URL: {0}")]
    InvalidBaseUrl(String),
}

impl From<reqwest::Error> for BotApiError {
    fn from(err: reqwest::Error) -> Self {
        // Request URLs embed the bot token; keep it out of error messages and logs.
        BotApiError::Http(err.without_url())
    }
}

pub type Result<T> = std::result::Result<T, BotApiError>;

/// Client bound to one bot token.
#[derive(Clone)]
pub struct BotClient {
    http: Client,
    api_base: Url,
    token: String,
    request_timeout: Duration,
}

impl std::fmt::Debug for BotClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotClient")
            .field("api_base", &self.api_base.as_str())
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl BotClient {
    /// `request_timeout` bounds every short call; long polls add their own wait on top.
    pub fn new(api_base: &str, token: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let api_base = Url::parse(api_base.trim_end_matches('/'))
            .map_err(|e| BotApiError::InvalidBaseUrl(format!("{api_base}: {e}")))?;
        if !matches!(api_base.scheme(), "http" | "https") {
            return Err(BotApiError::InvalidBaseUrl(format!(
                "{api_base}: scheme must be http or https"
            )));
        }

        let http = Client::builder().connect_timeout(request_timeout).build()?;

        Ok(Self {
            http,
            api_base,
            token: token.into(),
            request_timeout,
        })
    }

    /// Shared connection pool, reused for streaming downloads.
    pub fn http(&self) -> &Client {
        &self.http
    }

    fn base(&self) -> &str {
        self.api_base.as_str().trim_end_matches('/')
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base(), self.token, method)
    }

    /// Direct download URL for a `file_path` returned by [`BotClient::get_file`].
    pub fn file_url(&self, file_path: &str) -> String {
        format!(
            "{}/file/bot{}/{}",
            self.base(),
            self.token,
            file_path.trim_start_matches('/')
        )
    }

    /// Exchange a stable `file_id` for a freshly prepared [`File`].
    pub async fn get_file(&self, file_id: &str) -> Result<File> {
        let response = self
            .http
            .get(self.method_url("getFile"))
            .query(&[("file_id", file_id)])
            .timeout(self.request_timeout)
            .send()
            .await?;

        unwrap_envelope(response, "getFile").await
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(&self, offset: Option<i64>, poll_timeout: Duration) -> Result<Vec<Update>> {
        let mut query: Vec<(&str, String)> = vec![
            ("timeout", poll_timeout.as_secs().to_string()),
            ("allowed_updates", "[\"message\"]".to_string()),
        ];
        if let Some(offset) = offset {
            query.push(("offset", offset.to_string()));
        }

        let response = self
            .http
            .get(self.method_url("getUpdates"))
            .query(&query)
            .timeout(poll_timeout + self.request_timeout)
            .send()
            .await?;

        unwrap_envelope(response, "getUpdates").await
    }

    pub async fn send_message(&self, chat_id: i64, text: &str, reply_to: Option<i64>) -> Result<()> {
        let body = SendMessage {
            chat_id,
            text,
            reply_to_message_id: reply_to,
        };

        let response = self
            .http
            .post(self.method_url("sendMessage"))
            .json(&body)
            .timeout(self.request_timeout)
            .send()
            .await?;

        let _: serde_json::Value = unwrap_envelope(response, "sendMessage").await?;
        debug!(chat_id, "Reply sent");
        Ok(())
    }
}

async fn unwrap_envelope<T: DeserializeOwned>(
    response: reqwest::Response,
    method: &'static str,
) -> Result<T> {
    let status = response.status();
    let envelope: ApiResponse<T> = match response.json().await {
        Ok(envelope) => envelope,
        Err(_) if !status.is_success() => {
            return Err(BotApiError::Api {
                code: Some(i64::from(status.as_u16())),
                description: status.to_string(),
            })
        }
        Err(err) => return Err(err.into()),
    };

    if !envelope.ok {
        return Err(BotApiError::Api {
            code: envelope.error_code,
            description: envelope
                .description
                .unwrap_or_else(|| format!("{method} failed")),
        });
    }

    envelope.result.ok_or(BotApiError::MissingResult(method))
}
