use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// HTTP timeout for all bot API calls.
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Long-poll wait passed to getUpdates.
const POLL_WAIT_SECS: u64 = 5;

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<IncomingMessage>,
}

#[derive(Debug, Deserialize, Default)]
pub struct IncomingMessage {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub from: Option<Sender>,
    #[serde(default)]
    pub reply_to_message: Option<Box<IncomingMessage>>,
}

#[derive(Debug, Deserialize, Default)]
pub struct Sender {
    #[serde(default)]
    pub first_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdatesResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<Update>,
}

/// Thin client over the Telegram Bot API.
pub struct TelegramClient {
    http: reqwest::blocking::Client,
    token: String,
    chat_id: String,
}

impl TelegramClient {
    pub fn new(token: impl Into<String>, chat_id: impl Into<String>) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("build HTTP client")?;
        Ok(Self {
            http,
            token: token.into(),
            chat_id: chat_id.into(),
        })
    }

    pub fn send_message(&self, text: &str) -> Result<()> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.token);
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": self.chat_id,
                "text": text,
                "parse_mode": "HTML",
            }))
            .send()
            .context("sendMessage request")?;
        if !response.status().is_success() {
            bail!("sendMessage returned {}", response.status());
        }
        Ok(())
    }

    /// Fetch updates after `offset` (last seen update id + 1).
    pub fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        let url = format!(
            "https://api.telegram.org/bot{}/getUpdates?offset={}&timeout={}",
            self.token, offset, POLL_WAIT_SECS
        );
        let response: UpdatesResponse = self
            .http
            .get(&url)
            .send()
            .context("getUpdates request")?
            .json()
            .context("getUpdates body")?;
        if !response.ok {
            bail!("getUpdates returned ok=false");
        }
        Ok(response.result)
    }
}
