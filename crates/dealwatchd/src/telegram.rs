//! Minimal Telegram Bot API client: sendMessage and getUpdates.

use crate::config::TelegramConfig;
use serde::Deserialize;
use std::time::Duration;

/// Telegram rejects messages longer than this many characters
pub const MAX_MESSAGE_CHARS: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Telegram API returned {status}: {body}")]
    Api { status: u16, body: String },
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
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone)]
pub struct TelegramClient {
    api_base: String,
    token: String,
    http: reqwest::Client,
}

impl TelegramClient {
    pub fn new(config: &TelegramConfig) -> Self {
        Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            http: reqwest::Client::builder()
                .user_agent(format!("dealwatchd/{}", dealwatch_shared::VERSION))
                .timeout(Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    /// Send a plain-text message, truncated to the API limit
    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), TelegramError> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": truncate_chars(text, MAX_MESSAGE_CHARS),
        });

        let resp = self
            .http
            .post(self.method_url("sendMessage"))
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TelegramError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    /// Long-poll for new updates after `offset`
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>, TelegramError> {
        let resp = self
            .http
            .get(self.method_url("getUpdates"))
            .query(&[("offset", offset.to_string()), ("timeout", timeout_secs.to_string())])
            .timeout(Duration::from_secs(timeout_secs + 10))
            .send()
            .await?;

        let status = resp.status();
        let parsed: ApiResponse<Vec<Update>> = resp.json().await?;
        if !parsed.ok {
            return Err(TelegramError::Api {
                status: status.as_u16(),
                body: parsed.description.unwrap_or_default(),
            });
        }
        Ok(parsed.result.unwrap_or_default())
    }
}

/// Cut `text` to at most `max` characters, on a char boundary
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_url() {
        let config = TelegramConfig {
            token: "123:abc".to_string(),
            chat_id: "42".to_string(),
            api_base: "https://api.telegram.org/".to_string(),
        };
        let client = TelegramClient::new(&config);
        assert_eq!(
            client.method_url("sendMessage"),
            "https://api.telegram.org/bot123:abc/sendMessage"
        );
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("ñañaña", 2), "ña");
        assert_eq!(truncate_chars("🔄🔄🔄", 1), "🔄");
    }

    #[test]
    fn test_parse_updates() {
        let raw = r#"{"ok":true,"result":[
            {"update_id":10,"message":{"chat":{"id":42},"text":"/version"}},
            {"update_id":11,"edited_message":{}}
        ]}"#;
        let parsed: ApiResponse<Vec<Update>> = serde_json::from_str(raw).unwrap();
        let updates = parsed.result.unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].message.as_ref().unwrap().text.as_deref(), Some("/version"));
        assert!(updates[1].message.is_none());
    }
}
