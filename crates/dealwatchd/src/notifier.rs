//! Notification system - sends human-readable status text to the operator.
//!
//! Notifying is best-effort: implementations swallow every failure and record
//! it in the activity log instead, so a dead chat API never breaks the caller.

use crate::config::TelegramConfig;
use crate::telegram::{TelegramClient, TelegramError};
use async_trait::async_trait;
use dealwatch_shared::EventLog;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `text`. Never fails.
    async fn notify(&self, text: &str);
}

/// Sends notifications to a Telegram chat
pub struct TelegramNotifier {
    client: TelegramClient,
    chat_id: String,
    has_credentials: bool,
    log: EventLog,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig, log: EventLog) -> Self {
        Self {
            client: TelegramClient::new(config),
            chat_id: config.chat_id.clone(),
            has_credentials: config.has_credentials(),
            log,
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, text: &str) {
        if !self.has_credentials {
            warn!("Telegram token or chat id missing, notification not sent");
            self.log.record("telegram_credentials_missing", json!({}));
        } else {
            match self.client.send_message(&self.chat_id, text).await {
                Ok(()) => {}
                Err(TelegramError::Api { status, body }) => {
                    warn!("Telegram rejected notification ({}): {}", status, body);
                    self.log.record(
                        "telegram_error",
                        json!({"message": text, "status": status, "response": body}),
                    );
                }
                Err(e) => {
                    warn!("Error sending notification: {}", e);
                    self.log.record(
                        "telegram_exception",
                        json!({"message": text, "exception": e.to_string()}),
                    );
                }
            }
        }

        self.log.record("notification", json!({"message": text}));
    }
}

/// Records notifications without delivering them (dry runs, no credentials)
pub struct LogNotifier {
    log: EventLog,
}

impl LogNotifier {
    pub fn new(log: EventLog) -> Self {
        Self { log }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, text: &str) {
        info!("notify: {}", text);
        self.log
            .record("notification", json!({"message": text, "delivered": false}));
    }
}

/// Pick the notifier for this process. Missing credentials are recorded here,
/// so call it once and share the result.
pub fn notifier_for(config: &TelegramConfig, dry_run: bool, log: EventLog) -> Arc<dyn Notifier> {
    if dry_run {
        return Arc::new(LogNotifier::new(log));
    }
    if !config.has_credentials() {
        warn!("Telegram token or chat id missing, notifications go to the activity log only");
        log.record("telegram_credentials_missing", json!({}));
        return Arc::new(LogNotifier::new(log));
    }
    Arc::new(TelegramNotifier::new(config, log))
}
