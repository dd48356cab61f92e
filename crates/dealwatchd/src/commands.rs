//! Chat command front end.
//!
//! Long-polls the bot API for messages and answers `/version` and `/start`.
//! Other text is ignored.

use crate::telegram::TelegramClient;
use dealwatch_shared::{BuildInfo, VersionStore};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Long-poll window passed to getUpdates
const POLL_TIMEOUT_SECS: u64 = 30;

/// Pause after a failed poll
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Reply for a chat message, if it is a known command
pub fn dispatch(text: &str, versions: &VersionStore) -> Option<String> {
    // "/version@SomeBot extra" -> "/version"
    let command = text.split_whitespace().next()?;
    let command = command.split('@').next().unwrap_or(command);

    match command {
        "/version" => Some(format!("🤖 Current agent version: {}", versions.current())),
        "/start" => Some(format!(
            "👋 dealwatch agent running ({}). Send /version for the deployed revision.",
            BuildInfo::current()
        )),
        _ => None,
    }
}

pub struct CommandPoller {
    client: TelegramClient,
    versions: VersionStore,
    offset: i64,
}

impl CommandPoller {
    pub fn new(client: TelegramClient, versions: VersionStore) -> Self {
        Self {
            client,
            versions,
            offset: 0,
        }
    }

    /// Fetch and answer one batch of messages
    pub async fn poll_once(&mut self) -> Result<usize, crate::telegram::TelegramError> {
        let updates = self.client.get_updates(self.offset, POLL_TIMEOUT_SECS).await?;
        let mut answered = 0;

        for update in updates {
            self.offset = self.offset.max(update.update_id + 1);

            let Some(message) = update.message else {
                continue;
            };
            let Some(reply) = message.text.as_deref().and_then(|t| dispatch(t, &self.versions)) else {
                continue;
            };

            debug!("Answering command in chat {}", message.chat.id);
            if let Err(e) = self.client.send_message(&message.chat.id.to_string(), &reply).await {
                warn!("Failed to answer command: {}", e);
            } else {
                answered += 1;
            }
        }
        Ok(answered)
    }

    /// Poll until cancelled, backing off after errors
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("💬  Command poller started");
        loop {
            let delay = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.poll_once() => match result {
                    Ok(_) => Duration::ZERO,
                    Err(e) => {
                        warn!("Command poll failed: {}", e);
                        RETRY_DELAY
                    }
                },
            };

            if !delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
        info!("Command poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_version_command_reads_marker() {
        let dir = TempDir::new().unwrap();
        let versions = VersionStore::new(dir.path().join("version.txt"));
        versions.commit("a1b2c3d").unwrap();

        assert_eq!(
            dispatch("/version", &versions).as_deref(),
            Some("🤖 Current agent version: a1b2c3d")
        );
        assert_eq!(
            dispatch("/version@dealwatch_bot", &versions).as_deref(),
            Some("🤖 Current agent version: a1b2c3d")
        );
    }

    #[test]
    fn test_version_command_without_marker() {
        let dir = TempDir::new().unwrap();
        let versions = VersionStore::new(dir.path().join("version.txt"));
        let reply = dispatch("/version", &versions).unwrap();
        assert!(reply.ends_with("0.0.0"));
    }

    #[test]
    fn test_other_text_ignored() {
        let dir = TempDir::new().unwrap();
        let versions = VersionStore::new(dir.path().join("version.txt"));
        assert!(dispatch("hello", &versions).is_none());
        assert!(dispatch("", &versions).is_none());
        assert!(dispatch("/start", &versions).is_some());
    }
}
