//! Long-poll loop feeding chat uploads into the [`Ingestor`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use filelink_botapi::{BotClient, Message};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::ingestor::{IngestError, Ingestor};
use crate::upload::Upload;

#[derive(Debug, Clone)]
pub struct BotLoopConfig {
    /// Public base URL used when building share links.
    pub base_url: String,
    pub poll_timeout: Duration,
    /// Pause after a failed poll.
    pub retry_backoff: Duration,
}

pub struct BotLoop {
    client: BotClient,
    ingestor: Arc<Ingestor>,
    config: BotLoopConfig,
}

impl BotLoop {
    pub fn new(client: BotClient, ingestor: Arc<Ingestor>, config: BotLoopConfig) -> Self {
        Self {
            client,
            ingestor,
            config,
        }
    }

    /// Poll until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            poll_timeout_secs = self.config.poll_timeout.as_secs(),
            "Bot loop started"
        );
        let mut offset: Option<i64> = None;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let polled = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                polled = self.client.get_updates(offset, self.config.poll_timeout) => polled,
            };

            match polled {
                Ok(updates) => {
                    for update in updates {
                        offset = Some(update.update_id + 1);
                        if let Some(message) = update.message {
                            self.handle_message(&message).await;
                        }
                    }
                }
                Err(err) => {
                    warn!(error = %err, "Polling for updates failed");
                    tokio::select! {
                        _ = shutdown.changed() => {}
                        _ = tokio::time::sleep(self.config.retry_backoff) => {}
                    }
                }
            }
        }

        info!("Bot loop stopped");
        Ok(())
    }

    async fn handle_message(&self, message: &Message) {
        let Some(reply) = self.reply_for(message) else {
            debug!(message_id = message.message_id, "Ignoring message");
            return;
        };

        if let Err(err) = self
            .client
            .send_message(message.chat.id, &reply, Some(message.message_id))
            .await
        {
            warn!(chat_id = message.chat.id, error = %err, "Failed to send reply");
        }
    }

    /// Process `message` and produce the reply text, if it warrants one.
    pub fn reply_for(&self, message: &Message) -> Option<String> {
        if let Some(upload) = Upload::from_message(message) {
            return Some(match self.ingestor.ingest(upload) {
                Ok(token) => format!(
                    "✅ Saved!\n🔗 {}/file/{}",
                    self.config.base_url.trim_end_matches('/'),
                    token
                ),
                Err(IngestError::PayloadTooLarge { .. }) => {
                    format!("❌ Too large (Max {}MB)", self.max_mib())
                }
                Err(err) => {
                    error!(error = %err, "Failed to register upload");
                    "⚠️ Could not save this file, please try again later.".to_string()
                }
            });
        }

        let text = message.text.as_deref()?.trim();
        let command = text.split_whitespace().next()?;
        // Commands may be addressed as /start@botname.
        if command.split('@').next() == Some("/start") {
            return Some(format!("Send me a file (Max {}MB).", self.max_mib()));
        }
        None
    }

    fn max_mib(&self) -> u64 {
        self.ingestor.max_upload_bytes() / (1024 * 1024)
    }
}
