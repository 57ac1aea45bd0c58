//! Telegram delivery via the Bot API.
//!
//! Requires the `telegram` feature. Credentials come from the environment,
//! never from the config file.

use async_trait::async_trait;
use teloxide::prelude::*;
use tracing::info;

use super::Notifier;
use crate::error::NotifyError;

/// Telegram credentials and destination.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    /// Bot API token obtained from BotFather.
    pub bot_token: String,
    /// Target chat ID for alerts.
    pub chat_id: i64,
}

impl TelegramConfig {
    /// Read `TELEGRAM_BOT_TOKEN` and `TELEGRAM_CHAT_ID` from the environment.
    /// Returns `None` if either is missing or invalid.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let bot_token = std::env::var("TELEGRAM_BOT_TOKEN").ok()?;
        let chat_id = std::env::var("TELEGRAM_CHAT_ID")
            .ok()
            .and_then(|s| s.parse().ok())?;

        Some(Self { bot_token, chat_id })
    }
}

/// Notifier that sends alerts to a Telegram chat.
pub struct TelegramNotifier {
    bot: Bot,
    chat_id: ChatId,
}

impl TelegramNotifier {
    #[must_use]
    pub fn new(config: &TelegramConfig) -> Self {
        info!(chat_id = config.chat_id, "Telegram notifier configured");
        Self {
            bot: Bot::new(&config.bot_token),
            chat_id: ChatId(config.chat_id),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        self.bot
            .send_message(self.chat_id, text)
            .await
            .map(|_| ())
            .map_err(classify)
    }

    fn name(&self) -> &'static str {
        "telegram"
    }
}

/// Rate limits and network failures are worth retrying; API rejections
/// (bad token, unknown chat) are not.
fn classify(err: teloxide::RequestError) -> NotifyError {
    use teloxide::RequestError;

    let transient = matches!(
        err,
        RequestError::RetryAfter(_) | RequestError::Network(_) | RequestError::Io(_)
    );
    if transient {
        NotifyError::Transient(err.to_string())
    } else {
        NotifyError::Permanent(err.to_string())
    }
}
