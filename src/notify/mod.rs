//! Notification transports

pub mod telegram;

pub use telegram::{ChatMessage, TelegramClient};

use {crate::types::RecipientId, async_trait::async_trait, std::time::Duration};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Transport asked us to back off for `retry_after`
    RateLimited { retry_after: Duration },
    /// Transport refused the message (bad chat, blocked bot, bad markup)
    Rejected(String),
    /// Network-level failure
    Transport(String),
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        DeliveryError::Transport(err.to_string())
    }
}

impl std::fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryError::RateLimited { retry_after } => {
                write!(f, "rate limited, retry after {}s", retry_after.as_secs())
            }
            DeliveryError::Rejected(e) => write!(f, "rejected: {}", e),
            DeliveryError::Transport(e) => write!(f, "transport error: {}", e),
        }
    }
}

impl std::error::Error for DeliveryError {}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `text` (HTML) to `recipient`
    async fn send(&self, recipient: RecipientId, text: &str) -> Result<(), DeliveryError>;
}
