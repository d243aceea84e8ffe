//! Telegram Bot API client
//!
//! - `sendMessage` for notifications and command replies
//! - `getUpdates` long polling for incoming chat commands
//!
//! Rate limiting is read from the structured `parameters.retry_after` field
//! (falling back to the `Retry-After` header), never from the description.

use {
    super::{DeliveryError, Notifier},
    crate::types::RecipientId,
    async_trait::async_trait,
    serde::{de::DeserializeOwned, Deserialize, Serialize},
    std::time::Duration,
};

/// Used when a 429 carries no retry hint at all
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    error_code: Option<u16>,
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct IncomingMessage {
    chat: Chat,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<IncomingMessage>,
}

/// A text message received from a chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub update_id: i64,
    pub recipient_id: RecipientId,
    pub text: String,
}

/// Map a Bot API reply to a delivery outcome
fn interpret_response<T: DeserializeOwned>(
    status: u16,
    retry_after_header: Option<u64>,
    body: &str,
) -> Result<Option<T>, DeliveryError> {
    let parsed: Option<ApiResponse<T>> = serde_json::from_str(body).ok();

    let error_code = parsed.as_ref().and_then(|r| r.error_code).unwrap_or(status);
    if status == 429 || error_code == 429 {
        let retry_after = parsed
            .as_ref()
            .and_then(|r| r.parameters.as_ref())
            .and_then(|p| p.retry_after)
            .or(retry_after_header)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RETRY_AFTER);
        return Err(DeliveryError::RateLimited { retry_after });
    }

    match parsed {
        Some(reply) if reply.ok && (200..300).contains(&status) => Ok(reply.result),
        Some(reply) => Err(DeliveryError::Rejected(format!(
            "HTTP {}: {}",
            error_code,
            reply.description.unwrap_or_default()
        ))),
        None => Err(DeliveryError::Rejected(format!(
            "HTTP {}: unreadable response",
            status
        ))),
    }
}

pub struct TelegramClient {
    client: reqwest::Client,
    base_url: String,
    long_poll: Duration,
}

impl TelegramClient {
    pub fn new(api_url: &str, token: &str, long_poll: Duration) -> Result<Self, DeliveryError> {
        // Must outlive a full long-poll round trip
        let client = reqwest::Client::builder()
            .timeout(long_poll + Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: format!("{}/bot{}", api_url.trim_end_matches('/'), token),
            long_poll,
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<Option<T>, DeliveryError> {
        let response = request.send().await?;
        let status = response.status().as_u16();
        let retry_after_header = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body = response.text().await?;

        interpret_response(status, retry_after_header, &body)
    }

    /// Long-poll incoming text messages with `update_id >= offset`.
    /// Returns the offset to use for the next call alongside the messages.
    pub async fn get_updates(&self, offset: i64) -> Result<(i64, Vec<ChatMessage>), DeliveryError> {
        let request = self
            .client
            .get(format!("{}/getUpdates", self.base_url))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", self.long_poll.as_secs().to_string()),
            ]);

        let updates: Vec<Update> = self.call(request).await?.unwrap_or_default();
        Ok(collect_messages(offset, updates))
    }
}

fn collect_messages(offset: i64, updates: Vec<Update>) -> (i64, Vec<ChatMessage>) {
    let next_offset = updates
        .iter()
        .map(|u| u.update_id + 1)
        .max()
        .unwrap_or(offset)
        .max(offset);

    let messages = updates
        .into_iter()
        .filter_map(|u| {
            let message = u.message?;
            let text = message.text?;
            Some(ChatMessage {
                update_id: u.update_id,
                recipient_id: RecipientId(message.chat.id),
                text,
            })
        })
        .collect();

    (next_offset, messages)
}

#[async_trait]
impl Notifier for TelegramClient {
    async fn send(&self, recipient: RecipientId, text: &str) -> Result<(), DeliveryError> {
        let request = self
            .client
            .post(format!("{}/sendMessage", self.base_url))
            .json(&SendMessageRequest {
                chat_id: recipient.0,
                text,
                parse_mode: "HTML",
                disable_web_page_preview: true,
            });

        self.call::<serde_json::Value>(request).await.map(|_| ())
    }
}
