//! Notification dispatcher
//!
//! Turns one cycle's pending batches into outbound messages and hands them
//! to the `Notifier`:
//! - events for one recipient are packed into as few messages as fit
//!   `max_message_chars` (or one message per event when batching is off)
//! - recipients are served concurrently; a rate-limit wait for one recipient
//!   never delays another
//! - on `RateLimited` the recipient's sends pause for the hinted duration
//!   (capped) and the message is retried once
//! - any other failure drops the message; its transactions are already
//!   committed as seen, so there is no redelivery

use {
    crate::{
        notify::{DeliveryError, Notifier},
        registry::MAX_LABEL_CHARS,
        types::{ClassifiedEvent, PendingBatch, RecipientId},
    },
    futures::future::join_all,
    std::{sync::Arc, time::Duration},
};

/// Room kept for the batch header line
const HEADER_RESERVE: usize = 64;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub batching: bool,
    pub max_message_chars: usize,
    pub max_retry_after: Duration,
    /// Explorer base used for transaction links
    pub explorer_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResult {
    Delivered,
    Dropped(String),
}

/// Outcome for a single classified event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDelivery {
    pub recipient_id: RecipientId,
    pub label: String,
    pub hash: String,
    pub result: DeliveryResult,
}

/// One outbound message and the events it carries
#[derive(Debug, Clone)]
struct OutboundMessage {
    text: String,
    events: Vec<usize>,
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Labels loaded from older files may predate the length check
fn display_label(label: &str) -> String {
    if label.chars().count() <= MAX_LABEL_CHARS {
        return label.to_string();
    }
    let mut short: String = label.chars().take(MAX_LABEL_CHARS - 1).collect();
    short.push('…');
    short
}

/// Single notification line for one event
pub fn render_event(event: &ClassifiedEvent, explorer_url: &str) -> String {
    format!(
        "🔄 <b>{}</b> · {} · <a href='{}/tx/{}'>view tx</a>",
        escape_html(&display_label(&event.subscription.label)),
        event.category,
        explorer_url.trim_end_matches('/'),
        escape_html(&event.transaction.hash),
    )
}

pub struct Dispatcher {
    notifier: Arc<dyn Notifier>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, config: DispatcherConfig) -> Self {
        Self { notifier, config }
    }

    /// Deliver every batch, returning one result per event
    pub async fn deliver(&self, batches: Vec<PendingBatch>) -> Vec<EventDelivery> {
        let deliveries = batches.iter().map(|batch| self.deliver_batch(batch));

        join_all(deliveries).await.into_iter().flatten().collect()
    }

    async fn deliver_batch(&self, batch: &PendingBatch) -> Vec<EventDelivery> {
        let mut results: Vec<DeliveryResult> =
            vec![DeliveryResult::Dropped("not sent".to_string()); batch.events.len()];

        for message in self.render_batch(&batch.events) {
            let outcome = match self.send_with_backoff(batch.recipient_id, &message.text).await {
                Ok(()) => DeliveryResult::Delivered,
                Err(e) => {
                    log::warn!(
                        "⚠️  Dropped {} notification(s) for {}: {}",
                        message.events.len(),
                        batch.recipient_id,
                        e
                    );
                    DeliveryResult::Dropped(e.to_string())
                }
            };

            for index in message.events {
                results[index] = outcome.clone();
            }
        }

        batch
            .events
            .iter()
            .zip(results)
            .map(|(event, result)| EventDelivery {
                recipient_id: batch.recipient_id,
                label: event.subscription.label.clone(),
                hash: event.transaction.hash.clone(),
                result,
            })
            .collect()
    }

    async fn send_with_backoff(&self, recipient: RecipientId, text: &str) -> Result<(), DeliveryError> {
        match self.notifier.send(recipient, text).await {
            Err(DeliveryError::RateLimited { retry_after }) => {
                let wait = retry_after.min(self.config.max_retry_after);
                log::warn!(
                    "⏳ Rate limited for {}, pausing {}s before retry",
                    recipient,
                    wait.as_secs()
                );
                tokio::time::sleep(wait).await;
                self.notifier.send(recipient, text).await
            }
            other => other,
        }
    }

    fn render_batch(&self, events: &[ClassifiedEvent]) -> Vec<OutboundMessage> {
        let lines: Vec<String> = events
            .iter()
            .map(|e| render_event(e, &self.config.explorer_url))
            .collect();

        if !self.config.batching || lines.len() == 1 {
            return lines
                .into_iter()
                .enumerate()
                .map(|(i, text)| OutboundMessage {
                    text,
                    events: vec![i],
                })
                .collect();
        }

        let budget = self.config.max_message_chars.saturating_sub(HEADER_RESERVE);
        let mut chunks: Vec<Vec<usize>> = Vec::new();
        let mut current: Vec<usize> = Vec::new();
        let mut current_len = 0;

        for (i, line) in lines.iter().enumerate() {
            let len = line.chars().count() + 1;
            if !current.is_empty() && current_len + len > budget {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            current.push(i);
            current_len += len;
        }
        if !current.is_empty() {
            chunks.push(current);
        }

        chunks
            .into_iter()
            .map(|chunk| {
                let body = chunk
                    .iter()
                    .map(|&i| lines[i].as_str())
                    .collect::<Vec<_>>()
                    .join("\n");
                let text = if chunk.len() == 1 {
                    body
                } else {
                    format!("🔔 <b>{} new transactions</b>\n{}", chunk.len(), body)
                };
                OutboundMessage { text, events: chunk }
            })
            .collect()
    }
}
