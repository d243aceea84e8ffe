//! Chat command path: `/start`, `/help`, `/add`, `/remove`, `/list`
//!
//! Runs independently of the cycle driver; registry calls take the write
//! lock only for the duration of one mutation.

use {
    crate::{
        backoff::ExponentialBackoff,
        dispatcher::escape_html,
        notify::{ChatMessage, DeliveryError, Notifier, TelegramClient},
        tracker::Tracker,
        types::RecipientId,
    },
    async_trait::async_trait,
    std::time::Duration,
    tokio::sync::watch,
};

/// Retry schedule for failed `getUpdates` polls
const UPDATES_RETRY_INITIAL: Duration = Duration::from_secs(1);
const UPDATES_RETRY_MAX: Duration = Duration::from_secs(60);

pub const ADD_USAGE: &str = "❌ Wrong format! Use: /add &lt;name&gt; &lt;address&gt;";
pub const REMOVE_USAGE: &str = "❌ Wrong format! Use: /remove &lt;name&gt;";

const HELP: &str = "👋 Welcome to chainwatch!\n\
/add &lt;name&gt; &lt;address&gt; - start tracking a wallet\n\
/remove &lt;name&gt; - stop tracking it\n\
/list - show tracked wallets";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Add { label: String, address: String },
    Remove { label: String },
    List,
    /// Known command with wrong arguments; carries the usage reply
    Invalid(&'static str),
    Unknown(String),
}

impl Command {
    /// Parse a chat message. Plain text (no leading `/`) is not a command.
    pub fn parse(text: &str) -> Option<Command> {
        let mut parts = text.split_whitespace();
        let head = parts.next()?;
        let name = head.strip_prefix('/')?;
        // "/add@my_bot" addresses a specific bot in group chats
        let name = name.split('@').next().unwrap_or(name).to_lowercase();
        let args: Vec<&str> = parts.collect();

        Some(match name.as_str() {
            "start" => Command::Start,
            "help" => Command::Help,
            "list" => Command::List,
            "add" => match args.as_slice() {
                [label, address] => Command::Add {
                    label: label.to_string(),
                    address: address.to_string(),
                },
                _ => Command::Invalid(ADD_USAGE),
            },
            "remove" => match args.as_slice() {
                [label] => Command::Remove {
                    label: label.to_string(),
                },
                _ => Command::Invalid(REMOVE_USAGE),
            },
            _ => Command::Unknown(name),
        })
    }
}

/// Perform `command` for `recipient` and build the reply text (HTML)
pub async fn execute(command: Command, recipient: RecipientId, tracker: &Tracker) -> String {
    match command {
        Command::Start | Command::Help => HELP.to_string(),
        Command::Invalid(usage) => usage.to_string(),
        Command::Unknown(name) => format!(
            "❓ Unknown command /{}. Send /help for usage.",
            escape_html(&name)
        ),
        Command::Add { label, address } => match tracker.register(recipient, &label, &address).await {
            Ok(sub) => format!(
                "✅ Address <b>{}</b> ({}) added!",
                escape_html(&sub.label),
                escape_html(&sub.address)
            ),
            Err(e) => format!("⚠️ {}", escape_html(&e.to_string())),
        },
        Command::Remove { label } => match tracker.unregister(recipient, &label).await {
            Ok(()) => format!("✅ Address <b>{}</b> removed!", escape_html(&label)),
            Err(e) => format!("⚠️ {}", escape_html(&e.to_string())),
        },
        Command::List => {
            let subs = tracker.list(recipient).await;
            if subs.is_empty() {
                return "📭 You are not tracking any wallets yet.".to_string();
            }
            let lines: Vec<String> = subs
                .iter()
                .map(|s| {
                    format!(
                        "• <b>{}</b>: <code>{}</code>",
                        escape_html(&s.label),
                        escape_html(&s.address)
                    )
                })
                .collect();
            format!("📋 Tracked wallets:\n{}", lines.join("\n"))
        }
    }
}

/// Where incoming chat messages come from
#[async_trait]
pub trait CommandSource: Send + Sync {
    /// Messages with `update_id >= offset`, plus the next offset
    async fn next_messages(&self, offset: i64) -> Result<(i64, Vec<ChatMessage>), DeliveryError>;
}

#[async_trait]
impl CommandSource for TelegramClient {
    async fn next_messages(&self, offset: i64) -> Result<(i64, Vec<ChatMessage>), DeliveryError> {
        self.get_updates(offset).await
    }
}

/// Wait before polling again after `err`
///
/// A rate limit waits for the server's hint (capped) and leaves the
/// exponential schedule alone; every other failure advances it.
pub fn retry_delay(err: &DeliveryError, backoff: &mut ExponentialBackoff) -> Duration {
    match err {
        DeliveryError::RateLimited { retry_after } => (*retry_after).min(backoff.max_delay()),
        _ => backoff.next_delay(),
    }
}

/// Receive commands, execute them and reply until `shutdown` flips
pub async fn command_loop(
    source: &dyn CommandSource,
    notifier: &dyn Notifier,
    tracker: &Tracker,
    mut shutdown: watch::Receiver<bool>,
) {
    log::info!("💬 Command loop started");

    let mut offset = 0;
    let mut backoff = ExponentialBackoff::new(UPDATES_RETRY_INITIAL, UPDATES_RETRY_MAX);

    loop {
        if *shutdown.borrow() {
            break;
        }

        let polled = tokio::select! {
            polled = source.next_messages(offset) => polled,
            _ = shutdown.changed() => break,
        };

        let messages = match polled {
            Ok((next_offset, messages)) => {
                backoff.reset();
                offset = next_offset;
                messages
            }
            Err(e) => {
                let wait = retry_delay(&e, &mut backoff);
                log::warn!(
                    "⚠️  Failed to fetch chat updates: {} (retrying in {}s, {} failure(s) in a row)",
                    e,
                    wait.as_secs(),
                    backoff.consecutive_failures()
                );
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = shutdown.changed() => break,
                }
                continue;
            }
        };

        for message in messages {
            let Some(command) = Command::parse(&message.text) else {
                continue;
            };
            log::info!("💬 {} -> {:?}", message.recipient_id, command);

            let reply = execute(command, message.recipient_id, tracker).await;
            if let Err(e) = notifier.send(message.recipient_id, &reply).await {
                log::warn!("⚠️  Failed to reply to {}: {}", message.recipient_id, e);
            }
        }
    }

    log::info!("Command loop stopped");
}
