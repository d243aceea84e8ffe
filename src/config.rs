//! Runtime configuration from environment variables
//!
//! Environment variables:
//! - `BOT_TOKEN` (required)
//! - `TELEGRAM_API_URL` (default: https://api.telegram.org)
//! - `EXPLORER_API_URL` (default: https://soneium.blockscout.com)
//! - `POLL_INTERVAL_SECS` (default: 30)
//! - `FETCH_TIMEOUT_SECS` (default: 15)
//! - `FETCH_CONCURRENCY` (default: 4)
//! - `FETCH_LIMIT` (default: 5)
//! - `SUBSCRIPTIONS_PATH` (default: users.json)
//! - `DEDUP_PATH` (default: seen.json)
//! - `DEDUP_STRATEGY` (set | cursor, default: set)
//! - `SEEN_MAX_PER_ADDRESS` (default: 0 = unbounded)
//! - `BATCH_NOTIFICATIONS` (default: true)
//! - `MAX_MESSAGE_CHARS` (default: 4000)
//! - `MAX_RETRY_AFTER_SECS` (default: 60)

use {
    crate::{dedup::DedupStrategy, dispatcher::DispatcherConfig},
    std::{env, str::FromStr, time::Duration},
};

#[derive(Debug)]
pub enum ConfigError {
    MissingVariable(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingVariable(var) => write!(f, "Missing environment variable: {}", var),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub telegram_api_url: String,
    pub explorer_api_url: String,
    pub poll_interval: Duration,
    pub fetch_timeout: Duration,
    pub fetch_concurrency: usize,
    pub fetch_limit: usize,
    pub subscriptions_path: String,
    pub dedup_path: String,
    pub dedup_strategy: DedupStrategy,
    /// 0 = unbounded
    pub seen_max_per_address: usize,
    pub batch_notifications: bool,
    pub max_message_chars: usize,
    pub max_retry_after: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            telegram_api_url: "https://api.telegram.org".to_string(),
            explorer_api_url: "https://soneium.blockscout.com".to_string(),
            poll_interval: Duration::from_secs(30),
            fetch_timeout: Duration::from_secs(15),
            fetch_concurrency: 4,
            fetch_limit: 5,
            subscriptions_path: "users.json".to_string(),
            dedup_path: "seen.json".to_string(),
            dedup_strategy: DedupStrategy::SeenSet,
            seen_max_per_address: 0,
            batch_notifications: true,
            max_message_chars: 4000,
            max_retry_after: Duration::from_secs(60),
        }
    }
}

/// Parse an optional variable, warning and falling back on garbage
fn parsed_or<T: FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => match raw.trim().to_lowercase().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                log::warn!("Invalid {} '{}', using default", name, raw);
                default
            }
        },
        Err(_) => default,
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let bot_token = env::var("BOT_TOKEN")
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ConfigError::MissingVariable("BOT_TOKEN".to_string()))?;

        let poll_interval_secs = parsed_or("POLL_INTERVAL_SECS", defaults.poll_interval.as_secs());
        if poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "POLL_INTERVAL_SECS must be greater than 0".to_string(),
            ));
        }

        let dedup_strategy = match env::var("DEDUP_STRATEGY") {
            Ok(raw) => raw.parse::<DedupStrategy>().map_err(ConfigError::InvalidValue)?,
            Err(_) => defaults.dedup_strategy,
        };

        Ok(Self {
            bot_token,
            telegram_api_url: env::var("TELEGRAM_API_URL").unwrap_or(defaults.telegram_api_url),
            explorer_api_url: env::var("EXPLORER_API_URL").unwrap_or(defaults.explorer_api_url),
            poll_interval: Duration::from_secs(poll_interval_secs),
            fetch_timeout: Duration::from_secs(
                parsed_or("FETCH_TIMEOUT_SECS", defaults.fetch_timeout.as_secs()).max(1),
            ),
            fetch_concurrency: parsed_or("FETCH_CONCURRENCY", defaults.fetch_concurrency).max(1),
            fetch_limit: parsed_or("FETCH_LIMIT", defaults.fetch_limit).max(1),
            subscriptions_path: env::var("SUBSCRIPTIONS_PATH").unwrap_or(defaults.subscriptions_path),
            dedup_path: env::var("DEDUP_PATH").unwrap_or(defaults.dedup_path),
            dedup_strategy,
            seen_max_per_address: parsed_or("SEEN_MAX_PER_ADDRESS", defaults.seen_max_per_address),
            batch_notifications: parsed_or("BATCH_NOTIFICATIONS", defaults.batch_notifications),
            max_message_chars: parsed_or("MAX_MESSAGE_CHARS", defaults.max_message_chars).max(256),
            max_retry_after: Duration::from_secs(parsed_or(
                "MAX_RETRY_AFTER_SECS",
                defaults.max_retry_after.as_secs(),
            )),
        })
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            batching: self.batch_notifications,
            max_message_chars: self.max_message_chars,
            max_retry_after: self.max_retry_after,
            explorer_url: self.explorer_api_url.clone(),
        }
    }
}
