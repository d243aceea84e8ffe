//! chainwatch - wallet activity tracker
//!
//! Watches user-registered addresses, polls a ledger explorer for each,
//! detects transactions not seen before, classifies them and notifies the
//! subscribed chats without duplicate or flooded delivery.
//!
//! ## Module Organization
//!
//! - `registry` - persisted chat -> named address subscriptions
//! - `dedup` - seen-set / block-cursor de-duplication state
//! - `classifier` - transaction -> category heuristic
//! - `source` - ledger sources (Blockscout)
//! - `notify` - notification transports (Telegram)
//! - `poller` - fetch / diff / classify / commit
//! - `dispatcher` - per-recipient batching and rate-limit backoff
//! - `tracker` - the recurring cycle and registry operations
//! - `commands` - chat command parsing and handling
//! - `backoff` - capped retry delay for the command loop

pub mod backoff;
pub mod classifier;
pub mod commands;
pub mod config;
pub mod dedup;
pub mod dispatcher;
pub mod notify;
pub mod persistence;
pub mod poller;
pub mod registry;
pub mod source;
pub mod tracker;
pub mod types;

pub use config::Config;
pub use tracker::{CycleReport, Tracker};
pub use types::{Category, ClassifiedEvent, RecipientId, Subscription, TransactionRecord};
