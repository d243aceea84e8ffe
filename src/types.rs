//! Core data types shared across the tracker
//!
//! - `Subscription` - durable (recipient, label, address) association
//! - `TransactionRecord` - one transaction as returned by a ledger source
//! - `Category` - semantic classification of a transaction
//! - `ClassifiedEvent` - a transaction attached to one subscription
//! - `PendingBatch` - classified events grouped for one recipient

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque chat/session identifier of a notification recipient
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipientId(pub i64);

impl fmt::Display for RecipientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Canonical form of an external-chain address (trimmed, ASCII lowercase)
pub fn normalize_address(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub recipient_id: RecipientId,
    pub label: String,
    /// Always stored normalized
    pub address: String,
}

/// A transaction as seen by the ledger source
///
/// Treated as opaque apart from the fields the classifier inspects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub hash: String,
    pub from: String,
    /// `None` for contract creation
    pub to: Option<String>,
    /// Amount in the chain's smallest unit
    pub value: u128,
    pub input_data: String,
    /// `None` while pending
    pub block_number: Option<u64>,
    pub token_symbol: Option<String>,
}

impl TransactionRecord {
    /// Lowercased hash, used as the dedup identity
    pub fn identity(&self) -> String {
        self.hash.trim().to_ascii_lowercase()
    }
}

/// Semantic category assigned by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Send,
    Receive,
    Swap,
    TokenTransfer,
    #[serde(rename = "NFTPurchase")]
    NftPurchase,
    #[serde(rename = "NFTSale")]
    NftSale,
    Unknown,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Send => "Send",
            Category::Receive => "Receive",
            Category::Swap => "Swap",
            Category::TokenTransfer => "TokenTransfer",
            Category::NftPurchase => "NFTPurchase",
            Category::NftSale => "NFTSale",
            Category::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A new transaction attached to one subscription watching its address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedEvent {
    pub subscription: Subscription,
    pub transaction: TransactionRecord,
    pub category: Category,
}

/// All events of one cycle addressed to a single recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingBatch {
    pub recipient_id: RecipientId,
    pub events: Vec<ClassifiedEvent>,
}

/// Group events by recipient, preserving first-seen recipient order and
/// event order within each recipient.
pub fn group_by_recipient(events: Vec<ClassifiedEvent>) -> Vec<PendingBatch> {
    let mut batches: Vec<PendingBatch> = Vec::new();

    for event in events {
        let recipient = event.subscription.recipient_id;
        match batches.iter_mut().find(|b| b.recipient_id == recipient) {
            Some(batch) => batch.events.push(event),
            None => batches.push(PendingBatch {
                recipient_id: recipient,
                events: vec![event],
            }),
        }
    }

    batches
}
