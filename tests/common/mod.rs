//! In-memory ledger source and notifier shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chainwatch::{
    notify::{DeliveryError, Notifier},
    source::{FetchError, LedgerSource},
    RecipientId, TransactionRecord,
};
use std::{
    collections::HashMap,
    sync::Mutex,
};

/// Returns whatever transactions are currently scripted per address
#[derive(Default)]
pub struct ScriptedSource {
    pub responses: Mutex<HashMap<String, Vec<TransactionRecord>>>,
    pub failing: Mutex<Vec<String>>,
    pub calls: Mutex<Vec<String>>,
}

impl ScriptedSource {
    pub fn set(&self, address: &str, txs: Vec<TransactionRecord>) {
        self.responses.lock().unwrap().insert(address.to_string(), txs);
    }

    pub fn fail(&self, address: &str) {
        self.failing.lock().unwrap().push(address.to_string());
    }

    pub fn call_count(&self, address: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|a| *a == address).count()
    }
}

#[async_trait]
impl LedgerSource for ScriptedSource {
    async fn fetch(&self, address: &str) -> Result<Vec<TransactionRecord>, FetchError> {
        self.calls.lock().unwrap().push(address.to_string());
        if self.failing.lock().unwrap().iter().any(|a| a == address) {
            return Err(FetchError::Transport("connection reset".to_string()));
        }
        Ok(self
            .responses
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .unwrap_or_default())
    }

    fn source_name(&self) -> &'static str {
        "scripted"
    }
}

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub recipient: RecipientId,
    pub text: String,
    pub at: tokio::time::Instant,
}

/// Records sends; rate-limits listed recipients on their first attempt
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<SentMessage>>,
    pub rate_limit_once: Mutex<HashMap<RecipientId, std::time::Duration>>,
}

impl RecordingNotifier {
    pub fn delivered_to(&self, recipient: RecipientId) -> Vec<SentMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.recipient == recipient)
            .cloned()
            .collect()
    }

    pub fn total(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, recipient: RecipientId, text: &str) -> Result<(), DeliveryError> {
        if let Some(retry_after) = self.rate_limit_once.lock().unwrap().remove(&recipient) {
            return Err(DeliveryError::RateLimited { retry_after });
        }
        self.sent.lock().unwrap().push(SentMessage {
            recipient,
            text: text.to_string(),
            at: tokio::time::Instant::now(),
        });
        Ok(())
    }
}

pub fn tx(hash: &str, from: &str, to: &str, value: u128, block: u64) -> TransactionRecord {
    TransactionRecord {
        hash: hash.to_string(),
        from: from.to_string(),
        to: Some(to.to_string()),
        value,
        input_data: String::new(),
        block_number: Some(block),
        token_symbol: None,
    }
}
