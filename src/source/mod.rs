//! Ledger sources: where transactions for a watched address come from

pub mod blockscout;

pub use blockscout::BlockscoutSource;

use {crate::types::TransactionRecord, async_trait::async_trait, std::time::Duration};

#[derive(Debug)]
pub enum FetchError {
    /// Network-level failure (connect, TLS, reset)
    Transport(String),
    /// Upstream answered with a non-success status
    Status(u16),
    /// Body could not be decoded into transaction records
    Malformed(String),
    /// No answer within the per-address deadline
    Timeout(Duration),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FetchError::Malformed(err.to_string())
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Malformed(err.to_string())
    }
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Transport(e) => write!(f, "transport error: {}", e),
            FetchError::Status(code) => write!(f, "explorer API error: HTTP {}", code),
            FetchError::Malformed(e) => write!(f, "malformed response: {}", e),
            FetchError::Timeout(d) => write!(f, "no response within {}s", d.as_secs()),
        }
    }
}

impl std::error::Error for FetchError {}

#[async_trait]
pub trait LedgerSource: Send + Sync {
    /// Recent transactions touching `address`, in non-decreasing block order
    async fn fetch(&self, address: &str) -> Result<Vec<TransactionRecord>, FetchError>;

    /// Source name for logging
    fn source_name(&self) -> &'static str;
}
