//! Blockscout explorer integration
//!
//! Endpoint: `{base}/api/v2/addresses/{address}/transactions`
//! Returns: `{ "items": [...], "next_page_params": ... }`, newest first.
//!
//! Only the first page is read; the newest `limit` items are kept and handed
//! back oldest-first so block-cursor dedup sees non-decreasing blocks.

use {
    super::{FetchError, LedgerSource},
    crate::types::TransactionRecord,
    async_trait::async_trait,
    serde::Deserialize,
    std::time::Duration,
};

#[derive(Debug, Deserialize)]
struct TransactionsPage {
    #[serde(default)]
    items: Vec<BlockscoutTransaction>,
}

#[derive(Debug, Deserialize)]
struct AddressRef {
    hash: String,
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    symbol: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenTransfer {
    token: Option<TokenInfo>,
}

#[derive(Debug, Deserialize)]
struct BlockscoutTransaction {
    hash: String,
    from: AddressRef,
    to: Option<AddressRef>,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    raw_input: Option<String>,
    #[serde(default)]
    block_number: Option<u64>,
    /// Older API versions name the field `block`
    #[serde(default)]
    block: Option<u64>,
    #[serde(default)]
    token_transfers: Option<Vec<TokenTransfer>>,
}

impl BlockscoutTransaction {
    fn into_record(self) -> Result<TransactionRecord, FetchError> {
        let value = match self.value.as_deref().map(str::trim) {
            None | Some("") => 0,
            Some(v) => v.parse::<u128>().map_err(|_| {
                FetchError::Malformed(format!("tx {}: invalid value '{}'", self.hash, v))
            })?,
        };

        let token_symbol = self
            .token_transfers
            .unwrap_or_default()
            .into_iter()
            .filter_map(|t| t.token.and_then(|token| token.symbol))
            .find(|s| !s.trim().is_empty());

        Ok(TransactionRecord {
            hash: self.hash,
            from: self.from.hash,
            to: self.to.map(|to| to.hash),
            value,
            input_data: self.raw_input.unwrap_or_default(),
            block_number: self.block_number.or(self.block),
            token_symbol,
        })
    }
}

/// Decode a transactions page into at most `limit` records, oldest first
pub fn parse_transactions(body: &str, limit: usize) -> Result<Vec<TransactionRecord>, FetchError> {
    let page: TransactionsPage = serde_json::from_str(body)?;

    let mut records = page
        .items
        .into_iter()
        .take(limit)
        .map(BlockscoutTransaction::into_record)
        .collect::<Result<Vec<_>, _>>()?;

    // Stable: equal blocks keep explorer order reversed to oldest-first
    records.reverse();
    records.sort_by_key(|r| r.block_number.unwrap_or(u64::MAX));
    Ok(records)
}

pub struct BlockscoutSource {
    client: reqwest::Client,
    base_url: String,
    limit: usize,
}

impl BlockscoutSource {
    pub fn new(base_url: &str, limit: usize, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            limit: limit.max(1),
        })
    }

    fn transactions_url(&self, address: &str) -> String {
        format!("{}/api/v2/addresses/{}/transactions", self.base_url, address)
    }
}

#[async_trait]
impl LedgerSource for BlockscoutSource {
    async fn fetch(&self, address: &str) -> Result<Vec<TransactionRecord>, FetchError> {
        let response = self.client.get(self.transactions_url(address)).send().await?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let body = response.text().await?;
        parse_transactions(&body, self.limit)
    }

    fn source_name(&self) -> &'static str {
        "blockscout"
    }
}
