//! Transaction classification
//!
//! Pure heuristic, not a decoder. Rules are checked in order and the first
//! match wins, since the raw fields overlap (a token transfer usually also
//! carries calldata):
//!
//! 1. token symbol with an NFT marker -> `NFTSale` if the watched address sent
//!    it, else `NFTPurchase`
//! 2. any other token symbol -> `TokenTransfer`
//! 3. non-empty input data -> `Swap`
//! 4. non-zero value -> `Send` / `Receive` by direction
//! 5. otherwise `Unknown`

use crate::types::{normalize_address, Category, TransactionRecord};

/// Marker looked for (case-insensitively) in token symbols
pub const NFT_MARKER: &str = "NFT";

/// Canonical "no calldata" value returned by EVM explorers
pub const EMPTY_INPUT: &str = "0x";

fn has_nft_marker(symbol: &str) -> bool {
    symbol.to_ascii_uppercase().contains(NFT_MARKER)
}

fn has_input_data(input: &str) -> bool {
    let input = input.trim();
    !input.is_empty() && input != EMPTY_INPUT
}

/// Classify `tx` from the point of view of `watched_address`
pub fn classify(tx: &TransactionRecord, watched_address: &str) -> Category {
    let watched = normalize_address(watched_address);
    let is_sender = normalize_address(&tx.from) == watched;
    let is_recipient = tx
        .to
        .as_deref()
        .map(|to| normalize_address(to) == watched)
        .unwrap_or(false);

    let symbol = tx
        .token_symbol
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    if let Some(symbol) = symbol {
        if has_nft_marker(symbol) {
            return if is_sender {
                Category::NftSale
            } else {
                Category::NftPurchase
            };
        }
        return Category::TokenTransfer;
    }

    if has_input_data(&tx.input_data) {
        return Category::Swap;
    }

    if tx.value > 0 {
        if is_sender {
            return Category::Send;
        }
        if is_recipient {
            return Category::Receive;
        }
    }

    Category::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    const WATCHED: &str = "0xabc";

    fn tx(from: &str, to: &str, value: u128, input: &str, symbol: Option<&str>) -> TransactionRecord {
        TransactionRecord {
            hash: "0xT1".to_string(),
            from: from.to_string(),
            to: Some(to.to_string()),
            value,
            input_data: input.to_string(),
            block_number: Some(1),
            token_symbol: symbol.map(str::to_string),
        }
    }

    #[test]
    fn test_send_and_receive() {
        assert_eq!(classify(&tx("0xabc", "0xdef", 100, "", None), WATCHED), Category::Send);
        assert_eq!(classify(&tx("0xdef", "0xabc", 100, "0x", None), WATCHED), Category::Receive);
    }

    #[test]
    fn test_direction_ignores_case() {
        assert_eq!(classify(&tx("0xABC", "0xdef", 1, "", None), "0xAbC"), Category::Send);
    }

    #[test]
    fn test_zero_value_is_unknown() {
        assert_eq!(classify(&tx("0xabc", "0xdef", 0, "0x", None), WATCHED), Category::Unknown);
    }

    #[test]
    fn test_value_without_direction_is_unknown() {
        assert_eq!(classify(&tx("0x111", "0x222", 5, "", None), WATCHED), Category::Unknown);
    }

    #[test]
    fn test_input_data_is_swap() {
        let record = tx("0xabc", "0xrouter", 100, "0x38ed1739", None);
        assert_eq!(classify(&record, WATCHED), Category::Swap);
    }

    #[test]
    fn test_token_beats_swap() {
        // Test: token rule precedes swap rule even with calldata present
        let record = tx("0xabc", "0xtoken", 0, "0xa9059cbb", Some("USDC"));
        assert_eq!(classify(&record, WATCHED), Category::TokenTransfer);
    }

    #[test]
    fn test_nft_beats_swap() {
        let record = tx("0xdef", "0xabc", 0, "0x23b872dd", Some("CoolNFT"));
        assert_eq!(classify(&record, WATCHED), Category::NftPurchase);
    }

    #[test]
    fn test_nft_sale_when_sender() {
        let record = tx("0xabc", "0xdef", 0, "0x", Some("nft-pass"));
        assert_eq!(classify(&record, WATCHED), Category::NftSale);
    }

    #[test]
    fn test_blank_symbol_is_ignored() {
        let record = tx("0xabc", "0xdef", 10, "", Some("  "));
        assert_eq!(classify(&record, WATCHED), Category::Send);
    }

    #[test]
    fn test_contract_creation_with_value() {
        let mut record = tx("0xdef", "", 10, "", None);
        record.to = None;
        assert_eq!(classify(&record, WATCHED), Category::Unknown);
    }
}
