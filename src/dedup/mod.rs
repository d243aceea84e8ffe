//! De-duplication state: which transactions have already been handed off
//!
//! Two strategies, chosen per deployment:
//! - `SeenSetStore` - per-address set of transaction hashes. Safe under any
//!   ordering returned by the source. Grows without bound unless a
//!   per-address retention cap is configured.
//! - `CursorStore` - per-address highest processed block. Bounded memory,
//!   but requires the source to return transactions in non-decreasing block
//!   order. A transaction that later shows up at or below the cursor is
//!   silently missed.
//!
//! Both stage `mark_seen` calls in memory and only commit them on a
//! successful `persist`. After a failed persist the caller calls `rollback`
//! to discard the staged marks, so the same transactions are re-evaluated
//! next cycle.

pub mod cursor;
pub mod seen_set;

pub use cursor::CursorStore;
pub use seen_set::SeenSetStore;

use {
    crate::{persistence::PersistenceError, types::TransactionRecord},
    std::path::Path,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupStrategy {
    SeenSet,
    Cursor,
}

impl DedupStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DedupStrategy::SeenSet => "set",
            DedupStrategy::Cursor => "cursor",
        }
    }
}

impl std::str::FromStr for DedupStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "set" | "seen" | "hash" => Ok(DedupStrategy::SeenSet),
            "cursor" | "block" => Ok(DedupStrategy::Cursor),
            other => Err(format!("unknown dedup strategy '{}'", other)),
        }
    }
}

pub trait DedupStore: Send {
    /// True if `tx` has not been recorded (committed or staged) for `address`
    fn is_new(&self, address: &str, tx: &TransactionRecord) -> bool;

    /// Stage `tx` as seen for `address`. Idempotent.
    fn mark_seen(&mut self, address: &str, tx: &TransactionRecord);

    /// Commit staged marks to durable storage. On error the committed state
    /// is unchanged and the staged marks are kept until `rollback`.
    fn persist(&mut self) -> Result<(), PersistenceError>;

    /// Discard every staged mark
    fn rollback(&mut self);

    /// Number of addresses with committed state
    fn tracked_addresses(&self) -> usize;

    /// Strategy name for logging
    fn strategy(&self) -> &'static str;
}

/// Load the store for `strategy` from `path` (empty on absence/corruption)
pub fn open_store(
    strategy: DedupStrategy,
    path: impl AsRef<Path>,
    max_per_address: usize,
) -> Box<dyn DedupStore> {
    let store: Box<dyn DedupStore> = match strategy {
        DedupStrategy::SeenSet => Box::new(SeenSetStore::load(path, max_per_address)),
        DedupStrategy::Cursor => Box::new(CursorStore::load(path)),
    };

    log::info!(
        "🧾 Dedup store ready (strategy: {}, addresses: {})",
        store.strategy(),
        store.tracked_addresses()
    );
    store
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_parse() {
        assert_eq!("set".parse::<DedupStrategy>(), Ok(DedupStrategy::SeenSet));
        assert_eq!(" Cursor ".parse::<DedupStrategy>(), Ok(DedupStrategy::Cursor));
        assert!("lru".parse::<DedupStrategy>().is_err());
    }

    #[test]
    fn test_open_store_picks_strategy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seen.json");

        assert_eq!(open_store(DedupStrategy::SeenSet, &path, 0).strategy(), "set");
        assert_eq!(open_store(DedupStrategy::Cursor, &path, 0).strategy(), "cursor");
    }
}
