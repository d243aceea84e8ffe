//! Fetch / diff / classify / commit for one cycle
//!
//! Per cycle:
//! 1. group the subscription snapshot by address (each address fetched once)
//! 2. fetch addresses concurrently, bounded by `concurrency`, each under a
//!    deadline; a failed fetch skips that address for this cycle only
//! 3. for each fetched address, one at a time: keep transactions the dedup
//!    store has not seen, classify them once, fan out one event per
//!    subscription, stage them as seen and persist
//! 4. a failed persist drops that address's events; they are re-evaluated
//!    next cycle
//!
//! Events are only returned after their dedup state is durable, so a
//! transaction is never handed to the dispatcher twice.

use {
    crate::{
        classifier::classify,
        dedup::DedupStore,
        persistence::PersistenceError,
        source::{FetchError, LedgerSource},
        types::{ClassifiedEvent, Subscription, TransactionRecord},
    },
    futures::stream::{self, StreamExt},
    std::{collections::HashSet, sync::Arc, time::Duration},
};

/// Result of one poll pass
#[derive(Debug, Default)]
pub struct PollOutcome {
    /// Distinct addresses polled
    pub addresses: usize,
    /// Addresses skipped because the fetch failed
    pub fetch_failures: usize,
    /// Addresses whose new events were dropped because persist failed
    pub persist_failures: usize,
    /// Committed events, ready for hand-off
    pub events: Vec<ClassifiedEvent>,
}

pub struct Poller {
    source: Arc<dyn LedgerSource>,
    fetch_timeout: Duration,
    concurrency: usize,
}

/// Subscriptions grouped by address, in first-seen order
pub fn group_by_address(subscriptions: &[Subscription]) -> Vec<(String, Vec<Subscription>)> {
    let mut groups: Vec<(String, Vec<Subscription>)> = Vec::new();

    for sub in subscriptions {
        match groups.iter_mut().find(|(address, _)| *address == sub.address) {
            Some((_, subs)) => subs.push(sub.clone()),
            None => groups.push((sub.address.clone(), vec![sub.clone()])),
        }
    }

    groups
}

/// Diff `transactions` against the store, classify the new ones for every
/// subscriber and commit them. Returns no events if nothing was new.
pub fn diff_and_commit(
    store: &mut dyn DedupStore,
    address: &str,
    subscribers: &[Subscription],
    transactions: &[TransactionRecord],
) -> Result<Vec<ClassifiedEvent>, PersistenceError> {
    // Decide freshness against the pre-cycle state; with a block cursor,
    // marking one transaction would otherwise hide others in the same block.
    let mut in_batch = HashSet::new();
    let fresh: Vec<&TransactionRecord> = transactions
        .iter()
        .filter(|tx| store.is_new(address, tx))
        .filter(|tx| in_batch.insert(tx.identity()))
        .collect();

    if fresh.is_empty() {
        return Ok(Vec::new());
    }

    let mut events = Vec::with_capacity(fresh.len() * subscribers.len());
    for tx in &fresh {
        let category = classify(tx, address);
        for subscription in subscribers {
            events.push(ClassifiedEvent {
                subscription: subscription.clone(),
                transaction: (*tx).clone(),
                category,
            });
        }
        store.mark_seen(address, tx);
    }

    if let Err(e) = store.persist() {
        store.rollback();
        return Err(e);
    }
    Ok(events)
}

impl Poller {
    pub fn new(source: Arc<dyn LedgerSource>, fetch_timeout: Duration, concurrency: usize) -> Self {
        Self {
            source,
            fetch_timeout,
            concurrency: concurrency.max(1),
        }
    }

    async fn fetch_with_deadline(&self, address: &str) -> Result<Vec<TransactionRecord>, FetchError> {
        match tokio::time::timeout(self.fetch_timeout, self.source.fetch(address)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(self.fetch_timeout)),
        }
    }

    pub fn source_name(&self) -> &'static str {
        self.source.source_name()
    }

    /// Fetch every distinct address of a subscription snapshot, concurrently
    /// and each under the fetch deadline
    pub async fn fetch_all(&self, subscriptions: &[Subscription]) -> Vec<FetchedAddress> {
        let groups = group_by_address(subscriptions);

        // Groups are moved into the stream; the poll future must stay `Send`
        // for `tokio::spawn`.
        stream::iter(groups.into_iter().map(|(address, subscribers)| async move {
            let result = self.fetch_with_deadline(&address).await;
            FetchedAddress {
                address,
                subscribers,
                result,
            }
        }))
        .buffer_unordered(self.concurrency)
        .collect::<Vec<_>>()
        .await
    }

    /// Run one poll pass over a subscription snapshot
    pub async fn poll(&self, subscriptions: &[Subscription], store: &mut dyn DedupStore) -> PollOutcome {
        let fetched = self.fetch_all(subscriptions).await;
        commit_fetched(self.source_name(), store, fetched)
    }
}

/// One address's fetch result together with everyone watching it
#[derive(Debug)]
pub struct FetchedAddress {
    pub address: String,
    pub subscribers: Vec<Subscription>,
    pub result: Result<Vec<TransactionRecord>, FetchError>,
}

/// Diff and commit every fetched address against `store`, one at a time.
/// Blocking: each commit ends in a synchronous file write.
pub fn commit_fetched(
    source_name: &str,
    store: &mut dyn DedupStore,
    fetched: Vec<FetchedAddress>,
) -> PollOutcome {
    let mut outcome = PollOutcome {
        addresses: fetched.len(),
        ..Default::default()
    };

    for FetchedAddress {
        address,
        subscribers,
        result,
    } in fetched
    {
        let transactions = match result {
            Ok(transactions) => transactions,
            Err(e) => {
                log::warn!(
                    "⚠️  {} fetch failed for {}: {} (skipping this cycle)",
                    source_name,
                    address,
                    e
                );
                outcome.fetch_failures += 1;
                continue;
            }
        };

        match diff_and_commit(store, &address, &subscribers, &transactions) {
            Ok(events) => {
                if !events.is_empty() {
                    log::debug!("{}: {} new event(s)", address, events.len());
                }
                outcome.events.extend(events);
            }
            Err(e) => {
                log::error!(
                    "❌ Failed to persist dedup state for {}: {} (will retry next cycle)",
                    address,
                    e
                );
                outcome.persist_failures += 1;
            }
        }
    }

    outcome
}
