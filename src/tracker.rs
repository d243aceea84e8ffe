//! Tracker: wires registry, dedup store, poller and dispatcher into the
//! recurring cycle, and exposes registry operations to the command path.
//!
//! Cycles never overlap: the next fetch starts only after the previous
//! cycle's dispatch has finished and the poll interval has elapsed.
//!
//! Registry mutations and dedup commits end in an fsync, so they run on the
//! blocking pool while holding an owned lock guard.

use {
    crate::{
        config::Config,
        dedup::DedupStore,
        dispatcher::{DeliveryResult, Dispatcher},
        notify::Notifier,
        persistence::PersistenceError,
        poller::{commit_fetched, PollOutcome, Poller},
        registry::{RegistryError, SharedRegistry, WatchRegistry},
        source::LedgerSource,
        types::{group_by_recipient, RecipientId, Subscription},
    },
    std::{
        sync::Arc,
        time::{Duration, Instant},
    },
    tokio::sync::{watch, Mutex},
};

/// Summary of one cycle
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub addresses: usize,
    pub fetch_failures: usize,
    pub persist_failures: usize,
    pub new_events: usize,
    pub delivered: usize,
    pub dropped: usize,
}

pub struct Tracker {
    registry: SharedRegistry,
    store: Arc<Mutex<Box<dyn DedupStore>>>,
    poller: Poller,
    dispatcher: Dispatcher,
    poll_interval: Duration,
}

impl Tracker {
    pub fn new(
        registry: SharedRegistry,
        store: Box<dyn DedupStore>,
        source: Arc<dyn LedgerSource>,
        notifier: Arc<dyn Notifier>,
        config: &Config,
    ) -> Self {
        Self::with_parts(
            registry,
            store,
            Poller::new(source, config.fetch_timeout, config.fetch_concurrency),
            Dispatcher::new(notifier, config.dispatcher_config()),
            config.poll_interval,
        )
    }

    pub fn with_parts(
        registry: SharedRegistry,
        store: Box<dyn DedupStore>,
        poller: Poller,
        dispatcher: Dispatcher,
        poll_interval: Duration,
    ) -> Self {
        Self {
            registry,
            store: Arc::new(Mutex::new(store)),
            poller,
            dispatcher,
            poll_interval,
        }
    }

    pub async fn register(
        &self,
        recipient_id: RecipientId,
        label: &str,
        address: &str,
    ) -> Result<Subscription, RegistryError> {
        let (label, address) = (label.to_string(), address.to_string());
        self.mutate_registry(move |registry| registry.register(recipient_id, &label, &address))
            .await
    }

    pub async fn unregister(&self, recipient_id: RecipientId, label: &str) -> Result<(), RegistryError> {
        let label = label.to_string();
        self.mutate_registry(move |registry| registry.unregister(recipient_id, &label))
            .await
    }

    async fn mutate_registry<T, F>(&self, op: F) -> Result<T, RegistryError>
    where
        T: Send + 'static,
        F: FnOnce(&mut WatchRegistry) -> Result<T, RegistryError> + Send + 'static,
    {
        let mut registry = self.registry.clone().write_owned().await;
        tokio::task::spawn_blocking(move || op(&mut *registry))
            .await
            .map_err(|e| {
                RegistryError::Persistence(PersistenceError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("registry write task failed: {}", e),
                )))
            })?
    }

    pub async fn list(&self, recipient_id: RecipientId) -> Vec<Subscription> {
        self.registry.read().await.list(recipient_id)
    }

    /// One full fetch-diff-classify-dispatch pass
    pub async fn run_cycle(&self) -> CycleReport {
        let started = Instant::now();

        // Registrations made after this point show up next cycle
        let subscriptions = self.registry.read().await.all();
        if subscriptions.is_empty() {
            log::debug!("No subscriptions, skipping cycle");
            return CycleReport::default();
        }

        let fetched = self.poller.fetch_all(&subscriptions).await;
        let addresses = fetched.len();
        let source_name = self.poller.source_name();
        let mut store = self.store.clone().lock_owned().await;

        let outcome = match tokio::task::spawn_blocking(move || {
            commit_fetched(source_name, &mut **store, fetched)
        })
        .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("❌ Dedup commit task failed: {}", e);
                PollOutcome {
                    addresses,
                    persist_failures: addresses,
                    ..Default::default()
                }
            }
        };

        let mut report = CycleReport {
            addresses: outcome.addresses,
            fetch_failures: outcome.fetch_failures,
            persist_failures: outcome.persist_failures,
            new_events: outcome.events.len(),
            ..Default::default()
        };

        if !outcome.events.is_empty() {
            let batches = group_by_recipient(outcome.events);
            for delivery in self.dispatcher.deliver(batches).await {
                match delivery.result {
                    DeliveryResult::Delivered => report.delivered += 1,
                    DeliveryResult::Dropped(_) => report.dropped += 1,
                }
            }
        }

        log::info!(
            "📊 Cycle done in {}ms: {} addresses ({} failed), {} new events, {} delivered, {} dropped",
            started.elapsed().as_millis(),
            report.addresses,
            report.fetch_failures + report.persist_failures,
            report.new_events,
            report.delivered,
            report.dropped
        );

        report
    }

    /// Run cycles until `shutdown` flips to true. An in-flight cycle is
    /// abandoned on shutdown; persisted state stays consistent because
    /// every write is an atomic file replacement.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        log::info!(
            "⏰ Starting tracker (interval: {}s)",
            self.poll_interval.as_secs()
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = self.run_cycle() => {}
                _ = shutdown.changed() => break,
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.changed() => break,
            }
        }

        log::info!("Tracker stopped");
    }
}
