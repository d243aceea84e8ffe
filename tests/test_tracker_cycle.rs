//! Integration tests for the full poll cycle
//!
//! Drive `Tracker::run_cycle` against in-memory sources and notifiers with
//! real files in a temp dir:
//! - end-to-end registration -> fetch -> classify -> notify
//! - no duplicate delivery across cycles and restarts
//! - failed persist means "not notified yet", never the reverse
//! - rate-limit isolation between recipients

mod common;

#[cfg(test)]
mod tracker_cycle_tests {
    use super::common::{tx, RecordingNotifier, ScriptedSource};
    use chainwatch::{
        dedup::{open_store, DedupStore, DedupStrategy},
        persistence::PersistenceError,
        registry::WatchRegistry,
        Config, RecipientId, Tracker, TransactionRecord,
    };
    use std::{
        collections::HashSet,
        path::Path,
        sync::Arc,
        time::Duration,
    };

    fn config(dir: &Path) -> Config {
        Config {
            bot_token: "test".to_string(),
            explorer_api_url: "https://explorer.test".to_string(),
            subscriptions_path: dir.join("users.json").display().to_string(),
            dedup_path: dir.join("seen.json").display().to_string(),
            poll_interval: Duration::from_secs(30),
            ..Config::default()
        }
    }

    fn tracker(
        config: &Config,
        source: &Arc<ScriptedSource>,
        notifier: &Arc<RecordingNotifier>,
        strategy: DedupStrategy,
    ) -> Tracker {
        Tracker::new(
            WatchRegistry::load(&config.subscriptions_path).into_shared(),
            open_store(strategy, &config.dedup_path, 0),
            source.clone(),
            notifier.clone(),
            config,
        )
    }

    #[tokio::test]
    async fn test_end_to_end_send_notification() {
        // Test: one subscription, one outgoing transfer, delivered once
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let source = Arc::new(ScriptedSource::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let tracker = tracker(&config, &source, &notifier, DedupStrategy::SeenSet);

        tracker
            .register(RecipientId(42), "vault", "0xABC")
            .await
            .unwrap();
        source.set("0xabc", vec![tx("0xT1", "0xabc", "0xDEF", 100, 1)]);

        let report = tracker.run_cycle().await;
        assert_eq!(report.new_events, 1);
        assert_eq!(report.delivered, 1);

        let sent = notifier.delivered_to(RecipientId(42));
        assert_eq!(sent.len(), 1);
        assert!(sent[0].text.contains("<b>vault</b>"));
        assert!(sent[0].text.contains("Send"));
        assert!(sent[0].text.contains("0xT1"));

        // Same fetch result again: nothing new
        let report = tracker.run_cycle().await;
        assert_eq!(report.new_events, 0);
        assert_eq!(notifier.total(), 1);
    }

    #[tokio::test]
    async fn test_no_duplicate_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let source = Arc::new(ScriptedSource::default());
        let notifier = Arc::new(RecordingNotifier::default());

        for strategy in [DedupStrategy::SeenSet, DedupStrategy::Cursor] {
            let _ = std::fs::remove_file(&config.dedup_path);
            let before = notifier.total();

            {
                let first = tracker(&config, &source, &notifier, strategy);
                if first.list(RecipientId(1)).await.is_empty() {
                    first.register(RecipientId(1), "main", "0xabc").await.unwrap();
                }
                source.set("0xabc", vec![tx("0xT1", "0xdef", "0xabc", 5, 10)]);
                first.run_cycle().await;
            }

            // Process restart: everything reloaded from disk
            let second = tracker(&config, &source, &notifier, strategy);
            assert_eq!(second.list(RecipientId(1)).await.len(), 1);
            let report = second.run_cycle().await;

            assert_eq!(report.new_events, 0, "strategy {:?}", strategy);
            assert_eq!(notifier.total(), before + 1, "strategy {:?}", strategy);
        }
    }

    #[tokio::test]
    async fn test_shared_address_fetched_once_fanned_out() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let source = Arc::new(ScriptedSource::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let tracker = tracker(&config, &source, &notifier, DedupStrategy::SeenSet);

        tracker.register(RecipientId(1), "a", "0xABC").await.unwrap();
        tracker.register(RecipientId(2), "b", "0xabc").await.unwrap();
        source.set("0xabc", vec![tx("0xT1", "0xdef", "0xabc", 5, 1)]);

        let report = tracker.run_cycle().await;

        assert_eq!(source.call_count("0xabc"), 1);
        assert_eq!(report.addresses, 1);
        assert_eq!(report.new_events, 2);
        for recipient in [RecipientId(1), RecipientId(2)] {
            let sent = notifier.delivered_to(recipient);
            assert_eq!(sent.len(), 1);
            assert!(sent[0].text.contains("Receive"));
        }
    }

    #[tokio::test]
    async fn test_every_unseen_transaction_notified_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let source = Arc::new(ScriptedSource::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let tracker = tracker(&config, &source, &notifier, DedupStrategy::SeenSet);

        tracker.register(RecipientId(1), "w", "0xabc").await.unwrap();

        source.set("0xabc", vec![tx("0xT1", "0xabc", "0xdef", 1, 1)]);
        tracker.run_cycle().await;

        // Explorer window slides: T1 still present, T2 and T3 new
        source.set(
            "0xabc",
            vec![
                tx("0xT1", "0xabc", "0xdef", 1, 1),
                tx("0xT2", "0xabc", "0xdef", 1, 2),
                tx("0xT3", "0xdef", "0xabc", 1, 2),
            ],
        );
        let report = tracker.run_cycle().await;

        assert_eq!(report.new_events, 2);
        let sent = notifier.delivered_to(RecipientId(1));
        assert_eq!(sent.len(), 2, "one message per cycle thanks to batching");
        assert!(sent[1].text.contains("0xT2") && sent[1].text.contains("0xT3"));
        assert!(!sent[1].text.contains("0xT1"));
    }

    #[tokio::test]
    async fn test_fetch_failure_does_not_advance_dedup() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let source = Arc::new(ScriptedSource::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let tracker = tracker(&config, &source, &notifier, DedupStrategy::SeenSet);

        tracker.register(RecipientId(1), "w", "0xabc").await.unwrap();
        source.set("0xabc", vec![tx("0xT1", "0xabc", "0xdef", 1, 1)]);
        source.fail("0xabc");

        let report = tracker.run_cycle().await;
        assert_eq!(report.fetch_failures, 1);
        assert_eq!(notifier.total(), 0);

        source.failing.lock().unwrap().clear();
        let report = tracker.run_cycle().await;
        assert_eq!(report.new_events, 1);
        assert_eq!(notifier.total(), 1);
    }

    /// Seen-set that fails its first persist
    struct FlakyStore {
        committed: HashSet<String>,
        staged: Vec<String>,
        fail_next: bool,
    }

    impl DedupStore for FlakyStore {
        fn is_new(&self, address: &str, tx: &TransactionRecord) -> bool {
            let key = format!("{}:{}", address, tx.identity());
            !self.committed.contains(&key) && !self.staged.contains(&key)
        }

        fn mark_seen(&mut self, address: &str, tx: &TransactionRecord) {
            if self.is_new(address, tx) {
                self.staged.push(format!("{}:{}", address, tx.identity()));
            }
        }

        fn persist(&mut self) -> Result<(), PersistenceError> {
            if self.fail_next {
                self.fail_next = false;
                return Err(PersistenceError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "disk full",
                )));
            }
            self.committed.extend(std::mem::take(&mut self.staged));
            Ok(())
        }

        fn rollback(&mut self) {
            self.staged.clear();
        }

        fn tracked_addresses(&self) -> usize {
            self.committed.len()
        }

        fn strategy(&self) -> &'static str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn test_failed_persist_delays_but_never_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let source = Arc::new(ScriptedSource::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let registry = WatchRegistry::load(&config.subscriptions_path).into_shared();
        let store = FlakyStore {
            committed: HashSet::new(),
            staged: Vec::new(),
            fail_next: true,
        };
        let tracker = Tracker::new(
            registry,
            Box::new(store),
            source.clone(),
            notifier.clone(),
            &config,
        );

        tracker.register(RecipientId(1), "w", "0xabc").await.unwrap();
        source.set("0xabc", vec![tx("0xT1", "0xabc", "0xdef", 1, 1)]);

        let report = tracker.run_cycle().await;
        assert_eq!(report.persist_failures, 1);
        assert_eq!(notifier.total(), 0, "not durable, so not notified");

        tracker.run_cycle().await;
        tracker.run_cycle().await;
        assert_eq!(notifier.total(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_isolated_per_recipient() {
        // Test: X is rate limited for 5s; Y is delivered immediately
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let source = Arc::new(ScriptedSource::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let tracker = tracker(&config, &source, &notifier, DedupStrategy::SeenSet);

        let x = RecipientId(100);
        let y = RecipientId(200);
        tracker.register(x, "x", "0xaaa").await.unwrap();
        tracker.register(y, "y", "0xbbb").await.unwrap();
        source.set("0xaaa", vec![tx("0xT1", "0xaaa", "0xdef", 1, 1)]);
        source.set("0xbbb", vec![tx("0xT2", "0xbbb", "0xdef", 1, 1)]);
        notifier
            .rate_limit_once
            .lock()
            .unwrap()
            .insert(x, Duration::from_secs(5));

        let start = tokio::time::Instant::now();
        let report = tracker.run_cycle().await;
        assert_eq!(report.delivered, 2);

        let to_x = notifier.delivered_to(x);
        let to_y = notifier.delivered_to(y);
        assert_eq!(to_x.len(), 1);
        assert_eq!(to_y.len(), 1);
        assert!(to_y[0].at.duration_since(start) < Duration::from_secs(1));
        assert!(to_x[0].at.duration_since(start) >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let source = Arc::new(ScriptedSource::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let tracker = Arc::new(tracker(&config, &source, &notifier, DedupStrategy::SeenSet));

        tracker.register(RecipientId(1), "w", "0xabc").await.unwrap();

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let handle = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.run(shutdown_rx).await })
        };

        // Three cycles at t = 0, 30, 60
        tokio::time::sleep(Duration::from_secs(65)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(source.call_count("0xabc"), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_registrations_during_cycle_all_persist() {
        // Test: registry writes and dedup commits go through the blocking
        // pool while a cycle and many commands run at once
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let source = Arc::new(ScriptedSource::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let tracker = Arc::new(tracker(&config, &source, &notifier, DedupStrategy::SeenSet));

        tracker.register(RecipientId(1), "seed", "0xabc").await.unwrap();
        source.set("0xabc", vec![tx("0xT1", "0xabc", "0xdef", 1, 1)]);

        let cycle = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.run_cycle().await })
        };
        let registrations: Vec<_> = (0..16)
            .map(|i| {
                let tracker = tracker.clone();
                tokio::spawn(async move {
                    tracker
                        .register(RecipientId(i), &format!("w{}", i), &format!("0x{:02}", i))
                        .await
                })
            })
            .collect();

        for handle in registrations {
            handle.await.unwrap().unwrap();
        }
        let report = cycle.await.unwrap();
        assert_eq!(report.persist_failures, 0);
        assert_eq!(report.delivered, 1);

        assert_eq!(WatchRegistry::load(&config.subscriptions_path).len(), 17);
        let store = open_store(DedupStrategy::SeenSet, &config.dedup_path, 0);
        assert!(!store.is_new("0xabc", &tx("0xT1", "0xabc", "0xdef", 1, 1)));
    }
}
