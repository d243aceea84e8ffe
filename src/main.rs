//! chainwatch runtime
//!
//! Spawns the chat command loop and the polling cycle, then waits for
//! CTRL+C.
//!
//! Usage:
//!   BOT_TOKEN=... cargo run --release --bin chainwatch
//!
//! See `config.rs` for the full list of environment variables.

use {
    chainwatch::{
        commands::command_loop,
        config::Config,
        dedup::open_store,
        notify::TelegramClient,
        registry::WatchRegistry,
        source::BlockscoutSource,
        Tracker,
    },
    dotenv::dotenv,
    log::{error, info},
    std::{sync::Arc, time::Duration},
    tokio::sync::watch,
};

/// Long-poll window for incoming chat updates
const UPDATES_LONG_POLL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let config = Config::from_env()?;

    info!("🚀 Starting chainwatch v{}", env!("CARGO_PKG_VERSION"));
    info!("📊 Configuration:");
    info!("   ├─ Explorer: {}", config.explorer_api_url);
    info!("   ├─ Poll interval: {}s", config.poll_interval.as_secs());
    info!(
        "   ├─ Fetch: limit {}, concurrency {}, timeout {}s",
        config.fetch_limit,
        config.fetch_concurrency,
        config.fetch_timeout.as_secs()
    );
    info!(
        "   ├─ Dedup: {} at {}",
        config.dedup_strategy.as_str(),
        config.dedup_path
    );
    info!("   ├─ Subscriptions: {}", config.subscriptions_path);
    info!("   └─ Batching: {}", config.batch_notifications);

    let registry = WatchRegistry::load(&config.subscriptions_path).into_shared();
    let store = open_store(
        config.dedup_strategy,
        &config.dedup_path,
        config.seen_max_per_address,
    );

    let source = Arc::new(BlockscoutSource::new(
        &config.explorer_api_url,
        config.fetch_limit,
        config.fetch_timeout,
    )?);
    let telegram = Arc::new(TelegramClient::new(
        &config.telegram_api_url,
        &config.bot_token,
        UPDATES_LONG_POLL,
    )?);

    let tracker = Arc::new(Tracker::new(
        registry,
        store,
        source,
        telegram.clone(),
        &config,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let command_task = {
        let tracker = tracker.clone();
        let telegram = telegram.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            command_loop(telegram.as_ref(), telegram.as_ref(), &tracker, shutdown).await;
        })
    };

    let cycle_task = {
        let tracker = tracker.clone();
        tokio::spawn(async move {
            tracker.run(shutdown_rx).await;
        })
    };

    info!("🔄 Press CTRL+C to shutdown gracefully");

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("⚠️  Received CTRL+C, shutting down..."),
        Err(err) => error!("❌ Failed to listen for CTRL+C: {}", err),
    }

    let _ = shutdown_tx.send(true);
    for task in [command_task, cycle_task] {
        if let Err(e) = task.await {
            error!("❌ Task ended abnormally: {}", e);
        }
    }

    info!("✅ chainwatch stopped");
    Ok(())
}
