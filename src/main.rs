#[cfg(feature = "jemalloc")]
use tikv_jemallocator::Jemalloc;
#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[cfg(feature = "jemalloc")]
fn jemalloc_purge() {
    use tikv_jemalloc_ctl::epoch;
    // Advancing the epoch causes jemalloc to evaluate all decay windows
    // and release dirty pages back to the OS via its background purge logic.
    if let Ok(e) = epoch::mib() {
        let _ = e.advance();
    }
    log::debug!("jemalloc: epoch advanced — dirty pages scheduled for release");
}

mod config;
mod dashboard;
mod discord;
mod engine;
mod exchange;
mod executor;
mod indicators;
mod kraken_api;
mod portfolio;
mod risk_manager;
mod signal_scorer;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use config::Config;
use dashboard::DashboardFeed;
use discord::DiscordNotifier;
use engine::Engine;
use exchange::{AccountBalance, ExchangeClient, PaperExchange};
use kraken_api::KrakenClient;

/// Seed cash for the simulated book in paper mode.
const PAPER_STARTING_CASH: f64 = 10_000.0;

const STATUS_LOG_INTERVAL_SECS: u64 = 60;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config::DEFAULT_CONFIG_PATH.to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            log::error!("{}", e);
            eprintln!("❌ {}", e);
            return Err(e.into());
        }
    };

    // ── Exchange client ───────────────────────────────────────────────────────
    let exchange: Arc<dyn ExchangeClient> = if config.trading.paper_trading {
        log::info!("Paper trading mode — simulated fills against live market data");
        Arc::new(PaperExchange::new(
            Arc::new(KrakenClient::public()),
            PAPER_STARTING_CASH,
        ))
    } else {
        Arc::new(KrakenClient::new(
            config.kraken.resolved_key(),
            config.kraken.resolved_secret(),
            config.assets.crypto.clone(),
        ))
    };

    let notifier = DiscordNotifier::new(&config.discord);

    let initial = match exchange.get_account().await {
        Ok(account) => account,
        Err(e) => {
            log::warn!(
                "Initial account fetch failed: {} — starting with zero equity until a cycle succeeds",
                e
            );
            AccountBalance::default()
        }
    };
    log::info!(
        "Engine starting — equity ${:.2}, {} symbols, cycle {}s",
        initial.equity,
        config.assets.crypto.len(),
        config.trading.cycle_interval_secs
    );
    notifier.notify_startup(initial.equity, &config.assets.crypto).await;

    let engine = Arc::new(Engine::new(
        config.clone(),
        exchange,
        notifier.clone(),
        initial,
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Slow loop: analysis cycle ─────────────────────────────────────────────
    let analysis_handle = {
        let engine = engine.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { engine.run_analysis_loop(shutdown).await })
    };

    // ── Fast loop: dashboard feed ─────────────────────────────────────────────
    let (feed, snapshot_rx) = DashboardFeed::new(
        engine.state(),
        Duration::from_secs(config.trading.dashboard_interval_secs),
    );
    let feed_handle = {
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { feed.run(shutdown).await })
    };

    // ── Snapshot consumer: periodic status line in the log ────────────────────
    // Stands in for the external renderer; pulls at its own cadence.
    let status_handle = {
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(STATUS_LOG_INTERVAL_SECS));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let snapshot = snapshot_rx.borrow().clone();
                        log::info!("Status | {}", dashboard::render_status_line(&snapshot));

                        // Release unused memory pages back to the OS
                        #[cfg(feature = "jemalloc")]
                        jemalloc_purge();
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    };

    // ── Shutdown: finish in-flight work, then stop both loops ─────────────────
    tokio::signal::ctrl_c().await?;
    log::info!("Shutdown signal received — finishing current symbol");
    let _ = shutdown_tx.send(true);

    analysis_handle.await?;
    feed_handle.await?;
    status_handle.await?;

    let stats = {
        let state = engine.state();
        let mut state = state.lock().unwrap();
        state.portfolio.stats(chrono::Utc::now().date_naive())
    };
    notifier.notify_shutdown(&stats).await;
    log::info!(
        "Engine stopped — equity ${:.2}, lifetime trades {} (W/L {}/{})",
        stats.equity,
        stats.lifetime_trades,
        stats.lifetime_wins,
        stats.lifetime_losses
    );

    Ok(())
}
