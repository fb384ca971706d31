use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;

use crate::engine::EngineState;
use crate::portfolio::{SIGNAL_HISTORY_CAPACITY, TRADE_HISTORY_CAPACITY};
use crate::types::{PortfolioStats, Position, Signal, SignalDirection, Trade};

pub const HOT_SIGNAL_CAPACITY: usize = 5;
pub const MARKET_HEAT_CAPACITY: usize = 10;
/// Heat entries show everything mildly interesting, well below the trade
/// threshold, for visibility.
pub const HEAT_MIN_STRENGTH: u32 = 10;
pub const HOT_MIN_STRENGTH: u32 = 50;

#[derive(Clone, Debug)]
pub struct HeatEntry {
    pub symbol: String,
    pub direction: SignalDirection,
    pub strength: u32,
}

/// Immutable view of the whole engine at one instant, handed to the external
/// renderer. The renderer may consume it more or less often than it changes.
#[derive(Clone, Debug)]
pub struct DashboardSnapshot {
    pub generated_at: i64,
    pub next_analysis_ts: i64,
    pub stats: PortfolioStats,
    pub positions: Vec<Position>,
    pub signals: Vec<Signal>,
    pub trades: Vec<Trade>,
    /// Strong recent signals, most recent first.
    pub hot_signals: Vec<Signal>,
    /// Non-neutral signals from the latest pass, sorted by strength.
    pub market_heat: Vec<HeatEntry>,
}

impl DashboardSnapshot {
    fn empty() -> Self {
        DashboardSnapshot {
            generated_at: 0,
            next_analysis_ts: 0,
            stats: PortfolioStats::default(),
            positions: Vec::new(),
            signals: Vec::new(),
            trades: Vec::new(),
            hot_signals: Vec::new(),
            market_heat: Vec::new(),
        }
    }
}

/// The fast loop: copies shared state under the engine lock at a fixed
/// interval and publishes an immutable snapshot. The lock is held only while
/// copying, never while consumers render.
pub struct DashboardFeed {
    state: Arc<Mutex<EngineState>>,
    tx: watch::Sender<Arc<DashboardSnapshot>>,
    interval: Duration,
}

impl DashboardFeed {
    pub fn new(
        state: Arc<Mutex<EngineState>>,
        interval: Duration,
    ) -> (Self, watch::Receiver<Arc<DashboardSnapshot>>) {
        let (tx, rx) = watch::channel(Arc::new(DashboardSnapshot::empty()));
        (DashboardFeed { state, tx, interval }, rx)
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        log::info!(
            "Dashboard feed started — every {}ms",
            self.interval.as_millis()
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = self.assemble();
                    // Receivers may be gone during shutdown; nothing to do.
                    let _ = self.tx.send(Arc::new(snapshot));
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        log::info!("Dashboard feed stopped");
    }

    /// Copy everything the renderer needs in one lock window.
    pub fn assemble(&self) -> DashboardSnapshot {
        let now = Utc::now();

        let (stats, positions, signals, trades, market_heat, next_analysis_ts) = {
            let mut state = self.state.lock().unwrap();
            (
                state.portfolio.stats(now.date_naive()),
                state.portfolio.open_positions(),
                state.portfolio.recent_signals(SIGNAL_HISTORY_CAPACITY),
                state.portfolio.recent_trades(TRADE_HISTORY_CAPACITY),
                state.market_heat.clone(),
                state.next_analysis_ts,
            )
        };

        let hot_signals = signals
            .iter()
            .filter(|s| s.direction != SignalDirection::Neutral && s.strength >= HOT_MIN_STRENGTH)
            .take(HOT_SIGNAL_CAPACITY)
            .cloned()
            .collect();

        DashboardSnapshot {
            generated_at: now.timestamp(),
            next_analysis_ts,
            stats,
            positions,
            signals,
            trades,
            hot_signals,
            market_heat,
        }
    }
}

/// Compact one-line summary for the log-based status consumer.
pub fn render_status_line(snapshot: &DashboardSnapshot) -> String {
    format!(
        "equity ${:.2} | positions {} | today {} trades (W/L {}/{}) | P/L {:+.2} | heat {}",
        snapshot.stats.equity,
        snapshot.positions.len(),
        snapshot.stats.daily_trades,
        snapshot.stats.daily_wins,
        snapshot.stats.daily_losses,
        snapshot.stats.total_realized_pnl,
        snapshot.market_heat.len(),
    )
}
