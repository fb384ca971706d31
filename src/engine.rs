use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use tokio::sync::watch;

use crate::config::{Config, TradingConfig};
use crate::dashboard::{HeatEntry, HEAT_MIN_STRENGTH, MARKET_HEAT_CAPACITY};
use crate::discord::DiscordNotifier;
use crate::exchange::{AccountBalance, ExchangeClient};
use crate::executor::{ExecutionError, OrderExecutor};
use crate::indicators;
use crate::portfolio::PortfolioTracker;
use crate::risk_manager::{RiskManager, RiskRejection};
use crate::signal_scorer;
use crate::types::{Signal, SignalDirection};

/// Candles requested per symbol per cycle; comfortably above the longest
/// indicator lookback.
pub const CANDLE_FETCH_COUNT: usize = 100;

/// All mutable engine state, guarded by one lock. Both loops go through it:
/// the analysis cycle as writer, the dashboard feed as reader. The lock is
/// never held across an await or while rendering.
pub struct EngineState {
    pub risk: RiskManager,
    pub portfolio: PortfolioTracker,
    pub market_heat: Vec<HeatEntry>,
    pub next_analysis_ts: i64,
    pub last_summary_date: Option<NaiveDate>,
}

impl EngineState {
    pub fn new(trading: &TradingConfig, today: NaiveDate) -> Self {
        EngineState {
            risk: RiskManager::new(trading),
            portfolio: PortfolioTracker::new(today),
            market_heat: Vec::new(),
            next_analysis_ts: 0,
            last_summary_date: None,
        }
    }
}

pub struct Engine {
    config: Arc<Config>,
    exchange: Arc<dyn ExchangeClient>,
    executor: OrderExecutor,
    notifier: DiscordNotifier,
    state: Arc<Mutex<EngineState>>,
    initial_equity: f64,
}

impl Engine {
    pub fn new(
        config: Arc<Config>,
        exchange: Arc<dyn ExchangeClient>,
        notifier: DiscordNotifier,
        initial: AccountBalance,
    ) -> Self {
        let executor = OrderExecutor::new(
            exchange.clone(),
            Duration::from_millis(config.trading.rate_limit_ms),
            config.trading.max_retries,
        );
        let mut state = EngineState::new(&config.trading, Utc::now().date_naive());
        state.portfolio.set_account(initial.equity, initial.buying_power);

        Engine {
            config,
            exchange,
            executor,
            notifier,
            state: Arc::new(Mutex::new(state)),
            initial_equity: initial.equity,
        }
    }

    pub fn state(&self) -> Arc<Mutex<EngineState>> {
        Arc::clone(&self.state)
    }

    /// The slow loop. Runs one full pass per interval until shutdown is
    /// requested; a request arriving mid-pass lets the symbol in progress
    /// finish before the pass ends.
    pub async fn run_analysis_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let cycle = Duration::from_secs(self.config.trading.cycle_interval_secs);
        let mut ticker = tokio::time::interval(cycle);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        log::info!("Analysis cycle started — every {}s", cycle.as_secs());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    {
                        let mut state = self.state.lock().unwrap();
                        state.next_analysis_ts = Utc::now().timestamp() + cycle.as_secs() as i64;
                    }
                    self.run_cycle(&shutdown).await;
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        log::info!("Analysis cycle stopped");
    }

    /// One analysis pass over every configured symbol. Per-symbol failures
    /// are isolated; only a failed account refresh aborts the whole pass.
    pub async fn run_cycle(&self, shutdown: &watch::Receiver<bool>) {
        let now = Utc::now();

        let account = match self.exchange.get_account().await {
            Ok(account) => account,
            Err(e) => {
                log::error!("Account refresh failed — aborting this pass: {}", e);
                self.notifier
                    .notify_error("Account Error", &e.to_string(), None)
                    .await;
                return;
            }
        };
        {
            let mut state = self.state.lock().unwrap();
            state
                .portfolio
                .set_account(account.equity, account.buying_power);
        }

        self.check_daily_summary(now).await;

        let mut heat: Vec<HeatEntry> = Vec::new();
        for symbol in &self.config.assets.crypto {
            if *shutdown.borrow() {
                log::info!("Shutdown requested — ending pass after current symbol");
                break;
            }
            self.process_symbol(symbol, &mut heat).await;
        }

        heat.sort_by(|a, b| b.strength.cmp(&a.strength));
        heat.truncate(MARKET_HEAT_CAPACITY);
        let heat_count = heat.len();

        let stats = {
            let mut state = self.state.lock().unwrap();
            state.market_heat = heat;
            state.portfolio.stats(now.date_naive())
        };
        log::info!("Market heat: {} signals detected", heat_count);
        log::info!(
            "Stats — today: {} trades, W/L: {}/{}, win rate: {:.1}%",
            stats.daily_trades,
            stats.daily_wins,
            stats.daily_losses,
            stats.daily_win_rate()
        );
    }

    async fn process_symbol(&self, symbol: &str, heat: &mut Vec<HeatEntry>) {
        let candles = match self
            .exchange
            .get_candles(
                symbol,
                self.config.trading.candle_interval_minutes,
                CANDLE_FETCH_COUNT,
            )
            .await
        {
            Ok(candles) => candles,
            Err(e) => {
                log::error!("[{}] candle fetch failed: {}", symbol, e);
                return;
            }
        };
        let last = match candles.last() {
            Some(last) => last.clone(),
            None => {
                log::warn!("[{}] empty candle series", symbol);
                return;
            }
        };
        let now = Utc::now().timestamp();

        {
            let mut state = self.state.lock().unwrap();
            state.portfolio.update_position_price(symbol, last.close);
        }

        let snapshot = match indicators::compute_snapshot(&candles) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                // Not an error: record the attempt so the audit trail shows
                // the symbol was looked at, then move on.
                log::info!("[{}] skipped this cycle: {}", symbol, e);
                let mut state = self.state.lock().unwrap();
                state
                    .portfolio
                    .record_signal(Signal::neutral(symbol, last.close, now));
                return;
            }
        };

        let signal = signal_scorer::score(symbol, &snapshot, &last, now);
        if signal.direction != SignalDirection::Neutral && signal.strength >= HEAT_MIN_STRENGTH {
            heat.push(HeatEntry {
                symbol: symbol.to_string(),
                direction: signal.direction,
                strength: signal.strength,
            });
            let reasons: Vec<&str> = signal.confirmations.iter().take(3).map(|c| c.label()).collect();
            log::info!(
                "[{}] {} {} ({} conf) | RSI:{:.1} Vol:{:.1}x | {}",
                symbol,
                signal.direction.as_str(),
                signal.strength,
                signal.confirmation_count(),
                snapshot.rsi,
                snapshot.volume_ratio,
                reasons.join(", ")
            );
        }

        let evaluation = {
            let mut guard = self.state.lock().unwrap();
            let state = &mut *guard;
            state.portfolio.record_signal(signal.clone());
            let equity = state.portfolio.equity();
            state
                .risk
                .evaluate(&signal, equity, state.portfolio.positions(), snapshot.atr, now)
        };

        let proposal = match evaluation {
            Ok(proposal) => proposal,
            // Neutral and sub-threshold signals are the common case; they are
            // already visible through the signal history.
            Err(RiskRejection::NeutralSignal) | Err(RiskRejection::BelowThreshold { .. }) => return,
            Err(rejection) => {
                log::info!("[{}] trade skipped: {}", symbol, rejection);
                return;
            }
        };

        log::info!(
            "[{}] {} proposal qty={:.8} @ {:.4}",
            symbol,
            proposal.side.as_str(),
            proposal.quantity,
            proposal.price
        );

        match self.executor.execute(&proposal, &self.state).await {
            Ok(report) => {
                if let Some(pnl) = report.realized_pnl {
                    let entry = report.trade.price - pnl / report.trade.quantity;
                    log::info!(
                        "[{}] SELL {:.8} @ {:.4} — {}",
                        symbol,
                        report.trade.quantity,
                        report.trade.price,
                        if pnl > 0.0 { "WIN" } else { "LOSS" }
                    );
                    self.notifier
                        .notify_position_closed(
                            symbol,
                            report.trade.quantity,
                            entry,
                            report.trade.price,
                            pnl,
                        )
                        .await;
                } else {
                    log::info!(
                        "[{}] BUY {:.8} @ {:.4} sl={:.4} tp={:.4}",
                        symbol,
                        report.trade.quantity,
                        report.trade.price,
                        proposal.stop_loss.unwrap_or(0.0),
                        proposal.take_profit.unwrap_or(0.0)
                    );
                    self.notifier
                        .notify_trade_open(
                            symbol,
                            report.trade.quantity,
                            report.trade.price,
                            signal.strength,
                            &signal.confirmations,
                        )
                        .await;
                }
            }
            Err(ExecutionError::Bookkeeping(e)) => {
                log::error!("[{}] INVARIANT VIOLATION — fill not applied: {}", symbol, e);
                self.notifier
                    .notify_error("Bookkeeping Error", &e.to_string(), Some(symbol))
                    .await;
            }
            Err(ExecutionError::Exchange(e)) => {
                log::error!("[{}] order failed: {}", symbol, e);
                self.notifier
                    .notify_error("Order Failed", &e.to_string(), Some(symbol))
                    .await;
            }
        }
    }

    /// Send the daily summary once per UTC day after the configured time.
    async fn check_daily_summary(&self, now: DateTime<Utc>) {
        let target = NaiveTime::parse_from_str(&self.config.discord.daily_summary_time, "%H:%M")
            .unwrap_or_else(|_| NaiveTime::from_hms_opt(10, 0, 0).unwrap());
        if now.time() < target {
            return;
        }

        let today = now.date_naive();
        let stats = {
            let mut state = self.state.lock().unwrap();
            if state.last_summary_date == Some(today) {
                return;
            }
            state.last_summary_date = Some(today);
            state.portfolio.stats(today)
        };

        let daily_pl = stats.equity - self.initial_equity;
        self.notifier.notify_daily_summary(&stats, daily_pl).await;
        log::info!("Daily summary sent");
    }
}
