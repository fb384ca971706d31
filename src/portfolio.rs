use std::collections::{HashMap, VecDeque};

use chrono::NaiveDate;

use crate::types::{PortfolioStats, Position, Signal, Trade, TradeSide};

pub const SIGNAL_HISTORY_CAPACITY: usize = 20;
pub const TRADE_HISTORY_CAPACITY: usize = 20;

#[derive(Debug, PartialEq)]
pub enum PortfolioError {
    /// A buy fill arrived for a symbol that already holds a position. The
    /// risk manager's symbol lock makes this unreachable; it is checked
    /// defensively and treated as an invariant violation.
    DuplicatePosition { symbol: String },
    NoOpenPosition { symbol: String },
}

impl std::fmt::Display for PortfolioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortfolioError::DuplicatePosition { symbol } => {
                write!(f, "duplicate position for {}", symbol)
            }
            PortfolioError::NoOpenPosition { symbol } => {
                write!(f, "no open position for {}", symbol)
            }
        }
    }
}

impl std::error::Error for PortfolioError {}

/// Owns positions, bounded signal/trade history and daily/lifetime
/// statistics. Mutated only through fills and signal appends; read by the
/// dashboard feed and the risk manager under the engine-state lock.
pub struct PortfolioTracker {
    positions: HashMap<String, Position>,
    trades: VecDeque<Trade>,
    signals: VecDeque<Signal>,
    stats: PortfolioStats,
    last_reset_date: NaiveDate,
}

impl PortfolioTracker {
    pub fn new(today: NaiveDate) -> Self {
        PortfolioTracker {
            positions: HashMap::new(),
            trades: VecDeque::with_capacity(TRADE_HISTORY_CAPACITY),
            signals: VecDeque::with_capacity(SIGNAL_HISTORY_CAPACITY),
            stats: PortfolioStats::default(),
            last_reset_date: today,
        }
    }

    /// Refresh account-level figures from the exchange.
    pub fn set_account(&mut self, equity: f64, buying_power: f64) {
        self.stats.equity = equity;
        self.stats.buying_power = buying_power;
    }

    /// Apply one fill. Opens a position on a buy, closes it on a sell and
    /// returns the realized P/L. Stats and the trade record are updated in
    /// the same call so concurrent snapshot readers can never observe one
    /// without the other.
    pub fn record_fill(
        &mut self,
        mut trade: Trade,
        advisory_levels: Option<(f64, f64)>,
    ) -> Result<Option<f64>, PortfolioError> {
        let trade_date = chrono::DateTime::from_timestamp(trade.timestamp, 0)
            .map(|dt| dt.date_naive())
            .unwrap_or(self.last_reset_date);
        self.maybe_roll_daily(trade_date);

        let realized = match trade.side {
            TradeSide::Buy => {
                if self.positions.contains_key(&trade.symbol) {
                    return Err(PortfolioError::DuplicatePosition {
                        symbol: trade.symbol.clone(),
                    });
                }
                let (stop_loss, take_profit) =
                    advisory_levels.unwrap_or((trade.price, trade.price));
                self.positions.insert(
                    trade.symbol.clone(),
                    Position {
                        symbol: trade.symbol.clone(),
                        quantity: trade.quantity,
                        entry_price: trade.price,
                        entry_time: trade.timestamp,
                        stop_loss,
                        take_profit,
                        current_price: trade.price,
                        unrealized_pnl: 0.0,
                    },
                );
                self.stats.buying_power -= trade.price * trade.quantity;
                None
            }
            TradeSide::Sell => {
                let position = self.positions.remove(&trade.symbol).ok_or_else(|| {
                    PortfolioError::NoOpenPosition {
                        symbol: trade.symbol.clone(),
                    }
                })?;
                let realized = (trade.price - position.entry_price) * trade.quantity;

                self.stats.daily_trades += 1;
                self.stats.lifetime_trades += 1;
                if realized > 0.0 {
                    self.stats.daily_wins += 1;
                    self.stats.lifetime_wins += 1;
                } else {
                    self.stats.daily_losses += 1;
                    self.stats.lifetime_losses += 1;
                }
                self.stats.total_realized_pnl += realized;
                self.stats.equity += realized;
                self.stats.buying_power += trade.price * trade.quantity;

                log::info!(
                    "[{}] realized P/L {:+.2} ({:+.2}%)",
                    trade.symbol,
                    realized,
                    (trade.price - position.entry_price) / position.entry_price * 100.0
                );
                Some(realized)
            }
        };

        trade.realized_pnl = realized;
        self.trades.push_front(trade);
        self.trades.truncate(TRADE_HISTORY_CAPACITY);
        Ok(realized)
    }

    /// Append to the most-recent-first signal history.
    pub fn record_signal(&mut self, signal: Signal) {
        self.signals.push_front(signal);
        self.signals.truncate(SIGNAL_HISTORY_CAPACITY);
    }

    /// Refresh the mark and unrealized P/L of an open position.
    pub fn update_position_price(&mut self, symbol: &str, price: f64) {
        if let Some(position) = self.positions.get_mut(symbol) {
            position.current_price = price;
            position.unrealized_pnl = (price - position.entry_price) * position.quantity;
        }
    }

    pub fn positions(&self) -> &HashMap<String, Position> {
        &self.positions
    }

    pub fn equity(&self) -> f64 {
        self.stats.equity
    }

    pub fn open_positions(&self) -> Vec<Position> {
        let mut out: Vec<Position> = self.positions.values().cloned().collect();
        out.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        out
    }

    /// Current statistics, rolling the daily counters first if a UTC day
    /// boundary has been crossed since the last fill or read.
    pub fn stats(&mut self, today: NaiveDate) -> PortfolioStats {
        self.maybe_roll_daily(today);
        self.stats.clone()
    }

    pub fn recent_signals(&self, n: usize) -> Vec<Signal> {
        self.signals.iter().take(n).cloned().collect()
    }

    pub fn recent_trades(&self, n: usize) -> Vec<Trade> {
        self.trades.iter().take(n).cloned().collect()
    }

    /// Reset daily counters exactly once per UTC-day crossing.
    fn maybe_roll_daily(&mut self, date: NaiveDate) {
        if date > self.last_reset_date {
            log::info!(
                "Daily reset | trades: {} W/L: {}/{}",
                self.stats.daily_trades,
                self.stats.daily_wins,
                self.stats.daily_losses
            );
            self.stats.daily_trades = 0;
            self.stats.daily_wins = 0;
            self.stats.daily_losses = 0;
            self.last_reset_date = date;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn day(n: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, n).unwrap()
    }

    fn trade(symbol: &str, side: TradeSide, quantity: f64, price: f64) -> Trade {
        Trade {
            symbol: symbol.to_string(),
            side,
            quantity,
            price,
            // 2025-06-01 noon UTC.
            timestamp: 1_748_779_200,
            realized_pnl: None,
        }
    }

    fn tracker() -> PortfolioTracker {
        let mut t = PortfolioTracker::new(day(1));
        t.set_account(1000.0, 1000.0);
        t
    }

    #[test]
    fn test_buy_opens_position_with_advisory_levels() {
        let mut t = tracker();
        t.record_fill(trade("XBTUSD", TradeSide::Buy, 0.5, 100.0), Some((95.0, 110.0)))
            .unwrap();

        let positions = t.open_positions();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].symbol, "XBTUSD");
        assert!((positions[0].stop_loss - 95.0).abs() < 1e-9);
        assert!((positions[0].take_profit - 110.0).abs() < 1e-9);
        // Opens do not touch the closed-trade counters.
        assert_eq!(t.stats(day(1)).daily_trades, 0);
    }

    #[test]
    fn test_duplicate_position_rejected() {
        let mut t = tracker();
        t.record_fill(trade("XBTUSD", TradeSide::Buy, 0.5, 100.0), None)
            .unwrap();
        let err = t
            .record_fill(trade("XBTUSD", TradeSide::Buy, 0.1, 101.0), None)
            .unwrap_err();
        assert_eq!(
            err,
            PortfolioError::DuplicatePosition { symbol: "XBTUSD".to_string() }
        );
        assert_eq!(t.open_positions().len(), 1);
    }

    #[test]
    fn test_sell_without_position_rejected() {
        let mut t = tracker();
        let err = t
            .record_fill(trade("XBTUSD", TradeSide::Sell, 0.5, 100.0), None)
            .unwrap_err();
        assert!(matches!(err, PortfolioError::NoOpenPosition { .. }));
    }

    #[test]
    fn test_losing_close_books_realized_pnl() {
        let mut t = tracker();
        t.record_fill(trade("XBTUSD", TradeSide::Buy, 0.5, 100.0), Some((95.0, 110.0)))
            .unwrap();
        let realized = t
            .record_fill(trade("XBTUSD", TradeSide::Sell, 0.5, 98.0), None)
            .unwrap();

        assert_eq!(realized, Some(-1.0));
        let stats = t.stats(day(1));
        assert_eq!(stats.daily_trades, 1);
        assert_eq!(stats.daily_losses, 1);
        assert_eq!(stats.daily_wins, 0);
        assert!((stats.total_realized_pnl + 1.0).abs() < 1e-9);
        assert!((stats.equity - 999.0).abs() < 1e-9);
        assert!(t.open_positions().is_empty());
    }

    #[test]
    fn test_realized_pnl_matches_stats_total() {
        let mut t = tracker();
        let fills = [
            ("XBTUSD", 0.5, 100.0, 104.0),
            ("ETHUSD", 2.0, 50.0, 49.0),
            ("SOLUSD", 10.0, 20.0, 22.0),
        ];
        for (symbol, qty, entry, exit) in fills {
            t.record_fill(trade(symbol, TradeSide::Buy, qty, entry), None)
                .unwrap();
            t.record_fill(trade(symbol, TradeSide::Sell, qty, exit), None)
                .unwrap();
        }

        let from_history: f64 = t
            .recent_trades(TRADE_HISTORY_CAPACITY)
            .iter()
            .filter_map(|tr| tr.realized_pnl)
            .sum();
        let stats = t.stats(day(1));
        assert!((from_history - stats.total_realized_pnl).abs() < 1e-9);
        assert_eq!(stats.daily_trades, 3);
        assert_eq!(stats.daily_wins, 2);
        assert_eq!(stats.daily_losses, 1);
        assert!(t.open_positions().is_empty());
    }

    #[test]
    fn test_daily_rollover_resets_once() {
        let mut t = tracker();
        t.record_fill(trade("XBTUSD", TradeSide::Buy, 0.5, 100.0), None)
            .unwrap();
        t.record_fill(trade("XBTUSD", TradeSide::Sell, 0.5, 104.0), None)
            .unwrap();
        assert_eq!(t.stats(day(1)).daily_trades, 1);

        // First read after midnight rolls the daily counters.
        let stats = t.stats(day(2));
        assert_eq!(stats.daily_trades, 0);
        assert_eq!(stats.daily_wins, 0);
        // Lifetime counters survive the rollover.
        assert_eq!(stats.lifetime_trades, 1);
        assert_eq!(stats.lifetime_wins, 1);
        assert!((stats.total_realized_pnl - 2.0).abs() < 1e-9);

        // Re-reading the same day must not reset anything again.
        t.record_fill(trade("ETHUSD", TradeSide::Buy, 1.0, 50.0), None)
            .unwrap();
        t.record_fill(trade("ETHUSD", TradeSide::Sell, 1.0, 51.0), None)
            .unwrap();
        assert_eq!(t.stats(day(2)).daily_trades, 1);
    }

    #[test]
    fn test_history_capacity_evicts_oldest() {
        let mut t = tracker();
        for i in 0..(SIGNAL_HISTORY_CAPACITY + 5) {
            t.record_signal(Signal::neutral("XBTUSD", 100.0 + i as f64, i as i64));
        }
        let signals = t.recent_signals(SIGNAL_HISTORY_CAPACITY + 5);
        assert_eq!(signals.len(), SIGNAL_HISTORY_CAPACITY);
        // Most recent first.
        assert_eq!(signals[0].timestamp, (SIGNAL_HISTORY_CAPACITY + 4) as i64);
    }

    #[test]
    fn test_update_position_price_marks_unrealized() {
        let mut t = tracker();
        t.record_fill(trade("XBTUSD", TradeSide::Buy, 0.5, 100.0), None)
            .unwrap();
        t.update_position_price("XBTUSD", 106.0);
        let positions = t.open_positions();
        assert!((positions[0].unrealized_pnl - 3.0).abs() < 1e-9);
        assert!((positions[0].current_price - 106.0).abs() < 1e-9);
    }

    /// A snapshot taken while fills are being applied must never see a trade
    /// count without its matching equity/P-L change.
    #[test]
    fn test_concurrent_reads_see_consistent_stats() {
        let tracker = Arc::new(Mutex::new(tracker()));
        let writer = {
            let tracker = Arc::clone(&tracker);
            std::thread::spawn(move || {
                for i in 0..200 {
                    let symbol = format!("SYM{}USD", i % 7);
                    let entry = 100.0;
                    let exit = if i % 3 == 0 { 98.0 } else { 103.0 };
                    let mut t = tracker.lock().unwrap();
                    t.record_fill(trade(&symbol, TradeSide::Buy, 1.0, entry), None)
                        .unwrap();
                    t.record_fill(trade(&symbol, TradeSide::Sell, 1.0, exit), None)
                        .unwrap();
                }
            })
        };

        let reader = {
            let tracker = Arc::clone(&tracker);
            std::thread::spawn(move || {
                for _ in 0..500 {
                    let stats = tracker.lock().unwrap().stats(day(1));
                    // Equity moves in lockstep with booked P/L.
                    assert!((stats.equity - 1000.0 - stats.total_realized_pnl).abs() < 1e-6);
                    assert_eq!(stats.daily_wins + stats.daily_losses, stats.daily_trades);
                }
            })
        };

        writer.join().unwrap();
        reader.join().unwrap();
    }
}
