use std::collections::HashMap;

use crate::config::TradingConfig;
use crate::types::{Position, Signal, SignalDirection, TradeSide};

/// Sized order ready for the executor. Stop/take-profit levels are advisory
/// monitoring values carried on the resulting position, set on opens only.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderProposal {
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: f64,
    pub price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

#[derive(Debug, PartialEq)]
pub enum RiskRejection {
    NeutralSignal,
    BelowThreshold { strength: u32, threshold: u32 },
    SymbolLocked { until: i64 },
    MaxPositionsReached { open: usize, max: usize },
    PositionAlreadyOpen,
    NoPositionToClose,
    BelowMinNotional { notional: f64, min: f64 },
}

impl std::fmt::Display for RiskRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskRejection::NeutralSignal => write!(f, "neutral signal"),
            RiskRejection::BelowThreshold { strength, threshold } => {
                write!(f, "strength {} below trade threshold {}", strength, threshold)
            }
            RiskRejection::SymbolLocked { until } => {
                write!(f, "symbol locked until {}", until)
            }
            RiskRejection::MaxPositionsReached { open, max } => {
                write!(f, "open positions at limit ({}/{})", open, max)
            }
            RiskRejection::PositionAlreadyOpen => write!(f, "position already open"),
            RiskRejection::NoPositionToClose => write!(f, "no open position to close"),
            RiskRejection::BelowMinNotional { notional, min } => {
                write!(f, "notional {:.2} below minimum {:.2}", notional, min)
            }
        }
    }
}

/// Per-symbol risk state: UNLOCKED -> LOCKED on an accepted proposal,
/// back to UNLOCKED once the cooldown elapses.
#[derive(Clone, Debug, Default)]
pub struct SymbolRisk {
    pub consecutive_losses: u32,
    pub locked_until: Option<i64>,
}

pub struct RiskManager {
    base_position_size_percent: f64,
    base_stop_loss_percent: f64,
    base_take_profit_percent: f64,
    max_stop_loss_percent: f64,
    max_take_profit_percent: f64,
    min_notional_usd: f64,
    max_open_positions: usize,
    symbol_lock_secs: i64,
    trade_threshold: u32,
    states: HashMap<String, SymbolRisk>,
}

impl RiskManager {
    pub fn new(trading: &TradingConfig) -> Self {
        RiskManager {
            base_position_size_percent: trading.max_position_size_percent,
            base_stop_loss_percent: trading.stop_loss_percent,
            base_take_profit_percent: trading.take_profit_percent,
            max_stop_loss_percent: trading.max_stop_loss_percent,
            max_take_profit_percent: trading.max_take_profit_percent,
            min_notional_usd: trading.min_notional_usd,
            max_open_positions: trading.max_open_positions,
            symbol_lock_secs: trading.symbol_lock_secs,
            trade_threshold: trading.trade_threshold,
            states: HashMap::new(),
        }
    }

    /// Gate a signal and size it into an order proposal.
    ///
    /// Acceptance locks the symbol for the cooldown window; while locked no
    /// further proposal for the same symbol can be produced, which also
    /// guarantees no two orders for one symbol are ever in flight at once.
    pub fn evaluate(
        &mut self,
        signal: &Signal,
        equity: f64,
        positions: &HashMap<String, Position>,
        atr: f64,
        now: i64,
    ) -> Result<OrderProposal, RiskRejection> {
        let side = match signal.direction {
            SignalDirection::Buy => TradeSide::Buy,
            SignalDirection::Sell => TradeSide::Sell,
            SignalDirection::Neutral => return Err(RiskRejection::NeutralSignal),
        };
        if signal.strength < self.trade_threshold {
            return Err(RiskRejection::BelowThreshold {
                strength: signal.strength,
                threshold: self.trade_threshold,
            });
        }

        if let Some(until) = self.states.get(&signal.symbol).and_then(|s| s.locked_until) {
            if now < until {
                return Err(RiskRejection::SymbolLocked { until });
            }
        }

        let proposal = match side {
            TradeSide::Buy => {
                if positions.contains_key(&signal.symbol) {
                    return Err(RiskRejection::PositionAlreadyOpen);
                }
                if positions.len() >= self.max_open_positions {
                    return Err(RiskRejection::MaxPositionsReached {
                        open: positions.len(),
                        max: self.max_open_positions,
                    });
                }

                let multiplier = size_multiplier(self.consecutive_losses(&signal.symbol));
                let position_value =
                    equity * (self.base_position_size_percent * multiplier / 100.0);
                if position_value < self.min_notional_usd {
                    return Err(RiskRejection::BelowMinNotional {
                        notional: position_value,
                        min: self.min_notional_usd,
                    });
                }

                let quantity = position_value / signal.price;
                let atr_percent = if signal.price > 0.0 {
                    atr / signal.price * 100.0
                } else {
                    0.0
                };
                let (stop_pct, tp_pct) = self.stop_take_percents(atr_percent);

                OrderProposal {
                    symbol: signal.symbol.clone(),
                    side,
                    quantity,
                    price: signal.price,
                    stop_loss: Some(signal.price * (1.0 - stop_pct / 100.0)),
                    take_profit: Some(signal.price * (1.0 + tp_pct / 100.0)),
                }
            }
            TradeSide::Sell => {
                let position = positions
                    .get(&signal.symbol)
                    .ok_or(RiskRejection::NoPositionToClose)?;
                OrderProposal {
                    symbol: signal.symbol.clone(),
                    side,
                    quantity: position.quantity,
                    price: signal.price,
                    stop_loss: None,
                    take_profit: None,
                }
            }
        };

        let state = self.states.entry(signal.symbol.clone()).or_default();
        state.locked_until = Some(now + self.symbol_lock_secs);
        Ok(proposal)
    }

    /// Stop/take-profit distances scaled by volatility, clamped to the
    /// configured maxima.
    fn stop_take_percents(&self, atr_percent: f64) -> (f64, f64) {
        let stop = (atr_percent * 2.0)
            .max(self.base_stop_loss_percent)
            .min(self.max_stop_loss_percent);
        let take = (atr_percent * 3.0)
            .max(self.base_take_profit_percent)
            .min(self.max_take_profit_percent);
        (stop, take)
    }

    /// Update the loss streak after a position closes.
    pub fn record_close(&mut self, symbol: &str, realized_pnl: f64) {
        let state = self.states.entry(symbol.to_string()).or_default();
        if realized_pnl > 0.0 {
            state.consecutive_losses = 0;
        } else {
            state.consecutive_losses += 1;
            log::info!(
                "[{}] losing close recorded, streak now {}",
                symbol,
                state.consecutive_losses
            );
        }
    }

    pub fn is_locked(&self, symbol: &str, now: i64) -> bool {
        self.states
            .get(symbol)
            .and_then(|s| s.locked_until)
            .map(|until| now < until)
            .unwrap_or(false)
    }

    pub fn consecutive_losses(&self, symbol: &str) -> u32 {
        self.states
            .get(symbol)
            .map(|s| s.consecutive_losses)
            .unwrap_or(0)
    }
}

/// Drawdown protection: shrink position size as the loss streak grows.
pub fn size_multiplier(consecutive_losses: u32) -> f64 {
    match consecutive_losses {
        0 | 1 => 1.0,
        2 => 0.66,
        _ => 0.33,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trading_config() -> TradingConfig {
        let raw = r#"{
            "maxPositionSizePercent": 5.0,
            "stopLossPercent": 2.0,
            "takeProfitPercent": 4.0,
            "minNotionalUsd": 10.0,
            "maxOpenPositions": 2,
            "paperTrading": true
        }"#;
        serde_json::from_str(raw).unwrap()
    }

    fn buy_signal(symbol: &str, strength: u32, price: f64) -> Signal {
        Signal {
            symbol: symbol.to_string(),
            direction: SignalDirection::Buy,
            strength,
            price,
            confirmations: Vec::new(),
            timestamp: 0,
        }
    }

    fn sell_signal(symbol: &str, strength: u32, price: f64) -> Signal {
        Signal {
            direction: SignalDirection::Sell,
            ..buy_signal(symbol, strength, price)
        }
    }

    fn open_position(symbol: &str, quantity: f64, entry: f64) -> Position {
        Position {
            symbol: symbol.to_string(),
            quantity,
            entry_price: entry,
            entry_time: 0,
            stop_loss: entry * 0.95,
            take_profit: entry * 1.10,
            current_price: entry,
            unrealized_pnl: 0.0,
        }
    }

    #[test]
    fn test_size_multiplier_table() {
        assert_eq!(size_multiplier(0), 1.0);
        assert_eq!(size_multiplier(1), 1.0);
        assert_eq!(size_multiplier(2), 0.66);
        assert_eq!(size_multiplier(3), 0.33);
        assert_eq!(size_multiplier(7), 0.33);
    }

    #[test]
    fn test_buy_sizing_from_equity() {
        let mut rm = RiskManager::new(&trading_config());
        let positions = HashMap::new();
        let proposal = rm
            .evaluate(&buy_signal("XBTUSD", 80, 100.0), 1000.0, &positions, 0.0, 1000)
            .unwrap();
        // 1000 * 5% = $50 notional at $100.
        assert!((proposal.quantity - 0.5).abs() < 1e-9);
        assert_eq!(proposal.side, TradeSide::Buy);
    }

    #[test]
    fn test_threshold_and_neutral_rejections() {
        let mut rm = RiskManager::new(&trading_config());
        let positions = HashMap::new();
        assert_eq!(
            rm.evaluate(&buy_signal("XBTUSD", 54, 100.0), 1000.0, &positions, 0.0, 0),
            Err(RiskRejection::BelowThreshold { strength: 54, threshold: 55 })
        );

        let mut neutral = buy_signal("XBTUSD", 80, 100.0);
        neutral.direction = SignalDirection::Neutral;
        assert_eq!(
            rm.evaluate(&neutral, 1000.0, &positions, 0.0, 0),
            Err(RiskRejection::NeutralSignal)
        );
    }

    #[test]
    fn test_symbol_lock_rejects_until_cooldown_elapses() {
        let mut rm = RiskManager::new(&trading_config());
        let positions = HashMap::new();

        rm.evaluate(&buy_signal("XBTUSD", 80, 100.0), 1000.0, &positions, 0.0, 100)
            .unwrap();
        assert!(rm.is_locked("XBTUSD", 101));

        // Second proposal inside the 60s window is rejected.
        let rejected = rm.evaluate(&buy_signal("XBTUSD", 90, 100.0), 1000.0, &positions, 0.0, 120);
        assert_eq!(rejected, Err(RiskRejection::SymbolLocked { until: 160 }));

        // After the cooldown a new proposal goes through.
        rm.evaluate(&buy_signal("XBTUSD", 90, 100.0), 1000.0, &positions, 0.0, 161)
            .unwrap();
    }

    #[test]
    fn test_max_open_positions_gates_new_entries() {
        let mut rm = RiskManager::new(&trading_config());
        let mut positions = HashMap::new();
        positions.insert("ETHUSD".to_string(), open_position("ETHUSD", 1.0, 50.0));
        positions.insert("SOLUSD".to_string(), open_position("SOLUSD", 1.0, 20.0));

        let rejected = rm.evaluate(&buy_signal("XBTUSD", 80, 100.0), 1000.0, &positions, 0.0, 0);
        assert_eq!(
            rejected,
            Err(RiskRejection::MaxPositionsReached { open: 2, max: 2 })
        );

        // Closing an existing position is still allowed at the cap.
        rm.evaluate(&sell_signal("ETHUSD", 80, 55.0), 1000.0, &positions, 0.0, 0)
            .unwrap();
    }

    #[test]
    fn test_duplicate_buy_rejected() {
        let mut rm = RiskManager::new(&trading_config());
        let mut positions = HashMap::new();
        positions.insert("XBTUSD".to_string(), open_position("XBTUSD", 0.5, 100.0));

        let rejected = rm.evaluate(&buy_signal("XBTUSD", 80, 100.0), 1000.0, &positions, 0.0, 0);
        assert_eq!(rejected, Err(RiskRejection::PositionAlreadyOpen));
    }

    #[test]
    fn test_min_notional_floor() {
        let mut rm = RiskManager::new(&trading_config());
        let positions = HashMap::new();
        // 100 * 5% = $5, below the $10 floor.
        let rejected = rm.evaluate(&buy_signal("XBTUSD", 80, 100.0), 100.0, &positions, 0.0, 0);
        assert!(matches!(
            rejected,
            Err(RiskRejection::BelowMinNotional { .. })
        ));
    }

    #[test]
    fn test_loss_streak_shrinks_size_and_win_resets() {
        let mut rm = RiskManager::new(&trading_config());
        let positions = HashMap::new();

        rm.record_close("XBTUSD", -1.0);
        assert_eq!(rm.consecutive_losses("XBTUSD"), 1);
        // One loss keeps the full 1.0x multiplier.
        let p = rm
            .evaluate(&buy_signal("XBTUSD", 80, 100.0), 1000.0, &positions, 0.0, 0)
            .unwrap();
        assert!((p.quantity - 0.5).abs() < 1e-9);

        rm.record_close("XBTUSD", -2.0);
        let p = rm
            .evaluate(&buy_signal("XBTUSD", 80, 100.0), 1000.0, &positions, 0.0, 100)
            .unwrap();
        assert!((p.quantity - 0.33).abs() < 1e-9);

        rm.record_close("XBTUSD", -0.5);
        let p = rm
            .evaluate(&buy_signal("XBTUSD", 80, 100.0), 1000.0, &positions, 0.0, 200)
            .unwrap();
        assert!((p.quantity - 0.165).abs() < 1e-9);

        // A winning close resets the streak entirely.
        rm.record_close("XBTUSD", 3.0);
        assert_eq!(rm.consecutive_losses("XBTUSD"), 0);
        let p = rm
            .evaluate(&buy_signal("XBTUSD", 80, 100.0), 1000.0, &positions, 0.0, 300)
            .unwrap();
        assert!((p.quantity - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_breakeven_close_counts_as_loss() {
        let mut rm = RiskManager::new(&trading_config());
        rm.record_close("XBTUSD", 0.0);
        assert_eq!(rm.consecutive_losses("XBTUSD"), 1);
    }

    #[test]
    fn test_atr_stop_take_clamping() {
        let mut rm = RiskManager::new(&trading_config());
        let positions = HashMap::new();
        // atr 4.0 at price 100 -> atr_percent 4%:
        // stop = clamp(max(8%, 2%), 5%) = 5%, tp = clamp(max(12%, 4%), 10%) = 10%.
        let p = rm
            .evaluate(&buy_signal("XBTUSD", 80, 100.0), 1000.0, &positions, 4.0, 0)
            .unwrap();
        assert!((p.stop_loss.unwrap() - 95.0).abs() < 1e-9);
        assert!((p.take_profit.unwrap() - 110.0).abs() < 1e-9);
    }

    #[test]
    fn test_quiet_market_uses_base_percents() {
        let mut rm = RiskManager::new(&trading_config());
        let positions = HashMap::new();
        // Zero ATR falls back to the configured base distances.
        let p = rm
            .evaluate(&buy_signal("XBTUSD", 80, 100.0), 1000.0, &positions, 0.0, 0)
            .unwrap();
        assert!((p.stop_loss.unwrap() - 98.0).abs() < 1e-9);
        assert!((p.take_profit.unwrap() - 104.0).abs() < 1e-9);
    }

    #[test]
    fn test_sell_closes_full_position_quantity() {
        let mut rm = RiskManager::new(&trading_config());
        let mut positions = HashMap::new();
        positions.insert("XBTUSD".to_string(), open_position("XBTUSD", 0.5, 100.0));

        let p = rm
            .evaluate(&sell_signal("XBTUSD", 70, 98.0), 1000.0, &positions, 0.0, 0)
            .unwrap();
        assert_eq!(p.side, TradeSide::Sell);
        assert!((p.quantity - 0.5).abs() < 1e-9);
        assert!(p.stop_loss.is_none());

        // No position, nothing to close.
        let rejected = rm.evaluate(&sell_signal("ETHUSD", 70, 98.0), 1000.0, &positions, 0.0, 0);
        assert_eq!(rejected, Err(RiskRejection::NoPositionToClose));
    }
}
