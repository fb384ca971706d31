use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// All indicator values derived from the most recent candles of one symbol.
/// Recomputed every cycle, never mutated.
#[derive(Clone, Debug)]
pub struct IndicatorSnapshot {
    pub rsi: f64,
    pub macd_line: f64,
    pub macd_signal: f64,
    pub macd_histogram: f64,
    /// Histogram of the previous candle, kept so the scorer can detect a
    /// fresh sign crossover without re-deriving the series.
    pub macd_histogram_prev: f64,
    pub sma20: f64,
    pub sma50: f64,
    pub ema12: f64,
    pub ema26: f64,
    pub atr: f64,
    pub volume_ratio: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalDirection {
    Buy,
    Sell,
    Neutral,
}

impl SignalDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalDirection::Buy => "BUY",
            SignalDirection::Sell => "SELL",
            SignalDirection::Neutral => "NEUTRAL",
        }
    }
}

/// Closed set of indicator contributions that can fire toward a composite
/// signal. Each variant carries its point value so scoring stays
/// exhaustively matchable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContributionReason {
    RsiOversold,
    RsiDipping,
    RsiOverbought,
    RsiRising,
    MacdBullish,
    MacdBearish,
    MacdBullishCross,
    MacdBearishCross,
    AboveSma20,
    BelowSma20,
    AboveSma50,
    BelowSma50,
    EmaBullish,
    EmaBearish,
    VolumeSurge,
    VolumeElevated,
    BullishCandle,
    BearishCandle,
}

impl ContributionReason {
    pub const fn points(self) -> u32 {
        match self {
            ContributionReason::RsiOversold | ContributionReason::RsiOverbought => 30,
            ContributionReason::RsiDipping | ContributionReason::RsiRising => 15,
            ContributionReason::MacdBullish | ContributionReason::MacdBearish => 20,
            ContributionReason::MacdBullishCross | ContributionReason::MacdBearishCross => 15,
            ContributionReason::AboveSma20 | ContributionReason::BelowSma20 => 15,
            ContributionReason::AboveSma50 | ContributionReason::BelowSma50 => 10,
            ContributionReason::EmaBullish | ContributionReason::EmaBearish => 10,
            ContributionReason::VolumeSurge => 15,
            ContributionReason::VolumeElevated => 8,
            ContributionReason::BullishCandle | ContributionReason::BearishCandle => 5,
        }
    }

    /// A signal must originate from an oscillator/momentum reading; volume
    /// and trend contributions alone cannot establish a direction.
    pub const fn is_primary(self) -> bool {
        matches!(
            self,
            ContributionReason::RsiOversold
                | ContributionReason::RsiDipping
                | ContributionReason::RsiOverbought
                | ContributionReason::RsiRising
                | ContributionReason::MacdBullish
                | ContributionReason::MacdBearish
                | ContributionReason::MacdBullishCross
                | ContributionReason::MacdBearishCross
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            ContributionReason::RsiOversold => "RSI oversold <30",
            ContributionReason::RsiDipping => "RSI oversold <40",
            ContributionReason::RsiOverbought => "RSI overbought >70",
            ContributionReason::RsiRising => "RSI overbought >60",
            ContributionReason::MacdBullish => "MACD bullish",
            ContributionReason::MacdBearish => "MACD bearish",
            ContributionReason::MacdBullishCross | ContributionReason::MacdBearishCross => {
                "MACD crossover"
            }
            ContributionReason::AboveSma20 => "Above SMA20",
            ContributionReason::BelowSma20 => "Below SMA20",
            ContributionReason::AboveSma50 => "Above SMA50",
            ContributionReason::BelowSma50 => "Below SMA50",
            ContributionReason::EmaBullish => "EMA bullish",
            ContributionReason::EmaBearish => "EMA bearish",
            ContributionReason::VolumeSurge => "High volume",
            ContributionReason::VolumeElevated => "Above avg volume",
            ContributionReason::BullishCandle => "Bullish candle",
            ContributionReason::BearishCandle => "Bearish candle",
        }
    }
}

/// Composite trade signal for one symbol at one point in time.
#[derive(Clone, Debug)]
pub struct Signal {
    pub symbol: String,
    pub direction: SignalDirection,
    /// 0..=100 composite score.
    pub strength: u32,
    pub price: f64,
    pub confirmations: Vec<ContributionReason>,
    pub timestamp: i64,
}

impl Signal {
    pub fn neutral(symbol: &str, price: f64, timestamp: i64) -> Self {
        Signal {
            symbol: symbol.to_string(),
            direction: SignalDirection::Neutral,
            strength: 0,
            price,
            confirmations: Vec::new(),
            timestamp,
        }
    }

    pub fn confirmation_count(&self) -> usize {
        self.confirmations.len()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }
}

/// One open spot position. At most one exists per symbol.
#[derive(Clone, Debug)]
pub struct Position {
    pub symbol: String,
    pub quantity: f64,
    pub entry_price: f64,
    pub entry_time: i64,
    /// Advisory level only; the exchange is not assumed to support
    /// conditional orders.
    pub stop_loss: f64,
    pub take_profit: f64,
    pub current_price: f64,
    pub unrealized_pnl: f64,
}

/// Immutable record of one fill.
#[derive(Clone, Debug)]
pub struct Trade {
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: f64,
    pub price: f64,
    pub timestamp: i64,
    /// Set on closes only.
    pub realized_pnl: Option<f64>,
}

#[derive(Clone, Debug, Default)]
pub struct PortfolioStats {
    pub equity: f64,
    pub buying_power: f64,
    pub daily_trades: u32,
    pub daily_wins: u32,
    pub daily_losses: u32,
    pub lifetime_trades: u32,
    pub lifetime_wins: u32,
    pub lifetime_losses: u32,
    pub total_realized_pnl: f64,
}

impl PortfolioStats {
    pub fn daily_win_rate(&self) -> f64 {
        if self.daily_trades > 0 {
            self.daily_wins as f64 / self.daily_trades as f64 * 100.0
        } else {
            0.0
        }
    }

    pub fn lifetime_win_rate(&self) -> f64 {
        if self.lifetime_trades > 0 {
            self.lifetime_wins as f64 / self.lifetime_trades as f64 * 100.0
        } else {
            0.0
        }
    }
}
