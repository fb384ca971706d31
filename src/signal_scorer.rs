use crate::types::{Candle, ContributionReason, IndicatorSnapshot, Signal, SignalDirection};

/// Below this many confirmations the composite score takes a quality penalty.
const MIN_CONFIRMATIONS: usize = 3;
const QUALITY_PENALTY: f64 = 0.7;
const MAX_STRENGTH: u32 = 100;

/// Score one symbol from its indicator snapshot and latest candle.
///
/// Buy-side and sell-side contributions are collected independently; the
/// dominant side wins, equal totals resolve to a neutral signal. A side with
/// no RSI/MACD contribution scores zero outright.
pub fn score(symbol: &str, snap: &IndicatorSnapshot, latest: &Candle, timestamp: i64) -> Signal {
    let price = latest.close;

    let buy = collect_buy(snap, latest, price);
    let sell = collect_sell(snap, latest, price);

    let buy_total = side_total(&buy);
    let sell_total = side_total(&sell);

    let (direction, confirmations, total) = if buy_total > sell_total {
        (SignalDirection::Buy, buy, buy_total)
    } else if sell_total > buy_total {
        (SignalDirection::Sell, sell, sell_total)
    } else {
        return Signal::neutral(symbol, price, timestamp);
    };

    let mut strength = total;
    if confirmations.len() < MIN_CONFIRMATIONS {
        strength = (strength as f64 * QUALITY_PENALTY) as u32;
    }
    strength = strength.min(MAX_STRENGTH);

    Signal {
        symbol: symbol.to_string(),
        direction,
        strength,
        price,
        confirmations,
        timestamp,
    }
}

/// Sum of fired contributions; zero unless an oscillator reading fired.
fn side_total(contributions: &[ContributionReason]) -> u32 {
    if !contributions.iter().any(|c| c.is_primary()) {
        return 0;
    }
    contributions.iter().map(|c| c.points()).sum()
}

fn collect_buy(snap: &IndicatorSnapshot, latest: &Candle, price: f64) -> Vec<ContributionReason> {
    let mut out = Vec::new();

    if snap.rsi < 30.0 {
        out.push(ContributionReason::RsiOversold);
    } else if snap.rsi < 40.0 {
        out.push(ContributionReason::RsiDipping);
    }

    if snap.macd_histogram > 0.0 {
        out.push(ContributionReason::MacdBullish);
        if snap.macd_histogram_prev <= 0.0 {
            out.push(ContributionReason::MacdBullishCross);
        }
    }

    if price > snap.sma20 {
        out.push(ContributionReason::AboveSma20);
    }
    if price > snap.sma50 {
        out.push(ContributionReason::AboveSma50);
    }
    if snap.ema12 > snap.ema26 {
        out.push(ContributionReason::EmaBullish);
    }

    push_volume(&mut out, snap.volume_ratio);

    if latest.close > latest.open {
        out.push(ContributionReason::BullishCandle);
    }

    out
}

fn collect_sell(snap: &IndicatorSnapshot, latest: &Candle, price: f64) -> Vec<ContributionReason> {
    let mut out = Vec::new();

    if snap.rsi > 70.0 {
        out.push(ContributionReason::RsiOverbought);
    } else if snap.rsi > 60.0 {
        out.push(ContributionReason::RsiRising);
    }

    if snap.macd_histogram < 0.0 {
        out.push(ContributionReason::MacdBearish);
        if snap.macd_histogram_prev >= 0.0 {
            out.push(ContributionReason::MacdBearishCross);
        }
    }

    if price < snap.sma20 {
        out.push(ContributionReason::BelowSma20);
    }
    if price < snap.sma50 {
        out.push(ContributionReason::BelowSma50);
    }
    if snap.ema12 < snap.ema26 {
        out.push(ContributionReason::EmaBearish);
    }

    push_volume(&mut out, snap.volume_ratio);

    if latest.close < latest.open {
        out.push(ContributionReason::BearishCandle);
    }

    out
}

/// Volume is direction-neutral: elevated activity strengthens whichever side
/// the oscillators establish.
fn push_volume(out: &mut Vec<ContributionReason>, ratio: f64) {
    if ratio > 1.5 {
        out.push(ContributionReason::VolumeSurge);
    } else if ratio > 1.2 {
        out.push(ContributionReason::VolumeElevated);
    }
}
