use crate::types::{Candle, IndicatorSnapshot};

/// Longest lookback window used by any indicator (SMA50).
pub const MIN_CANDLES: usize = 50;

const VOL_AVG_PERIOD: usize = 20;

#[derive(Debug)]
pub enum IndicatorError {
    /// Not enough candles to compute the full snapshot. The caller must skip
    /// the symbol for this cycle, never substitute a default.
    InsufficientData { required: usize, got: usize },
}

impl std::fmt::Display for IndicatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndicatorError::InsufficientData { required, got } => {
                write!(f, "insufficient data: need {} candles, got {}", required, got)
            }
        }
    }
}

impl std::error::Error for IndicatorError {}

/// Compute every indicator for the latest candle of an ordered series.
pub fn compute_snapshot(candles: &[Candle]) -> Result<IndicatorSnapshot, IndicatorError> {
    if candles.len() < MIN_CANDLES {
        return Err(IndicatorError::InsufficientData {
            required: MIN_CANDLES,
            got: candles.len(),
        });
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let (macd_line, macd_signal, macd_histogram, macd_histogram_prev) = macd(&closes, 12, 26, 9);

    Ok(IndicatorSnapshot {
        rsi: rsi(&closes, 14),
        macd_line,
        macd_signal,
        macd_histogram,
        macd_histogram_prev,
        sma20: sma(&closes, 20),
        sma50: sma(&closes, 50),
        ema12: ema(&closes, 12),
        ema26: ema(&closes, 26),
        atr: atr(candles, 14),
        volume_ratio: volume_ratio(candles, VOL_AVG_PERIOD),
    })
}

/// RSI with Wilder smoothing.
pub fn rsi(closes: &[f64], period: usize) -> f64 {
    if closes.len() < period + 1 {
        return 50.0;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let delta = closes[i] - closes[i - 1];
        if delta > 0.0 {
            avg_gain += delta;
        } else {
            avg_loss += -delta;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;

    for i in (period + 1)..closes.len() {
        let delta = closes[i] - closes[i - 1];
        let (gain, loss) = if delta > 0.0 { (delta, 0.0) } else { (0.0, -delta) };
        avg_gain = (avg_gain * (period - 1) as f64 + gain) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + loss) / period as f64;
    }

    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

/// Simple moving average over the last `period` values.
pub fn sma(values: &[f64], period: usize) -> f64 {
    let n = values.len().min(period);
    if n == 0 {
        return 0.0;
    }
    values.iter().rev().take(n).sum::<f64>() / n as f64
}

/// Exponential moving average over the whole series, SMA-seeded.
pub fn ema(values: &[f64], period: usize) -> f64 {
    ema_series(values, period).last().copied().unwrap_or(0.0)
}

/// Full EMA series starting at index `period - 1` of the input.
fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if values.len() < period || period == 0 {
        return Vec::new();
    }
    let k = 2.0 / (period as f64 + 1.0);
    let seed = values[..period].iter().sum::<f64>() / period as f64;
    let mut out = Vec::with_capacity(values.len() - period + 1);
    out.push(seed);
    let mut prev = seed;
    for &v in &values[period..] {
        prev = (v - prev) * k + prev;
        out.push(prev);
    }
    out
}

/// MACD(fast, slow, signal): returns (line, signal, histogram, prev histogram).
fn macd(closes: &[f64], fast: usize, slow: usize, signal_period: usize) -> (f64, f64, f64, f64) {
    let fast_series = ema_series(closes, fast);
    let slow_series = ema_series(closes, slow);
    if slow_series.is_empty() {
        return (0.0, 0.0, 0.0, 0.0);
    }

    // Align both EMA series on their common tail before differencing.
    let len = slow_series.len();
    let fast_tail = &fast_series[fast_series.len() - len..];
    let macd_series: Vec<f64> = fast_tail
        .iter()
        .zip(slow_series.iter())
        .map(|(f, s)| f - s)
        .collect();

    let signal_series = ema_series(&macd_series, signal_period);
    if signal_series.len() < 2 {
        let line = *macd_series.last().unwrap_or(&0.0);
        let sig = *signal_series.last().unwrap_or(&0.0);
        return (line, sig, line - sig, 0.0);
    }

    let macd_tail = &macd_series[macd_series.len() - signal_series.len()..];
    let last = signal_series.len() - 1;
    let line = macd_tail[last];
    let sig = signal_series[last];
    let hist_prev = macd_tail[last - 1] - signal_series[last - 1];
    (line, sig, line - sig, hist_prev)
}

/// ATR as the rolling average of true range over the last `period` candles.
pub fn atr(candles: &[Candle], period: usize) -> f64 {
    if candles.len() < period + 1 {
        return 0.0;
    }
    let start = candles.len() - period - 1;
    let mut tr_sum = 0.0;
    for i in (start + 1)..candles.len() {
        let curr = &candles[i];
        let prev = &candles[i - 1];
        let tr = (curr.high - curr.low)
            .max((curr.high - prev.close).abs())
            .max((curr.low - prev.close).abs());
        tr_sum += tr;
    }
    tr_sum / period as f64
}

/// Latest volume relative to the rolling average (current candle included).
pub fn volume_ratio(candles: &[Candle], period: usize) -> f64 {
    let n = candles.len().min(period);
    if n == 0 {
        return 0.0;
    }
    let avg = candles.iter().rev().take(n).map(|c| c.volume).sum::<f64>() / n as f64;
    if avg > 0.0 {
        candles.last().map(|c| c.volume / avg).unwrap_or(0.0)
    } else {
        0.0
    }
}
