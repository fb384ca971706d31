use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::engine::EngineState;
use crate::exchange::{ExchangeClient, ExchangeError, OrderFill};
use crate::portfolio::PortfolioError;
use crate::risk_manager::OrderProposal;
use crate::types::Trade;

// ── Rate limiting ─────────────────────────────────────────────────────────────

/// Process-wide submission gate: at most one call per minimum interval,
/// shared across all symbols. Concurrent acquirers queue on the inner mutex
/// and are released one interval apart.
pub struct RateGate {
    min_interval: Duration,
    last: tokio::sync::Mutex<Option<Instant>>,
}

impl RateGate {
    pub fn new(min_interval: Duration) -> Self {
        RateGate {
            min_interval,
            last: tokio::sync::Mutex::new(None),
        }
    }

    pub async fn acquire(&self) {
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

// ── Retry ─────────────────────────────────────────────────────────────────────

/// Generic retry wrapper with exponential backoff. Transient failures and
/// throttle responses are retried up to `max_retries` times; permanent
/// rejections return immediately.
pub async fn with_retry<F, Fut, T>(operation: F, max_retries: u32) -> Result<T, ExchangeError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ExchangeError>>,
{
    let mut retries = 0;
    let mut delay: u64 = 1;
    loop {
        match operation().await {
            Ok(r) => return Ok(r),
            Err(ExchangeError::RateLimited { retry_after_secs }) => {
                if retries >= max_retries {
                    return Err(ExchangeError::RateLimited { retry_after_secs });
                }
                log::warn!(
                    "Rate limited — sleeping {}s (attempt {}/{})",
                    retry_after_secs,
                    retries + 1,
                    max_retries
                );
                tokio::time::sleep(Duration::from_secs(retry_after_secs)).await;
                retries += 1;
            }
            Err(ExchangeError::Transient(msg)) => {
                if retries >= max_retries {
                    return Err(ExchangeError::Transient(msg));
                }
                log::warn!(
                    "Transient error: {} — retry in {}s ({}/{})",
                    msg,
                    delay,
                    retries + 1,
                    max_retries
                );
                tokio::time::sleep(Duration::from_secs(delay)).await;
                delay = (delay * 2).min(60);
                retries += 1;
            }
            Err(e @ ExchangeError::Permanent(_)) => return Err(e),
        }
    }
}

// ── Execution ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ExecutionError {
    /// Submission failed after exhausting retries (or permanently). No state
    /// was mutated.
    Exchange(ExchangeError),
    /// The fill could not be applied to the portfolio: an invariant
    /// violation, never silently dropped.
    Bookkeeping(PortfolioError),
}

impl std::fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionError::Exchange(e) => write!(f, "execution failed: {}", e),
            ExecutionError::Bookkeeping(e) => write!(f, "fill bookkeeping failed: {}", e),
        }
    }
}

impl std::error::Error for ExecutionError {}

#[derive(Clone, Debug)]
pub struct ExecutionReport {
    pub trade: Trade,
    pub realized_pnl: Option<f64>,
}

/// Wraps the exchange's market-order capability with rate limiting, bounded
/// retry and exactly-once portfolio bookkeeping: a fill is credited only
/// after an explicit success response, never speculatively.
pub struct OrderExecutor {
    exchange: Arc<dyn ExchangeClient>,
    gate: RateGate,
    max_retries: u32,
}

impl OrderExecutor {
    pub fn new(exchange: Arc<dyn ExchangeClient>, rate_limit: Duration, max_retries: u32) -> Self {
        OrderExecutor {
            exchange,
            gate: RateGate::new(rate_limit),
            max_retries,
        }
    }

    /// Submit one sized proposal and apply the resulting fill.
    pub async fn execute(
        &self,
        proposal: &OrderProposal,
        state: &Arc<Mutex<EngineState>>,
    ) -> Result<ExecutionReport, ExecutionError> {
        let fill = self.submit(proposal).await.map_err(ExecutionError::Exchange)?;

        let trade = Trade {
            symbol: proposal.symbol.clone(),
            side: proposal.side,
            quantity: fill.quantity,
            price: fill.price,
            timestamp: chrono::Utc::now().timestamp(),
            realized_pnl: None,
        };
        let advisory_levels = proposal.stop_loss.zip(proposal.take_profit);

        // Portfolio and risk state move together under the engine lock so a
        // concurrent snapshot can never observe one without the other.
        let realized = {
            let mut state = state.lock().unwrap();
            let realized = state
                .portfolio
                .record_fill(trade.clone(), advisory_levels)
                .map_err(ExecutionError::Bookkeeping)?;
            if let Some(pnl) = realized {
                state.risk.record_close(&proposal.symbol, pnl);
            }
            realized
        };

        Ok(ExecutionReport {
            trade: Trade { realized_pnl: realized, ..trade },
            realized_pnl: realized,
        })
    }

    async fn submit(&self, proposal: &OrderProposal) -> Result<OrderFill, ExchangeError> {
        with_retry(
            || async {
                self.gate.acquire().await;
                self.exchange
                    .submit_market_order(&proposal.symbol, proposal.side, proposal.quantity)
                    .await
            },
            self.max_retries,
        )
        .await
    }
}
