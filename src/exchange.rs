use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::types::{Candle, TradeSide};

// ── Error taxonomy ────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ExchangeError {
    /// Explicit throttle response. retry_after in seconds.
    RateLimited { retry_after_secs: u64 },
    /// Network failure, timeout, HTTP 5xx, temporary exchange condition.
    Transient(String),
    /// Rejected order, bad request, insufficient funds. Never retried.
    Permanent(String),
}

impl std::fmt::Display for ExchangeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExchangeError::RateLimited { retry_after_secs } => {
                write!(f, "rate limited (retry after {}s)", retry_after_secs)
            }
            ExchangeError::Transient(msg) => write!(f, "transient error: {}", msg),
            ExchangeError::Permanent(msg) => write!(f, "permanent error: {}", msg),
        }
    }
}

impl std::error::Error for ExchangeError {}

// ── Collaborator contract ─────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default)]
pub struct AccountBalance {
    pub equity: f64,
    pub buying_power: f64,
}

#[derive(Clone, Copy, Debug)]
pub struct OrderFill {
    pub price: f64,
    pub quantity: f64,
}

/// The engine's view of an exchange. Candles arrive in chronological order
/// with no duplicate timestamps; market orders either fill fully or fail.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn get_candles(
        &self,
        symbol: &str,
        interval_minutes: u32,
        count: usize,
    ) -> Result<Vec<Candle>, ExchangeError>;

    async fn get_account(&self) -> Result<AccountBalance, ExchangeError>;

    async fn submit_market_order(
        &self,
        symbol: &str,
        side: TradeSide,
        quantity: f64,
    ) -> Result<OrderFill, ExchangeError>;
}

// ── Paper trading ─────────────────────────────────────────────────────────────

struct PaperBook {
    cash: f64,
    holdings: HashMap<String, f64>,
    last_price: HashMap<String, f64>,
}

/// Simulated exchange: candles are delegated to a real market-data client,
/// orders fill instantly at the last seen close against a local cash book.
/// No order ever leaves the process.
pub struct PaperExchange {
    market: Arc<dyn ExchangeClient>,
    book: Mutex<PaperBook>,
}

impl PaperExchange {
    pub fn new(market: Arc<dyn ExchangeClient>, starting_cash: f64) -> Self {
        PaperExchange {
            market,
            book: Mutex::new(PaperBook {
                cash: starting_cash,
                holdings: HashMap::new(),
                last_price: HashMap::new(),
            }),
        }
    }
}

#[async_trait]
impl ExchangeClient for PaperExchange {
    async fn get_candles(
        &self,
        symbol: &str,
        interval_minutes: u32,
        count: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let candles = self.market.get_candles(symbol, interval_minutes, count).await?;
        if let Some(last) = candles.last() {
            let mut book = self.book.lock().unwrap();
            book.last_price.insert(symbol.to_string(), last.close);
        }
        Ok(candles)
    }

    async fn get_account(&self) -> Result<AccountBalance, ExchangeError> {
        let book = self.book.lock().unwrap();
        let holdings_value: f64 = book
            .holdings
            .iter()
            .map(|(symbol, qty)| qty * book.last_price.get(symbol).copied().unwrap_or(0.0))
            .sum();
        Ok(AccountBalance {
            equity: book.cash + holdings_value,
            buying_power: book.cash,
        })
    }

    async fn submit_market_order(
        &self,
        symbol: &str,
        side: TradeSide,
        quantity: f64,
    ) -> Result<OrderFill, ExchangeError> {
        let mut book = self.book.lock().unwrap();
        let price = *book
            .last_price
            .get(symbol)
            .ok_or_else(|| ExchangeError::Permanent(format!("no market data for {}", symbol)))?;

        match side {
            TradeSide::Buy => {
                let cost = price * quantity;
                if cost > book.cash + 1e-9 {
                    return Err(ExchangeError::Permanent(format!(
                        "insufficient funds: need {:.2}, have {:.2}",
                        cost, book.cash
                    )));
                }
                book.cash -= cost;
                *book.holdings.entry(symbol.to_string()).or_insert(0.0) += quantity;
            }
            TradeSide::Sell => {
                let held = book.holdings.get(symbol).copied().unwrap_or(0.0);
                if quantity > held + 1e-9 {
                    return Err(ExchangeError::Permanent(format!(
                        "insufficient volume: selling {:.8}, hold {:.8}",
                        quantity, held
                    )));
                }
                let remaining = held - quantity;
                if remaining <= 1e-12 {
                    book.holdings.remove(symbol);
                } else {
                    book.holdings.insert(symbol.to_string(), remaining);
                }
                book.cash += price * quantity;
            }
        }

        log::info!(
            "[{}] paper fill: {} {:.8} @ {:.4}",
            symbol,
            side.as_str(),
            quantity,
            price
        );
        Ok(OrderFill { price, quantity })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedMarket {
        close: std::sync::atomic::AtomicU64,
    }

    impl FixedMarket {
        fn new(close: f64) -> Self {
            FixedMarket {
                close: std::sync::atomic::AtomicU64::new(close.to_bits()),
            }
        }

        fn set_close(&self, close: f64) {
            self.close
                .store(close.to_bits(), std::sync::atomic::Ordering::SeqCst);
        }

        fn close(&self) -> f64 {
            f64::from_bits(self.close.load(std::sync::atomic::Ordering::SeqCst))
        }
    }

    #[async_trait]
    impl ExchangeClient for FixedMarket {
        async fn get_candles(
            &self,
            _symbol: &str,
            interval_minutes: u32,
            count: usize,
        ) -> Result<Vec<Candle>, ExchangeError> {
            let close = self.close();
            Ok((0..count)
                .map(|i| Candle {
                    timestamp: i as i64 * interval_minutes as i64 * 60,
                    open: close,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 100.0,
                })
                .collect())
        }

        async fn get_account(&self) -> Result<AccountBalance, ExchangeError> {
            Ok(AccountBalance::default())
        }

        async fn submit_market_order(
            &self,
            _symbol: &str,
            _side: TradeSide,
            _quantity: f64,
        ) -> Result<OrderFill, ExchangeError> {
            Err(ExchangeError::Permanent("market data only".into()))
        }
    }

    #[tokio::test]
    async fn test_paper_round_trip_books_gain() {
        let market = Arc::new(FixedMarket::new(100.0));
        let paper = PaperExchange::new(market.clone(), 1000.0);

        paper.get_candles("XBTUSD", 5, 50).await.unwrap();
        let fill = paper
            .submit_market_order("XBTUSD", TradeSide::Buy, 0.5)
            .await
            .unwrap();
        assert!((fill.price - 100.0).abs() < 1e-9);

        let account = paper.get_account().await.unwrap();
        assert!((account.buying_power - 950.0).abs() < 1e-9);
        assert!((account.equity - 1000.0).abs() < 1e-9);

        market.set_close(110.0);
        paper.get_candles("XBTUSD", 5, 50).await.unwrap();
        paper
            .submit_market_order("XBTUSD", TradeSide::Sell, 0.5)
            .await
            .unwrap();

        let account = paper.get_account().await.unwrap();
        assert!((account.equity - 1005.0).abs() < 1e-9);
        assert!((account.buying_power - 1005.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_paper_rejects_overdraft_as_permanent() {
        let market = Arc::new(FixedMarket::new(100.0));
        let paper = PaperExchange::new(market, 10.0);
        paper.get_candles("XBTUSD", 5, 50).await.unwrap();

        let err = paper
            .submit_market_order("XBTUSD", TradeSide::Buy, 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Permanent(_)));
    }

    #[tokio::test]
    async fn test_paper_rejects_unknown_symbol() {
        let market = Arc::new(FixedMarket::new(100.0));
        let paper = PaperExchange::new(market, 1000.0);
        let err = paper
            .submit_market_order("NOPEUSD", TradeSide::Buy, 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Permanent(_)));
    }
}
