use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};

use crate::exchange::{AccountBalance, ExchangeClient, ExchangeError, OrderFill};
use crate::types::{Candle, TradeSide};

const KRAKEN_REST_URL: &str = "https://api.kraken.com";

type HmacSha512 = Hmac<Sha512>;

/// Map a Kraken error string onto the retry taxonomy.
///
/// Kraken prefixes errors with a severity/category code, e.g.
/// "EAPI:Rate limit exceeded", "EService:Unavailable", "EOrder:Insufficient funds".
fn classify_error(error: &str) -> ExchangeError {
    if error.contains("Rate limit") {
        ExchangeError::RateLimited { retry_after_secs: 10 }
    } else if error.starts_with("EService")
        || error.contains("Temporary")
        || error.contains("Internal error")
        || error.contains("Timeout")
    {
        ExchangeError::Transient(error.to_string())
    } else {
        ExchangeError::Permanent(error.to_string())
    }
}

fn classify_http_status(status: u16) -> Option<ExchangeError> {
    match status {
        429 => Some(ExchangeError::RateLimited { retry_after_secs: 10 }),
        500..=599 => Some(ExchangeError::Transient(format!("HTTP {}", status))),
        _ => None,
    }
}

/// Kraken REST client. Raw calls only; retry policy belongs to the order
/// executor, and the analysis cycle deliberately never retries.
#[derive(Clone)]
pub struct KrakenClient {
    client: reqwest::Client,
    base_url: String,
    credentials: Option<(String, String)>,
    /// Configured pairs, used to value non-USD balances into equity.
    valuation_pairs: Vec<String>,
}

impl KrakenClient {
    pub fn new(api_key: String, api_secret: String, valuation_pairs: Vec<String>) -> Self {
        KrakenClient {
            client: build_http_client(),
            base_url: KRAKEN_REST_URL.to_string(),
            credentials: Some((api_key, api_secret)),
            valuation_pairs,
        }
    }

    /// Public-endpoint-only client, used as the market-data source in paper
    /// trading mode.
    pub fn public() -> Self {
        KrakenClient {
            client: build_http_client(),
            base_url: KRAKEN_REST_URL.to_string(),
            credentials: None,
            valuation_pairs: Vec::new(),
        }
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    // ── Raw requests ─────────────────────────────────────────────────────────

    async fn public_get(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<serde_json::Value, ExchangeError> {
        let url = format!("{}/0/public/{}", self.base_url, endpoint);
        let resp = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|e| ExchangeError::Transient(format!("HTTP error: {}", e)))?;

        extract_result(resp).await
    }

    async fn private_post(
        &self,
        endpoint: &str,
        params: Vec<(&str, String)>,
    ) -> Result<serde_json::Value, ExchangeError> {
        let (api_key, api_secret) = self
            .credentials
            .as_ref()
            .ok_or_else(|| ExchangeError::Permanent("no API credentials configured".into()))?;

        let urlpath = format!("/0/private/{}", endpoint);
        let nonce = Self::timestamp_ms().to_string();

        let mut form: Vec<(&str, String)> = vec![("nonce", nonce.clone())];
        form.extend(params);
        let postdata = form_encode(&form);
        let signature = sign_request(&urlpath, &nonce, &postdata, api_secret)?;

        let url = format!("{}{}", self.base_url, urlpath);
        let resp = self
            .client
            .post(&url)
            .header("API-Key", api_key)
            .header("API-Sign", signature)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(postdata)
            .send()
            .await
            .map_err(|e| ExchangeError::Transient(format!("HTTP error: {}", e)))?;

        extract_result(resp).await
    }

    /// Last trade price for a pair.
    pub async fn get_ticker(&self, pair: &str) -> Result<f64, ExchangeError> {
        let result = self
            .public_get("Ticker", &[("pair", pair.to_string())])
            .await?;
        let entry = first_pair_entry(&result)
            .ok_or_else(|| ExchangeError::Transient("Ticker: empty result".into()))?;
        entry["c"][0]
            .as_str()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| ExchangeError::Transient("Ticker: missing last trade price".into()))
    }
}

fn build_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(10)
        .timeout(Duration::from_secs(10))
        .connect_timeout(Duration::from_secs(5))
        .build()
        .expect("HTTP client build failed")
}

/// Pull `result` out of a Kraken response envelope, classifying any error.
async fn extract_result(resp: reqwest::Response) -> Result<serde_json::Value, ExchangeError> {
    let http_status = resp.status().as_u16();
    let json: serde_json::Value = resp
        .json()
        .await
        .map_err(|e| ExchangeError::Transient(format!("Parse error: {}", e)))?;

    if let Some(error) = json["error"].as_array().and_then(|a| a.first()) {
        let msg = error.as_str().unwrap_or("unknown");
        return Err(classify_error(msg));
    }
    if let Some(err) = classify_http_status(http_status) {
        return Err(err);
    }
    Ok(json["result"].clone())
}

/// Kraken keys results by pair-specific aliases; take the first entry that is
/// not the pagination cursor.
fn first_pair_entry(result: &serde_json::Value) -> Option<&serde_json::Value> {
    result
        .as_object()?
        .iter()
        .find(|(k, _)| *k != "last")
        .map(|(_, v)| v)
}

fn form_encode(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// API-Sign: HMAC-SHA512 of (urlpath + SHA256(nonce + postdata)) keyed with
/// the base64-decoded secret, base64-encoded.
fn sign_request(
    urlpath: &str,
    nonce: &str,
    postdata: &str,
    api_secret: &str,
) -> Result<String, ExchangeError> {
    let mut sha = Sha256::new();
    sha.update(nonce.as_bytes());
    sha.update(postdata.as_bytes());
    let digest = sha.finalize();

    let mut message = Vec::with_capacity(urlpath.len() + digest.len());
    message.extend_from_slice(urlpath.as_bytes());
    message.extend_from_slice(&digest);

    let key = B64
        .decode(api_secret)
        .map_err(|_| ExchangeError::Permanent("API secret is not valid base64".into()))?;
    let mut mac = HmacSha512::new_from_slice(&key)
        .map_err(|_| ExchangeError::Permanent("HMAC init failed".into()))?;
    mac.update(&message);
    Ok(B64.encode(mac.finalize().into_bytes()))
}

/// Parse an OHLC `result` into chronological candles, keeping the last
/// `count`. Rows with a repeated timestamp are dropped.
fn parse_ohlc_result(
    result: &serde_json::Value,
    count: usize,
) -> Result<Vec<Candle>, ExchangeError> {
    let rows = first_pair_entry(result)
        .and_then(|v| v.as_array())
        .ok_or_else(|| ExchangeError::Transient("OHLC: missing pair data".into()))?;

    let mut candles: Vec<Candle> = Vec::with_capacity(rows.len());
    for row in rows {
        let arr = match row.as_array() {
            Some(a) if a.len() >= 7 => a,
            _ => continue,
        };
        let parse = |v: &serde_json::Value| v.as_str().and_then(|s| s.parse::<f64>().ok());
        let candle = match (
            arr[0].as_i64(),
            parse(&arr[1]),
            parse(&arr[2]),
            parse(&arr[3]),
            parse(&arr[4]),
            parse(&arr[6]),
        ) {
            (Some(timestamp), Some(open), Some(high), Some(low), Some(close), Some(volume)) => {
                Candle { timestamp, open, high, low, close, volume }
            }
            _ => continue,
        };
        if candles.last().map(|c| c.timestamp) == Some(candle.timestamp) {
            continue;
        }
        candles.push(candle);
    }

    if candles.len() > count {
        candles.drain(..candles.len() - count);
    }
    Ok(candles)
}

#[async_trait]
impl ExchangeClient for KrakenClient {
    async fn get_candles(
        &self,
        symbol: &str,
        interval_minutes: u32,
        count: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let result = self
            .public_get(
                "OHLC",
                &[
                    ("pair", symbol.to_string()),
                    ("interval", interval_minutes.to_string()),
                ],
            )
            .await?;
        parse_ohlc_result(&result, count)
    }

    async fn get_account(&self) -> Result<AccountBalance, ExchangeError> {
        let balances = self.private_post("Balance", Vec::new()).await?;
        let balances = balances
            .as_object()
            .ok_or_else(|| ExchangeError::Transient("Balance: malformed result".into()))?;

        let amount_of = |v: &serde_json::Value| {
            v.as_str().and_then(|s| s.parse::<f64>().ok()).unwrap_or(0.0)
        };
        let cash = balances.get("ZUSD").map(amount_of).unwrap_or(0.0);
        let mut equity = cash;

        // Value crypto balances through the configured pairs; anything
        // without a matching pair simply doesn't contribute.
        for (currency, amount) in balances {
            let amount = amount_of(amount);
            if amount <= 0.0 || currency == "ZUSD" || currency == "USD" {
                continue;
            }
            let pair = self.valuation_pairs.iter().find(|p| {
                p.starts_with(currency.as_str())
                    || p.starts_with(&format!("X{}", currency))
                    || p.starts_with(&format!("Z{}", currency))
            });
            if let Some(pair) = pair {
                match self.get_ticker(pair).await {
                    Ok(price) => equity += amount * price,
                    Err(e) => log::warn!("[{}] valuation ticker failed: {}", pair, e),
                }
            }
        }

        Ok(AccountBalance { equity, buying_power: cash })
    }

    async fn submit_market_order(
        &self,
        symbol: &str,
        side: TradeSide,
        quantity: f64,
    ) -> Result<OrderFill, ExchangeError> {
        // Kraken's AddOrder response carries no fill price for market orders.
        // Take the last trade price first: if the ticker fails nothing has
        // been submitted yet and the whole call stays safely retryable.
        let price = self.get_ticker(symbol).await?;

        let order_type = match side {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
        };
        let result = self
            .private_post(
                "AddOrder",
                vec![
                    ("pair", symbol.to_string()),
                    ("type", order_type.to_string()),
                    ("ordertype", "market".to_string()),
                    ("volume", format!("{:.8}", quantity)),
                ],
            )
            .await?;

        let txid = result["txid"][0].as_str().unwrap_or("unknown");
        log::info!(
            "[{}] order placed: {} {:.8} @ ~{:.4} txid={}",
            symbol,
            side.as_str(),
            quantity,
            price,
            txid
        );
        Ok(OrderFill { price, quantity })
    }
}
