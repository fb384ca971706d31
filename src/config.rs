use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "trader_config.json";

// ── Errors ────────────────────────────────────────────────────────────────────

/// Fatal at startup, before any loop runs.
#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "config file error: {}", msg),
            ConfigError::Parse(msg) => write!(f, "invalid JSON in config file: {}", msg),
            ConfigError::Invalid(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

// ── Sections ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub kraken: KrakenConfig,
    pub trading: TradingConfig,
    pub assets: AssetsConfig,
    #[serde(default)]
    pub discord: DiscordConfig,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KrakenConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
}

impl KrakenConfig {
    /// Environment variables win over the config file, same as the original
    /// deployment setup.
    pub fn resolved_key(&self) -> String {
        std::env::var("KRAKEN_API_KEY").unwrap_or_else(|_| self.api_key.clone())
    }

    pub fn resolved_secret(&self) -> String {
        std::env::var("KRAKEN_API_SECRET").unwrap_or_else(|_| self.api_secret.clone())
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradingConfig {
    #[serde(default = "default_cycle_interval_secs")]
    pub cycle_interval_secs: u64,
    #[serde(default = "default_dashboard_interval_secs")]
    pub dashboard_interval_secs: u64,
    #[serde(default = "default_candle_interval_minutes")]
    pub candle_interval_minutes: u32,
    /// Base position size as percent of portfolio equity.
    pub max_position_size_percent: f64,
    pub stop_loss_percent: f64,
    pub take_profit_percent: f64,
    #[serde(default = "default_max_stop_loss_percent")]
    pub max_stop_loss_percent: f64,
    #[serde(default = "default_max_take_profit_percent")]
    pub max_take_profit_percent: f64,
    #[serde(default = "default_min_notional_usd")]
    pub min_notional_usd: f64,
    #[serde(default = "default_max_open_positions")]
    pub max_open_positions: usize,
    #[serde(default = "default_symbol_lock_secs")]
    pub symbol_lock_secs: i64,
    #[serde(default = "default_trade_threshold")]
    pub trade_threshold: u32,
    #[serde(default = "default_rate_limit_ms")]
    pub rate_limit_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Simulated fills against live market data; no orders leave the process.
    #[serde(default)]
    pub paper_trading: bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetsConfig {
    pub crypto: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscordConfig {
    #[serde(default)]
    pub webhook_trading: String,
    #[serde(default)]
    pub webhook_errors: String,
    #[serde(default)]
    pub webhook_daily_summary: String,
    #[serde(default = "default_daily_summary_time")]
    pub daily_summary_time: String,
}

fn default_cycle_interval_secs() -> u64 {
    60
}
fn default_dashboard_interval_secs() -> u64 {
    1
}
fn default_candle_interval_minutes() -> u32 {
    5
}
fn default_max_stop_loss_percent() -> f64 {
    5.0
}
fn default_max_take_profit_percent() -> f64 {
    10.0
}
fn default_min_notional_usd() -> f64 {
    10.0
}
fn default_max_open_positions() -> usize {
    10
}
fn default_symbol_lock_secs() -> i64 {
    60
}
fn default_trade_threshold() -> u32 {
    55
}
fn default_rate_limit_ms() -> u64 {
    1000
}
fn default_max_retries() -> u32 {
    3
}
fn default_daily_summary_time() -> String {
    "10:00".to_string()
}

impl Config {
    pub fn load(path: &str) -> Result<Config, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path, e)))?;
        let config: Config =
            serde_json::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        log::info!("Configuration loaded from {}", path);
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.assets.crypto.is_empty() {
            return Err(ConfigError::Invalid(
                "no crypto assets specified in config".into(),
            ));
        }
        if self.trading.cycle_interval_secs == 0 {
            return Err(ConfigError::Invalid("cycleIntervalSecs must be > 0".into()));
        }
        if self.trading.max_position_size_percent <= 0.0
            || self.trading.max_position_size_percent > 100.0
        {
            return Err(ConfigError::Invalid(
                "maxPositionSizePercent must be in (0, 100]".into(),
            ));
        }
        if self.trading.stop_loss_percent <= 0.0 || self.trading.take_profit_percent <= 0.0 {
            return Err(ConfigError::Invalid(
                "stopLossPercent and takeProfitPercent must be > 0".into(),
            ));
        }
        if self.trading.max_stop_loss_percent < self.trading.stop_loss_percent {
            return Err(ConfigError::Invalid(
                "maxStopLossPercent must be >= stopLossPercent".into(),
            ));
        }
        if self.trading.max_take_profit_percent < self.trading.take_profit_percent {
            return Err(ConfigError::Invalid(
                "maxTakeProfitPercent must be >= takeProfitPercent".into(),
            ));
        }
        if self.trading.trade_threshold > 100 {
            return Err(ConfigError::Invalid(
                "tradeThreshold must be in 0..=100".into(),
            ));
        }
        if self.trading.max_open_positions == 0 {
            return Err(ConfigError::Invalid("maxOpenPositions must be > 0".into()));
        }
        if !self.trading.paper_trading {
            let key = self.kraken.resolved_key();
            let secret = self.kraken.resolved_secret();
            if key.is_empty() || secret.is_empty() {
                return Err(ConfigError::Invalid(
                    "missing apiKey or apiSecret in kraken config".into(),
                ));
            }
            if key == "YOUR_KRAKEN_API_KEY" {
                return Err(ConfigError::Invalid(
                    "API key has not been configured".into(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config_json() -> &'static str {
        r#"{
            "trading": {
                "maxPositionSizePercent": 5.0,
                "stopLossPercent": 2.0,
                "takeProfitPercent": 4.0,
                "paperTrading": true
            },
            "assets": { "crypto": ["XBTUSD", "ETHUSD"] }
        }"#
    }

    #[test]
    fn test_defaults_applied() {
        let cfg: Config = serde_json::from_str(minimal_config_json()).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.trading.cycle_interval_secs, 60);
        assert_eq!(cfg.trading.trade_threshold, 55);
        assert_eq!(cfg.trading.symbol_lock_secs, 60);
        assert_eq!(cfg.trading.max_retries, 3);
        assert_eq!(cfg.trading.rate_limit_ms, 1000);
        assert_eq!(cfg.trading.max_stop_loss_percent, 5.0);
        assert_eq!(cfg.trading.max_take_profit_percent, 10.0);
        assert!(cfg.discord.webhook_trading.is_empty());
    }

    #[test]
    fn test_empty_assets_rejected() {
        let raw = r#"{
            "trading": {
                "maxPositionSizePercent": 5.0,
                "stopLossPercent": 2.0,
                "takeProfitPercent": 4.0,
                "paperTrading": true
            },
            "assets": { "crypto": [] }
        }"#;
        let cfg: Config = serde_json::from_str(raw).unwrap();
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_live_mode_requires_credentials() {
        let raw = r#"{
            "kraken": { "apiKey": "", "apiSecret": "" },
            "trading": {
                "maxPositionSizePercent": 5.0,
                "stopLossPercent": 2.0,
                "takeProfitPercent": 4.0
            },
            "assets": { "crypto": ["XBTUSD"] }
        }"#;
        let cfg: Config = serde_json::from_str(raw).unwrap();
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let raw = r#"{
            "trading": {
                "maxPositionSizePercent": 5.0,
                "stopLossPercent": 2.0,
                "takeProfitPercent": 4.0,
                "tradeThreshold": 101,
                "paperTrading": true
            },
            "assets": { "crypto": ["XBTUSD"] }
        }"#;
        let cfg: Config = serde_json::from_str(raw).unwrap();
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }
}
