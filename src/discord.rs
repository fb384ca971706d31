use crate::config::DiscordConfig;
use crate::types::{ContributionReason, PortfolioStats};

const COLOR_GREEN: u32 = 3_066_993;
const COLOR_RED: u32 = 15_158_332;
const COLOR_BLUE: u32 = 3_447_003;
const COLOR_ORANGE: u32 = 15_105_570;

/// Fire-and-forget Discord webhooks, split by audience the way the original
/// deployment ran them: trades, errors, and the daily summary each get their
/// own channel. An empty URL disables that channel cleanly.
#[derive(Clone)]
pub struct DiscordNotifier {
    client: reqwest::Client,
    trading_url: String,
    errors_url: String,
    summary_url: String,
}

impl DiscordNotifier {
    pub fn new(config: &DiscordConfig) -> Self {
        DiscordNotifier {
            client: reqwest::Client::new(),
            trading_url: config.webhook_trading.clone(),
            errors_url: config.webhook_errors.clone(),
            summary_url: config.webhook_daily_summary.clone(),
        }
    }

    async fn send(&self, url: &str, embed: serde_json::Value) {
        if url.is_empty() {
            return;
        }
        let body = serde_json::json!({ "embeds": [embed] });
        match self.client.post(url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {
                log::debug!("Discord webhook delivered");
            }
            Ok(resp) => {
                log::warn!("Discord webhook error status: {}", resp.status());
            }
            Err(e) => {
                log::warn!("Discord webhook send failed: {}", e);
            }
        }
    }

    // ── Convenience helpers ──────────────────────────────────────────────────

    pub async fn notify_startup(&self, equity: f64, symbols: &[String]) {
        let embed = serde_json::json!({
            "title": "🤖 Trading Bot Started",
            "color": COLOR_BLUE,
            "fields": [
                { "name": "Equity", "value": format!("${:.2}", equity), "inline": true },
                { "name": "Symbols", "value": symbols.join(", "), "inline": false },
            ],
        });
        self.send(&self.trading_url, embed).await;
    }

    pub async fn notify_trade_open(
        &self,
        symbol: &str,
        quantity: f64,
        price: f64,
        strength: u32,
        confirmations: &[ContributionReason],
    ) {
        let reasons = if confirmations.is_empty() {
            "None".to_string()
        } else {
            confirmations
                .iter()
                .take(3)
                .map(|c| c.label())
                .collect::<Vec<_>>()
                .join(", ")
        };
        let embed = serde_json::json!({
            "title": format!("🟢 BUY {}", symbol),
            "color": COLOR_GREEN,
            "fields": [
                { "name": "Quantity", "value": format!("{:.8}", quantity), "inline": true },
                { "name": "Price", "value": format!("${:.4}", price), "inline": true },
                { "name": "Strength", "value": format!("{}/100", strength), "inline": true },
                { "name": "Confirmations", "value": reasons, "inline": false },
            ],
        });
        self.send(&self.trading_url, embed).await;
    }

    pub async fn notify_position_closed(
        &self,
        symbol: &str,
        quantity: f64,
        entry_price: f64,
        exit_price: f64,
        realized_pnl: f64,
    ) {
        let pnl_percent = if entry_price > 0.0 {
            (exit_price - entry_price) / entry_price * 100.0
        } else {
            0.0
        };
        let color = if realized_pnl > 0.0 { COLOR_GREEN } else { COLOR_RED };
        let flag = if realized_pnl > 0.0 { "✅ WIN" } else { "❌ LOSS" };
        let embed = serde_json::json!({
            "title": format!("{} — {} closed", flag, symbol),
            "color": color,
            "fields": [
                { "name": "Quantity", "value": format!("{:.8}", quantity), "inline": true },
                { "name": "Entry", "value": format!("${:.4}", entry_price), "inline": true },
                { "name": "Exit", "value": format!("${:.4}", exit_price), "inline": true },
                { "name": "P/L", "value": format!("${:+.2} ({:+.2}%)", realized_pnl, pnl_percent), "inline": true },
            ],
        });
        self.send(&self.trading_url, embed).await;
    }

    pub async fn notify_error(&self, kind: &str, message: &str, symbol: Option<&str>) {
        let title = match symbol {
            Some(sym) => format!("⚠️ {} — {}", kind, sym),
            None => format!("⚠️ {}", kind),
        };
        let embed = serde_json::json!({
            "title": title,
            "description": message,
            "color": COLOR_ORANGE,
        });
        self.send(&self.errors_url, embed).await;
    }

    pub async fn notify_daily_summary(&self, stats: &PortfolioStats, daily_pl: f64) {
        let color = if daily_pl >= 0.0 { COLOR_GREEN } else { COLOR_RED };
        let embed = serde_json::json!({
            "title": "📊 Daily Summary",
            "color": color,
            "fields": [
                { "name": "Equity", "value": format!("${:.2}", stats.equity), "inline": true },
                { "name": "Daily P/L", "value": format!("${:+.2}", daily_pl), "inline": true },
                { "name": "Trades", "value": format!("{}", stats.daily_trades), "inline": true },
                { "name": "W/L", "value": format!("{}/{}", stats.daily_wins, stats.daily_losses), "inline": true },
                { "name": "Win Rate", "value": format!("{:.1}%", stats.daily_win_rate()), "inline": true },
                { "name": "Lifetime P/L", "value": format!("${:+.2}", stats.total_realized_pnl), "inline": true },
            ],
        });
        self.send(&self.summary_url, embed).await;
    }

    pub async fn notify_shutdown(&self, stats: &PortfolioStats) {
        let embed = serde_json::json!({
            "title": "🛑 Trading Bot Stopped",
            "color": COLOR_RED,
            "fields": [
                { "name": "Equity", "value": format!("${:.2}", stats.equity), "inline": true },
                { "name": "Lifetime Trades", "value": format!("{}", stats.lifetime_trades), "inline": true },
                { "name": "Win Rate", "value": format!("{:.1}%", stats.lifetime_win_rate()), "inline": true },
            ],
        });
        self.send(&self.trading_url, embed).await;
    }
}
