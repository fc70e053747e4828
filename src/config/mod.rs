//! Configuration management for PolyOverlay
//!
//! Loads built-in defaults, then `config/default.*` and `config/local.*`,
//! then `POLYOVERLAY__*` environment variables (.env is read first).

use anyhow::{bail, Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::types::{find_symbol, Interval};

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub chart: ChartConfig,
    pub exchange: ExchangeConfig,
    pub polymarket: PolymarketConfig,
    pub schedule: ScheduleConfig,
    pub persistence: PersistenceConfig,
    pub logging: LoggingConfig,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChartConfig {
    /// Symbol shown at startup (pair or base asset)
    pub default_symbol: String,
    /// Candle interval used when no preference is stored
    pub default_interval: Interval,
    /// Candles per bulk load; also the sliding window size
    pub candle_limit: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    pub rest_url: String,
    pub ws_url: String,
    pub request_timeout_ms: u64,
    /// Kline stream gives up after this many consecutive failures
    pub max_reconnect_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolymarketConfig {
    /// Period open/close price endpoint
    pub crypto_price_url: String,
    /// Gamma API endpoint
    pub gamma_url: String,
    /// CLOB API endpoint
    pub clob_url: String,
    /// Polygon chain ID (137)
    pub chain_id: u64,
    /// Signature type (0=EOA, 1=Proxy, 2=Safe)
    pub signature_type: u8,
    pub request_timeout_ms: u64,
    /// Intervals that get a System annotation line
    pub tracked_intervals: Vec<Interval>,
    /// Probability (0-100) shown when no market can be located
    pub default_probability: Decimal,
    /// Wait after an expiry before refetching, lets the upstream window roll over
    pub expiry_refresh_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Driving clock period
    pub tick_ms: u64,
    pub ticker_every_ticks: u32,
    pub aggregation_every_ticks: u32,
    pub probability_every_ticks: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Data directory
    pub data_dir: String,
    /// Record aggregation cycles to CSV
    pub csv_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of the human formatter
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DashboardConfig {
    /// Bind address, only used when built with the `dashboard` feature
    pub bind_addr: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Self::defaults()?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (POLYOVERLAY__*)
            .add_source(Environment::with_prefix("POLYOVERLAY").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;
        Ok(app_config)
    }

    /// Built-in defaults only, no files or environment
    pub fn with_defaults() -> Result<Self> {
        let config = Self::defaults()?
            .build()
            .context("Failed to build default configuration")?;
        config
            .try_deserialize()
            .context("Failed to deserialize default configuration")
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>> {
        let builder = Config::builder()
            // Chart defaults
            .set_default("chart.default_symbol", "BTCUSDT")?
            .set_default("chart.default_interval", "1h")?
            .set_default("chart.candle_limit", 500)?
            // Exchange defaults
            .set_default("exchange.rest_url", "https://api.binance.com")?
            .set_default("exchange.ws_url", "wss://stream.binance.com:9443/ws")?
            .set_default("exchange.request_timeout_ms", 10_000)?
            .set_default("exchange.max_reconnect_attempts", 10)?
            // Polymarket defaults
            .set_default(
                "polymarket.crypto_price_url",
                "https://polymarket.com/api/crypto/crypto-price",
            )?
            .set_default("polymarket.gamma_url", "https://gamma-api.polymarket.com")?
            .set_default("polymarket.clob_url", "https://clob.polymarket.com")?
            .set_default("polymarket.chain_id", 137)?
            .set_default("polymarket.signature_type", 0)?
            .set_default("polymarket.request_timeout_ms", 10_000)?
            .set_default(
                "polymarket.tracked_intervals",
                vec!["5m", "15m", "1h", "4h", "1d"],
            )?
            .set_default("polymarket.default_probability", 50)?
            .set_default("polymarket.expiry_refresh_delay_ms", 1000)?
            // Schedule defaults (1s clock)
            .set_default("schedule.tick_ms", 1000)?
            .set_default("schedule.ticker_every_ticks", 10)?
            .set_default("schedule.aggregation_every_ticks", 30)?
            .set_default("schedule.probability_every_ticks", 5)?
            // Persistence defaults
            .set_default("persistence.data_dir", "./data")?
            .set_default("persistence.csv_enabled", false)?
            // Logging defaults
            .set_default("logging.json", false)?
            // Dashboard defaults
            .set_default("dashboard.bind_addr", "127.0.0.1:3030")?;
        Ok(builder)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if find_symbol(&self.chart.default_symbol).is_none() {
            bail!("Unknown chart.default_symbol '{}'", self.chart.default_symbol);
        }
        if self.chart.candle_limit == 0 {
            bail!("chart.candle_limit must be positive");
        }
        if self.schedule.tick_ms == 0 {
            bail!("schedule.tick_ms must be positive");
        }
        if self.schedule.ticker_every_ticks == 0
            || self.schedule.aggregation_every_ticks == 0
            || self.schedule.probability_every_ticks == 0
        {
            bail!("schedule cadences must be at least one tick");
        }
        if self.polymarket.default_probability < Decimal::ZERO
            || self.polymarket.default_probability > Decimal::ONE_HUNDRED
        {
            bail!(
                "polymarket.default_probability must be within 0..=100, got {}",
                self.polymarket.default_probability
            );
        }
        Ok(())
    }

    /// Generate a digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        format!(
            "symbol={} interval={} tracked={:?} tick_ms={} default_prob={}",
            self.chart.default_symbol,
            self.chart.default_interval,
            self.polymarket
                .tracked_intervals
                .iter()
                .map(|iv| iv.as_str())
                .collect::<Vec<_>>(),
            self.schedule.tick_ms,
            self.polymarket.default_probability
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
