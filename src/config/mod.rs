//! Configuration management for the divergence hedger.
//!
//! Loads settings from an optional `config.toml`, then environment variables
//! prefixed with `DVH` (`DVH__EXECUTION__INTERVAL_MS=1000`). The resulting
//! [`Config`] is immutable and handed to each component at construction.

use crate::exchange::public::{COINEX_API_URL, NOBITEX_API_URL};
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Rolling statistics fallback settings
    #[serde(default)]
    pub signal: SignalConfig,
    /// Loop cadence and order lifecycle timings
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// File locations for caches and journals
    #[serde(default)]
    pub storage: StorageConfig,
    /// Public book endpoints
    #[serde(default)]
    pub venues: VenuesConfig,
    /// Paper trading starting state
    #[serde(default)]
    pub paper: PaperConfig,
    /// Per-asset hedging parameters, keyed by coin (e.g. `BTC`)
    #[serde(default)]
    pub assets: HashMap<String, AssetConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    /// Live samples taken when the observation store cannot answer
    #[serde(default = "default_burst_samples")]
    pub burst_samples: usize,
    /// Delay between burst samples in milliseconds
    #[serde(default = "default_burst_delay_ms")]
    pub burst_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Sleep between control loop cycles in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Poll cadence of a resting maker order in milliseconds
    #[serde(default = "default_maker_poll_ms")]
    pub maker_poll_ms: u64,
    /// Maximum lifetime of a resting maker order in seconds
    #[serde(default = "default_maker_timeout_secs")]
    pub maker_timeout_secs: u64,
    /// Wait between taker placement and fill inspection in milliseconds
    #[serde(default = "default_taker_settle_ms")]
    pub taker_settle_ms: u64,
    /// Backoff after a failed cycle in seconds
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database holding divergence observations
    #[serde(default = "default_obs_db_path")]
    pub obs_db_path: String,
    /// JSON position cache shared by hedger and maker instances
    #[serde(default = "default_position_cache_path")]
    pub position_cache_path: String,
    /// SQLite database for executed trades
    #[serde(default = "default_trades_db_path")]
    pub trades_db_path: String,
    /// Buffered trades written per flush
    #[serde(default = "default_trade_flush_batch")]
    pub trade_flush_batch: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenuesConfig {
    /// Spot venue public API base URL (Nobitex format)
    #[serde(default = "default_spot_book_url")]
    pub spot_book_url: String,
    /// Derivatives venue public API base URL (CoinEx futures format)
    #[serde(default = "default_derivatives_book_url")]
    pub derivatives_book_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperConfig {
    /// Coin units held on the spot venue at start
    #[serde(default)]
    pub spot_inventory: Decimal,
    /// Whether the simulated derivatives venue answers position queries
    #[serde(default = "default_true")]
    pub derivatives_position_endpoint: bool,
}

/// Hedging parameters for one coin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetConfig {
    /// Spot market in local fiat (e.g. `BTCIRT`)
    pub spot_market: String,
    /// Derivatives market in the stable unit (e.g. `BTCUSDT`)
    pub derivatives_market: String,
    /// Stable/fiat cross on the spot venue
    #[serde(default = "default_fiat_rate_market")]
    pub fiat_rate_market: String,
    /// Lowest allowed spot holding in coin units
    pub lower_units: Decimal,
    /// Highest allowed spot holding in coin units
    pub upper_units: Decimal,
    /// Half-width of the hedge band around the target position
    pub tolerance_units: Decimal,
    /// Maker order size in coin units
    pub order_quantity: Decimal,
    /// Trailing window for rolling statistics
    pub window_minutes: u32,
    /// Band width in standard deviations
    pub k: f64,
    /// Derivatives quantity decimals
    #[serde(default = "default_qty_precision")]
    pub qty_precision: u32,
    /// Derivatives price decimals
    #[serde(default = "default_price_precision")]
    pub price_precision: u32,
    /// Spot price decimals (fiat prices are integral)
    #[serde(default)]
    pub spot_price_precision: u32,
    /// Hedge deltas at or below this size are ignored
    #[serde(default = "default_min_qty")]
    pub min_qty: Decimal,
    /// Weight of the best bid in a maker buy price (0.0-1.0)
    #[serde(default = "default_weight")]
    pub w_buy: Decimal,
    /// Weight of the best ask in a maker sell price (0.0-1.0)
    #[serde(default = "default_weight")]
    pub w_sell: Decimal,
    /// Derivatives leverage
    #[serde(default = "default_leverage")]
    pub leverage: u8,
}

impl AssetConfig {
    /// Coin code of the spot market (`BTCIRT` -> `BTC`), used for balance queries.
    pub fn base_asset(&self) -> &str {
        self.spot_market
            .strip_suffix("IRT")
            .unwrap_or(&self.spot_market)
    }

    /// Interval after which rolling statistics are recomputed.
    pub fn stats_refresh(&self) -> Duration {
        Duration::from_secs(u64::from(self.window_minutes) * 60)
    }

    fn validate(&self, name: &str) -> Result<()> {
        anyhow::ensure!(
            self.lower_units < self.upper_units,
            "{}: lower_units must be below upper_units",
            name
        );
        anyhow::ensure!(
            self.tolerance_units > Decimal::ZERO,
            "{}: tolerance_units must be positive",
            name
        );
        anyhow::ensure!(
            self.order_quantity > Decimal::ZERO,
            "{}: order_quantity must be positive",
            name
        );
        anyhow::ensure!(self.window_minutes > 0, "{}: window_minutes must be > 0", name);
        anyhow::ensure!(self.k > 0.0, "{}: k must be positive", name);
        anyhow::ensure!(
            (Decimal::ZERO..=Decimal::ONE).contains(&self.w_buy)
                && (Decimal::ZERO..=Decimal::ONE).contains(&self.w_sell),
            "{}: maker weights must be between 0 and 1",
            name
        );
        anyhow::ensure!(self.leverage >= 1, "{}: leverage must be >= 1", name);
        Ok(())
    }
}

// Default value functions
fn default_burst_samples() -> usize {
    10
}

fn default_burst_delay_ms() -> u64 {
    200
}

fn default_interval_ms() -> u64 {
    2000
}

fn default_maker_poll_ms() -> u64 {
    2000
}

fn default_maker_timeout_secs() -> u64 {
    45
}

fn default_taker_settle_ms() -> u64 {
    400 // long enough for an immediate match to show up
}

fn default_error_backoff_secs() -> u64 {
    3
}

fn default_obs_db_path() -> String {
    "data/observations.db".to_string()
}

fn default_position_cache_path() -> String {
    "data/positions.json".to_string()
}

fn default_trades_db_path() -> String {
    "data/trades.db".to_string()
}

fn default_trade_flush_batch() -> usize {
    5
}

fn default_spot_book_url() -> String {
    NOBITEX_API_URL.to_string()
}

fn default_derivatives_book_url() -> String {
    COINEX_API_URL.to_string()
}

fn default_true() -> bool {
    true
}

fn default_fiat_rate_market() -> String {
    "USDTIRT".to_string()
}

fn default_qty_precision() -> u32 {
    6
}

fn default_price_precision() -> u32 {
    2
}

fn default_min_qty() -> Decimal {
    Decimal::new(1, 6) // 0.000001
}

fn default_weight() -> Decimal {
    Decimal::new(5, 1) // 0.5 = mid
}

fn default_leverage() -> u8 {
    1
}

impl Config {
    /// Load configuration from `<path>.toml` (optional) and environment variables.
    pub fn load(path: &str) -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::default().separator("__").prefix("DVH"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Parameters for `asset`. Missing assets are a fatal startup error.
    pub fn asset(&self, asset: &str) -> Result<&AssetConfig> {
        self.assets
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(asset))
            .map(|(_, cfg)| cfg)
            .with_context(|| format!("assets.{} missing from configuration", asset))
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.execution.interval_ms > 0 && self.execution.maker_poll_ms > 0,
            "loop and poll intervals must be > 0"
        );
        anyhow::ensure!(
            self.execution.maker_timeout_secs > 0,
            "maker_timeout_secs must be > 0"
        );
        anyhow::ensure!(
            self.storage.trade_flush_batch > 0,
            "trade_flush_batch must be > 0"
        );

        for (name, asset) in &self.assets {
            asset.validate(name)?;
        }

        Ok(())
    }
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            burst_samples: default_burst_samples(),
            burst_delay_ms: default_burst_delay_ms(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            maker_poll_ms: default_maker_poll_ms(),
            maker_timeout_secs: default_maker_timeout_secs(),
            taker_settle_ms: default_taker_settle_ms(),
            error_backoff_secs: default_error_backoff_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            obs_db_path: default_obs_db_path(),
            position_cache_path: default_position_cache_path(),
            trades_db_path: default_trades_db_path(),
            trade_flush_batch: default_trade_flush_batch(),
        }
    }
}

impl Default for VenuesConfig {
    fn default() -> Self {
        Self {
            spot_book_url: default_spot_book_url(),
            derivatives_book_url: default_derivatives_book_url(),
        }
    }
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            spot_inventory: Decimal::ZERO,
            derivatives_position_endpoint: default_true(),
        }
    }
}

/// BTC parameters used across unit tests.
#[cfg(test)]
pub(crate) fn test_asset() -> AssetConfig {
    use rust_decimal_macros::dec;

    AssetConfig {
        spot_market: "BTCIRT".to_string(),
        derivatives_market: "BTCUSDT".to_string(),
        fiat_rate_market: "USDTIRT".to_string(),
        lower_units: dec!(-10),
        upper_units: dec!(10),
        tolerance_units: dec!(2),
        order_quantity: dec!(1),
        window_minutes: 60,
        k: 2.0,
        qty_precision: 6,
        price_precision: 2,
        spot_price_precision: 0,
        min_qty: default_min_qty(),
        w_buy: dec!(0.5),
        w_sell: dec!(0.5),
        leverage: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.execution.taker_settle_ms, 400);
        assert_eq!(config.storage.trade_flush_batch, 5);
    }

    #[test]
    fn test_asset_section_from_toml() {
        let raw = r#"
            [assets.BTC]
            spot_market = "BTCIRT"
            derivatives_market = "BTCUSDT"
            lower_units = "-0.5"
            upper_units = "0.5"
            tolerance_units = "0.05"
            order_quantity = "0.01"
            window_minutes = 30
            k = 2.5
            w_buy = "0.7"
        "#;

        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        config.validate().unwrap();
        let btc = config.asset("BTC").unwrap();
        assert_eq!(btc.fiat_rate_market, "USDTIRT");
        assert_eq!(btc.w_buy, dec!(0.7));
        assert_eq!(btc.w_sell, dec!(0.5));
        assert_eq!(btc.qty_precision, 6);
        assert_eq!(btc.base_asset(), "BTC");
        assert_eq!(btc.stats_refresh(), Duration::from_secs(1800));
    }

    #[test]
    fn test_missing_asset_is_fatal() {
        let config = Config::default();
        let err = config.asset("ETH").unwrap_err();
        assert!(err.to_string().contains("assets.ETH"));
    }

    #[test]
    fn test_invalid_bounds_rejected() {
        let mut config = Config::default();
        let mut asset = test_asset();
        asset.lower_units = dec!(10);
        config.assets.insert("BTC".to_string(), asset);
        assert!(config.validate().is_err());
    }
}
