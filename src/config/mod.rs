//! Strategy configuration: a YAML file loaded into a typed tree (spec §6).

use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CapitalAllocation {
    FixedFraction { fraction: f64 },
    FixedAmount { amount: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RiskControlsConfig {
    #[serde(default = "RiskControlsConfig::default_max_open_cycles")]
    pub max_open_cycles: u32,
    #[serde(default = "RiskControlsConfig::default_stop_after_consecutive_losses")]
    pub stop_after_consecutive_losses: u32,
    #[serde(default = "RiskControlsConfig::default_slippage_cooldown_seconds")]
    pub slippage_cooldown_seconds: f64,
    #[serde(default = "default_true")]
    pub enable_latency_checks: bool,
    #[serde(default = "default_true")]
    pub enable_slippage_checks: bool,
}

impl RiskControlsConfig {
    fn default_max_open_cycles() -> u32 {
        3
    }
    fn default_stop_after_consecutive_losses() -> u32 {
        5
    }
    fn default_slippage_cooldown_seconds() -> f64 {
        300.0
    }
}

impl Default for RiskControlsConfig {
    fn default() -> Self {
        Self {
            max_open_cycles: Self::default_max_open_cycles(),
            stop_after_consecutive_losses: Self::default_stop_after_consecutive_losses(),
            slippage_cooldown_seconds: Self::default_slippage_cooldown_seconds(),
            enable_latency_checks: true,
            enable_slippage_checks: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MonitoringConfig {
    #[serde(default = "MonitoringConfig::default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "MonitoringConfig::default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "MonitoringConfig::default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "MonitoringConfig::default_jitter_factor")]
    pub jitter_factor: f64,
    #[serde(default = "MonitoringConfig::default_rapid_check_threshold_ms")]
    pub rapid_check_threshold_ms: u64,
    #[serde(default = "MonitoringConfig::default_rapid_check_interval_ms")]
    pub rapid_check_interval_ms: u64,
    #[serde(default = "MonitoringConfig::default_rate_limit_buffer")]
    pub rate_limit_buffer: f64,
    #[serde(default = "MonitoringConfig::default_min_request_interval_ms")]
    pub min_request_interval_ms: u64,
    #[serde(default = "MonitoringConfig::default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,
}

impl MonitoringConfig {
    fn default_initial_delay_ms() -> u64 {
        250
    }
    fn default_max_delay_ms() -> u64 {
        5_000
    }
    fn default_backoff_multiplier() -> f64 {
        1.6
    }
    fn default_jitter_factor() -> f64 {
        0.2
    }
    fn default_rapid_check_threshold_ms() -> u64 {
        2_000
    }
    fn default_rapid_check_interval_ms() -> u64 {
        100
    }
    fn default_rate_limit_buffer() -> f64 {
        0.8
    }
    fn default_min_request_interval_ms() -> u64 {
        50
    }
    fn default_cache_ttl_ms() -> u64 {
        200
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: Self::default_initial_delay_ms(),
            max_delay_ms: Self::default_max_delay_ms(),
            backoff_multiplier: Self::default_backoff_multiplier(),
            jitter_factor: Self::default_jitter_factor(),
            rapid_check_threshold_ms: Self::default_rapid_check_threshold_ms(),
            rapid_check_interval_ms: Self::default_rapid_check_interval_ms(),
            rate_limit_buffer: Self::default_rate_limit_buffer(),
            min_request_interval_ms: Self::default_min_request_interval_ms(),
            cache_ttl_ms: Self::default_cache_ttl_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    Market,
    Limit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OrderConfig {
    #[serde(rename = "type", default = "OrderConfig::default_type")]
    pub order_type: OrderKind,
    #[serde(default = "default_true")]
    pub allow_partial_fills: bool,
    #[serde(default = "OrderConfig::default_min_partial_fill_percentage")]
    pub min_partial_fill_percentage: f64,
    #[serde(default = "OrderConfig::default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "OrderConfig::default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

impl OrderConfig {
    fn default_type() -> OrderKind {
        OrderKind::Market
    }
    fn default_min_partial_fill_percentage() -> f64 {
        0.5
    }
    fn default_max_retries() -> u32 {
        3
    }
    fn default_retry_delay_ms() -> u64 {
        200
    }
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self {
            order_type: Self::default_type(),
            allow_partial_fills: true,
            min_partial_fill_percentage: Self::default_min_partial_fill_percentage(),
            max_retries: Self::default_max_retries(),
            retry_delay_ms: Self::default_retry_delay_ms(),
            monitoring: MonitoringConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PanicSellConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "PanicSellConfig::default_base_currencies")]
    pub base_currencies: Vec<String>,
    #[serde(default = "PanicSellConfig::default_preferred_intermediaries")]
    pub preferred_intermediaries: Vec<String>,
    #[serde(default = "PanicSellConfig::default_max_total_slippage_bps")]
    pub max_total_slippage_bps: f64,
    #[serde(default = "PanicSellConfig::default_max_single_hop_slippage_bps")]
    pub max_single_hop_slippage_bps: f64,
    #[serde(default = "PanicSellConfig::default_max_hops")]
    pub max_hops: u32,
    #[serde(default = "PanicSellConfig::default_min_liquidity_usd")]
    pub min_liquidity_usd: f64,
    #[serde(default = "PanicSellConfig::default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "PanicSellConfig::default_partial_fill_threshold")]
    pub partial_fill_threshold: f64,
}

impl PanicSellConfig {
    fn default_base_currencies() -> Vec<String> {
        vec!["USDT".to_string(), "USDC".to_string(), "USD".to_string()]
    }
    fn default_preferred_intermediaries() -> Vec<String> {
        vec!["BTC".to_string(), "ETH".to_string()]
    }
    fn default_max_total_slippage_bps() -> f64 {
        150.0
    }
    fn default_max_single_hop_slippage_bps() -> f64 {
        80.0
    }
    fn default_max_hops() -> u32 {
        3
    }
    fn default_min_liquidity_usd() -> f64 {
        10_000.0
    }
    fn default_retry_attempts() -> u32 {
        3
    }
    fn default_partial_fill_threshold() -> f64 {
        0.8
    }
}

impl Default for PanicSellConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_currencies: Self::default_base_currencies(),
            preferred_intermediaries: vec!["BTC".to_string(), "ETH".to_string()],
            max_total_slippage_bps: Self::default_max_total_slippage_bps(),
            max_single_hop_slippage_bps: Self::default_max_single_hop_slippage_bps(),
            max_hops: Self::default_max_hops(),
            min_liquidity_usd: Self::default_min_liquidity_usd(),
            retry_attempts: Self::default_retry_attempts(),
            partial_fill_threshold: Self::default_partial_fill_threshold(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StrategyConfig {
    pub name: String,
    pub exchange: String,
    #[serde(default = "StrategyConfig::default_min_profit_bps")]
    pub min_profit_bps: i64,
    #[serde(default = "StrategyConfig::default_max_slippage_bps")]
    pub max_slippage_bps: i64,
    pub max_leg_latency_ms: Option<i64>,
    pub capital_allocation: CapitalAllocation,
    #[serde(default)]
    pub risk_controls: RiskControlsConfig,
    #[serde(default)]
    pub order: OrderConfig,
    #[serde(default)]
    pub panic_sell: PanicSellConfig,
    pub trading_pairs_file: String,
}

impl StrategyConfig {
    fn default_min_profit_bps() -> i64 {
        10
    }
    fn default_max_slippage_bps() -> i64 {
        50
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&raw)?)
    }
}

/// Reads `trading_pairs_file`: each row at least three currency codes,
/// comma-separated, forming one candidate cycle.
pub fn load_trading_pairs(path: &Path) -> Result<Vec<[String; 3]>, ConfigError> {
    let mut reader = csv::ReaderBuilder::new().has_headers(false).from_path(path)?;
    let mut pairs = Vec::new();
    for result in reader.records() {
        let record = result?;
        if record.len() < 3 {
            continue;
        }
        pairs.push([record[0].trim().to_string(), record[1].trim().to_string(), record[2].trim().to_string()]);
    }
    Ok(pairs)
}

impl From<csv::Error> for ConfigError {
    fn from(err: csv::Error) -> Self {
        ConfigError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
name: tri-btc
exchange: binance
min_profit_bps: 15
capital_allocation:
  mode: fixed_fraction
  fraction: 0.1
trading_pairs_file: pairs.csv
"#;

    #[test]
    fn parses_minimal_config_with_defaults_filled_in() {
        let config: StrategyConfig = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(config.name, "tri-btc");
        assert_eq!(config.min_profit_bps, 15);
        assert_eq!(config.max_slippage_bps, 50);
        assert_eq!(config.risk_controls.max_open_cycles, 3);
        assert_eq!(config.order.monitoring.backoff_multiplier, 1.6);
        assert!(config.panic_sell.enabled);
        match config.capital_allocation {
            CapitalAllocation::FixedFraction { fraction } => assert_eq!(fraction, 0.1),
            _ => panic!("wrong allocation mode"),
        }
    }

    #[test]
    fn rejects_malformed_yaml() {
        let err = serde_yaml::from_str::<StrategyConfig>("name: [unterminated");
        assert!(err.is_err());
    }
}
