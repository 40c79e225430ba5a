//! Backtest configuration.
//!
//! A `serde`-derived struct with every default from the external
//! interfaces, loadable from JSON with the same
//! `serde_json`+`anyhow::Context` idiom the original strategy
//! configuration loader used. Unlike that loader, this one has no
//! CLI/environment-variable overlay: the core has no credentials or
//! exchange surface of its own to source from the environment.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlippageModel {
    /// Consume the depth ladder level-by-level (`OrderBook::simulate_market`).
    Depth,
    /// Fill the whole amount at a fixed offset from top-of-book.
    Fixed,
}

impl Default for SlippageModel {
    fn default() -> Self {
        SlippageModel::Depth
    }
}

fn default_initial_capital() -> f64 {
    10_000.0
}
fn default_leverage() -> f64 {
    10.0
}
fn default_max_leverage() -> f64 {
    125.0
}
fn default_maker_fee() -> f64 {
    0.0002
}
fn default_taker_fee() -> f64 {
    0.0005
}
fn default_maintenance_margin_rate() -> f64 {
    0.004
}
fn default_liquidation_fee_rate() -> f64 {
    0.006
}
fn default_fixed_slippage() -> f64 {
    0.0001
}
fn default_funding_interval_ms() -> i64 {
    8 * 60 * 60 * 1000
}
fn default_event_batch_size() -> usize {
    10_000
}
fn default_pre_allocate_orders() -> usize {
    100_000
}
fn default_equity_sampling_interval_ms() -> i64 {
    60 * 60 * 1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_initial_capital")]
    pub initial_capital: f64,
    #[serde(default = "default_leverage")]
    pub leverage: f64,
    #[serde(default = "default_max_leverage")]
    pub max_leverage: f64,
    #[serde(default = "default_maker_fee")]
    pub maker_fee: f64,
    #[serde(default = "default_taker_fee")]
    pub taker_fee: f64,
    #[serde(default = "default_maintenance_margin_rate")]
    pub maintenance_margin_rate: f64,
    #[serde(default = "default_liquidation_fee_rate")]
    pub liquidation_fee_rate: f64,
    #[serde(default)]
    pub slippage_model: SlippageModel,
    #[serde(default = "default_fixed_slippage")]
    pub fixed_slippage: f64,
    #[serde(default = "default_funding_interval_ms")]
    pub funding_interval_ms: i64,
    #[serde(default = "default_event_batch_size")]
    pub event_batch_size: usize,
    #[serde(default = "default_pre_allocate_orders")]
    pub pre_allocate_orders: usize,
    #[serde(default = "default_equity_sampling_interval_ms")]
    pub equity_sampling_interval_ms: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            initial_capital: default_initial_capital(),
            leverage: default_leverage(),
            max_leverage: default_max_leverage(),
            maker_fee: default_maker_fee(),
            taker_fee: default_taker_fee(),
            maintenance_margin_rate: default_maintenance_margin_rate(),
            liquidation_fee_rate: default_liquidation_fee_rate(),
            slippage_model: SlippageModel::default(),
            fixed_slippage: default_fixed_slippage(),
            funding_interval_ms: default_funding_interval_ms(),
            event_batch_size: default_event_batch_size(),
            pre_allocate_orders: default_pre_allocate_orders(),
            equity_sampling_interval_ms: default_equity_sampling_interval_ms(),
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Config = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_external_interface() {
        let config = Config::default();
        assert_eq!(config.initial_capital, 10_000.0);
        assert_eq!(config.leverage, 10.0);
        assert_eq!(config.max_leverage, 125.0);
        assert_eq!(config.maker_fee, 0.0002);
        assert_eq!(config.taker_fee, 0.0005);
        assert_eq!(config.maintenance_margin_rate, 0.004);
        assert_eq!(config.liquidation_fee_rate, 0.006);
        assert_eq!(config.slippage_model, SlippageModel::Depth);
        assert_eq!(config.funding_interval_ms, 8 * 60 * 60 * 1000);
        assert_eq!(config.equity_sampling_interval_ms, 60 * 60 * 1000);
    }

    #[test]
    fn partial_json_fills_in_remaining_defaults() {
        let config: Config = serde_json::from_str(r#"{"initial_capital": 5000.0}"#).unwrap();
        assert_eq!(config.initial_capital, 5_000.0);
        assert_eq!(config.leverage, 10.0);
    }
}
