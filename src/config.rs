//! Engine Configuration
//!
//! Layered with the `config` crate: an optional file (explicit path, else
//! `$TRADELOOP_CONFIG`, else `~/.tradeloop/config.yaml`), then environment
//! variables such as `TRADELOOP__LIVE__SYMBOL=ETH/USDT`.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backtest::BacktestConfig;
use crate::error::KernelError;
use crate::kernel::{clamp_fraction, CostModel};
use crate::types::{ExecutionMode, Timeframe};

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub live: LiveConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            engine: EngineConfig::default(),
            live: LiveConfig::default(),
            strategy: StrategyConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load file + environment layers. A missing file is not an error.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = Self::resolve_path(path) {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("TRADELOOP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        if let Ok(path) = std::env::var("TRADELOOP_CONFIG") {
            return Some(PathBuf::from(path));
        }
        dirs::home_dir().map(|home| home.join(".tradeloop").join("config.yaml"))
    }

    /// Tracing level from `log_level`, INFO if unrecognized
    pub fn tracing_level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Kernel parameters, as human-friendly numbers
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct EngineConfig {
    #[serde(default = "default_initial_capital")]
    pub initial_capital: f64,
    /// Percent, e.g. 0.1 for 0.1%
    #[serde(default = "default_fee_percent")]
    pub fee_percent: f64,
    /// Percent, e.g. 0.05 for 0.05%
    #[serde(default = "default_slippage_percent")]
    pub slippage_percent: f64,
    /// Fraction of available capital per entry
    #[serde(default = "default_position_size")]
    pub position_size: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_capital: default_initial_capital(),
            fee_percent: default_fee_percent(),
            slippage_percent: default_slippage_percent(),
            position_size: default_position_size(),
        }
    }
}

fn default_initial_capital() -> f64 { 10_000.0 }
fn default_fee_percent() -> f64 { 0.1 }
fn default_slippage_percent() -> f64 { 0.05 }
fn default_position_size() -> f64 { 1.0 }

impl EngineConfig {
    pub fn cost_model(&self) -> Result<CostModel, KernelError> {
        CostModel::from_percent(self.fee_percent, self.slippage_percent)
    }

    pub fn initial_capital(&self) -> Result<Decimal, KernelError> {
        to_decimal("initial_capital", self.initial_capital)
    }

    /// Position size clamped to [0.01, 1.0]
    pub fn position_size(&self) -> Result<Decimal, KernelError> {
        to_decimal("position_size", self.position_size).map(clamp_fraction)
    }

    /// Runner parameters for a batch or validation run
    pub fn backtest_config(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<BacktestConfig, KernelError> {
        Ok(BacktestConfig::new(symbol, self.initial_capital()?, self.cost_model()?)
            .with_timeframe(timeframe)
            .with_position_size(self.position_size()?))
    }
}

pub(crate) fn to_decimal(field: &str, value: f64) -> Result<Decimal, KernelError> {
    Decimal::from_f64(value)
        .ok_or_else(|| KernelError::InvalidConfig(format!("{} not representable: {}", field, value)))
}

/// Live loop parameters
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LiveConfig {
    #[serde(default = "default_exchange_url")]
    pub exchange_url: String,
    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(default)]
    pub timeframe: Timeframe,
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Seconds between iterations, at least 1
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Bars fetched per iteration
    #[serde(default = "default_window")]
    pub window: usize,
    /// Upper bound on each exchange call
    #[serde(default = "default_io_timeout_secs")]
    pub io_timeout_secs: u64,
    /// Paper starting balance; defaults to the engine's initial capital
    #[serde(default)]
    pub paper_balance: Option<f64>,
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            exchange_url: default_exchange_url(),
            symbol: default_symbol(),
            timeframe: Timeframe::default(),
            mode: ExecutionMode::default(),
            interval_secs: default_interval_secs(),
            window: default_window(),
            io_timeout_secs: default_io_timeout_secs(),
            paper_balance: None,
            state_dir: None,
            webhook_url: None,
        }
    }
}

fn default_exchange_url() -> String { "http://localhost:8080".to_string() }
fn default_symbol() -> String { "BTC/USDT".to_string() }
fn default_interval_secs() -> u64 { 60 }

/// Floor for the live polling interval
pub const MIN_INTERVAL_SECS: u64 = 1;
fn default_window() -> usize { 100 }
fn default_io_timeout_secs() -> u64 { 10 }

impl LiveConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(MIN_INTERVAL_SECS))
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }
}

/// Which strategy to run and its parameters
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StrategyConfig {
    #[serde(default = "default_strategy_name")]
    pub name: String,
    /// Forwarded verbatim to the strategy factory
    #[serde(default)]
    pub params: serde_json::Value,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            name: default_strategy_name(),
            params: serde_json::Value::Null,
        }
    }
}

fn default_strategy_name() -> String { "ma_crossover".to_string() }
