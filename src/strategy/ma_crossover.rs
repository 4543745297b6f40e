//! Moving Average Crossover Strategy
//!
//! Buy on golden cross (fast MA crosses above slow MA), sell on death cross.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::indicators::{ema, sma};
use super::table::{BarTable, TableView};
use super::Strategy;
use crate::error::StrategyError;
use crate::types::{Bar, Signal};

pub const NAME: &str = "ma_crossover";

const FAST: &str = "ma_fast";
const SLOW: &str = "ma_slow";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaType {
    #[default]
    Sma,
    Ema,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaCrossoverParams {
    #[serde(default = "default_fast_period")]
    pub fast_period: usize,
    #[serde(default = "default_slow_period")]
    pub slow_period: usize,
    #[serde(default)]
    pub ma_type: MaType,
}

fn default_fast_period() -> usize {
    9
}

fn default_slow_period() -> usize {
    21
}

impl Default for MaCrossoverParams {
    fn default() -> Self {
        Self {
            fast_period: default_fast_period(),
            slow_period: default_slow_period(),
            ma_type: MaType::default(),
        }
    }
}

pub struct MaCrossover {
    params: MaCrossoverParams,
}

impl MaCrossover {
    pub fn new(params: MaCrossoverParams) -> Result<Self, StrategyError> {
        if params.fast_period < 1 || params.fast_period >= params.slow_period {
            return Err(StrategyError::InvalidParams {
                strategy: NAME.to_string(),
                reason: format!(
                    "need 1 <= fast_period < slow_period, got {} / {}",
                    params.fast_period, params.slow_period
                ),
            });
        }
        Ok(Self { params })
    }

    /// Build from a JSON params object; missing keys take defaults
    pub fn from_params(params: &serde_json::Value) -> Result<Self, StrategyError> {
        let parsed = if params.is_null() {
            MaCrossoverParams::default()
        } else {
            serde_json::from_value(params.clone()).map_err(|e| StrategyError::InvalidParams {
                strategy: NAME.to_string(),
                reason: e.to_string(),
            })?
        };
        Self::new(parsed)
    }
}

impl Strategy for MaCrossover {
    fn name(&self) -> &str {
        NAME
    }

    fn required_history(&self) -> usize {
        self.params.fast_period.max(self.params.slow_period) + 1
    }

    fn calculate_indicators(&self, bars: &[Bar]) -> BarTable {
        let mut table = BarTable::new(bars.to_vec());
        let closes = table.closes();
        let average: fn(&[Decimal], usize) -> Vec<Option<Decimal>> = match self.params.ma_type {
            MaType::Sma => sma,
            MaType::Ema => ema,
        };
        table.insert_column(FAST, average(&closes, self.params.fast_period));
        table.insert_column(SLOW, average(&closes, self.params.slow_period));
        table
    }

    fn analyze(&self, view: TableView<'_>, index: usize) -> Signal {
        if index < 1 {
            return Signal::hold();
        }

        let (prev_fast, prev_slow, curr_fast, curr_slow) = match (
            view.value(FAST, index - 1),
            view.value(SLOW, index - 1),
            view.value(FAST, index),
            view.value(SLOW, index),
        ) {
            (Some(pf), Some(ps), Some(cf), Some(cs)) => (pf, ps, cf, cs),
            _ => return Signal::hold(),
        };
        if curr_slow.is_zero() {
            return Signal::hold();
        }

        let strength = |gap: Decimal| {
            let magnitude = (gap / curr_slow).abs() * Decimal::ONE_HUNDRED;
            magnitude.min(Decimal::ONE).to_f64().unwrap_or(0.0)
        };

        if prev_fast <= prev_slow && curr_fast > curr_slow {
            return Signal::buy(strength(curr_fast - curr_slow))
                .with_metadata("crossover_type", json!("golden_cross"))
                .with_metadata("ma_fast", json!(curr_fast))
                .with_metadata("ma_slow", json!(curr_slow));
        }

        if prev_fast >= prev_slow && curr_fast < curr_slow {
            return Signal::sell(strength(curr_slow - curr_fast))
                .with_metadata("crossover_type", json!("death_cross"))
                .with_metadata("ma_fast", json!(curr_fast))
                .with_metadata("ma_slow", json!(curr_slow));
        }

        Signal::hold()
    }

    fn params(&self) -> serde_json::Value {
        serde_json::to_value(&self.params).unwrap_or_default()
    }
}
