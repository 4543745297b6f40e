//! RSI Mean Reversion Strategy
//!
//! Buy when RSI climbs back above the oversold level, sell when it drops back
//! below the overbought level. Buy signals optionally carry stop-loss and
//! take-profit levels derived from the signal bar's close.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::indicators::rsi;
use super::table::{BarTable, TableView};
use super::Strategy;
use crate::error::StrategyError;
use crate::types::{Bar, Signal};

pub const NAME: &str = "rsi_reversion";

const RSI: &str = "rsi";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RsiReversionParams {
    #[serde(default = "default_period")]
    pub period: usize,
    #[serde(default = "default_oversold")]
    pub oversold: f64,
    #[serde(default = "default_overbought")]
    pub overbought: f64,
    /// Stop loss distance in percent of entry close
    #[serde(default)]
    pub stop_loss_pct: Option<f64>,
    /// Take profit distance in percent of entry close
    #[serde(default)]
    pub take_profit_pct: Option<f64>,
}

fn default_period() -> usize {
    14
}

fn default_oversold() -> f64 {
    30.0
}

fn default_overbought() -> f64 {
    70.0
}

impl Default for RsiReversionParams {
    fn default() -> Self {
        Self {
            period: default_period(),
            oversold: default_oversold(),
            overbought: default_overbought(),
            stop_loss_pct: None,
            take_profit_pct: None,
        }
    }
}

pub struct RsiReversion {
    params: RsiReversionParams,
    oversold: Decimal,
    overbought: Decimal,
    stop_loss: Option<Decimal>,
    take_profit: Option<Decimal>,
}

impl RsiReversion {
    pub fn new(params: RsiReversionParams) -> Result<Self, StrategyError> {
        let invalid = |reason: String| StrategyError::InvalidParams {
            strategy: NAME.to_string(),
            reason,
        };

        if params.period < 2 {
            return Err(invalid(format!("period must be >= 2, got {}", params.period)));
        }
        if !(0.0..100.0).contains(&params.oversold)
            || !(0.0..=100.0).contains(&params.overbought)
            || params.oversold >= params.overbought
        {
            return Err(invalid(format!(
                "need 0 <= oversold < overbought <= 100, got {} / {}",
                params.oversold, params.overbought
            )));
        }

        let to_decimal = |v: f64| {
            Decimal::from_f64(v).ok_or_else(|| invalid(format!("not a number: {}", v)))
        };
        let to_fraction = |pct: Option<f64>| -> Result<Option<Decimal>, StrategyError> {
            match pct {
                Some(p) if p <= 0.0 => Err(invalid(format!("percent must be > 0, got {}", p))),
                Some(p) => Ok(Some(to_decimal(p)? / Decimal::ONE_HUNDRED)),
                None => Ok(None),
            }
        };

        Ok(Self {
            oversold: to_decimal(params.oversold)?,
            overbought: to_decimal(params.overbought)?,
            stop_loss: to_fraction(params.stop_loss_pct)?,
            take_profit: to_fraction(params.take_profit_pct)?,
            params,
        })
    }

    pub fn from_params(params: &serde_json::Value) -> Result<Self, StrategyError> {
        let parsed = if params.is_null() {
            RsiReversionParams::default()
        } else {
            serde_json::from_value(params.clone()).map_err(|e| StrategyError::InvalidParams {
                strategy: NAME.to_string(),
                reason: e.to_string(),
            })?
        };
        Self::new(parsed)
    }
}

impl Strategy for RsiReversion {
    fn name(&self) -> &str {
        NAME
    }

    fn required_history(&self) -> usize {
        self.params.period + 2
    }

    fn calculate_indicators(&self, bars: &[Bar]) -> BarTable {
        let mut table = BarTable::new(bars.to_vec());
        let values = rsi(&table.closes(), self.params.period);
        table.insert_column(RSI, values);
        table
    }

    fn analyze(&self, view: TableView<'_>, index: usize) -> Signal {
        if index < 1 {
            return Signal::hold();
        }
        let (prev, curr) = match (view.value(RSI, index - 1), view.value(RSI, index)) {
            (Some(p), Some(c)) => (p, c),
            _ => return Signal::hold(),
        };
        let ten = Decimal::from(10);
        let twenty = Decimal::from(20);

        if prev <= self.oversold && curr > self.oversold {
            let strength = ((self.oversold - prev + ten) / twenty)
                .min(Decimal::ONE)
                .to_f64()
                .unwrap_or(0.0);
            let mut signal = Signal::buy(strength)
                .with_metadata("rsi", json!(curr))
                .with_metadata("prev_rsi", json!(prev))
                .with_metadata("condition", json!("oversold_exit"));

            if let Some(close) = view.bar(index).map(|b| b.close) {
                if let Some(sl) = self.stop_loss {
                    signal = signal.with_stop_loss(close * (Decimal::ONE - sl));
                }
                if let Some(tp) = self.take_profit {
                    signal = signal.with_take_profit(close * (Decimal::ONE + tp));
                }
            }
            return signal;
        }

        if prev >= self.overbought && curr < self.overbought {
            let strength = ((prev - self.overbought + ten) / twenty)
                .min(Decimal::ONE)
                .to_f64()
                .unwrap_or(0.0);
            return Signal::sell(strength)
                .with_metadata("rsi", json!(curr))
                .with_metadata("prev_rsi", json!(prev))
                .with_metadata("condition", json!("overbought_exit"));
        }

        Signal::hold()
    }

    fn params(&self) -> serde_json::Value {
        serde_json::to_value(&self.params).unwrap_or_default()
    }
}
