//! Validation replay runner - history replayed under live exposure rules
//!
//! Same loop as the batch runner, but at bar `i` the strategy is handed a view
//! that ends at `i`. With a window configured, indicators are recomputed every
//! bar over the trailing window exactly as the live loop does with its fetch
//! window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backtest::{
    check_input, close_at_end, finish, process_bar, BacktestConfig, RunLedger, PROGRESS_INTERVAL,
};
use crate::error::RunnerError;
use crate::results::RunResult;
use crate::strategy::{BarTable, Strategy};
use crate::types::{Bar, SignalAction};

/// One evaluated bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalLogEntry {
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    pub action: SignalAction,
    pub strength: f64,
    /// True when a risk trigger closed the position and the signal was skipped
    #[serde(default)]
    pub triggered: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayOptions {
    /// Recompute indicators over the trailing `window` bars at every step
    pub window: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayReport {
    pub result: RunResult,
    pub signals: Vec<SignalLogEntry>,
}

/// Indicator source: computed once over all bars, or per step over a
/// trailing window
enum Indicators {
    Full(BarTable),
    Trailing(usize),
}

pub struct ValidationRunner<'a> {
    strategy: &'a dyn Strategy,
    config: BacktestConfig,
    options: ReplayOptions,
}

impl<'a> ValidationRunner<'a> {
    pub fn new(strategy: &'a dyn Strategy, config: BacktestConfig) -> Self {
        Self {
            strategy,
            config,
            options: ReplayOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ReplayOptions) -> Self {
        self.options = options;
        self
    }

    /// Replay `bars`. `progress` gets `(processed, total)` every
    /// `PROGRESS_INTERVAL` bars, as in the batch runner.
    pub fn run(
        &self,
        bars: &[Bar],
        mut progress: Option<&mut dyn FnMut(usize, usize)>,
    ) -> Result<ReplayReport, RunnerError> {
        let first = check_input(self.strategy, bars)?;
        let total = bars.len() - first;

        if let Some(window) = self.options.window {
            if window <= self.strategy.required_history() {
                warn!(
                    "Replay window {} does not cover required history {}; expect holds only",
                    window,
                    self.strategy.required_history()
                );
            }
        }

        info!(
            "Validation replay {} on {} | {} bars | window: {:?}",
            self.strategy.name(),
            self.config.symbol,
            bars.len(),
            self.options.window
        );

        let indicators = match self.options.window {
            None => Indicators::Full(self.strategy.calculate_indicators(bars)),
            Some(window) => Indicators::Trailing(window),
        };

        let mut kernel = self.config.kernel();
        let mut ledger = RunLedger::default();
        let mut signals = Vec::with_capacity(bars.len() - first);

        for (i, bar) in bars.iter().enumerate().skip(first) {
            let evaluated = match &indicators {
                Indicators::Full(table) => process_bar(
                    &mut kernel,
                    self.strategy,
                    bar,
                    table.view_to(i),
                    i,
                    self.config.position_size,
                    &mut ledger,
                )?,
                Indicators::Trailing(window) => {
                    let start = (i + 1).saturating_sub(*window);
                    let table = self.strategy.calculate_indicators(&bars[start..=i]);
                    let local = i - start;
                    process_bar(
                        &mut kernel,
                        self.strategy,
                        bar,
                        table.view_to(local),
                        local,
                        self.config.position_size,
                        &mut ledger,
                    )?
                }
            };

            let entry = match evaluated {
                Some(signal) => SignalLogEntry {
                    index: i,
                    timestamp: bar.timestamp,
                    action: signal.action,
                    strength: signal.strength,
                    triggered: false,
                },
                None => SignalLogEntry {
                    index: i,
                    timestamp: bar.timestamp,
                    action: SignalAction::Hold,
                    strength: 0.0,
                    triggered: true,
                },
            };
            debug!("Replay bar {} -> {}", i, entry.action);
            signals.push(entry);

            if (i - first) % PROGRESS_INTERVAL == 0 {
                if let Some(cb) = progress.as_mut() {
                    cb(i - first, total);
                }
            }
        }

        if let Some(last) = bars.last() {
            close_at_end(&mut kernel, last, &mut ledger)?;
        }

        let result = finish(&self.config, self.strategy, bars, first, &kernel, ledger);
        info!(
            "✓ Replay complete | Trades: {} | Final: {}",
            result.num_trades(),
            result.final_capital.round_dp(2)
        );

        Ok(ReplayReport { result, signals })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::CostModel;
    use crate::strategy::TableView;
    use crate::types::Signal;
    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;

    /// Buys if it can see any bar after the current one
    struct Peeker;

    impl Strategy for Peeker {
        fn name(&self) -> &str {
            "peeker"
        }
        fn required_history(&self) -> usize {
            1
        }
        fn calculate_indicators(&self, bars: &[Bar]) -> BarTable {
            BarTable::new(bars.to_vec())
        }
        fn analyze(&self, view: TableView<'_>, index: usize) -> Signal {
            if view.bar(index + 1).is_some() {
                Signal::buy(1.0)
            } else {
                Signal::hold()
            }
        }
    }

    fn bars(n: usize) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let c = Decimal::from(100 + i as i64);
                Bar::new(start + Duration::hours(i as i64), c, c, c, c, Decimal::ONE)
            })
            .collect()
    }

    fn config() -> BacktestConfig {
        BacktestConfig::new("BTC/USDT", Decimal::from(1000), CostModel::free())
    }

    #[test]
    fn test_no_look_ahead() {
        let report = ValidationRunner::new(&Peeker, config())
            .run(&bars(10), None)
            .unwrap();
        assert_eq!(report.result.num_trades(), 0);
        assert_eq!(report.result.final_capital, Decimal::from(1000));
        assert!(report.signals.iter().all(|s| s.action == SignalAction::Hold));
    }

    #[test]
    fn test_signal_log_one_entry_per_bar() {
        let report = ValidationRunner::new(&Peeker, config())
            .with_options(ReplayOptions { window: Some(3) })
            .run(&bars(8), None)
            .unwrap();
        assert_eq!(report.signals.len(), 7);
        assert_eq!(report.result.equity_curve.len(), 7);
        assert_eq!(report.signals[0].index, 1);
        assert_eq!(report.signals[6].timestamp, report.result.end.unwrap());
    }

    #[test]
    fn test_progress_callback_cadence() {
        let mut calls = Vec::new();
        let mut cb = |done: usize, total: usize| calls.push((done, total));
        let report = ValidationRunner::new(&Peeker, config())
            .with_options(ReplayOptions { window: Some(10) })
            .run(&bars(202), Some(&mut cb))
            .unwrap();
        assert_eq!(report.signals.len(), 201);
        assert_eq!(calls, vec![(0, 201), (100, 201), (200, 201)]);
    }
}
