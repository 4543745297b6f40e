//! Batch replay runner - single deterministic pass over a bar table

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::error::{DataError, KernelError, RunnerError};
use crate::kernel::{CostModel, ExecutionKernel};
use crate::results::RunResult;
use crate::strategy::{Strategy, TableView};
use crate::types::{Bar, EquityPoint, ExitReason, Side, Signal, SignalAction, Timeframe, Trade};

/// Progress callback cadence, in bars
pub const PROGRESS_INTERVAL: usize = 100;

/// Parameters shared by the batch and validation runners
#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub initial_capital: Decimal,
    pub cost: CostModel,
    /// Fraction of available capital per entry, clamped to [0.01, 1.0]
    pub position_size: Decimal,
}

impl BacktestConfig {
    pub fn new(symbol: &str, initial_capital: Decimal, cost: CostModel) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe: Timeframe::default(),
            initial_capital,
            cost,
            position_size: Decimal::ONE,
        }
    }

    pub fn with_timeframe(mut self, timeframe: Timeframe) -> Self {
        self.timeframe = timeframe;
        self
    }

    pub fn with_position_size(mut self, position_size: Decimal) -> Self {
        self.position_size = position_size;
        self
    }

    pub(crate) fn kernel(&self) -> ExecutionKernel {
        ExecutionKernel::new(&self.symbol, self.initial_capital, self.cost)
    }
}

/// Collections a run accumulates
#[derive(Debug, Default)]
pub(crate) struct RunLedger {
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
}

/// Process one bar: risk triggers first, then the strategy signal.
///
/// Returns the signal evaluated for the bar, or `None` if a trigger closed the
/// position and signal evaluation was skipped. Emits exactly one equity point.
pub(crate) fn process_bar(
    kernel: &mut ExecutionKernel,
    strategy: &dyn Strategy,
    bar: &Bar,
    view: TableView<'_>,
    index: usize,
    position_size: Decimal,
    ledger: &mut RunLedger,
) -> Result<Option<Signal>, KernelError> {
    if let Some(trade) = kernel.apply_risk_triggers(bar)? {
        ledger.trades.push(trade);
        ledger.equity_curve.push(kernel.equity(bar.close, bar.timestamp));
        return Ok(None);
    }

    let signal = strategy.analyze(view, index);
    match signal.action {
        SignalAction::Buy if !kernel.has_position() => {
            match kernel.open_position(bar.timestamp, bar.close, Side::Long, position_size, &signal) {
                Ok(_) => {}
                Err(KernelError::InsufficientFunds {
                    required,
                    available,
                }) => {
                    warn!(
                        "Skipping entry at {}: need {}, have {}",
                        bar.timestamp, required, available
                    );
                }
                Err(e) => return Err(e),
            }
        }
        SignalAction::Sell if kernel.has_position() => {
            let trade = kernel.close_position(bar.timestamp, bar.close, ExitReason::Signal)?;
            ledger.trades.push(trade);
        }
        _ => {}
    }

    ledger.equity_curve.push(kernel.equity(bar.close, bar.timestamp));
    Ok(Some(signal))
}

/// Force-close anything still open at the last bar's close
pub(crate) fn close_at_end(
    kernel: &mut ExecutionKernel,
    last: &Bar,
    ledger: &mut RunLedger,
) -> Result<(), KernelError> {
    if kernel.has_position() {
        let trade = kernel.close_position(last.timestamp, last.close, ExitReason::EndOfData)?;
        ledger.trades.push(trade);
    }
    Ok(())
}

/// Validate input and return the minimum-history offset
pub(crate) fn check_input(strategy: &dyn Strategy, bars: &[Bar]) -> Result<usize, DataError> {
    strategy.validate_data(bars)?;
    let required = strategy.required_history();
    if required >= bars.len() {
        return Err(DataError::InsufficientHistory {
            required,
            available: bars.len(),
        });
    }
    Ok(required)
}

pub(crate) fn finish(
    config: &BacktestConfig,
    strategy: &dyn Strategy,
    bars: &[Bar],
    first: usize,
    kernel: &ExecutionKernel,
    ledger: RunLedger,
) -> RunResult {
    RunResult {
        strategy: strategy.name().to_string(),
        symbol: config.symbol.clone(),
        timeframe: config.timeframe,
        start: bars.get(first).map(|b| b.timestamp),
        end: bars.last().map(|b| b.timestamp),
        initial_capital: kernel.initial_capital(),
        final_capital: kernel.capital(),
        bars_processed: bars.len() - first,
        trades: ledger.trades,
        equity_curve: ledger.equity_curve,
    }
}

/// Batch runner over an in-memory bar table
pub struct BacktestRunner<'a> {
    strategy: &'a dyn Strategy,
    config: BacktestConfig,
}

impl<'a> BacktestRunner<'a> {
    pub fn new(strategy: &'a dyn Strategy, config: BacktestConfig) -> Self {
        Self { strategy, config }
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Run over `bars`. Input errors are reported before any state exists.
    pub fn run(
        &self,
        bars: &[Bar],
        mut progress: Option<&mut dyn FnMut(usize, usize)>,
    ) -> Result<RunResult, RunnerError> {
        let first = check_input(self.strategy, bars)?;
        let table = self.strategy.calculate_indicators(bars);
        let total = bars.len() - first;

        info!(
            "Backtest {} on {} | {} bars ({} warm-up)",
            self.strategy.name(),
            self.config.symbol,
            bars.len(),
            first
        );

        let mut kernel = self.config.kernel();
        let mut ledger = RunLedger::default();

        for (i, bar) in bars.iter().enumerate().skip(first) {
            process_bar(
                &mut kernel,
                self.strategy,
                bar,
                table.view(),
                i,
                self.config.position_size,
                &mut ledger,
            )?;

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
        debug!("Equity points: {}", result.equity_curve.len());
        info!(
            "✓ Backtest complete | Trades: {} | Final: {} ({}%)",
            result.num_trades(),
            result.final_capital.round_dp(2),
            result.total_return_pct().round_dp(2)
        );
        Ok(result)
    }
}
