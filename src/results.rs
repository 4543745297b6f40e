//! Run results and performance summary

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{EquityPoint, Timeframe, Trade};

/// Output of a batch or validation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub strategy: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub initial_capital: Decimal,
    pub final_capital: Decimal,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub bars_processed: usize,
}

impl RunResult {
    pub fn total_return(&self) -> Decimal {
        self.final_capital - self.initial_capital
    }

    /// Return in percent of initial capital
    pub fn total_return_pct(&self) -> Decimal {
        if self.initial_capital.is_zero() {
            return Decimal::ZERO;
        }
        self.total_return() / self.initial_capital * Decimal::ONE_HUNDRED
    }

    pub fn num_trades(&self) -> usize {
        self.trades.len()
    }

    pub fn winning_trades(&self) -> usize {
        self.trades.iter().filter(|t| t.is_win()).count()
    }

    pub fn losing_trades(&self) -> usize {
        self.trades.len() - self.winning_trades()
    }

    /// Win rate in percent
    pub fn win_rate(&self) -> Decimal {
        PerformanceSummary::from_trades(&self.trades, 0).win_rate
    }

    pub fn summary(&self) -> PerformanceSummary {
        PerformanceSummary::from_trades(&self.trades, 0)
    }
}

/// Aggregate trade statistics, shared by batch runs and live sessions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub total_trades: usize,
    pub total_pnl: Decimal,
    pub total_fees: Decimal,
    pub winning_trades: usize,
    pub losing_trades: usize,
    /// Percent
    pub win_rate: Decimal,
    pub avg_win: Decimal,
    pub avg_loss: Decimal,
    pub open_positions: usize,
}

impl PerformanceSummary {
    pub fn from_trades(trades: &[Trade], open_positions: usize) -> Self {
        let wins: Vec<&Trade> = trades.iter().filter(|t| t.is_win()).collect();
        let losses: Vec<&Trade> = trades.iter().filter(|t| !t.is_win()).collect();

        let mean = |set: &[&Trade]| {
            if set.is_empty() {
                Decimal::ZERO
            } else {
                set.iter().map(|t| t.pnl).sum::<Decimal>() / Decimal::from(set.len() as i64)
            }
        };

        let win_rate = if trades.is_empty() {
            Decimal::ZERO
        } else {
            Decimal::from(wins.len() as i64) / Decimal::from(trades.len() as i64)
                * Decimal::ONE_HUNDRED
        };

        Self {
            total_trades: trades.len(),
            total_pnl: trades.iter().map(|t| t.pnl).sum(),
            total_fees: trades.iter().map(|t| t.fee).sum(),
            winning_trades: wins.len(),
            losing_trades: losses.len(),
            win_rate,
            avg_win: mean(&wins),
            avg_loss: mean(&losses),
            open_positions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExitReason, Side};

    fn trade(pnl: i64) -> Trade {
        Trade {
            symbol: "BTC/USDT".to_string(),
            side: Side::Long,
            entry_time: Utc::now(),
            exit_time: Utc::now(),
            entry_price: Decimal::from(100),
            exit_price: Decimal::from(100),
            quantity: Decimal::ONE,
            pnl: Decimal::from(pnl),
            pnl_percent: Decimal::from(pnl),
            fee: Decimal::ONE,
            exit_reason: ExitReason::Signal,
        }
    }

    #[test]
    fn test_summary_counts() {
        let trades = vec![trade(30), trade(-10), trade(0), trade(10)];
        let summary = PerformanceSummary::from_trades(&trades, 1);

        assert_eq!(summary.total_trades, 4);
        assert_eq!(summary.winning_trades, 2);
        // Break-even counts as a loss
        assert_eq!(summary.losing_trades, 2);
        assert_eq!(summary.win_rate, Decimal::from(50));
        assert_eq!(summary.total_pnl, Decimal::from(30));
        assert_eq!(summary.total_fees, Decimal::from(4));
        assert_eq!(summary.avg_win, Decimal::from(20));
        assert_eq!(summary.avg_loss, Decimal::from(-5));
        assert_eq!(summary.open_positions, 1);
    }

    #[test]
    fn test_run_result_returns() {
        let result = RunResult {
            strategy: "ma_crossover".to_string(),
            symbol: "BTC/USDT".to_string(),
            timeframe: Timeframe::Hour1,
            start: None,
            end: None,
            initial_capital: Decimal::from(10000),
            final_capital: Decimal::from(10500),
            trades: vec![trade(500)],
            equity_curve: vec![],
            bars_processed: 0,
        };
        assert_eq!(result.total_return(), Decimal::from(500));
        assert_eq!(result.total_return_pct(), Decimal::from(5));
        assert_eq!(result.win_rate(), Decimal::from(100));
        assert_eq!(result.losing_trades(), 0);
    }

    #[test]
    fn test_empty_summary() {
        let summary = PerformanceSummary::from_trades(&[], 0);
        assert_eq!(summary, PerformanceSummary::default());
    }
}
