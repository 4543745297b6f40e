//! Consistency comparator - checks two runs agree within tolerance

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::results::RunResult;

/// Trade counts may differ by this much and still match
pub const MAX_TRADE_DIFF: usize = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub matched: bool,
    pub return_a_pct: Decimal,
    pub return_b_pct: Decimal,
    pub return_diff_pct: Decimal,
    pub trades_a: usize,
    pub trades_b: usize,
    pub trades_diff: usize,
    pub capital_a: Decimal,
    pub capital_b: Decimal,
    pub capital_diff_pct: Decimal,
}

/// Compare two runs. `tolerance_pct` bounds both the return difference
/// (percentage points) and the final-capital difference (percent).
pub fn compare(a: &RunResult, b: &RunResult, tolerance_pct: Decimal) -> Comparison {
    let return_a_pct = a.total_return_pct();
    let return_b_pct = b.total_return_pct();
    let return_diff_pct = (return_a_pct - return_b_pct).abs();

    let trades_a = a.num_trades();
    let trades_b = b.num_trades();
    let trades_diff = trades_a.abs_diff(trades_b);

    let base = a.final_capital.max(Decimal::ONE);
    let capital_diff_pct = (a.final_capital - b.final_capital).abs() / base * Decimal::ONE_HUNDRED;

    let matched = return_diff_pct <= tolerance_pct
        && trades_diff <= MAX_TRADE_DIFF
        && capital_diff_pct <= tolerance_pct;

    Comparison {
        matched,
        return_a_pct,
        return_b_pct,
        return_diff_pct,
        trades_a,
        trades_b,
        trades_diff,
        capital_a: a.final_capital,
        capital_b: b.final_capital,
        capital_diff_pct,
    }
}
