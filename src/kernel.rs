//! Execution kernel - position open/close, fee and slippage math, risk triggers
//!
//! The kernel is the only place a `Position`, the realized capital or the paper
//! `BalanceLedger` is mutated. Every runner (batch, validation replay, live loop)
//! drives the same kernel so fill-price and fee math never diverge between them.
//!
//! Entry and exit are split into a pure plan step and an apply step. The
//! simulated path applies the planned fill directly; the live path replaces it
//! with the exchange's reported fill.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::KernelError;
use crate::portfolio::BalanceLedger;
use crate::types::{
    split_symbol, Bar, EquityPoint, ExitReason, Fill, OrderSide, Position, RiskLevels, Side,
    Signal, Trade,
};

/// Smallest fraction of available capital a single entry may commit
pub const MIN_POSITION_FRACTION: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Fee and slippage rates, both as fractions (0.001 = 0.1%)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    pub fee_rate: Decimal,
    pub slippage_rate: Decimal,
}

impl CostModel {
    pub fn new(fee_rate: Decimal, slippage_rate: Decimal) -> Result<Self, KernelError> {
        if fee_rate < Decimal::ZERO {
            return Err(KernelError::InvalidConfig(format!(
                "fee rate must be >= 0, got {}",
                fee_rate
            )));
        }
        if slippage_rate < Decimal::ZERO || slippage_rate >= Decimal::ONE {
            return Err(KernelError::InvalidConfig(format!(
                "slippage rate must be in [0, 1), got {}",
                slippage_rate
            )));
        }
        Ok(Self {
            fee_rate,
            slippage_rate,
        })
    }

    /// Build from percentages as written in config (0.1 -> 0.001)
    pub fn from_percent(fee_percent: f64, slippage_percent: f64) -> Result<Self, KernelError> {
        let fee = Decimal::from_f64(fee_percent).ok_or_else(|| {
            KernelError::InvalidConfig(format!("fee percent not representable: {}", fee_percent))
        })?;
        let slip = Decimal::from_f64(slippage_percent).ok_or_else(|| {
            KernelError::InvalidConfig(format!(
                "slippage percent not representable: {}",
                slippage_percent
            ))
        })?;
        let hundred = Decimal::ONE_HUNDRED;
        Self::new(fee / hundred, slip / hundred)
    }

    /// Zero-cost model, mostly for tests
    pub fn free() -> Self {
        Self {
            fee_rate: Decimal::ZERO,
            slippage_rate: Decimal::ZERO,
        }
    }

    /// Price after slippage. Buys fill above the reference, sells below.
    pub fn fill_price(&self, reference_price: Decimal, order: OrderSide) -> Decimal {
        match order {
            OrderSide::Buy => reference_price * (Decimal::ONE + self.slippage_rate),
            OrderSide::Sell => reference_price * (Decimal::ONE - self.slippage_rate),
        }
    }

    pub fn fee(&self, notional: Decimal) -> Decimal {
        notional * self.fee_rate
    }
}

/// Clamp a position-size fraction to [0.01, 1.0]
pub fn clamp_fraction(fraction: Decimal) -> Decimal {
    fraction.clamp(MIN_POSITION_FRACTION, Decimal::ONE)
}

/// Planned entry, computed without touching kernel state
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EntryPlan {
    pub side: Side,
    pub reference_price: Decimal,
    /// Reference price after slippage
    pub exec_price: Decimal,
    pub trade_capital: Decimal,
    pub fee: Decimal,
    pub quantity: Decimal,
}

impl EntryPlan {
    /// The fill the simulated path assumes
    pub fn simulated_fill(&self) -> Fill {
        Fill {
            price: self.exec_price,
            quantity: self.quantity,
            fee: self.fee,
        }
    }
}

/// Planned exit for the open position
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExitPlan {
    pub side: Side,
    pub reference_price: Decimal,
    pub exec_price: Decimal,
    pub quantity: Decimal,
    pub fee: Decimal,
}

impl ExitPlan {
    pub fn simulated_fill(&self) -> Fill {
        Fill {
            price: self.exec_price,
            quantity: self.quantity,
            fee: self.fee,
        }
    }
}

/// Outcome of checking a position's risk levels against one bar
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TriggerResult {
    None,
    StopLoss(Decimal),
    TakeProfit(Decimal),
}

impl TriggerResult {
    /// Exit reason and trigger price, if anything fired
    pub fn exit(&self) -> Option<(ExitReason, Decimal)> {
        match *self {
            TriggerResult::None => None,
            TriggerResult::StopLoss(price) => Some((ExitReason::StopLoss, price)),
            TriggerResult::TakeProfit(price) => Some((ExitReason::TakeProfit, price)),
        }
    }
}

/// Check stop-loss, then take-profit, against a bar's range.
///
/// Stop-loss wins when one bar breaches both levels.
pub fn evaluate_risk_triggers(position: &Position, bar: &Bar) -> TriggerResult {
    if let Some(sl) = position.stop_loss {
        let hit = match position.side {
            Side::Long => bar.low <= sl,
            Side::Short => bar.high >= sl,
        };
        if hit {
            return TriggerResult::StopLoss(sl);
        }
    }

    if let Some(tp) = position.take_profit {
        let hit = match position.side {
            Side::Long => bar.high >= tp,
            Side::Short => bar.low <= tp,
        };
        if hit {
            return TriggerResult::TakeProfit(tp);
        }
    }

    TriggerResult::None
}

/// Realized capital plus unrealized P&L at `close`. Pure.
pub fn mark_equity(
    capital: Decimal,
    position: Option<&Position>,
    close: Decimal,
    timestamp: DateTime<Utc>,
) -> EquityPoint {
    let unrealized = position
        .map(|p| p.unrealized_pnl(close))
        .unwrap_or(Decimal::ZERO);
    EquityPoint {
        timestamp,
        equity: capital + unrealized,
    }
}

/// Per-symbol execution state. One logical caller at a time.
#[derive(Debug, Clone)]
pub struct ExecutionKernel {
    symbol: String,
    cost: CostModel,
    initial_capital: Decimal,
    capital: Decimal,
    position: Option<Position>,
    ledger: Option<BalanceLedger>,
}

impl ExecutionKernel {
    pub fn new(symbol: &str, initial_capital: Decimal, cost: CostModel) -> Self {
        Self {
            symbol: symbol.to_string(),
            cost,
            initial_capital,
            capital: initial_capital,
            position: None,
            ledger: None,
        }
    }

    /// Attach a paper balance ledger funded with the current capital
    pub fn with_paper_ledger(mut self) -> Self {
        let (base, quote) = split_symbol(&self.symbol);
        self.ledger = Some(BalanceLedger::new(base, quote, self.capital));
        self
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn cost(&self) -> &CostModel {
        &self.cost
    }

    pub fn initial_capital(&self) -> Decimal {
        self.initial_capital
    }

    /// Realized capital
    pub fn capital(&self) -> Decimal {
        self.capital
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn has_position(&self) -> bool {
        self.position.is_some()
    }

    pub fn ledger(&self) -> Option<&BalanceLedger> {
        self.ledger.as_ref()
    }

    /// Capital an entry may draw from: paper free quote if a ledger is attached
    pub fn available_capital(&self) -> Decimal {
        match &self.ledger {
            Some(ledger) => ledger.quote_free(),
            None => self.capital,
        }
    }

    /// Plan an entry against `available` capital. Mutates nothing.
    pub fn plan_entry(
        &self,
        available: Decimal,
        reference_price: Decimal,
        side: Side,
        fraction: Decimal,
    ) -> Result<EntryPlan, KernelError> {
        if self.position.is_some() {
            return Err(KernelError::AlreadyOpen(self.symbol.clone()));
        }
        if reference_price <= Decimal::ZERO {
            return Err(KernelError::InvalidPrice(reference_price));
        }

        let trade_capital = available * clamp_fraction(fraction);
        if trade_capital <= Decimal::ZERO {
            return Err(KernelError::InsufficientFunds {
                required: trade_capital,
                available,
            });
        }
        if let Some(ledger) = &self.ledger {
            ledger.can_reserve(trade_capital)?;
        }

        let exec_price = self.cost.fill_price(reference_price, side.entry_order());
        let fee = self.cost.fee(trade_capital);
        let quantity = (trade_capital - fee) / exec_price;

        Ok(EntryPlan {
            side,
            reference_price,
            exec_price,
            trade_capital,
            fee,
            quantity,
        })
    }

    /// Record a filled entry. `committed` is the capital tied up by the fill.
    pub fn apply_entry(
        &mut self,
        timestamp: DateTime<Utc>,
        side: Side,
        fill: Fill,
        committed: Decimal,
        risk: RiskLevels,
    ) -> Result<&Position, KernelError> {
        if self.position.is_some() {
            return Err(KernelError::AlreadyOpen(self.symbol.clone()));
        }
        if fill.quantity <= Decimal::ZERO {
            return Err(KernelError::InvalidQuantity(fill.quantity));
        }
        if fill.price <= Decimal::ZERO {
            return Err(KernelError::InvalidPrice(fill.price));
        }
        if let Some(ledger) = self.ledger.as_mut() {
            ledger.reserve(committed, fill.quantity)?;
        }

        info!(
            "Opened {} {} | Qty: {} @ {} | Fee: {}",
            side, self.symbol, fill.quantity, fill.price, fill.fee
        );

        Ok(&*self.position.insert(Position {
            symbol: self.symbol.clone(),
            side,
            entry_time: timestamp,
            entry_price: fill.price,
            quantity: fill.quantity,
            entry_fee: fill.fee,
            trade_capital: committed,
            stop_loss: risk.stop_loss,
            take_profit: risk.take_profit,
        }))
    }

    /// Open a position with a simulated fill
    pub fn open_position(
        &mut self,
        timestamp: DateTime<Utc>,
        reference_price: Decimal,
        side: Side,
        fraction: Decimal,
        signal: &Signal,
    ) -> Result<Position, KernelError> {
        let plan = self.plan_entry(self.available_capital(), reference_price, side, fraction)?;
        let position = self.apply_entry(
            timestamp,
            side,
            plan.simulated_fill(),
            plan.trade_capital,
            signal.risk,
        )?;
        Ok(position.clone())
    }

    /// Plan closing the open position at `reference_price`. Mutates nothing.
    pub fn plan_exit(&self, reference_price: Decimal) -> Result<ExitPlan, KernelError> {
        let position = self
            .position
            .as_ref()
            .ok_or_else(|| KernelError::NoPosition(self.symbol.clone()))?;
        if position.quantity <= Decimal::ZERO {
            return Err(KernelError::InvalidQuantity(position.quantity));
        }
        if reference_price <= Decimal::ZERO {
            return Err(KernelError::InvalidPrice(reference_price));
        }

        let exec_price = self
            .cost
            .fill_price(reference_price, position.side.exit_order());
        let fee = self.cost.fee(position.quantity * exec_price);

        Ok(ExitPlan {
            side: position.side,
            reference_price,
            exec_price,
            quantity: position.quantity,
            fee,
        })
    }

    /// Record a filled exit.
    ///
    /// A fill for the whole position clears it. A smaller fill books a trade
    /// for the filled quantity and leaves the remainder open, with entry fee
    /// and committed capital split pro rata. A fill larger than the position
    /// is rejected and nothing changes.
    pub fn apply_exit(
        &mut self,
        timestamp: DateTime<Utc>,
        fill: Fill,
        reason: ExitReason,
    ) -> Result<Trade, KernelError> {
        let position = match self.position.as_ref() {
            Some(p) => p,
            None => return Err(KernelError::NoPosition(self.symbol.clone())),
        };
        if position.quantity <= Decimal::ZERO
            || fill.quantity <= Decimal::ZERO
            || fill.quantity > position.quantity
        {
            return Err(KernelError::InvalidQuantity(fill.quantity));
        }
        if fill.price <= Decimal::ZERO {
            return Err(KernelError::InvalidPrice(fill.price));
        }

        let qty = fill.quantity;
        let full = qty == position.quantity;
        let (entry_fee, committed) = if full {
            (position.entry_fee, position.trade_capital)
        } else {
            let share = qty / position.quantity;
            (position.entry_fee * share, position.trade_capital * share)
        };

        let gross = match position.side {
            Side::Long => (fill.price - position.entry_price) * qty,
            Side::Short => (position.entry_price - fill.price) * qty,
        };
        let fee = entry_fee + fill.fee;
        let pnl = gross - fee;
        let pnl_percent = pnl / (position.entry_price * qty) * Decimal::ONE_HUNDRED;

        let trade = Trade {
            symbol: self.symbol.clone(),
            side: position.side,
            entry_time: position.entry_time,
            exit_time: timestamp,
            entry_price: position.entry_price,
            exit_price: fill.price,
            quantity: qty,
            pnl,
            pnl_percent,
            fee,
            exit_reason: reason,
        };

        if full {
            self.position = None;
        } else if let Some(remaining) = self.position.as_mut() {
            remaining.quantity -= qty;
            remaining.entry_fee -= entry_fee;
            remaining.trade_capital -= committed;
            warn!(
                "Partial exit on {}: {} filled, {} still open",
                self.symbol, qty, remaining.quantity
            );
        }
        self.capital += pnl;
        if let Some(ledger) = self.ledger.as_mut() {
            ledger.release(committed, qty, pnl);
        }

        info!(
            "Closed {} {} ({}) | Qty: {} | Exit: {} | P&L: {} ({}%)",
            trade.side,
            self.symbol,
            reason,
            qty,
            fill.price,
            pnl.round_dp(4),
            pnl_percent.round_dp(2)
        );

        Ok(trade)
    }

    /// Close the open position with a simulated fill
    pub fn close_position(
        &mut self,
        timestamp: DateTime<Utc>,
        reference_price: Decimal,
        reason: ExitReason,
    ) -> Result<Trade, KernelError> {
        let plan = self.plan_exit(reference_price)?;
        self.apply_exit(timestamp, plan.simulated_fill(), reason)
    }

    /// Evaluate the open position against `bar` and close at the trigger price
    /// if a level was breached.
    pub fn apply_risk_triggers(&mut self, bar: &Bar) -> Result<Option<Trade>, KernelError> {
        let trigger = match &self.position {
            Some(position) => evaluate_risk_triggers(position, bar),
            None => return Ok(None),
        };

        match trigger.exit() {
            Some((reason, price)) => {
                debug!("{} triggered at {} on bar {}", reason, price, bar.timestamp);
                self.close_position(bar.timestamp, price, reason).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Equity at `close` given the current state
    pub fn equity(&self, close: Decimal, timestamp: DateTime<Utc>) -> EquityPoint {
        mark_equity(self.capital, self.position.as_ref(), close, timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()
    }

    fn bar(high: &str, low: &str, close: &str) -> Bar {
        Bar::new(ts(5), d(close), d(high), d(low), d(close), d("1"))
    }

    fn kernel() -> ExecutionKernel {
        let cost = CostModel::new(d("0.001"), d("0.0005")).unwrap();
        ExecutionKernel::new("BTC/USDT", d("10000"), cost)
    }

    #[test]
    fn test_cost_model_rejects_out_of_range_rates() {
        assert!(matches!(
            CostModel::new(d("-0.001"), Decimal::ZERO),
            Err(KernelError::InvalidConfig(_))
        ));
        assert!(matches!(
            CostModel::new(Decimal::ZERO, d("-0.1")),
            Err(KernelError::InvalidConfig(_))
        ));
        // Full slippage would fill a short entry at zero
        assert!(matches!(
            CostModel::new(Decimal::ZERO, Decimal::ONE),
            Err(KernelError::InvalidConfig(_))
        ));
        assert!(matches!(
            CostModel::new(Decimal::ZERO, d("1.5")),
            Err(KernelError::InvalidConfig(_))
        ));
        assert!(CostModel::from_percent(0.1, 100.0).is_err());
        assert!(CostModel::new(Decimal::ZERO, d("0.99")).is_ok());
    }

    #[test]
    fn test_cost_model_from_percent() {
        let cost = CostModel::from_percent(0.1, 0.05).unwrap();
        assert_eq!(cost.fee_rate, d("0.001"));
        assert_eq!(cost.slippage_rate, d("0.0005"));
        assert!(CostModel::from_percent(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_fraction_clamped() {
        assert_eq!(clamp_fraction(d("0")), d("0.01"));
        assert_eq!(clamp_fraction(d("2.5")), Decimal::ONE);
        assert_eq!(clamp_fraction(d("0.5")), d("0.5"));
    }

    #[test]
    fn test_open_position_quantity_formula() {
        let mut k = kernel();
        let pos = k
            .open_position(ts(0), d("100"), Side::Long, Decimal::ONE, &Signal::buy(1.0))
            .unwrap();

        let trade_capital = d("10000") * Decimal::ONE;
        let fee = trade_capital * d("0.001");
        let exec = d("100") * (Decimal::ONE + d("0.0005"));
        assert_eq!(pos.entry_price, d("100.05"));
        assert_eq!(pos.entry_fee, d("10"));
        assert_eq!(pos.quantity, (trade_capital - fee) / exec);
        assert!((pos.quantity - d("99.85007496")).abs() < d("0.00000001"));
        // Capital is realized only on close
        assert_eq!(k.capital(), d("10000"));
    }

    #[test]
    fn test_round_trip_exact_arithmetic() {
        let mut k = kernel();
        let pos = k
            .open_position(ts(0), d("100"), Side::Long, Decimal::ONE, &Signal::buy(1.0))
            .unwrap();
        let trade = k.close_position(ts(3), d("110"), ExitReason::Signal).unwrap();

        let exit_exec = d("110") * (Decimal::ONE - d("0.0005"));
        let gross = (exit_exec - pos.entry_price) * pos.quantity;
        let exit_fee = pos.quantity * exit_exec * d("0.001");
        let net = gross - (pos.entry_fee + exit_fee);

        assert_eq!(trade.exit_price, d("109.945"));
        assert_eq!(trade.pnl, net);
        assert_eq!(trade.fee, pos.entry_fee + exit_fee);
        assert!((trade.pnl - d("967.03847526")).abs() < d("0.00000001"));
        assert_eq!(k.capital(), d("10000") + net);
        assert!(!k.has_position());
        println!("✅ Round trip P&L: {}", trade.pnl);
    }

    #[test]
    fn test_short_round_trip_inverts_pnl() {
        let mut k = ExecutionKernel::new("ETH/USDT", d("1000"), CostModel::free());
        k.open_position(ts(0), d("50"), Side::Short, Decimal::ONE, &Signal::sell(1.0))
            .unwrap();
        let trade = k.close_position(ts(1), d("40"), ExitReason::Signal).unwrap();
        assert_eq!(trade.pnl, d("200"));
        assert_eq!(trade.pnl_percent, d("20"));
        assert_eq!(k.capital(), d("1200"));
    }

    #[test]
    fn test_open_twice_rejected() {
        let mut k = kernel();
        k.open_position(ts(0), d("100"), Side::Long, Decimal::ONE, &Signal::buy(1.0))
            .unwrap();
        let err = k
            .open_position(ts(1), d("101"), Side::Long, Decimal::ONE, &Signal::buy(1.0))
            .unwrap_err();
        assert_eq!(err, KernelError::AlreadyOpen("BTC/USDT".to_string()));
    }

    #[test]
    fn test_close_without_position_leaves_capital() {
        let mut k = kernel();
        let err = k.close_position(ts(0), d("100"), ExitReason::Signal).unwrap_err();
        assert_eq!(err, KernelError::NoPosition("BTC/USDT".to_string()));
        assert_eq!(k.capital(), d("10000"));
    }

    #[test]
    fn test_zero_quantity_fill_rejected() {
        let mut k = kernel();
        let fill = Fill {
            price: d("100"),
            quantity: Decimal::ZERO,
            fee: Decimal::ZERO,
        };
        let err = k
            .apply_entry(ts(0), Side::Long, fill, d("100"), RiskLevels::default())
            .unwrap_err();
        assert!(matches!(err, KernelError::InvalidQuantity(_)));

        k.open_position(ts(0), d("100"), Side::Long, Decimal::ONE, &Signal::buy(1.0))
            .unwrap();
        let err = k.apply_exit(ts(1), fill, ExitReason::Manual).unwrap_err();
        assert!(matches!(err, KernelError::InvalidQuantity(_)));
        assert!(k.has_position());
    }

    #[test]
    fn test_partial_exit_fill_keeps_remainder() {
        let mut k =
            ExecutionKernel::new("BTC/USDT", d("1000"), CostModel::free()).with_paper_ledger();
        k.open_position(ts(0), d("100"), Side::Long, Decimal::ONE, &Signal::buy(1.0))
            .unwrap();
        assert_eq!(k.position().unwrap().quantity, d("10"));

        let partial = Fill {
            price: d("110"),
            quantity: d("4"),
            fee: Decimal::ZERO,
        };
        let trade = k.apply_exit(ts(1), partial, ExitReason::Signal).unwrap();
        assert_eq!(trade.quantity, d("4"));
        assert_eq!(trade.pnl, d("40"));
        assert_eq!(k.capital(), d("1040"));

        let rest = k.position().unwrap();
        assert_eq!(rest.quantity, d("6"));
        assert_eq!(rest.trade_capital, d("600"));
        let usdt = k.ledger().unwrap().balance("USDT");
        assert_eq!(usdt.used, d("600"));
        assert_eq!(usdt.free + usdt.used, k.capital());

        let trade = k.close_position(ts(2), d("90"), ExitReason::Signal).unwrap();
        assert_eq!(trade.quantity, d("6"));
        assert_eq!(trade.pnl, d("-60"));
        assert!(!k.has_position());
        assert_eq!(k.capital(), d("980"));
        assert_eq!(k.ledger().unwrap().balance("USDT").free, d("980"));
    }

    #[test]
    fn test_overfilled_exit_rejected() {
        let mut k = ExecutionKernel::new("BTC/USDT", d("1000"), CostModel::free());
        k.open_position(ts(0), d("100"), Side::Long, Decimal::ONE, &Signal::buy(1.0))
            .unwrap();
        let fill = Fill {
            price: d("110"),
            quantity: d("11"),
            fee: Decimal::ZERO,
        };
        let err = k.apply_exit(ts(1), fill, ExitReason::Signal).unwrap_err();
        assert_eq!(err, KernelError::InvalidQuantity(d("11")));
        assert_eq!(k.position().unwrap().quantity, d("10"));
        assert_eq!(k.capital(), d("1000"));
    }

    #[test]
    fn test_invalid_price_rejected() {
        let k = kernel();
        let err = k
            .plan_entry(d("1000"), Decimal::ZERO, Side::Long, Decimal::ONE)
            .unwrap_err();
        assert!(matches!(err, KernelError::InvalidPrice(_)));
    }

    #[test]
    fn test_insufficient_funds_without_capital() {
        let mut k = ExecutionKernel::new("BTC/USDT", Decimal::ZERO, CostModel::free());
        let err = k
            .open_position(ts(0), d("100"), Side::Long, Decimal::ONE, &Signal::buy(1.0))
            .unwrap_err();
        assert!(matches!(err, KernelError::InsufficientFunds { .. }));
        assert!(!k.has_position());
    }

    #[test]
    fn test_stop_loss_wins_over_take_profit() {
        let mut k = kernel();
        let signal = Signal::buy(1.0)
            .with_stop_loss(d("95"))
            .with_take_profit(d("105"));
        let pos = k
            .open_position(ts(0), d("100"), Side::Long, Decimal::ONE, &signal)
            .unwrap();

        // Wide bar breaches both levels
        let wide = bar("110", "90", "100");
        assert_eq!(evaluate_risk_triggers(&pos, &wide), TriggerResult::StopLoss(d("95")));

        let trade = k.apply_risk_triggers(&wide).unwrap().unwrap();
        assert_eq!(trade.exit_reason, ExitReason::StopLoss);
        assert_eq!(trade.exit_price, d("95") * (Decimal::ONE - d("0.0005")));
    }

    #[test]
    fn test_short_trigger_directions() {
        let pos = Position {
            symbol: "BTC/USDT".to_string(),
            side: Side::Short,
            entry_time: ts(0),
            entry_price: d("100"),
            quantity: d("1"),
            entry_fee: Decimal::ZERO,
            trade_capital: d("100"),
            stop_loss: Some(d("105")),
            take_profit: Some(d("90")),
        };
        assert_eq!(evaluate_risk_triggers(&pos, &bar("104", "96", "100")), TriggerResult::None);
        assert_eq!(
            evaluate_risk_triggers(&pos, &bar("106", "96", "100")),
            TriggerResult::StopLoss(d("105"))
        );
        assert_eq!(
            evaluate_risk_triggers(&pos, &bar("101", "89", "95")),
            TriggerResult::TakeProfit(d("90"))
        );
    }

    #[test]
    fn test_take_profit_fires_alone() {
        let mut k = kernel();
        let signal = Signal::buy(1.0).with_take_profit(d("105"));
        k.open_position(ts(0), d("100"), Side::Long, Decimal::ONE, &signal)
            .unwrap();

        assert!(k.apply_risk_triggers(&bar("104", "99", "103")).unwrap().is_none());
        let trade = k.apply_risk_triggers(&bar("106", "101", "105")).unwrap().unwrap();
        assert_eq!(trade.exit_reason, ExitReason::TakeProfit);
    }

    #[test]
    fn test_mark_equity_is_pure() {
        let mut k = ExecutionKernel::new("BTC/USDT", d("1000"), CostModel::free());
        assert_eq!(k.equity(d("100"), ts(0)).equity, d("1000"));

        k.open_position(ts(0), d("100"), Side::Long, Decimal::ONE, &Signal::buy(1.0))
            .unwrap();
        let point = mark_equity(k.capital(), k.position(), d("110"), ts(1));
        assert_eq!(point.equity, d("1100"));
        assert_eq!(point.timestamp, ts(1));
        assert_eq!(k.capital(), d("1000"));
    }

    #[test]
    fn test_paper_ledger_tracks_capital() {
        let mut k = kernel().with_paper_ledger();
        k.open_position(ts(0), d("100"), Side::Long, d("0.5"), &Signal::buy(1.0))
            .unwrap();

        let ledger = k.ledger().unwrap();
        let usdt = ledger.balance("USDT");
        assert_eq!(usdt.used, d("5000"));
        assert_eq!(usdt.free + usdt.used, k.capital());
        assert_eq!(ledger.balance("BTC").free, k.position().unwrap().quantity);

        k.close_position(ts(1), d("90"), ExitReason::Signal).unwrap();
        let ledger = k.ledger().unwrap();
        let usdt = ledger.balance("USDT");
        assert_eq!(usdt.used, Decimal::ZERO);
        assert_eq!(usdt.free, k.capital());
        assert_eq!(ledger.balance("BTC").free, Decimal::ZERO);
    }

    #[test]
    fn test_live_fill_populates_position() {
        let mut k = kernel();
        let plan = k
            .plan_entry(d("5000"), d("100"), Side::Long, Decimal::ONE)
            .unwrap();
        assert_eq!(plan.trade_capital, d("5000"));

        let fill = Fill {
            price: d("100.2"),
            quantity: d("49.5"),
            fee: d("4.96"),
        };
        let committed = fill.price * fill.quantity + fill.fee;
        let pos = k
            .apply_entry(ts(0), Side::Long, fill, committed, RiskLevels::default())
            .unwrap();
        assert_eq!(pos.entry_price, d("100.2"));
        assert_eq!(pos.quantity, d("49.5"));
        assert_eq!(pos.entry_fee, d("4.96"));
    }
}
