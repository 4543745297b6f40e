//! Batch runner, validation replay and comparator agreement

mod mock_exchange;

use chrono::{Duration, TimeZone, Utc};
use mock_exchange::{hourly_bars, start_time, ScriptedStrategy};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;

use tradeloop::backtest::{BacktestConfig, BacktestRunner};
use tradeloop::compare::compare;
use tradeloop::kernel::{CostModel, ExecutionKernel};
use tradeloop::replay::{ReplayOptions, ValidationRunner};
use tradeloop::strategy::{BarTable, Strategy, StrategyRegistry, TableView};
use tradeloop::{Bar, ExitReason, KernelError, Signal, SignalAction};

fn d(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn config() -> BacktestConfig {
    BacktestConfig::new("BTC/USDT", d("10000"), CostModel::new(d("0.001"), d("0.0005")).unwrap())
}

/// Two superimposed waves so crossovers and RSI extremes both occur
fn market_wave(n: usize) -> Vec<Bar> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let mut prev = Decimal::from(100);
    (0..n)
        .map(|i| {
            let t = i as f64;
            let x = 100.0
                + 8.0 * (t * std::f64::consts::TAU / 48.0).sin()
                + 3.0 * (t * std::f64::consts::TAU / 11.0).sin();
            let close = Decimal::from_f64(x).unwrap().round_dp(4);
            let open = prev;
            prev = close;
            Bar::new(
                start + Duration::hours(i as i64),
                open,
                open.max(close) + Decimal::ONE,
                open.min(close) - Decimal::ONE,
                close,
                Decimal::from(50),
            )
        })
        .collect()
}

struct Never;

impl Strategy for Never {
    fn name(&self) -> &str {
        "never"
    }

    fn required_history(&self) -> usize {
        5
    }

    fn calculate_indicators(&self, bars: &[Bar]) -> BarTable {
        BarTable::new(bars.to_vec())
    }

    fn analyze(&self, _view: TableView<'_>, _index: usize) -> Signal {
        Signal::hold()
    }
}

#[test]
fn test_batch_and_replay_agree_for_builtins() {
    let bars = market_wave(400);
    let registry = StrategyRegistry::with_builtins();

    for name in registry.names() {
        let strategy = registry.create(&name, &serde_json::Value::Null).unwrap();
        let batch = BacktestRunner::new(strategy.as_ref(), config())
            .run(&bars, None)
            .unwrap();
        let replay = ValidationRunner::new(strategy.as_ref(), config())
            .run(&bars, None)
            .unwrap();

        let comparison = compare(&batch, &replay.result, Decimal::from(2));
        assert!(comparison.matched, "{} diverged: {:?}", name, comparison);
        assert!(comparison.trades_diff <= 1);
        assert!(comparison.capital_diff_pct < Decimal::from(2));

        let expected = bars.len() - strategy.required_history();
        assert_eq!(batch.equity_curve.len(), expected);
        assert_eq!(replay.result.equity_curve.len(), expected);
        assert_eq!(replay.signals.len(), expected);
        println!(
            "✅ {}: batch {} trades / replay {} trades",
            name,
            batch.num_trades(),
            replay.result.num_trades()
        );
    }
}

#[test]
fn test_windowed_replay_matches_batch_for_sma() {
    let bars = market_wave(300);
    let registry = StrategyRegistry::with_builtins();
    let strategy = registry
        .create("ma_crossover", &serde_json::json!({"fast_period": 5, "slow_period": 20}))
        .unwrap();

    let batch = BacktestRunner::new(strategy.as_ref(), config())
        .run(&bars, None)
        .unwrap();
    let replay = ValidationRunner::new(strategy.as_ref(), config())
        .with_options(ReplayOptions { window: Some(60) })
        .run(&bars, None)
        .unwrap();

    assert!(batch.num_trades() > 0);
    assert!(compare(&batch, &replay.result, Decimal::from(2)).matched);
}

#[test]
fn test_hold_only_keeps_capital() {
    let bars = market_wave(50);
    let result = BacktestRunner::new(&Never, config()).run(&bars, None).unwrap();

    assert!(result.trades.is_empty());
    assert_eq!(result.final_capital, result.initial_capital);
    assert_eq!(result.equity_curve.len(), 45);
    assert!(result
        .equity_curve
        .iter()
        .all(|point| point.equity == d("10000")));

    let replay = ValidationRunner::new(&Never, config())
        .run(&bars, None)
        .unwrap();
    assert_eq!(replay.result.final_capital, d("10000"));
    assert!(replay
        .signals
        .iter()
        .all(|entry| entry.action == SignalAction::Hold && !entry.triggered));
}

#[test]
fn test_fixed_scenario_exact_arithmetic() {
    // Buy at close 100, sell at close 110 three bars later
    let bars = hourly_bars(&[99, 100, 104, 107, 110, 111]);
    let strategy = ScriptedStrategy::new(&[(1, SignalAction::Buy), (4, SignalAction::Sell)]);
    let result = BacktestRunner::new(&strategy, config()).run(&bars, None).unwrap();

    assert_eq!(result.num_trades(), 1);
    let trade = &result.trades[0];

    let entry = d("100") * (Decimal::ONE + d("0.0005"));
    assert_eq!(entry, d("100.05"));
    let qty = (d("10000") - d("10")) / entry;
    assert_eq!(trade.quantity, qty);
    assert!((qty - d("99.85007496251874")).abs() < d("0.000000001"));

    let exit = d("110") * (Decimal::ONE - d("0.0005"));
    assert_eq!(trade.exit_price, d("109.945"));
    let exit_fee = qty * exit * d("0.001");
    let net = (exit - entry) * qty - (d("10") + exit_fee);
    assert_eq!(trade.pnl, net);
    assert!((net - d("967.0384752623688")).abs() < d("0.000000001"));
    assert_eq!(trade.fee, d("10") + exit_fee);
    assert_eq!(result.final_capital, d("10000") + net);
    println!("✅ Fixed scenario P&L: {}", net.round_dp(6));
}

#[test]
fn test_stop_loss_wins_over_take_profit() {
    let mut bars = hourly_bars(&[100, 100, 100, 100]);
    // One bar that breaches both levels
    bars[2].high = d("120");
    bars[2].low = d("80");

    let strategy = ScriptedStrategy::new(&[(1, SignalAction::Buy)])
        .with_stop_loss(d("95"))
        .with_take_profit(d("105"));
    let result = BacktestRunner::new(&strategy, config()).run(&bars, None).unwrap();

    assert_eq!(result.num_trades(), 1);
    assert_eq!(result.trades[0].exit_reason, ExitReason::StopLoss);
    assert_eq!(result.trades[0].exit_time, start_time() + Duration::hours(2));
    assert_eq!(result.equity_curve.len(), bars.len());
}

#[test]
fn test_close_without_position_is_rejected() {
    let mut kernel = ExecutionKernel::new("BTC/USDT", d("10000"), CostModel::free());
    let err = kernel
        .close_position(start_time(), d("100"), ExitReason::Signal)
        .unwrap_err();
    assert_eq!(err, KernelError::NoPosition("BTC/USDT".to_string()));
    assert_eq!(kernel.capital(), d("10000"));
}
