//! Tradeloop Library
//!
//! Strategy execution engine: one execution kernel shared by a batch
//! backtest runner, a no-look-ahead validation replay, and a live polling
//! loop with paper, dry-run and live order routing.

pub mod backtest;
pub mod client;
pub mod compare;
pub mod config;
pub mod error;
pub mod executor;
pub mod kernel;
pub mod market;
pub mod notify;
pub mod portfolio;
pub mod replay;
pub mod results;
pub mod runner;
pub mod state;
pub mod strategy;
pub mod types;


// Re-export main types for convenience
pub use backtest::{BacktestConfig, BacktestRunner};
pub use client::HttpExchangeClient;
pub use compare::{compare, Comparison};
pub use self::config::{AppConfig, EngineConfig, LiveConfig, StrategyConfig};
pub use error::{DataError, ExchangeError, KernelError, LiveError, RunnerError, StrategyError};
pub use executor::{ExecutionOutcome, OrderRouter};
pub use kernel::{CostModel, ExecutionKernel};
pub use market::{MarketData, OrderGateway, OrderRequest};
pub use notify::{LogNotifier, TradeEvent, TradeNotifier, WebhookNotifier};
pub use portfolio::{Balance, BalanceLedger};
pub use replay::{ReplayOptions, ReplayReport, ValidationRunner};
pub use results::{PerformanceSummary, RunResult};
pub use runner::{EngineState, LiveEngine, LiveHandle, LiveSession, LiveSettings, LiveStatus};
pub use strategy::{Strategy, StrategyRegistry};
pub use types::{
    Bar, EquityPoint, ExecutionMode, ExitReason, Fill, Position, Side, Signal, SignalAction,
    Timeframe, Trade,
};
