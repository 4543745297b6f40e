//! Live Runner - polling loop driving the kernel against a market feed
//!
//! One engine owns one kernel and runs as one spawned task. The caller keeps a
//! `LiveHandle` to poll status and to stop the task; nothing is shared with
//! other engines.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{EngineConfig, LiveConfig};
use crate::error::{KernelError, LiveError};
use crate::executor::{ExecutionOutcome, OrderRouter};
use crate::kernel::{evaluate_risk_triggers, CostModel, ExecutionKernel};
use crate::market::{with_timeout, MarketData, OrderGateway};
use crate::notify::{dispatch, TradeEvent, TradeNotifier};
use crate::results::PerformanceSummary;
use crate::state::StateManager;
use crate::strategy::Strategy;
use crate::types::{EquityPoint, ExecutionMode, ExitReason, Position, SignalAction, Timeframe, Trade};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Stopped,
    Running,
    Stopping,
}

/// Parameters of one live session
#[derive(Debug, Clone)]
pub struct LiveSettings {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub mode: ExecutionMode,
    pub interval: Duration,
    /// Bars fetched per iteration
    pub window: usize,
    pub io_timeout: Duration,
    pub initial_capital: Decimal,
    pub cost: CostModel,
    pub position_size: Decimal,
    pub state_dir: Option<PathBuf>,
}

impl LiveSettings {
    pub fn new(symbol: &str, initial_capital: Decimal, cost: CostModel) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe: Timeframe::default(),
            mode: ExecutionMode::Paper,
            interval: Duration::from_secs(60),
            window: 100,
            io_timeout: Duration::from_secs(10),
            initial_capital,
            cost,
            position_size: Decimal::ONE,
            state_dir: None,
        }
    }

    /// Settings from configuration. Paper sessions start from `paper_balance`
    /// when one is set.
    pub fn from_config(engine: &EngineConfig, live: &LiveConfig) -> Result<Self, KernelError> {
        let initial_capital = match (live.mode, live.paper_balance) {
            (ExecutionMode::Paper, Some(balance)) => {
                crate::config::to_decimal("paper_balance", balance)?
            }
            _ => engine.initial_capital()?,
        };

        Ok(Self {
            symbol: live.symbol.clone(),
            timeframe: live.timeframe,
            mode: live.mode,
            interval: live.interval(),
            window: live.window,
            io_timeout: live.io_timeout(),
            initial_capital,
            cost: engine.cost_model()?,
            position_size: engine.position_size()?,
            state_dir: live.state_dir.clone(),
        })
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    pub fn with_position_size(mut self, position_size: Decimal) -> Self {
        self.position_size = position_size;
        self
    }

    pub fn with_state_dir(mut self, state_dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(state_dir.into());
        self
    }
}

/// Snapshot of a live session, readable while it runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveStatus {
    pub session_id: Uuid,
    pub state: EngineState,
    pub mode: ExecutionMode,
    pub symbol: String,
    pub iterations: u64,
    pub last_bar_time: Option<DateTime<Utc>>,
    pub open_position: Option<Position>,
    pub last_trade: Option<Trade>,
    pub trade_count: usize,
    pub realized_pnl: Decimal,
    pub capital: Decimal,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Everything a finished session produced
#[derive(Debug, Clone)]
pub struct LiveSession {
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub summary: PerformanceSummary,
    pub status: LiveStatus,
}

/// Caller's side of a running engine
pub struct LiveHandle {
    status: Arc<RwLock<LiveStatus>>,
    cancel: watch::Sender<bool>,
    task: JoinHandle<LiveSession>,
}

impl LiveHandle {
    pub async fn status(&self) -> LiveStatus {
        self.status.read().await.clone()
    }

    /// Ask the loop to stop at its next suspension point
    pub fn request_stop(&self) {
        let _ = self.cancel.send(true);
    }

    /// Request a stop and wait for the loop to finish its current iteration
    pub async fn stop(self) -> Result<LiveSession, LiveError> {
        self.request_stop();
        Ok(self.task.await?)
    }
}

/// Live loop engine
pub struct LiveEngine {
    strategy: Arc<dyn Strategy>,
    market: Arc<dyn MarketData>,
    router: OrderRouter,
    kernel: ExecutionKernel,
    notifiers: Vec<Arc<dyn TradeNotifier>>,
    settings: LiveSettings,
    state: Option<StateManager>,
    status: Arc<RwLock<LiveStatus>>,
    trades: Vec<Trade>,
    equity_curve: Vec<EquityPoint>,
    iterations: u64,
    last_bar_time: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl LiveEngine {
    /// Build the engine and spawn its loop
    pub fn start(
        strategy: Arc<dyn Strategy>,
        market: Arc<dyn MarketData>,
        gateway: Option<Arc<dyn OrderGateway>>,
        notifiers: Vec<Arc<dyn TradeNotifier>>,
        settings: LiveSettings,
    ) -> Result<LiveHandle, LiveError> {
        let router = OrderRouter::new(
            settings.mode,
            gateway,
            settings.io_timeout,
            settings.position_size,
        )?;

        let mut kernel =
            ExecutionKernel::new(&settings.symbol, settings.initial_capital, settings.cost);
        if settings.mode == ExecutionMode::Paper {
            kernel = kernel.with_paper_ledger();
        }

        let status = Arc::new(RwLock::new(LiveStatus {
            session_id: Uuid::new_v4(),
            state: EngineState::Running,
            mode: settings.mode,
            symbol: settings.symbol.clone(),
            iterations: 0,
            last_bar_time: None,
            open_position: None,
            last_trade: None,
            trade_count: 0,
            realized_pnl: Decimal::ZERO,
            capital: kernel.capital(),
            last_error: None,
            updated_at: Utc::now(),
        }));

        let engine = Self {
            strategy,
            market,
            router,
            kernel,
            notifiers,
            state: settings.state_dir.as_ref().map(StateManager::new),
            settings,
            status: status.clone(),
            trades: Vec::new(),
            equity_curve: Vec::new(),
            iterations: 0,
            last_bar_time: None,
            last_error: None,
        };

        let (cancel, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(engine.run(cancel_rx));

        Ok(LiveHandle {
            status,
            cancel,
            task,
        })
    }

    async fn run(mut self, mut cancel: watch::Receiver<bool>) -> LiveSession {
        match self.settings.mode {
            ExecutionMode::Paper => info!("📝 Running in PAPER TRADING mode"),
            ExecutionMode::DryRun => info!("🧪 Running in DRY RUN mode - no orders, no state changes"),
            ExecutionMode::Live => warn!("💰 Running in LIVE TRADING mode - REAL MONEY AT RISK"),
        }
        info!(
            "Live loop starting: {} {} on {} every {:?}",
            self.strategy.name(),
            self.settings.symbol,
            self.settings.timeframe,
            self.settings.interval
        );

        if let Some(state) = &self.state {
            if let Err(e) = state.init().await {
                warn!("State directory unavailable: {}", e);
            }
        }

        loop {
            if *cancel.borrow() {
                break;
            }

            self.iterations += 1;
            if let Err(e) = self.run_iteration().await {
                error!("Iteration {} abandoned: {}", self.iterations, e);
                self.last_error = Some(e.to_string());
            }
            self.publish(EngineState::Running).await;

            let stop = tokio::select! {
                _ = tokio::time::sleep(self.settings.interval) => false,
                changed = cancel.changed() => changed.is_err(),
            };
            if stop {
                break;
            }
        }

        self.publish(EngineState::Stopping).await;
        info!("Live loop stopping after {} iterations", self.iterations);
        self.publish(EngineState::Stopped).await;

        let open_positions = usize::from(self.kernel.has_position());
        let summary = PerformanceSummary::from_trades(&self.trades, open_positions);
        info!(
            "Session summary: {} trades | P&L: {} | Win rate: {}% | Open: {}",
            summary.total_trades,
            summary.total_pnl.round_dp(4),
            summary.win_rate.round_dp(2),
            summary.open_positions
        );

        let status = self.status.read().await.clone();
        LiveSession {
            trades: self.trades,
            equity_curve: self.equity_curve,
            summary,
            status,
        }
    }

    /// Fetch, evaluate the newest bar, route. An error leaves the kernel as it was.
    async fn run_iteration(&mut self) -> Result<(), LiveError> {
        let bars = with_timeout(
            "fetch_bars",
            self.settings.io_timeout,
            self.market.fetch_bars(
                &self.settings.symbol,
                self.settings.timeframe,
                None,
                self.settings.window,
            ),
        )
        .await?;

        self.strategy.validate_data(&bars)?;

        let required = self.strategy.required_history();
        if bars.len() < required + 1 {
            debug!("Warming up: {} of {} bars", bars.len(), required + 1);
            return Ok(());
        }

        let bar = match bars.last() {
            Some(bar) => bar.clone(),
            None => return Ok(()),
        };
        if let Some(last) = self.last_bar_time {
            if bar.timestamp <= last {
                debug!("No new bar since {}", last);
                return Ok(());
            }
        }

        let trigger = self
            .kernel
            .position()
            .and_then(|position| evaluate_risk_triggers(position, &bar).exit());

        if let Some((reason, price)) = trigger {
            info!("{} hit at {} on bar {}", reason, price, bar.timestamp);
            let outcome = self
                .router
                .close(&mut self.kernel, bar.timestamp, price, reason)
                .await?;
            self.record(outcome).await;
        } else {
            let table = self.strategy.calculate_indicators(&bars);
            let index = table.len() - 1;
            let signal = self.strategy.analyze(table.view_to(index), index);
            debug!(
                "Signal at {}: {} ({:.2})",
                bar.timestamp, signal.action, signal.strength
            );

            match signal.action {
                SignalAction::Buy if !self.kernel.has_position() => {
                    match self
                        .router
                        .open_long(&mut self.kernel, bar.timestamp, bar.close, &signal)
                        .await
                    {
                        Ok(outcome) => self.record(outcome).await,
                        Err(LiveError::Kernel(e @ KernelError::InsufficientFunds { .. })) => {
                            warn!("Skipping entry at {}: {}", bar.timestamp, e);
                            self.last_error = Some(e.to_string());
                        }
                        Err(e) => return Err(e),
                    }
                }
                SignalAction::Sell if self.kernel.has_position() => {
                    let outcome = self
                        .router
                        .close(&mut self.kernel, bar.timestamp, bar.close, ExitReason::Signal)
                        .await?;
                    self.record(outcome).await;
                }
                _ => {}
            }
        }

        self.last_bar_time = Some(bar.timestamp);
        self.equity_curve
            .push(self.kernel.equity(bar.close, bar.timestamp));
        Ok(())
    }

    async fn record(&mut self, outcome: ExecutionOutcome) {
        let mode = self.settings.mode;
        match outcome {
            ExecutionOutcome::Opened(position) => {
                dispatch(&self.notifiers, &TradeEvent::opened(&position, mode)).await;
            }
            ExecutionOutcome::Closed(trade) => {
                dispatch(&self.notifiers, &TradeEvent::closed(&trade, mode)).await;
                self.trades.push(trade);
            }
            ExecutionOutcome::Logged(_) => {}
        }
    }

    async fn publish(&self, state: EngineState) {
        let snapshot = LiveStatus {
            session_id: self.status.read().await.session_id,
            state,
            mode: self.settings.mode,
            symbol: self.settings.symbol.clone(),
            iterations: self.iterations,
            last_bar_time: self.last_bar_time,
            open_position: self.kernel.position().cloned(),
            last_trade: self.trades.last().cloned(),
            trade_count: self.trades.len(),
            realized_pnl: self.trades.iter().map(|t| t.pnl).sum(),
            capital: self.kernel.capital(),
            last_error: self.last_error.clone(),
            updated_at: Utc::now(),
        };

        if let Some(manager) = &self.state {
            if let Err(e) = manager.write_status(&snapshot).await {
                warn!("Failed to write status: {}", e);
            }
        }

        *self.status.write().await = snapshot;
    }
}
