//! Order routing - turns a kernel decision into a mode-specific side effect
//!
//! - `Paper`: the kernel's simulated fill, mutating the paper ledger
//! - `DryRun`: the would-be order is logged, nothing is mutated
//! - `Live`: a real order through the `OrderGateway`; the exchange fill is
//!   applied through the same kernel code as the simulated one
//!
//! Exchange failures surface as errors before any kernel mutation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{ExchangeError, KernelError, LiveError};
use crate::kernel::ExecutionKernel;
use crate::market::{with_timeout, OrderGateway, OrderRequest};
use crate::types::{split_symbol, ExecutionMode, ExitReason, Position, Side, Signal, Trade};

/// What an order request ended up doing
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Opened(Position),
    Closed(Trade),
    /// Dry run: the intent that would have been sent
    Logged(String),
}

/// Routes entries and exits according to the execution mode
pub struct OrderRouter {
    mode: ExecutionMode,
    gateway: Option<Arc<dyn OrderGateway>>,
    io_timeout: Duration,
    position_size: Decimal,
}

impl OrderRouter {
    pub fn new(
        mode: ExecutionMode,
        gateway: Option<Arc<dyn OrderGateway>>,
        io_timeout: Duration,
        position_size: Decimal,
    ) -> Result<Self, LiveError> {
        if mode == ExecutionMode::Live && gateway.is_none() {
            return Err(LiveError::MissingOrderGateway);
        }
        Ok(Self {
            mode,
            gateway,
            io_timeout,
            position_size,
        })
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    fn gateway(&self) -> Result<&Arc<dyn OrderGateway>, LiveError> {
        self.gateway.as_ref().ok_or(LiveError::MissingOrderGateway)
    }

    /// Enter a long position at `reference_price`
    pub async fn open_long(
        &self,
        kernel: &mut ExecutionKernel,
        timestamp: DateTime<Utc>,
        reference_price: Decimal,
        signal: &Signal,
    ) -> Result<ExecutionOutcome, LiveError> {
        match self.mode {
            ExecutionMode::Paper => {
                let position = kernel.open_position(
                    timestamp,
                    reference_price,
                    Side::Long,
                    self.position_size,
                    signal,
                )?;
                Ok(ExecutionOutcome::Opened(position))
            }
            ExecutionMode::DryRun => {
                let plan = kernel.plan_entry(
                    kernel.available_capital(),
                    reference_price,
                    Side::Long,
                    self.position_size,
                )?;
                let intent = format!(
                    "BUY {} {} @ ~{} (capital {}, fee {})",
                    plan.quantity.round_dp(8),
                    kernel.symbol(),
                    plan.exec_price,
                    plan.trade_capital,
                    plan.fee
                );
                warn!("🧪 DRY RUN - would {}", intent);
                Ok(ExecutionOutcome::Logged(intent))
            }
            ExecutionMode::Live => {
                let gateway = self.gateway()?;
                let (_, quote) = split_symbol(kernel.symbol());

                let balance = with_timeout(
                    "fetch_balance",
                    self.io_timeout,
                    gateway.fetch_balance(quote),
                )
                .await?;
                if balance.free <= Decimal::ZERO {
                    return Err(KernelError::InsufficientFunds {
                        required: Decimal::ZERO,
                        available: balance.free,
                    }
                    .into());
                }

                let available = balance.free.min(kernel.capital());
                let plan =
                    kernel.plan_entry(available, reference_price, Side::Long, self.position_size)?;
                let order =
                    OrderRequest::market(kernel.symbol(), Side::Long.entry_order(), plan.quantity);

                let fill = self.submit(gateway, &order).await?;
                let committed = fill.price * fill.quantity + fill.fee;
                let position = kernel
                    .apply_entry(timestamp, Side::Long, fill, committed, signal.risk)?
                    .clone();
                Ok(ExecutionOutcome::Opened(position))
            }
        }
    }

    /// Close the open position at `reference_price`
    pub async fn close(
        &self,
        kernel: &mut ExecutionKernel,
        timestamp: DateTime<Utc>,
        reference_price: Decimal,
        reason: ExitReason,
    ) -> Result<ExecutionOutcome, LiveError> {
        match self.mode {
            ExecutionMode::Paper => {
                let trade = kernel.close_position(timestamp, reference_price, reason)?;
                Ok(ExecutionOutcome::Closed(trade))
            }
            ExecutionMode::DryRun => {
                let intent = format!("CLOSE {} @ ~{} ({})", kernel.symbol(), reference_price, reason);
                warn!("🧪 DRY RUN - would {}", intent);
                Ok(ExecutionOutcome::Logged(intent))
            }
            ExecutionMode::Live => {
                let gateway = self.gateway()?;
                let plan = kernel.plan_exit(reference_price)?;
                let order =
                    OrderRequest::market(kernel.symbol(), plan.side.exit_order(), plan.quantity);

                let fill = self.submit(gateway, &order).await?;
                let trade = kernel.apply_exit(timestamp, fill, reason)?;
                Ok(ExecutionOutcome::Closed(trade))
            }
        }
    }

    async fn submit(
        &self,
        gateway: &Arc<dyn OrderGateway>,
        order: &OrderRequest,
    ) -> Result<crate::types::Fill, LiveError> {
        info!(
            "📤 Submitting {} {} {} (client id {})",
            order.side, order.quantity, order.symbol, order.client_order_id
        );
        match with_timeout("submit_order", self.io_timeout, gateway.submit_order(order)).await {
            Ok(fill) => Ok(fill),
            Err(e @ ExchangeError::Timeout { .. }) => {
                warn!(
                    "Order {} timed out; it may still fill on the exchange",
                    order.client_order_id
                );
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }
}
