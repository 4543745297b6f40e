//! In-memory market, order gateway and strategy doubles for the live loop

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tradeloop::error::ExchangeError;
use tradeloop::market::{ExchangeBalance, MarketData, OrderGateway, OrderRequest, Ticker};
use tradeloop::strategy::{BarTable, Strategy, TableView};
use tradeloop::{Bar, Fill, Signal, SignalAction, Timeframe};

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// Hourly bars from closes. Open is the previous close, high/low pad by 1.
pub fn hourly_bars(closes: &[i64]) -> Vec<Bar> {
    let mut prev = closes.first().copied().unwrap_or(100);
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = prev;
            prev = close;
            Bar::new(
                start_time() + ChronoDuration::hours(i as i64),
                Decimal::from(open),
                Decimal::from(open.max(close) + 1),
                Decimal::from(open.min(close) - 1),
                Decimal::from(close),
                Decimal::from(1000),
            )
        })
        .collect()
}

/// Replays a bar series one bar per successful fetch.
///
/// Fetch `n` returns the trailing `limit` bars of `series[..=n]`; once the
/// series is exhausted the same window is served again. Failed or delayed
/// calls do not advance the cursor.
pub struct MockMarket {
    series: Vec<Bar>,
    cursor: AtomicUsize,
    calls: AtomicUsize,
    fail_calls: Mutex<HashSet<usize>>,
    delay_calls: Mutex<HashMap<usize, Duration>>,
}

impl MockMarket {
    pub fn new(series: Vec<Bar>) -> Self {
        Self {
            series,
            cursor: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            fail_calls: Mutex::new(HashSet::new()),
            delay_calls: Mutex::new(HashMap::new()),
        }
    }

    /// Fail the given (0-based) fetch calls with a 503
    pub fn failing_on(self, calls: &[usize]) -> Self {
        self.fail_calls.lock().unwrap().extend(calls.iter().copied());
        self
    }

    /// Stall the given fetch calls
    pub fn delaying(self, call: usize, delay: Duration) -> Self {
        self.delay_calls.lock().unwrap().insert(call, delay);
        self
    }

    pub fn fetch_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn series_len(&self) -> usize {
        self.series.len()
    }

    /// Close of the newest bar served so far
    pub fn last_close(&self) -> Decimal {
        let end = self.cursor.load(Ordering::SeqCst).min(self.series.len());
        self.series[end.saturating_sub(1)].close
    }
}

#[async_trait]
impl MarketData for MockMarket {
    async fn fetch_bars(
        &self,
        _symbol: &str,
        _timeframe: Timeframe,
        _since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Bar>, ExchangeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.delay_calls.lock().unwrap().get(&call).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_calls.lock().unwrap().contains(&call) {
            return Err(ExchangeError::Status {
                status: 503,
                body: "service unavailable".to_string(),
            });
        }

        let end = (self.cursor.load(Ordering::SeqCst) + 1).min(self.series.len());
        self.cursor.store(end, Ordering::SeqCst);
        let start = end.saturating_sub(limit);
        Ok(self.series[start..end].to_vec())
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, ExchangeError> {
        Ok(Ticker {
            symbol: symbol.to_string(),
            last: self.last_close(),
            timestamp: None,
        })
    }
}

/// Fills every order at the market's newest close with a flat fee rate
pub struct MockGateway {
    market: Arc<MockMarket>,
    pub fee_rate: Decimal,
    pub free_balance: Decimal,
    pub orders: Mutex<Vec<OrderRequest>>,
    pub fills: Mutex<Vec<Fill>>,
    pub balance_calls: AtomicUsize,
}

impl MockGateway {
    pub fn new(market: Arc<MockMarket>, fee_rate: Decimal, free_balance: Decimal) -> Self {
        Self {
            market,
            fee_rate,
            free_balance,
            orders: Mutex::new(Vec::new()),
            fills: Mutex::new(Vec::new()),
            balance_calls: AtomicUsize::new(0),
        }
    }

    pub fn orders(&self) -> Vec<OrderRequest> {
        self.orders.lock().unwrap().clone()
    }

    pub fn fills(&self) -> Vec<Fill> {
        self.fills.lock().unwrap().clone()
    }
}

#[async_trait]
impl OrderGateway for MockGateway {
    async fn submit_order(&self, order: &OrderRequest) -> Result<Fill, ExchangeError> {
        let price = self.market.last_close();
        let fill = Fill {
            price,
            quantity: order.quantity,
            fee: price * order.quantity * self.fee_rate,
        };
        self.orders.lock().unwrap().push(order.clone());
        self.fills.lock().unwrap().push(fill);
        Ok(fill)
    }

    async fn fetch_balance(&self, _currency: &str) -> Result<ExchangeBalance, ExchangeError> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        Ok(ExchangeBalance {
            free: self.free_balance,
            used: Decimal::ZERO,
        })
    }
}

/// Emits fixed actions at fixed bar positions (hours since `start_time`)
pub struct ScriptedStrategy {
    actions: HashMap<i64, SignalAction>,
    stop_loss: Option<Decimal>,
    take_profit: Option<Decimal>,
    required: usize,
}

impl ScriptedStrategy {
    pub fn new(actions: &[(i64, SignalAction)]) -> Self {
        Self {
            actions: actions.iter().copied().collect(),
            stop_loss: None,
            take_profit: None,
            required: 0,
        }
    }

    pub fn with_stop_loss(mut self, stop_loss: Decimal) -> Self {
        self.stop_loss = Some(stop_loss);
        self
    }

    pub fn with_take_profit(mut self, take_profit: Decimal) -> Self {
        self.take_profit = Some(take_profit);
        self
    }

    pub fn with_required_history(mut self, required: usize) -> Self {
        self.required = required;
        self
    }
}

impl Strategy for ScriptedStrategy {
    fn name(&self) -> &str {
        "scripted"
    }

    fn required_history(&self) -> usize {
        self.required
    }

    fn calculate_indicators(&self, bars: &[Bar]) -> BarTable {
        BarTable::new(bars.to_vec())
    }

    fn analyze(&self, view: TableView<'_>, index: usize) -> Signal {
        let position = match view.bar(index) {
            Some(bar) => (bar.timestamp - start_time()).num_hours(),
            None => return Signal::hold(),
        };
        match self.actions.get(&position) {
            Some(SignalAction::Buy) => {
                let mut signal = Signal::buy(1.0);
                signal.risk.stop_loss = self.stop_loss;
                signal.risk.take_profit = self.take_profit;
                signal
            }
            Some(SignalAction::Sell) => Signal::sell(1.0),
            _ => Signal::hold(),
        }
    }
}
