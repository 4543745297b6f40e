//! Market-data and order collaborator interfaces
//!
//! The live loop only ever sees these traits. `HttpExchangeClient` implements
//! both against the market gateway; tests script them with in-memory mocks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

use crate::error::ExchangeError;
use crate::types::{Bar, Fill, OrderSide, Timeframe};

/// Latest traded price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last: Decimal,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    #[default]
    Market,
    Limit,
}

/// Order sent to the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Idempotency key
    pub client_order_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub order_type: OrderType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
}

impl OrderRequest {
    pub fn market(symbol: &str, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            client_order_id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            side,
            quantity,
            order_type: OrderType::Market,
            price: None,
        }
    }
}

/// Exchange-reported balance for one currency
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ExchangeBalance {
    pub free: Decimal,
    pub used: Decimal,
}

/// Source of OHLCV bars and tickers
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Most recent bars, oldest first
    async fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Bar>, ExchangeError>;

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, ExchangeError>;
}

/// Real order placement (live mode only)
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn submit_order(&self, order: &OrderRequest) -> Result<Fill, ExchangeError>;

    async fn fetch_balance(&self, currency: &str) -> Result<ExchangeBalance, ExchangeError>;
}

/// Run a collaborator call with an upper bound on its latency
pub async fn with_timeout<T, F>(operation: &str, after: Duration, call: F) -> Result<T, ExchangeError>
where
    F: Future<Output = Result<T, ExchangeError>>,
{
    match tokio::time::timeout(after, call).await {
        Ok(result) => result,
        Err(_) => Err(ExchangeError::Timeout {
            operation: operation.to_string(),
            after,
        }),
    }
}
