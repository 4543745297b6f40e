//! Market Gateway HTTP Client
//!
//! Implements the market-data and order collaborators against the gateway's
//! REST API:
//!
//! - `GET  /v1/candles/{symbol}?timeframe=&limit=[&since=]`
//! - `GET  /v1/ticker/{symbol}`
//! - `POST /v1/orders`
//! - `GET  /v1/balance/{currency}`
//!
//! Symbols are path-encoded with `/` replaced by `-` (`BTC/USDT` -> `BTC-USDT`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::ExchangeError;
use crate::market::{ExchangeBalance, MarketData, OrderGateway, OrderRequest, Ticker};
use crate::types::{Bar, Fill, Timeframe};

/// Client for the market gateway service
pub struct HttpExchangeClient {
    client: Client,
    base_url: String,
}

impl HttpExchangeClient {
    /// Create new gateway client
    pub fn new(base_url: &str) -> Result<Self, ExchangeError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn path_symbol(symbol: &str) -> String {
        symbol.replace('/', "-")
    }

    /// Turn a non-2xx response into `ExchangeError::Status`
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ExchangeError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            Err(ExchangeError::Status { status, body })
        }
    }
}

#[derive(Debug, Deserialize)]
struct CandlesResponse {
    #[allow(dead_code)]
    symbol: String,
    candles: Vec<Bar>,
}

#[derive(Debug, Serialize)]
struct CandlesQuery {
    timeframe: &'static str,
    limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    since: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum OrderStatus {
    Filled,
    Rejected,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    order_id: String,
    status: OrderStatus,
    #[serde(default)]
    filled_price: Option<Decimal>,
    #[serde(default)]
    filled_quantity: Option<Decimal>,
    #[serde(default)]
    fee: Option<Decimal>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    free: Decimal,
    used: Decimal,
}

#[async_trait]
impl MarketData for HttpExchangeClient {
    async fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Bar>, ExchangeError> {
        let url = format!("{}/v1/candles/{}", self.base_url, Self::path_symbol(symbol));
        let query = CandlesQuery {
            timeframe: timeframe.as_str(),
            limit,
            since: since.map(|t| t.to_rfc3339()),
        };

        debug!("Fetching {} {} candles from {}", limit, timeframe, url);

        let response = self.client.get(&url).query(&query).send().await?;
        let data: CandlesResponse = Self::check(response).await?.json().await?;

        if data.candles.is_empty() {
            return Err(ExchangeError::NoData(format!("no candles for {}", symbol)));
        }
        Ok(data.candles)
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, ExchangeError> {
        let url = format!("{}/v1/ticker/{}", self.base_url, Self::path_symbol(symbol));
        let response = self.client.get(&url).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }
}

#[async_trait]
impl OrderGateway for HttpExchangeClient {
    async fn submit_order(&self, order: &OrderRequest) -> Result<Fill, ExchangeError> {
        let url = format!("{}/v1/orders", self.base_url);

        let response = self.client.post(&url).json(order).send().await?;
        let resp: OrderResponse = Self::check(response).await?.json().await?;

        match resp.status {
            OrderStatus::Filled => {
                let (price, quantity) = match (resp.filled_price, resp.filled_quantity) {
                    (Some(p), Some(q)) => (p, q),
                    _ => {
                        return Err(ExchangeError::Rejected(format!(
                            "order {} reported filled without price/quantity",
                            resp.order_id
                        )))
                    }
                };
                info!(
                    "✓ Order {} filled: {} {} @ {}",
                    resp.order_id, order.side, quantity, price
                );
                Ok(Fill {
                    price,
                    quantity,
                    fee: resp.fee.unwrap_or(Decimal::ZERO),
                })
            }
            OrderStatus::Rejected => Err(ExchangeError::Rejected(
                resp.reason.unwrap_or_else(|| format!("order {} rejected", resp.order_id)),
            )),
        }
    }

    async fn fetch_balance(&self, currency: &str) -> Result<ExchangeBalance, ExchangeError> {
        let url = format!("{}/v1/balance/{}", self.base_url, currency);
        let response = self.client.get(&url).send().await?;
        let data: BalanceResponse = Self::check(response).await?.json().await?;
        Ok(ExchangeBalance {
            free: data.free,
            used: data.used,
        })
    }
}
