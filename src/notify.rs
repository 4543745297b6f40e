//! Trade notifications - opened/closed position events
//!
//! Notification is fire-and-forget from the engine's point of view: a failed
//! delivery is logged and never rolls back a trade.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::types::{ExecutionMode, Position, Trade};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeEventType {
    PositionOpened,
    PositionClosed,
}

/// One notification payload
#[derive(Debug, Clone, Serialize)]
pub struct TradeEvent {
    pub event_type: TradeEventType,
    pub message: String,
    pub metadata: Option<serde_json::Value>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl TradeEvent {
    pub fn opened(position: &Position, mode: ExecutionMode) -> Self {
        Self {
            event_type: TradeEventType::PositionOpened,
            message: format!(
                "[{}] Opened {} {} | Qty: {} @ {}",
                mode, position.side, position.symbol, position.quantity, position.entry_price
            ),
            metadata: serde_json::to_value(position).ok(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn closed(trade: &Trade, mode: ExecutionMode) -> Self {
        Self {
            event_type: TradeEventType::PositionClosed,
            message: format!(
                "[{}] Closed {} {} ({}) | P&L: {} ({}%)",
                mode,
                trade.side,
                trade.symbol,
                trade.exit_reason,
                trade.pnl.round_dp(4),
                trade.pnl_percent.round_dp(2)
            ),
            metadata: serde_json::to_value(trade).ok(),
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Downstream consumer of trade events
#[async_trait]
pub trait TradeNotifier: Send + Sync {
    async fn notify(&self, event: &TradeEvent) -> anyhow::Result<()>;
}

/// Writes events to the log
pub struct LogNotifier;

#[async_trait]
impl TradeNotifier for LogNotifier {
    async fn notify(&self, event: &TradeEvent) -> anyhow::Result<()> {
        info!("📣 {}", event.message);
        Ok(())
    }
}

/// POSTs events as JSON to a webhook URL
pub struct WebhookNotifier {
    url: String,
    client: Client,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.to_string(),
            client,
        })
    }
}

#[async_trait]
impl TradeNotifier for WebhookNotifier {
    async fn notify(&self, event: &TradeEvent) -> anyhow::Result<()> {
        let response = self.client.post(&self.url).json(event).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Webhook failed: {} - {}", status, body));
        }

        debug!("Webhook notification sent");
        Ok(())
    }
}

/// Send `event` to every notifier, logging failures
pub async fn dispatch(notifiers: &[Arc<dyn TradeNotifier>], event: &TradeEvent) {
    for notifier in notifiers {
        if let Err(e) = notifier.notify(event).await {
            error!("Failed to send notification: {}", e);
        }
    }
}
