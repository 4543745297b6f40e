//! Paper balance ledger - virtual free/used balances per currency

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::error::KernelError;

/// Free and reserved balance for one currency
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub free: Decimal,
    pub used: Decimal,
}

impl Balance {
    pub fn total(&self) -> Decimal {
        self.free + self.used
    }
}

/// Virtual balances for paper trading
///
/// Quote free + used always equals the kernel's realized capital.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceLedger {
    pub base: String,
    pub quote: String,
    balances: HashMap<String, Balance>,
    pub last_updated: chrono::DateTime<chrono::Utc>,
}

/// Ledger snapshot for reporting
#[derive(Debug, Clone, Serialize)]
pub struct LedgerSnapshot {
    pub quote: String,
    pub quote_free: Decimal,
    pub quote_used: Decimal,
    pub base: String,
    pub base_free: Decimal,
}

impl BalanceLedger {
    /// Create a ledger funded with `starting_quote` of the quote currency
    pub fn new(base: &str, quote: &str, starting_quote: Decimal) -> Self {
        let mut balances = HashMap::new();
        balances.insert(
            quote.to_string(),
            Balance {
                free: starting_quote,
                used: Decimal::ZERO,
            },
        );
        balances.insert(base.to_string(), Balance::default());

        Self {
            base: base.to_string(),
            quote: quote.to_string(),
            balances,
            last_updated: chrono::Utc::now(),
        }
    }

    /// Balance for a currency (zero if never seen)
    pub fn balance(&self, currency: &str) -> Balance {
        self.balances.get(currency).copied().unwrap_or_default()
    }

    pub fn quote_free(&self) -> Decimal {
        self.balance(&self.quote).free
    }

    /// Check that `trade_capital` can be reserved
    pub fn can_reserve(&self, trade_capital: Decimal) -> Result<(), KernelError> {
        let available = self.quote_free();
        if trade_capital <= Decimal::ZERO || available < trade_capital {
            return Err(KernelError::InsufficientFunds {
                required: trade_capital,
                available,
            });
        }
        Ok(())
    }

    /// Reserve quote for an entry and credit the acquired base quantity
    pub fn reserve(&mut self, trade_capital: Decimal, quantity: Decimal) -> Result<(), KernelError> {
        self.can_reserve(trade_capital)?;

        let quote = self.balances.entry(self.quote.clone()).or_default();
        quote.free -= trade_capital;
        quote.used += trade_capital;

        let base = self.balances.entry(self.base.clone()).or_default();
        base.free += quantity;

        self.last_updated = chrono::Utc::now();
        debug!(
            "Reserved {} {} for {} {}",
            trade_capital, self.quote, quantity, self.base
        );
        Ok(())
    }

    /// Release a reservation and book the realized net P&L
    pub fn release(&mut self, trade_capital: Decimal, quantity: Decimal, net_pnl: Decimal) {
        let quote = self.balances.entry(self.quote.clone()).or_default();
        quote.used -= trade_capital;
        quote.free += trade_capital + net_pnl;

        let base = self.balances.entry(self.base.clone()).or_default();
        base.free -= quantity;

        self.last_updated = chrono::Utc::now();
        info!(
            "Paper balance: {} {} free | Realized: {}",
            self.quote_free(),
            self.quote,
            net_pnl
        );
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let quote = self.balance(&self.quote);
        LedgerSnapshot {
            quote: self.quote.clone(),
            quote_free: quote.free,
            quote_used: quote.used,
            base: self.base.clone(),
            base_free: self.balance(&self.base).free,
        }
    }
}
