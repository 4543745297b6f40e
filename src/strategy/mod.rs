//! Strategy collaborator - trait, bar tables and the name-keyed registry
//!
//! Runners only ever talk to `dyn Strategy`. They never read indicator
//! columns themselves; a strategy annotates its own `BarTable` and reads it
//! back through the `TableView` it is handed.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{DataError, StrategyError};
use crate::types::{Bar, Signal};

pub mod indicators;
pub mod ma_crossover;
pub mod rsi_reversion;
pub mod table;

pub use ma_crossover::MaCrossover;
pub use rsi_reversion::RsiReversion;
pub use table::{parse_bar_rows, validate_bars, BarTable, TableView, REQUIRED_COLUMNS};

/// Core strategy trait - all signal generators implement this
pub trait Strategy: Send + Sync {
    /// Registry name
    fn name(&self) -> &str;

    /// Minimum bars before signals are meaningful
    fn required_history(&self) -> usize;

    /// Annotate bars with this strategy's indicator columns
    fn calculate_indicators(&self, bars: &[Bar]) -> BarTable;

    /// Signal for bar `index`. Rows past the view's bound are unreachable.
    fn analyze(&self, view: TableView<'_>, index: usize) -> Signal;

    /// Reject input the strategy cannot work with
    fn validate_data(&self, bars: &[Bar]) -> Result<(), DataError> {
        validate_bars(bars)
    }

    /// Current parameters (for display/debugging)
    fn params(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

/// Builds a strategy from a JSON params object
pub type StrategyFactory =
    Box<dyn Fn(&serde_json::Value) -> Result<Box<dyn Strategy>, StrategyError> + Send + Sync>;

/// Name-keyed strategy constructors. Passed around explicitly, never global.
pub struct StrategyRegistry {
    factories: BTreeMap<String, StrategyFactory>,
}

impl StrategyRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry with the built-in strategies
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(
            ma_crossover::NAME,
            Box::new(|params: &serde_json::Value| Ok(Box::new(MaCrossover::from_params(params)?) as Box<dyn Strategy>)),
        );
        registry.register(
            rsi_reversion::NAME,
            Box::new(|params: &serde_json::Value| Ok(Box::new(RsiReversion::from_params(params)?) as Box<dyn Strategy>)),
        );
        registry
    }

    /// Register (or replace) a factory under `name`
    pub fn register(&mut self, name: &str, factory: StrategyFactory) {
        debug!("Registered strategy: {}", name);
        self.factories.insert(name.to_string(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Sorted strategy names
    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Instantiate `name` with `params`
    pub fn create(
        &self,
        name: &str,
        params: &serde_json::Value,
    ) -> Result<Arc<dyn Strategy>, StrategyError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| StrategyError::Unknown(name.to_string()))?;
        factory(params).map(Arc::from)
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
