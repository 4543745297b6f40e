//! Bar tables, exposure-bounded views and input validation

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::error::DataError;
use crate::types::Bar;

/// Columns every bar row must carry
pub const REQUIRED_COLUMNS: [&str; 6] = ["timestamp", "open", "high", "low", "close", "volume"];

/// Ordered bars plus named indicator columns
///
/// Indicator values are `None` during warm-up.
#[derive(Debug, Clone, Default)]
pub struct BarTable {
    bars: Vec<Bar>,
    columns: BTreeMap<String, Vec<Option<Decimal>>>,
}

impl BarTable {
    pub fn new(bars: Vec<Bar>) -> Self {
        Self {
            bars,
            columns: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn closes(&self) -> Vec<Decimal> {
        self.bars.iter().map(|b| b.close).collect()
    }

    /// Attach an indicator column. Short columns are padded with `None`.
    pub fn insert_column(&mut self, name: &str, mut values: Vec<Option<Decimal>>) {
        values.resize(self.bars.len(), None);
        self.columns.insert(name.to_string(), values);
    }

    pub fn column(&self, name: &str) -> Option<&[Option<Decimal>]> {
        self.columns.get(name).map(|v| v.as_slice())
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.keys().map(|k| k.as_str()).collect()
    }

    /// View over the whole table
    pub fn view(&self) -> TableView<'_> {
        TableView {
            table: self,
            end: self.bars.len(),
        }
    }

    /// View that ends at (and includes) `index`
    pub fn view_to(&self, index: usize) -> TableView<'_> {
        TableView {
            table: self,
            end: (index + 1).min(self.bars.len()),
        }
    }
}

/// Read-only view of a `BarTable` truncated at an exposure bound.
///
/// Rows at or beyond the bound are unreachable, so a strategy handed a view
/// ending at the current bar cannot read later data.
#[derive(Debug, Clone, Copy)]
pub struct TableView<'a> {
    table: &'a BarTable,
    end: usize,
}

impl<'a> TableView<'a> {
    /// Number of visible rows
    pub fn len(&self) -> usize {
        self.end
    }

    pub fn is_empty(&self) -> bool {
        self.end == 0
    }

    pub fn bars(&self) -> &'a [Bar] {
        &self.table.bars[..self.end]
    }

    pub fn bar(&self, index: usize) -> Option<&'a Bar> {
        self.bars().get(index)
    }

    /// Indicator value at `index`, `None` if hidden, missing or warming up
    pub fn value(&self, column: &str, index: usize) -> Option<Decimal> {
        if index >= self.end {
            return None;
        }
        self.table
            .columns
            .get(column)
            .and_then(|values| values.get(index).copied().flatten())
    }
}

/// Reject empty, malformed or unordered bar sequences
pub fn validate_bars(bars: &[Bar]) -> Result<(), DataError> {
    if bars.is_empty() {
        return Err(DataError::Empty);
    }

    for (index, bar) in bars.iter().enumerate() {
        let malformed = |reason: &str| DataError::MalformedBar {
            index,
            reason: reason.to_string(),
        };

        if bar.open <= Decimal::ZERO
            || bar.high <= Decimal::ZERO
            || bar.low <= Decimal::ZERO
            || bar.close <= Decimal::ZERO
        {
            return Err(malformed("non-positive price"));
        }
        if bar.high < bar.low {
            return Err(malformed("high below low"));
        }
        if bar.open > bar.high || bar.open < bar.low {
            return Err(malformed("open outside high/low range"));
        }
        if bar.close > bar.high || bar.close < bar.low {
            return Err(malformed("close outside high/low range"));
        }
        if bar.volume < Decimal::ZERO {
            return Err(malformed("negative volume"));
        }
        if index > 0 && bar.timestamp <= bars[index - 1].timestamp {
            return Err(DataError::UnorderedTimestamps(index));
        }
    }

    Ok(())
}

/// Parse loosely-typed JSON rows (as exported by data tools) into bars.
///
/// Prices may be numbers or strings; timestamps RFC 3339 strings or epoch
/// milliseconds.
pub fn parse_bar_rows(rows: &[serde_json::Value]) -> Result<Vec<Bar>, DataError> {
    if rows.is_empty() {
        return Err(DataError::Empty);
    }

    let mut bars = Vec::with_capacity(rows.len());
    for (index, row) in rows.iter().enumerate() {
        let obj = row.as_object().ok_or_else(|| DataError::MalformedBar {
            index,
            reason: "row is not an object".to_string(),
        })?;

        let missing: Vec<String> = REQUIRED_COLUMNS
            .iter()
            .filter(|col| !obj.contains_key(**col))
            .map(|col| col.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(DataError::MissingColumns(missing));
        }

        let num = |col: &str| parse_decimal(&obj[col]).ok_or_else(|| DataError::MalformedBar {
            index,
            reason: format!("bad {} value", col),
        });

        let timestamp = parse_timestamp(&obj["timestamp"]).ok_or_else(|| DataError::MalformedBar {
            index,
            reason: "bad timestamp".to_string(),
        })?;

        bars.push(Bar::new(
            timestamp,
            num("open")?,
            num("high")?,
            num("low")?,
            num("close")?,
            num("volume")?,
        ));
    }

    Ok(bars)
}

fn parse_decimal(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::String(s) => Decimal::from_str(s).ok(),
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        _ => None,
    }
}

fn parse_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}
