//! Error types for the kernel, runners and collaborators

use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;

/// Kernel invariant violations and funding failures
#[derive(Debug, Error, Clone, PartialEq)]
pub enum KernelError {
    #[error("Position already open for {0}")]
    AlreadyOpen(String),

    #[error("No open position for {0}")]
    NoPosition(String),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(Decimal),

    #[error("Invalid price: {0}")]
    InvalidPrice(Decimal),

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Decimal, available: Decimal },

    #[error("Invalid kernel config: {0}")]
    InvalidConfig(String),
}

/// Bar table validation failures, reported before any state mutation
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DataError {
    #[error("Bar table is empty")]
    Empty,

    #[error("Missing required columns: {0:?}")]
    MissingColumns(Vec<String>),

    #[error("Malformed bar at index {index}: {reason}")]
    MalformedBar { index: usize, reason: String },

    #[error("Timestamps not strictly increasing at index {0}")]
    UnorderedTimestamps(usize),

    #[error("Insufficient history: need more than {required} bars, got {available}")]
    InsufficientHistory { required: usize, available: usize },
}

/// Batch and validation runner failures
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Invalid input: {0}")]
    InvalidInput(#[from] DataError),

    #[error("Kernel error: {0}")]
    Kernel(#[from] KernelError),
}

/// Market-data and order collaborator failures
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Exchange returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("Order rejected: {0}")]
    Rejected(String),

    #[error("No data: {0}")]
    NoData(String),
}

/// Live loop iteration failures. Logged and surfaced via status, never thrown
/// across the task boundary.
#[derive(Debug, Error)]
pub enum LiveError {
    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("Kernel error: {0}")]
    Kernel(#[from] KernelError),

    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Live mode requires an order gateway")]
    MissingOrderGateway,

    #[error("Live task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Strategy lookup and construction failures
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StrategyError {
    #[error("Unknown strategy: {0}")]
    Unknown(String),

    #[error("Invalid params for {strategy}: {reason}")]
    InvalidParams { strategy: String, reason: String },
}
