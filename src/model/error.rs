//! Time span error types
//!
//! Errors raised while resolving a partially specified time span.

use thiserror::Error;

/// Errors that can occur while resolving a time span
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpanError {
    /// More than one source was given for the period or an anchor
    #[error("Query time span is over-constrained: {0}")]
    OverConstrained(String),

    /// The resolved period is zero or negative
    #[error("Time span is negative or zero: ensure start is before end")]
    NonPositivePeriod,

    /// Window count or width cannot produce a valid window
    #[error("Invalid window: {0}")]
    InvalidWindow(String),

    /// Derived bounds or durations fall outside the representable range
    #[error("Time span out of range: {0}")]
    OutOfRange(String),

    /// A duration literal could not be parsed
    #[error("Invalid duration: {0}")]
    InvalidDuration(String),
}

/// Result type for time span operations
pub type SpanResult<T> = Result<T, SpanError>;
