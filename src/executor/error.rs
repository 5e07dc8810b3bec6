//! Executor error types

use crate::query::QueryError;
use thiserror::Error;

/// Errors that can occur while running generated programs
#[derive(Error, Debug)]
pub enum ExecuteError {
    /// Request could not be sent or its body not read
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Store answered with an error
    #[error("Store error ({status}): {message}")]
    Store { status: u16, message: String },

    /// Response body is not valid CSV
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Response cell or annotation could not be interpreted
    #[error("Decode error: {0}")]
    Decode(String),

    /// No connection parameters for the domain
    #[error("No connection configured for domain: {0}")]
    UnknownDomain(String),

    /// Query compilation or repacking failed
    #[error("Query error: {0}")]
    Query(#[from] QueryError),
}

/// Result type for executor operations
pub type ExecuteResult<T> = Result<T, ExecuteError>;
