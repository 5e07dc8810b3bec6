//! Query error types
//!
//! Defines all error conditions that can occur while planning, compiling and
//! repacking queries. Every variant is a configuration error: it is raised
//! before any program text is handed out.

use crate::model::{ExportStrategy, SpanError};
use thiserror::Error;

/// Errors that can occur during query planning and compilation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// Time span could not be resolved
    #[error("Time span error: {0}")]
    Span(#[from] SpanError),

    /// An item's time span differs from the one already in the plan
    #[error("Plan does not support different time spans: expected {expected}, got {actual}")]
    TimeSpanMismatch { expected: String, actual: String },

    /// Export names must be unique within a plan
    #[error("Duplicate export name: {0}")]
    DuplicateExportName(String),

    /// Domain has no configured bucket
    #[error("Unknown domain: {0}")]
    UnknownDomain(String),

    /// Builders only handle records holding a single field named `value`
    #[error("Unsupported record shape: {0}")]
    UnsupportedShape(String),

    /// A windowed channel disagrees with the first channel added
    #[error("Windowed channel mismatch: {0}")]
    ChannelMismatch(String),

    /// Exporter kind has no aggregator in the requested builder
    #[error("Unsupported aggregator: {0}")]
    UnsupportedAggregator(ExportStrategy),

    /// Windowed query finished without any channels
    #[error("Windowed query has no channels")]
    EmptyWindowedQuery,

    /// Filtered tag-value listing needs a time range
    #[error("Missing time span: {0}")]
    MissingTimeSpan(String),

    /// Response lacks a column the repacker needs
    #[error("Response is missing column: {0}")]
    MissingColumn(String),
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;
