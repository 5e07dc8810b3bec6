//! Export requests
//!
//! A [`QueryItem`] describes one series to export: where it lives, which
//! time span to cover and which [`ExportStrategy`] shapes the result.

use super::error::SpanResult;
use super::time_span::{TimeSpan, TimeSpanSpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Post-processing and query-shape policy applied to one series
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExportStrategy {
    /// Every stored point in the span
    Raw,
    /// Only points whose value differs from the previous one
    ChangesOnly,
    /// Only points around a step outside the expected band
    DiscontinuitiesOnly,
    AggregateMean,
    AggregateSum,
    /// Minimum, mean and maximum per window
    AggregateBand,
    AggregateCount,
    WindowedMean,
    WindowedSum,
    WindowedBand,
    WindowedCount,
}

impl ExportStrategy {
    /// Get all strategies for iteration
    pub fn all() -> &'static [ExportStrategy] {
        &[
            Self::Raw,
            Self::ChangesOnly,
            Self::DiscontinuitiesOnly,
            Self::AggregateMean,
            Self::AggregateSum,
            Self::AggregateBand,
            Self::AggregateCount,
            Self::WindowedMean,
            Self::WindowedSum,
            Self::WindowedBand,
            Self::WindowedCount,
        ]
    }

    /// Whether items with this strategy are merged into one multi-channel query
    pub fn is_windowed(&self) -> bool {
        matches!(
            self,
            Self::WindowedMean | Self::WindowedSum | Self::WindowedBand | Self::WindowedCount
        )
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(
            self,
            Self::AggregateMean | Self::AggregateSum | Self::AggregateBand | Self::AggregateCount
        )
    }
}

impl std::fmt::Display for ExportStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Raw => "RAW",
            Self::ChangesOnly => "CHANGES_ONLY",
            Self::DiscontinuitiesOnly => "DISCONTINUITIES_ONLY",
            Self::AggregateMean => "AGGREGATE_MEAN",
            Self::AggregateSum => "AGGREGATE_SUM",
            Self::AggregateBand => "AGGREGATE_BAND",
            Self::AggregateCount => "AGGREGATE_COUNT",
            Self::WindowedMean => "WINDOWED_MEAN",
            Self::WindowedSum => "WINDOWED_SUM",
            Self::WindowedBand => "WINDOWED_BAND",
            Self::WindowedCount => "WINDOWED_COUNT",
        };
        write!(f, "{}", name)
    }
}

/// An export request as written by a caller, before its span is resolved
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryRequest {
    pub domain: String,
    #[serde(default)]
    pub time_span: TimeSpanSpec,
    pub export_name: String,
    pub measurement: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub fields: Vec<String>,
    pub exporter: ExportStrategy,
}

impl QueryRequest {
    /// Resolve the time span, producing an immutable item
    pub fn resolve(self, now: DateTime<Utc>) -> SpanResult<QueryItem> {
        let time_span = self.time_span.resolve(now)?;
        Ok(QueryItem {
            domain: self.domain,
            time_span,
            export_name: self.export_name,
            measurement: self.measurement,
            tags: self.tags,
            fields: self.fields,
            exporter: self.exporter,
        })
    }
}

/// One export request with a resolved time span
#[derive(Debug, Clone, PartialEq)]
pub struct QueryItem {
    domain: String,
    time_span: TimeSpan,
    export_name: String,
    measurement: String,
    tags: BTreeMap<String, String>,
    fields: Vec<String>,
    exporter: ExportStrategy,
}

impl QueryItem {
    /// Create an item with no tag filters and the lone `value` field
    pub fn new(
        domain: impl Into<String>,
        time_span: TimeSpan,
        export_name: impl Into<String>,
        measurement: impl Into<String>,
        exporter: ExportStrategy,
    ) -> Self {
        Self {
            domain: domain.into(),
            time_span,
            export_name: export_name.into(),
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: Vec::new(),
            exporter,
        }
    }

    /// Builder method: add a tag filter
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Builder method: add a field to read
    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.fields.push(field.into());
        self
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn time_span(&self) -> &TimeSpan {
        &self.time_span
    }

    pub fn export_name(&self) -> &str {
        &self.export_name
    }

    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn exporter(&self) -> ExportStrategy {
        self.exporter
    }
}
