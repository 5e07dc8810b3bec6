//! Flux program fragments
//!
//! Every builder composes its program from the same pieces, in this order:
//!
//! ```text
//! from(bucket: "<bucket>")
//!  |> range(start: <unix_start | -inf>, stop: <unix_stop>)
//!  |> filter(fn: (r) => r["<key>"] == "<value>")
//! ```
//!
//! Values are substituted verbatim. Bucket, measurement and tag values must
//! not contain characters that break a Flux string literal.

use crate::model::{QueryItem, TimeSpan};
use crate::query::error::{QueryError, QueryResult};

/// Which part of the timeline a selector chain reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeKind {
    /// The span itself
    Span,
    /// Everything before the span's start
    Before,
}

pub fn render_bucket(bucket: &str) -> String {
    format!("from(bucket: \"{}\")\n", bucket)
}

pub fn render_range(span: &TimeSpan, kind: RangeKind) -> String {
    match kind {
        RangeKind::Before => format!(
            " |> range(start: -inf, stop: {})\n",
            span.start().timestamp()
        ),
        RangeKind::Span => format!(
            " |> range(start: {}, stop: {})\n",
            span.start().timestamp(),
            span.end().timestamp()
        ),
    }
}

pub fn render_filter(key: &str, value: &str) -> String {
    format!(" |> filter(fn: (r) => r[\"{}\"] == \"{}\")\n", key, value)
}

/// `aggregateWindow` over the span's window width
pub fn render_aggregator(span: &TimeSpan, func: &str) -> String {
    format!(
        " |> aggregateWindow(every: {}s, fn: {}, createEmpty: false)\n",
        span.window_width().num_seconds(),
        func
    )
}

pub fn render_union<S: AsRef<str>>(tables: &[S]) -> String {
    let names: Vec<&str> = tables.iter().map(|t| t.as_ref()).collect();
    format!("union(tables: [{}])\n", names.join(", "))
}

/// Comma separated, double-quoted column list
pub fn quote_columns<S: AsRef<str>>(columns: &[S]) -> String {
    columns
        .iter()
        .map(|c| format!("\"{}\"", c.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Reshape a single series into `_time` rows with one column per measurement
///
/// `extra_columns` survive the reshape and become part of the row key.
pub fn render_measurement_pivot(extra_columns: &[&str]) -> String {
    let mut columns = vec!["_measurement", "_time", "_value"];
    columns.extend_from_slice(extra_columns);
    let mut row_key = vec!["_time"];
    row_key.extend_from_slice(extra_columns);

    let mut rv = format!(" |> keep(columns: [{}])\n", quote_columns(&columns));
    rv += &format!(
        " |> pivot(rowKey:[{}], columnKey: [\"_measurement\"], valueColumn: \"_value\")\n",
        quote_columns(&row_key)
    );
    rv += " |> group()\n";
    rv += " |> sort(columns: [\"_time\"], desc: false)\n";
    rv
}

/// Flux identifier derived from an export name
pub fn identifier(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Bucket plus an ordered list of equality filters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    bucket: String,
    filters: Vec<(String, String)>,
}

impl Selector {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            filters: Vec::new(),
        }
    }

    /// Selector for an item: its measurement first, then its tags
    pub fn for_item(bucket: impl Into<String>, item: &QueryItem) -> Self {
        let mut selector = Self::new(bucket).filter("_measurement", item.measurement());
        for (key, value) in item.tags() {
            selector = selector.filter(key.as_str(), value.as_str());
        }
        selector
    }

    /// Builder method: add an equality filter
    pub fn filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push((key.into(), value.into()));
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn filters(&self) -> &[(String, String)] {
        &self.filters
    }

    /// `from |> range |> filter...` chain
    pub fn render(&self, span: &TimeSpan, kind: RangeKind) -> String {
        let mut rv = render_bucket(&self.bucket);
        rv += &render_range(span, kind);
        for (key, value) in &self.filters {
            rv += &render_filter(key, value);
        }
        rv
    }
}

/// Layout of the stored records a builder reads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordShape {
    /// Each record holds exactly one numeric field named `value`
    LoneValue,
    /// Records carry the listed fields
    Fields(Vec<String>),
}

impl RecordShape {
    /// Shape implied by an item's field list
    pub fn of(item: &QueryItem) -> Self {
        match item.fields() {
            [] => Self::LoneValue,
            [field] if field == "value" => Self::LoneValue,
            fields => Self::Fields(fields.to_vec()),
        }
    }

    pub fn require_lone_value(&self) -> QueryResult<()> {
        match self {
            Self::LoneValue => Ok(()),
            Self::Fields(fields) => Err(QueryError::UnsupportedShape(format!(
                "builders assume each record holds a single field named 'value', got [{}]",
                fields.join(", ")
            ))),
        }
    }
}
