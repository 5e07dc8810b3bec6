//! Distinct tag value listing
//!
//! Without extra filters the store's schema package answers directly:
//!
//! ```text
//! import "influxdata/influxdb/schema"
//!
//! schema.measurementTagValues(bucket: ..., measurement: ..., tag: ...)
//!  |> distinct(column: "_value")
//! ```
//!
//! Once tag or field filters are present the normal selector chain is used
//! instead, grouped by the target tag.

use crate::config::DomainResolver;
use crate::model::TimeSpan;
use crate::query::builder::{resolve_bucket, FluxQuery, SchemaStrategy, Strategy, StrategyTag};
use crate::query::error::{QueryError, QueryResult};
use crate::query::flux::{RangeKind, Selector};
use crate::query::repack::{Response, Row};

/// Which program a listing compiles to
#[derive(Debug, Clone)]
enum Listing {
    /// Schema package lookup, optionally bounded by a span
    Schema(Option<TimeSpan>),
    /// Selector chain; filtered listings always carry a span
    Filtered(TimeSpan),
}

/// Distinct values of one tag within a measurement
///
/// Constructed through [`DistinctTagValues::builder`]; a finished listing
/// always has everything its program needs.
#[derive(Debug, Clone)]
pub struct DistinctTagValues {
    measurement: String,
    tag: String,
    selector: Selector,
    listing: Listing,
}

/// Collects filters and the span of a [`DistinctTagValues`] listing
#[derive(Debug, Clone)]
pub struct DistinctTagValuesBuilder {
    measurement: String,
    tag: String,
    selector: Selector,
    time_span: Option<TimeSpan>,
}

impl DistinctTagValues {
    /// Start a listing of `tag` in `measurement`, resolving the domain's bucket
    pub fn builder(
        resolver: &dyn DomainResolver,
        domain: &str,
        measurement: impl Into<String>,
        tag: impl Into<String>,
    ) -> QueryResult<DistinctTagValuesBuilder> {
        let bucket = resolve_bucket(resolver, domain)?;
        let measurement = measurement.into();
        Ok(DistinctTagValuesBuilder {
            selector: Selector::new(bucket).filter("_measurement", measurement.as_str()),
            measurement,
            tag: tag.into(),
            time_span: None,
        })
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Whether filters beyond the measurement are present
    pub fn is_filtered(&self) -> bool {
        matches!(self.listing, Listing::Filtered(_))
    }

    fn build_unfiltered(&self, span: Option<&TimeSpan>) -> String {
        let mut rv = String::from("import \"influxdata/influxdb/schema\"\n\n");
        rv += "schema.measurementTagValues(\n";
        rv += &format!("  bucket: \"{}\",\n", self.selector.bucket());
        rv += &format!("  measurement: \"{}\",\n", self.measurement);
        rv += &format!("  tag: \"{}\",\n", self.tag);
        if let Some(span) = span {
            rv += &format!("  start: {},\n", span.start().timestamp());
            rv += &format!("  stop: {},\n", span.end().timestamp());
        }
        rv += ")\n\n";
        rv += " |> distinct(column: \"_value\")\n";
        rv
    }

    fn build_filtered(&self, span: &TimeSpan) -> String {
        let mut rv = self.selector.render(span, RangeKind::Span);
        rv += &format!(" |> group(columns: [\"{}\"])\n", self.tag);
        rv += &format!(" |> distinct(column: \"{}\")\n", self.tag);
        rv
    }
}

impl DistinctTagValuesBuilder {
    /// Builder method: restrict to records with this tag value
    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.selector = self.selector.filter(key, value);
        self
    }

    /// Builder method: restrict to records carrying this field
    pub fn with_field(self, field: impl Into<String>) -> Self {
        self.with_filter("_field", field)
    }

    /// Builder method: only consider records within the span
    pub fn with_time_span(mut self, span: TimeSpan) -> Self {
        self.time_span = Some(span);
        self
    }

    /// Complete the listing
    ///
    /// A filtered listing without a time span is rejected with
    /// [`QueryError::MissingTimeSpan`].
    pub fn finish(self) -> QueryResult<DistinctTagValues> {
        let filtered = self.selector.filters().len() > 1;
        let listing = match (filtered, self.time_span) {
            (false, span) => Listing::Schema(span),
            (true, Some(span)) => Listing::Filtered(span),
            (true, None) => {
                return Err(QueryError::MissingTimeSpan(format!(
                    "filtered listing of tag '{}' needs a time span",
                    self.tag
                )))
            }
        };

        Ok(DistinctTagValues {
            measurement: self.measurement,
            tag: self.tag,
            selector: self.selector,
            listing,
        })
    }
}

impl FluxQuery for DistinctTagValues {
    fn build(&self) -> String {
        match &self.listing {
            Listing::Schema(span) => self.build_unfiltered(span.as_ref()),
            Listing::Filtered(span) => self.build_filtered(span),
        }
    }

    fn repack(&self, response: &Response) -> QueryResult<Vec<Row>> {
        let frame = response.frame();
        if frame.columns.is_empty() {
            return Ok(Vec::new());
        }
        Ok(frame
            .column("_value")?
            .into_iter()
            .map(|value| vec![value])
            .collect())
    }

    fn strategy(&self) -> Strategy {
        Strategy::Single(StrategyTag::Schema(SchemaStrategy::DistinctTagsExtraction))
    }

    fn response_columns(&self) -> Vec<String> {
        vec![self.tag.clone()]
    }

    fn want_tabular_response(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TimeSpanSpec;
    use crate::query::repack::{Table, Value};
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::BTreeMap;

    fn resolver() -> BTreeMap<String, String> {
        let mut buckets = BTreeMap::new();
        buckets.insert("plant".to_string(), "plant-data".to_string());
        buckets
    }

    fn span() -> TimeSpan {
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        TimeSpanSpec::new()
            .start(start)
            .width(Duration::days(7))
            .resolve(start)
            .unwrap()
    }

    #[test]
    fn test_unfiltered_program() {
        let query = DistinctTagValues::builder(&resolver(), "plant", "power", "meter")
            .unwrap()
            .finish()
            .unwrap();
        assert!(!query.is_filtered());

        let expected = r#"import "influxdata/influxdb/schema"

schema.measurementTagValues(
  bucket: "plant-data",
  measurement: "power",
  tag: "meter",
)

 |> distinct(column: "_value")
"#;
        assert_eq!(query.build(), expected);
        assert!(query.want_tabular_response());
        assert_eq!(query.response_columns(), vec!["meter"]);
    }

    #[test]
    fn test_unfiltered_program_with_span() {
        let query = DistinctTagValues::builder(&resolver(), "plant", "power", "meter")
            .unwrap()
            .with_time_span(span())
            .finish()
            .unwrap();
        assert!(!query.is_filtered());

        let program = query.build();
        assert!(program.contains("  start: 1700000000,\n  stop: 1700604800,\n)\n"));
    }

    #[test]
    fn test_filtered_program() {
        let query = DistinctTagValues::builder(&resolver(), "plant", "power", "meter")
            .unwrap()
            .with_filter("site", "north")
            .with_field("value")
            .with_time_span(span())
            .finish()
            .unwrap();
        assert!(query.is_filtered());

        let expected = r#"from(bucket: "plant-data")
 |> range(start: 1700000000, stop: 1700604800)
 |> filter(fn: (r) => r["_measurement"] == "power")
 |> filter(fn: (r) => r["site"] == "north")
 |> filter(fn: (r) => r["_field"] == "value")
 |> group(columns: ["meter"])
 |> distinct(column: "meter")
"#;
        assert_eq!(query.build(), expected);
    }

    #[test]
    fn test_filtered_requires_span() {
        let result = DistinctTagValues::builder(&resolver(), "plant", "power", "meter")
            .unwrap()
            .with_filter("site", "north")
            .finish();

        assert!(matches!(result, Err(QueryError::MissingTimeSpan(_))));
    }

    #[test]
    fn test_repack_and_strategy() {
        let query = DistinctTagValues::builder(&resolver(), "plant", "power", "meter")
            .unwrap()
            .finish()
            .unwrap();
        assert_eq!(
            query.strategy().single(),
            Some(StrategyTag::Schema(SchemaStrategy::DistinctTagsExtraction))
        );

        let a = Table::new(["result", "table", "_value"]).row(vec!["_result".into(), Value::Int(0), "m1".into()]);
        let b = Table::new(["result", "table", "_value"]).row(vec!["_result".into(), Value::Int(1), "m2".into()]);
        let rows = query.repack(&Response::from_tables(vec![a, b], true)).unwrap();
        assert_eq!(rows, vec![vec![Value::from("m1")], vec![Value::from("m2")]]);

        let empty = query.repack(&Response::from_tables(Vec::new(), true)).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_unknown_domain() {
        assert_eq!(
            DistinctTagValues::builder(&resolver(), "office", "power", "meter").unwrap_err(),
            QueryError::UnknownDomain("office".to_string())
        );
    }
}
