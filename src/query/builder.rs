//! Query builders
//!
//! Each builder compiles one export request into a Flux program and knows
//! how to repack the store's response into rows:
//!
//! - [`SimpleQuery`]: every point, with the last value before the span
//! - [`ChangesOnlyQuery`]: points whose value changed
//! - [`DiscontinuitiesQuery`]: points around out-of-band steps
//! - [`AggregatedQuery`]: per-window mean, sum, count or min/mean/max band
//!
//! Builders are fully constructed before `build()` and never mutated
//! afterwards.

use crate::config::DomainResolver;
use crate::model::{ExportStrategy, QueryItem};
use crate::query::error::{QueryError, QueryResult};
use crate::query::flux::{
    render_aggregator, render_measurement_pivot, render_union, RangeKind, RecordShape, Selector,
};
use crate::query::repack::{
    changed_indices, discontinuity_indices, select_rows, Response, Row, Value, DEFAULT_STEP_BAND,
};
use serde::Serialize;
use std::collections::BTreeMap;

/// Strategy for queries that are not exports of a stored series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SchemaStrategy {
    DistinctTagsExtraction,
}

/// Strategy tag of a single-series query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum StrategyTag {
    Export(ExportStrategy),
    Schema(SchemaStrategy),
}

/// What a query reports as its strategy
///
/// Single-series builders report one tag. The windowed builder serves
/// several series at once and reports each channel's exporter by name.
/// Callers must handle both shapes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Strategy {
    Single(StrategyTag),
    Channels(BTreeMap<String, ExportStrategy>),
}

impl Strategy {
    pub(crate) fn export(strategy: ExportStrategy) -> Self {
        Self::Single(StrategyTag::Export(strategy))
    }

    pub fn single(&self) -> Option<StrategyTag> {
        match self {
            Self::Single(tag) => Some(*tag),
            Self::Channels(_) => None,
        }
    }

    pub fn channels(&self) -> Option<&BTreeMap<String, ExportStrategy>> {
        match self {
            Self::Single(_) => None,
            Self::Channels(channels) => Some(channels),
        }
    }
}

/// Common contract of all compiled queries
pub trait FluxQuery {
    /// Generated program text
    fn build(&self) -> String;

    /// Transform the store's response into output rows
    fn repack(&self, response: &Response) -> QueryResult<Vec<Row>>;

    fn strategy(&self) -> Strategy;

    /// Column names of the rows produced by [`FluxQuery::repack`]
    fn response_columns(&self) -> Vec<String>;

    /// Whether the executor should merge the response into one table
    fn want_tabular_response(&self) -> bool {
        false
    }
}

pub(crate) fn resolve_bucket(resolver: &dyn DomainResolver, domain: &str) -> QueryResult<String> {
    resolver
        .bucket(domain)
        .ok_or_else(|| QueryError::UnknownDomain(domain.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeriesStage {
    Plain,
    /// Adds a `difference` column holding the step into each row
    Difference,
}

/// Every point of one series in the span
#[derive(Debug, Clone)]
pub struct SimpleQuery {
    item: QueryItem,
    selector: Selector,
    include_open: bool,
    stage: SeriesStage,
}

impl SimpleQuery {
    pub fn new(
        item: &QueryItem,
        resolver: &dyn DomainResolver,
        shape: RecordShape,
    ) -> QueryResult<Self> {
        shape.require_lone_value()?;
        let bucket = resolve_bucket(resolver, item.domain())?;
        Ok(Self {
            item: item.clone(),
            selector: Selector::for_item(bucket, item),
            include_open: true,
            stage: SeriesStage::Plain,
        })
    }

    /// Builder method: whether to prepend the last value before the span
    pub fn with_open_value(mut self, include: bool) -> Self {
        self.include_open = include;
        self
    }

    pub fn item(&self) -> &QueryItem {
        &self.item
    }

    fn extra_columns(&self) -> &'static [&'static str] {
        match self.stage {
            SeriesStage::Plain => &[],
            SeriesStage::Difference => &["difference"],
        }
    }

    fn render_logic(&self) -> String {
        match self.stage {
            SeriesStage::Plain => String::new(),
            SeriesStage::Difference => {
                let mut rv = String::from(" |> group()\n");
                rv += " |> duplicate(column: \"_value\", as: \"difference\")\n";
                rv += " |> difference(columns: [\"difference\"], keepFirst: true)\n";
                rv += " |> fill(column: \"difference\", value: 0)\n";
                rv
            }
        }
    }

    fn series_columns(&self) -> [&str; 2] {
        ["_time", self.item.measurement()]
    }
}

impl FluxQuery for SimpleQuery {
    fn build(&self) -> String {
        let span = self.item.time_span();
        let mut rv = String::new();

        if self.include_open {
            rv += "openValue = ";
            rv += &self.selector.render(span, RangeKind::Before);
            rv += " |> last()\n";
            rv += "\n";
            rv += "rangeValues = ";
            rv += &self.selector.render(span, RangeKind::Span);
            rv += "\n";
            rv += &render_union(&["openValue", "rangeValues"]);
        } else {
            rv += &self.selector.render(span, RangeKind::Span);
        }

        rv += &self.render_logic();
        rv += &render_measurement_pivot(self.extra_columns());
        rv
    }

    fn repack(&self, response: &Response) -> QueryResult<Vec<Row>> {
        response.to_values(&self.series_columns())
    }

    fn strategy(&self) -> Strategy {
        Strategy::export(ExportStrategy::Raw)
    }

    fn response_columns(&self) -> Vec<String> {
        vec!["_time".to_string(), self.item.export_name().to_string()]
    }
}

/// Points whose value differs from the one before, plus the latest point
#[derive(Debug, Clone)]
pub struct ChangesOnlyQuery {
    series: SimpleQuery,
}

impl ChangesOnlyQuery {
    pub fn new(
        item: &QueryItem,
        resolver: &dyn DomainResolver,
        shape: RecordShape,
    ) -> QueryResult<Self> {
        Ok(Self {
            series: SimpleQuery::new(item, resolver, shape)?,
        })
    }
}

impl FluxQuery for ChangesOnlyQuery {
    fn build(&self) -> String {
        self.series.build()
    }

    fn repack(&self, response: &Response) -> QueryResult<Vec<Row>> {
        let columns = self.series.series_columns();
        let frame = response.frame();
        if frame.is_empty() {
            return Ok(Vec::new());
        }
        let values = frame.column(columns[1])?;
        select_rows(&frame, &columns, &changed_indices(&values))
    }

    fn strategy(&self) -> Strategy {
        Strategy::export(ExportStrategy::ChangesOnly)
    }

    fn response_columns(&self) -> Vec<String> {
        self.series.response_columns()
    }

    fn want_tabular_response(&self) -> bool {
        true
    }
}

/// Points at the edges of steps that fall outside the expected band
#[derive(Debug, Clone)]
pub struct DiscontinuitiesQuery {
    series: SimpleQuery,
    band: (f64, f64),
}

impl DiscontinuitiesQuery {
    pub fn new(
        item: &QueryItem,
        resolver: &dyn DomainResolver,
        shape: RecordShape,
    ) -> QueryResult<Self> {
        let mut series = SimpleQuery::new(item, resolver, shape)?;
        series.stage = SeriesStage::Difference;
        Ok(Self {
            series,
            band: DEFAULT_STEP_BAND,
        })
    }

    /// Builder method: closed band of acceptable steps
    pub fn with_band(mut self, low: f64, high: f64) -> Self {
        self.band = (low, high);
        self
    }

    pub fn band(&self) -> (f64, f64) {
        self.band
    }
}

impl FluxQuery for DiscontinuitiesQuery {
    fn build(&self) -> String {
        self.series.build()
    }

    fn repack(&self, response: &Response) -> QueryResult<Vec<Row>> {
        let frame = response.frame();
        if frame.is_empty() {
            return Ok(Vec::new());
        }
        let differences: Vec<Option<f64>> = frame
            .column("difference")?
            .iter()
            .map(Value::as_f64)
            .collect();
        let keep = discontinuity_indices(&differences, self.band);
        select_rows(&frame, &self.series.series_columns(), &keep)
    }

    fn strategy(&self) -> Strategy {
        Strategy::export(ExportStrategy::DiscontinuitiesOnly)
    }

    fn response_columns(&self) -> Vec<String> {
        self.series.response_columns()
    }

    fn want_tabular_response(&self) -> bool {
        true
    }
}

const BAND_MEMBERS: [(&str, &str); 3] = [("bandMin", "min"), ("bandMean", "mean"), ("bandMax", "max")];

/// Per-window aggregate of one series
#[derive(Debug, Clone)]
pub struct AggregatedQuery {
    item: QueryItem,
    selector: Selector,
}

impl AggregatedQuery {
    pub fn new(
        item: &QueryItem,
        resolver: &dyn DomainResolver,
        shape: RecordShape,
    ) -> QueryResult<Self> {
        shape.require_lone_value()?;
        if !item.exporter().is_aggregate() {
            return Err(QueryError::UnsupportedAggregator(item.exporter()));
        }
        let bucket = resolve_bucket(resolver, item.domain())?;
        Ok(Self {
            item: item.clone(),
            selector: Selector::for_item(bucket, item),
        })
    }

    fn aggregator(&self) -> Option<&'static str> {
        match self.item.exporter() {
            ExportStrategy::AggregateMean => Some("mean"),
            ExportStrategy::AggregateSum => Some("sum"),
            ExportStrategy::AggregateCount => Some("count"),
            _ => None,
        }
    }

    fn build_band(&self) -> String {
        let span = self.item.time_span();
        let mut rv = String::new();
        for (table, func) in BAND_MEMBERS {
            rv += &format!("{} = ", table);
            rv += &self.selector.render(span, RangeKind::Span);
            rv += &render_aggregator(span, func);
            rv += &format!(" |> set(key: \"band\", value: \"{}\")\n", func);
            rv += "\n";
        }

        let tables: Vec<&str> = BAND_MEMBERS.iter().map(|(table, _)| *table).collect();
        rv += &render_union(&tables);
        rv += " |> group()\n";
        rv += " |> keep(columns: [\"_time\", \"_value\", \"band\"])\n";
        rv += " |> pivot(rowKey: [\"_time\"], columnKey: [\"band\"], valueColumn: \"_value\")\n";
        rv += " |> sort(columns: [\"_time\"], desc: false)\n";
        rv
    }
}

impl FluxQuery for AggregatedQuery {
    fn build(&self) -> String {
        let Some(func) = self.aggregator() else {
            return self.build_band();
        };

        let span = self.item.time_span();
        let mut rv = self.selector.render(span, RangeKind::Span);
        rv += &render_aggregator(span, func);
        rv += &render_measurement_pivot(&[]);
        rv
    }

    fn repack(&self, response: &Response) -> QueryResult<Vec<Row>> {
        match self.aggregator() {
            Some(_) => response.to_values(&["_time", self.item.measurement()]),
            None => {
                let mut columns = vec!["_time"];
                columns.extend(BAND_MEMBERS.iter().map(|(_, func)| *func));
                response.to_values(&columns)
            }
        }
    }

    fn strategy(&self) -> Strategy {
        Strategy::export(self.item.exporter())
    }

    fn response_columns(&self) -> Vec<String> {
        let name = self.item.export_name();
        match self.aggregator() {
            Some(_) => vec!["_time".to_string(), name.to_string()],
            None => std::iter::once("_time".to_string())
                .chain(BAND_MEMBERS.iter().map(|(_, func)| format!("{}.{}", name, func)))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TimeSpan, TimeSpanSpec};
    use crate::query::repack::Table;
    use chrono::{Duration, TimeZone, Utc};

    fn span() -> TimeSpan {
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        TimeSpanSpec::new()
            .start(start)
            .width(Duration::hours(1))
            .window_count(4)
            .resolve(start)
            .unwrap()
    }

    fn resolver() -> BTreeMap<String, String> {
        let mut buckets = BTreeMap::new();
        buckets.insert("monitors".to_string(), "monitors-bucket".to_string());
        buckets
    }

    fn item(exporter: ExportStrategy) -> QueryItem {
        QueryItem::new("monitors", span(), "lab.temp", "temperature", exporter).tag("site", "lab")
    }

    fn series_frame(values: &[f64], differences: Option<&[f64]>) -> Response {
        let mut columns = vec!["result", "table", "_time", "temperature"];
        if differences.is_some() {
            columns.push("difference");
        }
        let mut table = Table::new(columns);
        for (i, v) in values.iter().enumerate() {
            let mut row = vec!["_result".into(), Value::Int(0), Value::Int(i as i64), Value::Float(*v)];
            if let Some(d) = differences {
                row.push(Value::Float(d[i]));
            }
            table.rows.push(row);
        }
        Response::from_tables(vec![table], true)
    }

    #[test]
    fn test_simple_program() {
        let query = SimpleQuery::new(&item(ExportStrategy::Raw), &resolver(), RecordShape::LoneValue)
            .unwrap();

        let expected = r#"openValue = from(bucket: "monitors-bucket")
 |> range(start: -inf, stop: 1700000000)
 |> filter(fn: (r) => r["_measurement"] == "temperature")
 |> filter(fn: (r) => r["site"] == "lab")
 |> last()

rangeValues = from(bucket: "monitors-bucket")
 |> range(start: 1700000000, stop: 1700003600)
 |> filter(fn: (r) => r["_measurement"] == "temperature")
 |> filter(fn: (r) => r["site"] == "lab")

union(tables: [openValue, rangeValues])
 |> keep(columns: ["_measurement", "_time", "_value"])
 |> pivot(rowKey:["_time"], columnKey: ["_measurement"], valueColumn: "_value")
 |> group()
 |> sort(columns: ["_time"], desc: false)
"#;
        assert_eq!(query.build(), expected);
        assert_eq!(query.strategy(), Strategy::export(ExportStrategy::Raw));
        assert_eq!(query.response_columns(), vec!["_time", "lab.temp"]);
        assert!(!query.want_tabular_response());
    }

    #[test]
    fn test_simple_program_without_open_value() {
        let query = SimpleQuery::new(&item(ExportStrategy::Raw), &resolver(), RecordShape::LoneValue)
            .unwrap()
            .with_open_value(false);

        let program = query.build();
        assert!(program.starts_with("from(bucket: \"monitors-bucket\")\n"));
        assert!(!program.contains("openValue"));
        assert!(!program.contains("union"));
    }

    #[test]
    fn test_simple_repack_projects_series() {
        let query = SimpleQuery::new(&item(ExportStrategy::Raw), &resolver(), RecordShape::LoneValue)
            .unwrap();
        let table = Table::new(["result", "table", "_time", "temperature"])
            .row(vec!["_result".into(), Value::Int(0), Value::Int(10), Value::Float(21.5)])
            .row(vec!["_result".into(), Value::Int(0), Value::Int(20), Value::Float(21.7)]);

        let rows = query.repack(&Response::Records(vec![table])).unwrap();
        assert_eq!(
            rows,
            vec![
                vec![Value::Int(10), Value::Float(21.5)],
                vec![Value::Int(20), Value::Float(21.7)],
            ]
        );
    }

    #[test]
    fn test_unknown_domain_and_shape() {
        let unknown = QueryItem::new("elsewhere", span(), "x", "m", ExportStrategy::Raw);
        assert_eq!(
            SimpleQuery::new(&unknown, &resolver(), RecordShape::LoneValue).unwrap_err(),
            QueryError::UnknownDomain("elsewhere".to_string())
        );

        let shape = RecordShape::Fields(vec!["voltage".to_string(), "current".to_string()]);
        let err = ChangesOnlyQuery::new(&item(ExportStrategy::ChangesOnly), &resolver(), shape)
            .unwrap_err();
        assert!(matches!(err, QueryError::UnsupportedShape(_)));
    }

    #[test]
    fn test_changes_only_repack() {
        let query = ChangesOnlyQuery::new(
            &item(ExportStrategy::ChangesOnly),
            &resolver(),
            RecordShape::LoneValue,
        )
        .unwrap();
        assert!(query.want_tabular_response());
        assert_eq!(query.strategy(), Strategy::export(ExportStrategy::ChangesOnly));

        let rows = query
            .repack(&series_frame(&[5.0, 5.0, 5.0, 7.0, 7.0, 3.0], None))
            .unwrap();
        let times: Vec<Value> = rows.iter().map(|r| r[0].clone()).collect();
        assert_eq!(times, vec![Value::Int(0), Value::Int(3), Value::Int(5)]);
        assert!(rows.iter().all(|r| r.len() == 2));
    }

    #[test]
    fn test_discontinuities_program_and_repack() {
        let query = DiscontinuitiesQuery::new(
            &item(ExportStrategy::DiscontinuitiesOnly),
            &resolver(),
            RecordShape::LoneValue,
        )
        .unwrap();

        let program = query.build();
        assert!(program.contains(
            "union(tables: [openValue, rangeValues])\n |> group()\n |> duplicate(column: \"_value\", as: \"difference\")\n |> difference(columns: [\"difference\"], keepFirst: true)\n |> fill(column: \"difference\", value: 0)\n |> keep(columns: [\"_measurement\", \"_time\", \"_value\", \"difference\"])\n"
        ));
        assert!(program.contains("pivot(rowKey:[\"_time\", \"difference\"]"));

        let values = [10.0, 10.0, 15.0, 215.0, 218.0, 219.0];
        let differences = [0.0, 0.0, 5.0, 200.0, 3.0, 1.0];
        let rows = query
            .repack(&series_frame(&values, Some(&differences)))
            .unwrap();
        let times: Vec<Value> = rows.iter().map(|r| r[0].clone()).collect();
        assert_eq!(
            times,
            vec![Value::Int(0), Value::Int(2), Value::Int(3), Value::Int(5)]
        );
        assert_eq!(rows[2], vec![Value::Int(3), Value::Float(215.0)]);
    }

    #[test]
    fn test_discontinuities_custom_band() {
        let query = DiscontinuitiesQuery::new(
            &item(ExportStrategy::DiscontinuitiesOnly),
            &resolver(),
            RecordShape::LoneValue,
        )
        .unwrap()
        .with_band(-1.0, 1.0);
        assert_eq!(query.band(), (-1.0, 1.0));

        let rows = query
            .repack(&series_frame(&[1.0, 1.5, 2.0, 2.5], Some(&[0.0, 0.5, 0.5, 0.5])))
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_discontinuities_requires_difference_column() {
        let query = DiscontinuitiesQuery::new(
            &item(ExportStrategy::DiscontinuitiesOnly),
            &resolver(),
            RecordShape::LoneValue,
        )
        .unwrap();

        assert_eq!(
            query.repack(&series_frame(&[1.0], None)),
            Err(QueryError::MissingColumn("difference".to_string()))
        );
    }

    #[test]
    fn test_series_without_points_repacks_empty() {
        let changes = ChangesOnlyQuery::new(
            &item(ExportStrategy::ChangesOnly),
            &resolver(),
            RecordShape::LoneValue,
        )
        .unwrap();
        let steps = DiscontinuitiesQuery::new(
            &item(ExportStrategy::DiscontinuitiesOnly),
            &resolver(),
            RecordShape::LoneValue,
        )
        .unwrap();

        let empty = Response::from_tables(Vec::new(), true);
        assert_eq!(changes.repack(&empty), Ok(Vec::new()));
        assert_eq!(steps.repack(&empty), Ok(Vec::new()));

        let headers_only = series_frame(&[], Some(&[]));
        assert_eq!(changes.repack(&headers_only), Ok(Vec::new()));
        assert_eq!(steps.repack(&headers_only), Ok(Vec::new()));
    }

    #[test]
    fn test_aggregate_mean_program() {
        let query = AggregatedQuery::new(
            &item(ExportStrategy::AggregateMean),
            &resolver(),
            RecordShape::LoneValue,
        )
        .unwrap();

        let expected = r#"from(bucket: "monitors-bucket")
 |> range(start: 1700000000, stop: 1700003600)
 |> filter(fn: (r) => r["_measurement"] == "temperature")
 |> filter(fn: (r) => r["site"] == "lab")
 |> aggregateWindow(every: 900s, fn: mean, createEmpty: false)
 |> keep(columns: ["_measurement", "_time", "_value"])
 |> pivot(rowKey:["_time"], columnKey: ["_measurement"], valueColumn: "_value")
 |> group()
 |> sort(columns: ["_time"], desc: false)
"#;
        assert_eq!(query.build(), expected);
        assert_eq!(query.response_columns(), vec!["_time", "lab.temp"]);
        assert_eq!(query.strategy(), Strategy::export(ExportStrategy::AggregateMean));
    }

    #[test]
    fn test_aggregate_band() {
        let query = AggregatedQuery::new(
            &item(ExportStrategy::AggregateBand),
            &resolver(),
            RecordShape::LoneValue,
        )
        .unwrap();

        let program = query.build();
        assert!(program.starts_with("bandMin = from(bucket: \"monitors-bucket\")\n"));
        assert!(program.contains(" |> aggregateWindow(every: 900s, fn: max, createEmpty: false)\n |> set(key: \"band\", value: \"max\")\n"));
        assert!(program.contains("union(tables: [bandMin, bandMean, bandMax])\n |> group()\n"));
        assert_eq!(
            query.response_columns(),
            vec!["_time", "lab.temp.min", "lab.temp.mean", "lab.temp.max"]
        );

        let table = Table::new(["_time", "max", "mean", "min"]).row(vec![
            Value::Int(1),
            Value::Float(3.0),
            Value::Float(2.0),
            Value::Float(1.0),
        ]);
        let rows = query.repack(&Response::Records(vec![table])).unwrap();
        assert_eq!(
            rows,
            vec![vec![Value::Int(1), Value::Float(1.0), Value::Float(2.0), Value::Float(3.0)]]
        );
    }

    #[test]
    fn test_aggregate_rejects_other_exporters() {
        let err = AggregatedQuery::new(&item(ExportStrategy::Raw), &resolver(), RecordShape::LoneValue)
            .unwrap_err();
        assert_eq!(err, QueryError::UnsupportedAggregator(ExportStrategy::Raw));
    }

    #[test]
    fn test_strategy_shapes_serialize() {
        let single = Strategy::export(ExportStrategy::Raw);
        assert_eq!(serde_json::to_string(&single).unwrap(), "\"RAW\"");
        assert_eq!(single.single(), Some(StrategyTag::Export(ExportStrategy::Raw)));
        assert!(single.channels().is_none());

        let schema = Strategy::Single(StrategyTag::Schema(SchemaStrategy::DistinctTagsExtraction));
        assert_eq!(
            serde_json::to_string(&schema).unwrap(),
            "\"DistinctTagsExtraction\""
        );

        let mut channels = BTreeMap::new();
        channels.insert("a".to_string(), ExportStrategy::WindowedMean);
        let multi = Strategy::Channels(channels);
        assert_eq!(
            serde_json::to_string(&multi).unwrap(),
            "{\"a\":\"WINDOWED_MEAN\"}"
        );
        assert!(multi.single().is_none());
    }
}
