//! Multi-channel windowed queries
//!
//! Several series sharing one domain and time span are compiled into a
//! single program. Each channel contributes its last value before the span
//! plus its windowed aggregate; the channels are then pivoted so each export
//! name becomes a column:
//!
//! ```text
//! <channel>_openValue   = ... |> last() |> toFloat()
//! <channel>_rangeValues = ... |> aggregateWindow(...) |> toFloat()
//! <channel>             = union(...) |> set(name) |> keep(...)
//! union(channels) |> group(_time) |> pivot(name) |> group() |> sort(_time)
//! ```
//!
//! Channels are accumulated in a [`WindowedPlanBuilder`], which produces an
//! immutable [`WindowedQuery`].

use crate::config::DomainResolver;
use crate::model::{ExportStrategy, QueryItem, TimeSpan};
use crate::query::builder::{resolve_bucket, FluxQuery, Strategy};
use crate::query::error::{QueryError, QueryResult};
use crate::query::flux::{identifier, render_aggregator, render_union, RangeKind, RecordShape, Selector};
use crate::query::repack::{Response, Row};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct Channel {
    item: QueryItem,
    table: String,
    selector: Selector,
    aggregator: &'static str,
}

/// Accumulates windowed channels before compilation
pub struct WindowedPlanBuilder<'a> {
    resolver: &'a dyn DomainResolver,
    channels: Vec<Channel>,
}

impl<'a> WindowedPlanBuilder<'a> {
    pub fn new(resolver: &'a dyn DomainResolver) -> Self {
        Self {
            resolver,
            channels: Vec::new(),
        }
    }

    /// Add one series as a channel
    ///
    /// Every channel must share the first channel's domain and time span and
    /// hold lone-value records.
    pub fn add_channel(&mut self, item: &QueryItem, shape: RecordShape) -> QueryResult<()> {
        shape.require_lone_value()?;

        let aggregator = match item.exporter() {
            ExportStrategy::WindowedMean => "mean",
            ExportStrategy::WindowedSum => "sum",
            other => return Err(QueryError::UnsupportedAggregator(other)),
        };

        let table = identifier(item.export_name());
        let bucket = match self.channels.first() {
            Some(first) => {
                if item.domain() != first.item.domain() {
                    return Err(QueryError::ChannelMismatch(format!(
                        "all windowed channels must share one domain: expected '{}', got '{}'",
                        first.item.domain(),
                        item.domain()
                    )));
                }
                if item.time_span() != first.item.time_span() {
                    return Err(QueryError::ChannelMismatch(format!(
                        "all windowed channels must share one time span: expected {}, got {}",
                        first.item.time_span(),
                        item.time_span()
                    )));
                }
                if let Some(existing) = self.channels.iter().find(|c| c.table == table) {
                    return Err(QueryError::ChannelMismatch(format!(
                        "channel '{}' collides with '{}'",
                        item.export_name(),
                        existing.item.export_name()
                    )));
                }
                first.selector.bucket().to_string()
            }
            None => resolve_bucket(self.resolver, item.domain())?,
        };

        self.channels.push(Channel {
            item: item.clone(),
            table,
            selector: Selector::for_item(bucket, item),
            aggregator,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// End accumulation
    pub fn finish(self) -> QueryResult<WindowedQuery> {
        let span = self
            .channels
            .first()
            .map(|c| c.item.time_span().clone())
            .ok_or(QueryError::EmptyWindowedQuery)?;

        Ok(WindowedQuery {
            span,
            channels: self.channels,
        })
    }
}

/// Compiled multi-channel windowed query
#[derive(Debug, Clone)]
pub struct WindowedQuery {
    span: TimeSpan,
    channels: Vec<Channel>,
}

impl WindowedQuery {
    pub fn time_span(&self) -> &TimeSpan {
        &self.span
    }

    fn render_channel(&self, channel: &Channel) -> String {
        let name = &channel.table;
        let mut rv = format!("{}_openValue = ", name);
        rv += &channel.selector.render(&self.span, RangeKind::Before);
        rv += " |> last()\n";
        rv += " |> toFloat()\n\n";

        rv += &format!("{}_rangeValues = ", name);
        rv += &channel.selector.render(&self.span, RangeKind::Span);
        rv += &render_aggregator(&self.span, channel.aggregator);
        rv += " |> toFloat()\n\n";

        rv += &format!("{} = ", name);
        rv += &render_union(&[format!("{}_openValue", name), format!("{}_rangeValues", name)]);
        rv += " |> group()\n";
        rv += &format!(
            " |> set(key: \"name\", value:\"{}\")\n",
            channel.item.export_name()
        );
        rv += " |> keep(columns: [\"_time\", \"_value\", \"name\"])\n";
        rv
    }
}

impl FluxQuery for WindowedQuery {
    fn build(&self) -> String {
        let mut rv = String::new();
        for channel in &self.channels {
            rv += &self.render_channel(channel);
        }

        let tables: Vec<&str> = self.channels.iter().map(|c| c.table.as_str()).collect();
        rv += &render_union(&tables);
        rv += " |> group(columns: [\"_time\"], mode: \"by\")\n";
        rv += " |> pivot(rowKey: [\"_time\"], columnKey: [\"name\"], valueColumn: \"_value\")\n";
        rv += " |> group()\n";
        rv += " |> sort(columns: [\"_time\"], desc: false)\n";
        rv
    }

    fn repack(&self, response: &Response) -> QueryResult<Vec<Row>> {
        let columns = self.response_columns();
        let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
        response.to_values(&columns)
    }

    fn strategy(&self) -> Strategy {
        Strategy::Channels(
            self.channels
                .iter()
                .map(|c| (c.item.export_name().to_string(), c.item.exporter()))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    fn response_columns(&self) -> Vec<String> {
        std::iter::once("_time".to_string())
            .chain(self.channels.iter().map(|c| c.item.export_name().to_string()))
            .collect()
    }
}
