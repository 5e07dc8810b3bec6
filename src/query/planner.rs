//! Query planning
//!
//! A [`QueryPlan`] collects export requests that share one time span,
//! groups them by domain and strategy and compiles each domain's group into
//! the smallest set of programs: one per single-series item plus at most one
//! multi-channel windowed program.

use crate::config::DomainResolver;
use crate::model::{ExportStrategy, QueryItem, TimeSpan};
use crate::query::builder::{
    AggregatedQuery, ChangesOnlyQuery, DiscontinuitiesQuery, FluxQuery, SimpleQuery, Strategy,
};
use crate::query::error::{QueryError, QueryResult};
use crate::query::flux::RecordShape;
use crate::query::repack::{Response, Row};
use crate::query::windowed::{WindowedPlanBuilder, WindowedQuery};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// Name under which a domain's windowed channels are yielded
pub const WINDOWED_QUERY_NAME: &str = "windowed";

/// Export requests grouped by domain and strategy
///
/// Adding items requires `&mut self`, generating queries only `&self`, so a
/// plan cannot change while its queries are being generated.
pub struct QueryPlan {
    resolver: Arc<dyn DomainResolver>,
    items: BTreeMap<String, BTreeMap<ExportStrategy, Vec<QueryItem>>>,
    time_span: Option<TimeSpan>,
    common_tags: BTreeMap<String, String>,
    export_names: BTreeSet<String>,
}

impl QueryPlan {
    pub fn new(resolver: Arc<dyn DomainResolver>) -> Self {
        Self {
            resolver,
            items: BTreeMap::new(),
            time_span: None,
            common_tags: BTreeMap::new(),
            export_names: BTreeSet::new(),
        }
    }

    /// Add an item to the plan
    ///
    /// Rejects items whose time span differs from the plan's, and export
    /// names already in use. A rejected item leaves the plan unchanged.
    pub fn add_item(&mut self, item: QueryItem) -> QueryResult<()> {
        if let Some(span) = &self.time_span {
            if span != item.time_span() {
                return Err(QueryError::TimeSpanMismatch {
                    expected: span.to_string(),
                    actual: item.time_span().to_string(),
                });
            }
        }
        if self.export_names.contains(item.export_name()) {
            return Err(QueryError::DuplicateExportName(item.export_name().to_string()));
        }

        match &self.time_span {
            None => {
                self.time_span = Some(item.time_span().clone());
                self.common_tags = item.tags().clone();
            }
            Some(_) => self
                .common_tags
                .retain(|key, value| item.tags().get(key) == Some(value)),
        }

        debug!(
            domain = item.domain(),
            exporter = %item.exporter(),
            export_name = item.export_name(),
            "Adding item to query plan"
        );

        self.export_names.insert(item.export_name().to_string());
        self.items
            .entry(item.domain().to_string())
            .or_default()
            .entry(item.exporter())
            .or_default()
            .push(item);
        Ok(())
    }

    /// Domains holding at least one item, in sorted order
    pub fn query_domains(&self) -> impl Iterator<Item = &str> + '_ {
        self.items.keys().map(String::as_str)
    }

    /// Tags shared, by key and value, by every item in the plan
    ///
    /// Informational only: builders filter on each item's own tags.
    pub fn common_tags(&self) -> &BTreeMap<String, String> {
        &self.common_tags
    }

    pub fn time_span(&self) -> Option<&TimeSpan> {
        self.time_span.as_ref()
    }

    pub fn len(&self) -> usize {
        self.export_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.export_names.is_empty()
    }

    /// Items of one domain, grouped by strategy
    pub fn items(&self, domain: &str) -> Option<&BTreeMap<ExportStrategy, Vec<QueryItem>>> {
        self.items.get(domain)
    }

    /// Compile the queries for one domain
    ///
    /// Compilation happens as the returned iterator is advanced. Single-series
    /// items are yielded under their export name; windowed items are merged
    /// and yielded last under [`WINDOWED_QUERY_NAME`]. If any windowed item
    /// is rejected, its error is yielded and the windowed query is omitted
    /// entirely. An unknown domain
    /// yields nothing. Calling again with the same domain yields the same
    /// queries.
    pub fn generate_queries(&self, domain: &str) -> GeneratedQueries<'_> {
        let items: Vec<&QueryItem> = self
            .items
            .get(domain)
            .into_iter()
            .flat_map(|groups| groups.values())
            .flatten()
            .collect();

        debug!(domain, items = items.len(), "Generating queries");

        GeneratedQueries {
            resolver: self.resolver.as_ref(),
            items: items.into_iter(),
            windowed: None,
            windowed_rejected: false,
        }
    }
}

/// Lazy sequence of `(name, query)` pairs for one domain
pub struct GeneratedQueries<'a> {
    resolver: &'a dyn DomainResolver,
    items: std::vec::IntoIter<&'a QueryItem>,
    windowed: Option<WindowedPlanBuilder<'a>>,
    /// Set once any channel is refused; no windowed query is yielded then
    windowed_rejected: bool,
}

impl<'a> GeneratedQueries<'a> {
    fn compile(&mut self, item: &'a QueryItem) -> Option<QueryResult<PlannedQuery>> {
        let resolver = self.resolver;
        let shape = RecordShape::of(item);

        let planned = match item.exporter() {
            ExportStrategy::Raw => SimpleQuery::new(item, resolver, shape).map(PlannedQuery::Simple),
            ExportStrategy::ChangesOnly => {
                ChangesOnlyQuery::new(item, resolver, shape).map(PlannedQuery::ChangesOnly)
            }
            ExportStrategy::DiscontinuitiesOnly => {
                DiscontinuitiesQuery::new(item, resolver, shape).map(PlannedQuery::Discontinuities)
            }
            ExportStrategy::AggregateMean
            | ExportStrategy::AggregateSum
            | ExportStrategy::AggregateBand
            | ExportStrategy::AggregateCount => {
                AggregatedQuery::new(item, resolver, shape).map(PlannedQuery::Aggregated)
            }
            ExportStrategy::WindowedMean
            | ExportStrategy::WindowedSum
            | ExportStrategy::WindowedBand
            | ExportStrategy::WindowedCount => {
                let builder = self
                    .windowed
                    .get_or_insert_with(|| WindowedPlanBuilder::new(resolver));
                let rejected = builder.add_channel(item, shape).err()?;
                self.windowed_rejected = true;
                return Some(Err(rejected));
            }
        };
        Some(planned)
    }
}

impl<'a> Iterator for GeneratedQueries<'a> {
    type Item = QueryResult<(String, PlannedQuery)>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(item) = self.items.next() {
            if let Some(result) = self.compile(item) {
                debug!(
                    export_name = item.export_name(),
                    exporter = %item.exporter(),
                    ok = result.is_ok(),
                    "Compiled query"
                );
                return Some(result.map(|query| (item.export_name().to_string(), query)));
            }
        }

        let builder = self.windowed.take().filter(|b| !b.is_empty())?;
        if self.windowed_rejected {
            debug!(channels = builder.len(), "Dropped windowed query with rejected channels");
            return None;
        }
        debug!(channels = builder.len(), "Compiled windowed query");
        Some(
            builder
                .finish()
                .map(|query| (WINDOWED_QUERY_NAME.to_string(), PlannedQuery::Windowed(query))),
        )
    }
}

/// One compiled query of a plan
#[derive(Debug, Clone)]
pub enum PlannedQuery {
    Simple(SimpleQuery),
    ChangesOnly(ChangesOnlyQuery),
    Discontinuities(DiscontinuitiesQuery),
    Aggregated(AggregatedQuery),
    Windowed(WindowedQuery),
}

impl PlannedQuery {
    fn inner(&self) -> &dyn FluxQuery {
        match self {
            Self::Simple(q) => q,
            Self::ChangesOnly(q) => q,
            Self::Discontinuities(q) => q,
            Self::Aggregated(q) => q,
            Self::Windowed(q) => q,
        }
    }
}

impl FluxQuery for PlannedQuery {
    fn build(&self) -> String {
        self.inner().build()
    }

    fn repack(&self, response: &Response) -> QueryResult<Vec<Row>> {
        self.inner().repack(response)
    }

    fn strategy(&self) -> Strategy {
        self.inner().strategy()
    }

    fn response_columns(&self) -> Vec<String> {
        self.inner().response_columns()
    }

    fn want_tabular_response(&self) -> bool {
        self.inner().want_tabular_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TimeSpanSpec;
    use chrono::{Duration, TimeZone, Utc};

    fn span(hours: i64) -> TimeSpan {
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        TimeSpanSpec::new()
            .start(start)
            .width(Duration::hours(hours))
            .window_count(4)
            .resolve(start)
            .unwrap()
    }

    fn plan() -> QueryPlan {
        let mut buckets = BTreeMap::new();
        buckets.insert("plant".to_string(), "plant".to_string());
        buckets.insert("office".to_string(), "office".to_string());
        QueryPlan::new(Arc::new(buckets))
    }

    fn item(domain: &str, name: &str, exporter: ExportStrategy) -> QueryItem {
        QueryItem::new(domain, span(1), name, "power", exporter)
    }

    fn names(plan: &QueryPlan, domain: &str) -> Vec<String> {
        plan.generate_queries(domain)
            .map(|result| result.unwrap().0)
            .collect()
    }

    #[test]
    fn test_rejects_mismatched_time_span() {
        let mut plan = plan();
        plan.add_item(item("plant", "a", ExportStrategy::Raw)).unwrap();

        let other = QueryItem::new("plant", span(2), "b", "power", ExportStrategy::Raw);
        let err = plan.add_item(other).unwrap_err();
        assert!(matches!(err, QueryError::TimeSpanMismatch { .. }));
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn test_rejects_duplicate_export_name() {
        let mut plan = plan();
        plan.add_item(item("plant", "a", ExportStrategy::Raw)).unwrap();
        assert_eq!(
            plan.add_item(item("office", "a", ExportStrategy::ChangesOnly)),
            Err(QueryError::DuplicateExportName("a".to_string()))
        );
    }

    #[test]
    fn test_common_tags_intersection() {
        let mut plan = plan();
        plan.add_item(item("plant", "a", ExportStrategy::Raw).tag("site", "north").tag("line", "1"))
            .unwrap();
        assert_eq!(plan.common_tags().len(), 2);

        plan.add_item(item("plant", "b", ExportStrategy::Raw).tag("site", "north").tag("line", "2"))
            .unwrap();
        let expected: BTreeMap<String, String> =
            [("site".to_string(), "north".to_string())].into_iter().collect();
        assert_eq!(plan.common_tags(), &expected);

        plan.add_item(item("plant", "c", ExportStrategy::Raw).tag("meter", "m1"))
            .unwrap();
        assert!(plan.common_tags().is_empty());
    }

    #[test]
    fn test_disjoint_tags_accepted() {
        let mut plan = plan();
        plan.add_item(item("plant", "a", ExportStrategy::Raw).tag("site", "north"))
            .unwrap();
        plan.add_item(item("plant", "b", ExportStrategy::Raw).tag("meter", "m1"))
            .unwrap();
        assert!(plan.common_tags().is_empty());
        assert_eq!(plan.time_span(), Some(&span(1)));
    }

    #[test]
    fn test_query_domains() {
        let mut plan = plan();
        assert!(plan.is_empty());
        plan.add_item(item("plant", "a", ExportStrategy::Raw)).unwrap();
        plan.add_item(item("office", "b", ExportStrategy::Raw)).unwrap();
        plan.add_item(item("plant", "c", ExportStrategy::AggregateSum)).unwrap();

        let domains: Vec<&str> = plan.query_domains().collect();
        assert_eq!(domains, vec!["office", "plant"]);
        assert_eq!(plan.query_domains().count(), 2);
        assert_eq!(plan.items("plant").map(|groups| groups.len()), Some(2));
    }

    #[test]
    fn test_windowed_items_merge_into_one_query() {
        let mut plan = plan();
        plan.add_item(item("plant", "a", ExportStrategy::WindowedMean)).unwrap();
        plan.add_item(item("plant", "b", ExportStrategy::WindowedSum)).unwrap();

        let queries: Vec<(String, PlannedQuery)> = plan
            .generate_queries("plant")
            .collect::<QueryResult<_>>()
            .unwrap();
        assert_eq!(queries.len(), 1);

        let (name, query) = &queries[0];
        assert_eq!(name, WINDOWED_QUERY_NAME);
        assert!(matches!(query, PlannedQuery::Windowed(_)));
        let channels = query.strategy().channels().cloned().unwrap();
        assert_eq!(channels.get("a"), Some(&ExportStrategy::WindowedMean));
        assert_eq!(channels.get("b"), Some(&ExportStrategy::WindowedSum));
        assert_eq!(query.response_columns(), vec!["_time", "a", "b"]);
    }

    #[test]
    fn test_dispatch_by_strategy() {
        let mut plan = plan();
        plan.add_item(item("plant", "w", ExportStrategy::WindowedMean)).unwrap();
        plan.add_item(item("plant", "raw", ExportStrategy::Raw)).unwrap();
        plan.add_item(item("plant", "changes", ExportStrategy::ChangesOnly)).unwrap();
        plan.add_item(item("plant", "steps", ExportStrategy::DiscontinuitiesOnly))
            .unwrap();
        plan.add_item(item("plant", "band", ExportStrategy::AggregateBand)).unwrap();
        plan.add_item(item("office", "elsewhere", ExportStrategy::Raw)).unwrap();

        assert_eq!(
            names(&plan, "plant"),
            vec!["raw", "changes", "steps", "band", WINDOWED_QUERY_NAME]
        );

        let strategies: Vec<Option<ExportStrategy>> = plan
            .generate_queries("plant")
            .map(|result| match result.unwrap().1.strategy().single() {
                Some(crate::query::builder::StrategyTag::Export(strategy)) => Some(strategy),
                _ => None,
            })
            .collect();
        assert_eq!(
            strategies,
            vec![
                Some(ExportStrategy::Raw),
                Some(ExportStrategy::ChangesOnly),
                Some(ExportStrategy::DiscontinuitiesOnly),
                Some(ExportStrategy::AggregateBand),
                None,
            ]
        );
    }

    #[test]
    fn test_generation_is_repeatable() {
        let mut plan = plan();
        plan.add_item(item("plant", "a", ExportStrategy::Raw)).unwrap();
        plan.add_item(item("plant", "b", ExportStrategy::WindowedSum)).unwrap();

        let first: Vec<String> = plan
            .generate_queries("plant")
            .map(|result| result.unwrap().1.build())
            .collect();
        let second: Vec<String> = plan
            .generate_queries("plant")
            .map(|result| result.unwrap().1.build())
            .collect();
        assert_eq!(first, second);
        assert!(names(&plan, "nowhere").is_empty());
    }

    #[test]
    fn test_unknown_domain_surfaces_on_generation() {
        let mut plan = plan();
        plan.add_item(item("warehouse", "a", ExportStrategy::Raw)).unwrap();
        plan.add_item(item("warehouse", "b", ExportStrategy::WindowedMean)).unwrap();

        let results: Vec<_> = plan.generate_queries("warehouse").collect();
        assert_eq!(results.len(), 2);
        assert!(results
            .iter()
            .all(|r| matches!(r, Err(QueryError::UnknownDomain(d)) if d == "warehouse")));
    }

    #[test]
    fn test_unsupported_windowed_aggregator() {
        let mut plan = plan();
        plan.add_item(item("plant", "a", ExportStrategy::WindowedBand)).unwrap();

        let results: Vec<_> = plan.generate_queries("plant").collect();
        assert!(matches!(
            results.as_slice(),
            [Err(QueryError::UnsupportedAggregator(ExportStrategy::WindowedBand))]
        ));
    }

    #[test]
    fn test_rejected_channel_drops_windowed_query() {
        let mut plan = plan();
        plan.add_item(item("plant", "a", ExportStrategy::WindowedMean)).unwrap();
        plan.add_item(item("plant", "b", ExportStrategy::WindowedBand)).unwrap();
        plan.add_item(item("plant", "raw", ExportStrategy::Raw)).unwrap();

        let results: Vec<_> = plan.generate_queries("plant").collect();
        assert_eq!(results.len(), 2);
        assert!(matches!(&results[0], Ok((name, PlannedQuery::Simple(_))) if name == "raw"));
        assert!(matches!(
            &results[1],
            Err(QueryError::UnsupportedAggregator(ExportStrategy::WindowedBand))
        ));
    }
}
