//! Flux query compilation
//!
//! Turns export requests into Flux programs and store responses back into
//! rows:
//!
//! - **Planner**: groups items by domain and strategy
//! - **Builders**: one compiler per export strategy
//! - **Windowed**: multi-channel windowed programs
//! - **Schema**: distinct tag value listing
//! - **Repack**: response model and row transforms
//!
//! # Generated programs
//!
//! ```text
//! from(bucket: "<bucket>")
//!  |> range(start: <unix_start>, stop: <unix_stop>)
//!  |> filter(fn: (r) => r["_measurement"] == "<measurement>")
//!  |> ...
//! ```
//!
//! # Example
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//! use chrono::{Duration, TimeZone, Utc};
//! use fluxplan::model::{ExportStrategy, QueryItem, TimeSpanSpec};
//! use fluxplan::query::{FluxQuery, QueryPlan};
//!
//! let now = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
//! let span = TimeSpanSpec::new().width(Duration::hours(6)).resolve(now).unwrap();
//!
//! let mut buckets = BTreeMap::new();
//! buckets.insert("plant".to_string(), "plant-data".to_string());
//!
//! let mut plan = QueryPlan::new(Arc::new(buckets));
//! plan.add_item(QueryItem::new("plant", span.clone(), "a", "power", ExportStrategy::WindowedMean))
//!     .unwrap();
//! plan.add_item(QueryItem::new("plant", span, "b", "power", ExportStrategy::WindowedSum))
//!     .unwrap();
//!
//! for query in plan.generate_queries("plant") {
//!     let (name, query) = query.unwrap();
//!     assert_eq!(name, "windowed");
//!     assert!(query.build().contains("pivot(rowKey: [\"_time\"], columnKey: [\"name\"]"));
//! }
//! ```

mod builder;
mod error;
mod flux;
mod planner;
mod repack;
mod schema;
mod windowed;

pub use builder::{
    AggregatedQuery, ChangesOnlyQuery, DiscontinuitiesQuery, FluxQuery, SchemaStrategy,
    SimpleQuery, Strategy, StrategyTag,
};
pub use error::{QueryError, QueryResult};
pub use flux::{identifier, RangeKind, RecordShape, Selector};
pub use planner::{GeneratedQueries, PlannedQuery, QueryPlan, WINDOWED_QUERY_NAME};
pub use repack::{
    changed_indices, discontinuity_indices, Response, Row, Table, Value, DEFAULT_STEP_BAND,
};
pub use schema::{DistinctTagValues, DistinctTagValuesBuilder};
pub use windowed::{WindowedPlanBuilder, WindowedQuery};
