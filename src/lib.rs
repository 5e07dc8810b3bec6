//! # fluxplan
//!
//! Compiles structured time-series export requests into Flux programs,
//! batches related requests into as few store round-trips as possible and
//! repacks the store's responses into uniform rows.
//!
//! ## Features
//!
//! - **Time span resolution**: partially specified windows are completed or rejected
//! - **Planning**: requests are grouped per domain and strategy
//! - **Windowed channels**: many series merged into one pivoted program
//! - **Repacking**: change detection and discontinuity detection over results
//!
//! ## Modules
//!
//! - [`model`]: Export requests and time spans
//! - [`query`]: Planner, builders and repackers
//! - [`executor`]: Running programs against InfluxDB
//! - [`config`]: Domains, buckets and connection settings
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fluxplan::config::Config;
//! use fluxplan::executor::{execute_plan, InfluxHttpExecutor};
//! use fluxplan::model::{ExportStrategy, QueryItem, TimeSpanSpec};
//! use fluxplan::query::QueryPlan;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(Config::load_default());
//!
//!     // Last six hours in 24 windows ending now
//!     let span = TimeSpanSpec::new()
//!         .width(chrono::Duration::hours(6))
//!         .window_count(24)
//!         .resolve_now()?;
//!
//!     let mut plan = QueryPlan::new(config.clone());
//!     plan.add_item(
//!         QueryItem::new("monitors", span, "lab.temp", "temperature", ExportStrategy::ChangesOnly)
//!             .tag("site", "lab"),
//!     )?;
//!
//!     let executor = InfluxHttpExecutor::new(config, std::time::Duration::from_secs(30))?;
//!     let output = execute_plan(&plan, &executor).await?;
//!
//!     println!("{}", serde_json::to_string_pretty(&output)?);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod executor;
pub mod model;
pub mod query;

pub use config::{Config, DomainResolver};
pub use executor::{execute_plan, ExecuteError, QueryExecutor};
pub use model::{ExportStrategy, QueryItem, TimeSpan, TimeSpanSpec};
pub use query::{FluxQuery, QueryError, QueryPlan};
