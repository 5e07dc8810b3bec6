//! Plan execution
//!
//! The planner only produces program text. An executor runs each program
//! against the domain's store and hands the response back to the query that
//! produced it for repacking.
//!
//! - **QueryExecutor**: runs one program for one domain
//! - **InfluxHttpExecutor**: InfluxDB v2 HTTP API implementation
//! - **execute_plan**: runs a whole plan into `{domain: {name: output}}`
//!
//! Domains run concurrently; queries within one domain run in order.

mod annotated_csv;
mod error;
mod http;

pub use annotated_csv::decode as decode_annotated_csv;
pub use error::{ExecuteError, ExecuteResult};
pub use http::InfluxHttpExecutor;

use crate::query::{FluxQuery, QueryPlan, QueryResult, Response, Row, Strategy};
use async_trait::async_trait;
use futures_util::future::try_join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

/// Runs generated programs against a store
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Run `program` in `domain`, merging tables into one frame if `want_tabular`
    async fn execute(
        &self,
        domain: &str,
        program: &str,
        want_tabular: bool,
    ) -> ExecuteResult<Response>;
}

/// Repacked result of one named query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryOutput {
    pub strategy: Strategy,
    pub columns: Vec<String>,
    pub data: Vec<Row>,
}

/// Results of a whole plan, by domain and query name
pub type PlanOutput = BTreeMap<String, BTreeMap<String, QueryOutput>>;

/// Run every query of one domain in order
pub async fn execute_domain(
    plan: &QueryPlan,
    executor: &dyn QueryExecutor,
    domain: &str,
) -> ExecuteResult<BTreeMap<String, QueryOutput>> {
    let queries = plan.generate_queries(domain).collect::<QueryResult<Vec<_>>>()?;

    let mut outputs = BTreeMap::new();
    for (name, query) in queries {
        let response = executor
            .execute(domain, &query.build(), query.want_tabular_response())
            .await?;
        let data = query.repack(&response)?;
        info!(domain, name = %name, rows = data.len(), "Query complete");

        outputs.insert(
            name,
            QueryOutput {
                strategy: query.strategy(),
                columns: query.response_columns(),
                data,
            },
        );
    }
    Ok(outputs)
}

/// Run every domain of a plan concurrently
pub async fn execute_plan(plan: &QueryPlan, executor: &dyn QueryExecutor) -> ExecuteResult<PlanOutput> {
    let domains = plan.query_domains().map(|domain| async move {
        let outputs = execute_domain(plan, executor, domain).await?;
        Ok::<_, ExecuteError>((domain.to_string(), outputs))
    });

    Ok(try_join_all(domains).await?.into_iter().collect())
}
