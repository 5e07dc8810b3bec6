//! InfluxDB v2 HTTP executor
//!
//! Posts programs to `/api/v2/query` and decodes the annotated CSV answer.

use super::annotated_csv;
use super::error::{ExecuteError, ExecuteResult};
use super::QueryExecutor;
use crate::config::{ConnectionParams, DomainResolver};
use crate::query::Response;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, Instrument};

#[derive(Debug, Serialize)]
struct Dialect {
    annotations: [&'static str; 3],
}

#[derive(Debug, Serialize)]
struct QueryBody<'a> {
    query: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    dialect: Dialect,
}

impl<'a> QueryBody<'a> {
    fn flux(query: &'a str) -> Self {
        Self {
            query,
            kind: "flux",
            dialect: Dialect {
                annotations: ["datatype", "group", "default"],
            },
        }
    }
}

/// Runs programs against the store over HTTP, one connection pool per executor
pub struct InfluxHttpExecutor {
    client: Client,
    resolver: Arc<dyn DomainResolver>,
}

impl InfluxHttpExecutor {
    pub fn new(resolver: Arc<dyn DomainResolver>, timeout: Duration) -> ExecuteResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, resolver })
    }

    fn query_url(params: &ConnectionParams) -> String {
        format!(
            "{}/api/v2/query?org={}",
            params.url.trim_end_matches('/'),
            urlencoding::encode(&params.org)
        )
    }

    async fn post(&self, params: &ConnectionParams, program: &str) -> ExecuteResult<String> {
        let response = self
            .client
            .post(Self::query_url(params))
            .header("Authorization", format!("Token {}", params.token))
            .header("Accept", "application/csv")
            .json(&QueryBody::flux(program))
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if status.is_success() {
            Ok(text)
        } else {
            Err(ExecuteError::Store {
                status: status.as_u16(),
                message: text,
            })
        }
    }
}

#[async_trait]
impl QueryExecutor for InfluxHttpExecutor {
    async fn execute(
        &self,
        domain: &str,
        program: &str,
        want_tabular: bool,
    ) -> ExecuteResult<Response> {
        let params = self
            .resolver
            .connection(domain)
            .ok_or_else(|| ExecuteError::UnknownDomain(domain.to_string()))?;

        let request_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::debug_span!("flux_query", %request_id, domain);

        async move {
            debug!(program, "Executing query");
            let body = self.post(&params, program).await?;
            let tables = annotated_csv::decode(&body)?;
            debug!(tables = tables.len(), "Query returned");
            Ok::<_, ExecuteError>(Response::from_tables(tables, want_tabular))
        }
        .instrument(span)
        .await
    }
}
