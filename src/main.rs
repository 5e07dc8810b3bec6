//! fluxplan CLI
//!
//! Compiles export requests into Flux programs and optionally runs them
//! against the configured store:
//! - Print the programs of a request file
//! - Run a request file and print the repacked rows as JSON
//! - List distinct tag values
//! - Generate a config template

use anyhow::{anyhow, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use fluxplan::config::{generate_default_config, Config, DomainResolver, LoggingConfig};
use fluxplan::executor::{execute_plan, InfluxHttpExecutor, QueryExecutor};
use fluxplan::model::{parse_duration, QueryRequest, TimeSpanSpec};
use fluxplan::query::{DistinctTagValues, FluxQuery, QueryPlan};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "fluxplan")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Compile time-series export requests into Flux programs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: search the standard locations)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the programs generated for a request file
    Compile {
        /// TOML file with one `[[items]]` table per export
        request: PathBuf,
    },

    /// Run a request file and print the results as JSON
    Run {
        /// TOML file with one `[[items]]` table per export
        request: PathBuf,
    },

    /// List the distinct values of a tag
    Tags {
        #[arg(long)]
        domain: String,
        #[arg(long)]
        measurement: String,
        #[arg(long)]
        tag: String,
        /// Extra filters in key=value format
        #[arg(short, long)]
        filter: Vec<String>,
        /// Only look at this much recent data (e.g., 12h, 7d, 2w)
        #[arg(short, long)]
        last: Option<String>,
        /// Run the query instead of printing it
        #[arg(long)]
        execute: bool,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Contents of a request file
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PlanRequest {
    #[serde(default)]
    items: Vec<QueryRequest>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { output } = &cli.command {
        let content = generate_default_config();
        match output {
            Some(path) => {
                std::fs::write(path, content)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                eprintln!("Config written to {}", path.display());
            }
            None => print!("{}", content),
        }
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    init_tracing(&config.logging);

    let timeout = Duration::from_secs(config.store.request_timeout_secs);
    let resolver: Arc<dyn DomainResolver> = Arc::new(config);

    match cli.command {
        Commands::Compile { request } => {
            let plan = load_plan(&request, resolver)?;
            for domain in plan.query_domains() {
                for query in plan.generate_queries(domain) {
                    let (name, query) = query?;
                    println!(
                        "// {} / {} ({})",
                        domain,
                        name,
                        serde_json::to_string(&query.strategy())?
                    );
                    println!("{}", query.build());
                }
            }
        }

        Commands::Run { request } => {
            let plan = load_plan(&request, resolver.clone())?;
            let executor = InfluxHttpExecutor::new(resolver, timeout)?;
            let output = execute_plan(&plan, &executor).await?;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }

        Commands::Tags {
            domain,
            measurement,
            tag,
            filter,
            last,
            execute,
        } => {
            let mut listing = DistinctTagValues::builder(resolver.as_ref(), &domain, measurement, tag)?;
            for pair in &filter {
                let (key, value) = pair
                    .split_once('=')
                    .ok_or_else(|| anyhow!("Invalid filter '{}', expected key=value", pair))?;
                listing = listing.with_filter(key.trim(), value.trim());
            }
            if let Some(last) = last {
                let span = TimeSpanSpec::new().width(parse_duration(&last)?).resolve_now()?;
                listing = listing.with_time_span(span);
            }

            let query = listing.finish()?;
            let program = query.build();
            if !execute {
                println!("{}", program);
                return Ok(());
            }

            let executor = InfluxHttpExecutor::new(resolver, timeout)?;
            let response = executor
                .execute(&domain, &program, query.want_tabular_response())
                .await?;
            let values: Vec<_> = query
                .repack(&response)?
                .into_iter()
                .flatten()
                .collect();
            println!("{}", serde_json::to_string_pretty(&values)?);
        }

        Commands::Config { .. } => unreachable!("handled before config loading"),
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("fluxplan={}", logging.level)));
    let registry = tracing_subscriber::registry().with(filter);

    if logging.format == "json" {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

/// Read a request file and plan its items against one capture of "now"
fn load_plan(path: &Path, resolver: Arc<dyn DomainResolver>) -> anyhow::Result<QueryPlan> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let request: PlanRequest = toml::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    let now = Utc::now();
    let mut plan = QueryPlan::new(resolver);
    for item in request.items {
        let name = item.export_name.clone();
        let item = item
            .resolve(now)
            .with_context(|| format!("Invalid time span for '{}'", name))?;
        plan.add_item(item)?;
    }

    tracing::info!(
        items = plan.len(),
        domains = plan.query_domains().count(),
        "Planned request"
    );
    Ok(plan)
}
