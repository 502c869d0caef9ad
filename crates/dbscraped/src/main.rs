//! dbscraped — the dbscrape daemon.
//!
//! Assembles the tracer, the metrics registry, the `sys_m_disks` family
//! and the sqlx-backed collector, then either serves the HTTP API or runs
//! a single scrape.
//!
//! # Usage
//!
//! ```text
//! dbscraped serve --config /etc/dbscrape/dbscraped.toml
//! dbscraped scrape --target db1:30015
//! ```

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dbscrape_api::ApiState;
use dbscrape_collector::{DisksFamily, ScrapeCollector, SqlxDriver, Target};
use dbscrape_metrics::{MetricsRegistry, render_prometheus};
use dbscrape_trace::{RecentSpans, SdkTracerProvider, SpanLogger, Tracer, parent_based};

use crate::config::DaemonConfig;

const DEFAULT_FILTER: &str = "info,dbscraped=debug,dbscrape=debug";

#[derive(Parser)]
#[command(name = "dbscraped", about = "On-demand database metrics scraper")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API; every /metrics request scrapes its target once.
    Serve {
        /// Path to dbscraped.toml.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Listen address, overrides `server.listen`.
        #[arg(long)]
        listen: Option<String>,
    },
    /// Scrape one target and print the exposition to stdout.
    Scrape {
        /// Target address (`host:port`, or a file path for sqlite).
        #[arg(long)]
        target: String,

        /// Path to dbscraped.toml.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Serve { config, listen } => {
            let mut config = DaemonConfig::load(config.as_deref())?;
            if let Some(listen) = listen {
                config.server.listen = listen;
            }
            serve(config).await
        }
        Command::Scrape { target, config } => {
            let config = DaemonConfig::load(config.as_deref())?;
            scrape_once(config, &target).await
        }
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Everything a scrape needs, registered exactly once.
struct Pipeline {
    collector: Arc<ScrapeCollector<SqlxDriver>>,
    family: Arc<DisksFamily>,
    spans: RecentSpans,
    provider: SdkTracerProvider,
    registry: MetricsRegistry,
}

impl Pipeline {
    /// Flushes span processors; failures are logged, never fatal.
    fn shutdown(&self) {
        if let Err(e) = self.provider.shutdown() {
            warn!(error = %e, "tracer provider shutdown failed");
        }
    }
}

fn build_pipeline(config: &DaemonConfig) -> anyhow::Result<Pipeline> {
    let registry = MetricsRegistry::new();

    let spans = RecentSpans::new(config.trace.recent_spans);
    let mut builder = SdkTracerProvider::builder()
        .with_sampler(parent_based(config.sampler()?))
        .with_span_processor(spans.clone());
    if config.trace.log_spans {
        builder = builder.with_span_processor(SpanLogger);
    }
    let provider = builder.build();
    let tracer = Tracer::new(provider.clone());

    let mut family = DisksFamily::register(&registry).context("registering sys_m_disks views")?;
    if let Some(statement) = &config.database.statement {
        family = family.with_statement(statement.clone());
    }

    let driver = SqlxDriver::new(&config.database.scheme);
    let collector = ScrapeCollector::new(driver, registry.clone(), tracer, config.scrape_config()?)
        .context("registering scrape views")?;
    info!(
        scheme = %config.database.scheme,
        views = registry.view_names().len(),
        "scrape pipeline initialized"
    );

    Ok(Pipeline {
        collector: Arc::new(collector),
        family: Arc::new(family),
        spans,
        provider,
        registry,
    })
}

async fn serve(config: DaemonConfig) -> anyhow::Result<()> {
    info!("dbscrape daemon starting");
    let addr = config.listen_addr()?;
    let pipeline = build_pipeline(&config)?;
    if config.database.user.is_empty() || config.database.password.is_empty() {
        warn!("database credentials are not configured; scrapes will be rejected");
    }

    let state = ApiState::new(
        pipeline.collector.clone(),
        pipeline.family.clone(),
        pipeline.spans.clone(),
        &config.server.namespace,
        config.credentials(),
    )
    .context("registering HTTP server views")?;
    let router = dbscrape_api::build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
        })
        .await?;

    pipeline.shutdown();
    info!("dbscrape daemon stopped");
    Ok(())
}

async fn scrape_once(config: DaemonConfig, address: &str) -> anyhow::Result<()> {
    let pipeline = build_pipeline(&config)?;
    let credentials = config.credentials();
    let target = Target {
        address: address.to_string(),
        user: credentials.user,
        password: credentials.password,
        database: credentials.database,
    };

    let report = pipeline
        .collector
        .run(&target, pipeline.family.as_ref())
        .await;
    pipeline.shutdown();
    let report = report?;
    info!(
        outcome = report.outcome.as_str(),
        rows = report.rows_scanned,
        trace_id = %report.trace_id,
        "scrape finished"
    );

    print!(
        "{}",
        render_prometheus(&config.server.namespace, &pipeline.registry.snapshot())
    );
    Ok(())
}
