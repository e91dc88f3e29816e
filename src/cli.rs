use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use iocwatch::config::Config;
use iocwatch::export::Exporter;
use iocwatch::ingest::{run_ingestion, IngestConfig};
use iocwatch::llm::Triager;
use iocwatch::metrics::Metrics;
use iocwatch::notify::Notifier;
use iocwatch::providers::default_providers;
use iocwatch::repository::Database;
use iocwatch::server::{serve, AppState};

#[derive(Parser)]
#[command(name = "iocwatch")]
#[command(author, version, about = "Threat intelligence aggregation and alert enrichment service")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the REST API server
    Serve,

    /// Run batch ingestion over the configured threat feeds
    Ingest {
        /// Repeat the run every N seconds instead of exiting
        #[arg(long)]
        every: Option<u64>,
    },
}

pub async fn run_command(cli: Cli) -> Result<()> {
    let config = Config::from_env();

    match cli.command {
        Commands::Serve => run_serve(config).await,
        Commands::Ingest { every } => run_ingest(config, every).await,
    }
}

async fn run_serve(config: Config) -> Result<()> {
    let db = Database::open(&config.database_url)
        .with_context(|| format!("failed to open catalog at {}", config.database_url))?;

    let metrics = Arc::new(Metrics::new());

    let triager = if config.llm.enabled {
        let triager = Triager::from_config(&config.llm, metrics.clone());
        if triager.is_enabled() {
            info!("LLM triage enabled with model {}", config.llm.model);
        } else {
            info!("LLM triage requested but no API key configured, disabled");
        }
        Some(triager)
    } else {
        info!("LLM triage disabled");
        None
    };

    let notifier = config.notify_webhook_url.as_ref().map(|url| {
        info!("alert notifier enabled");
        Notifier::new(url.clone())
    });

    let state = Arc::new(AppState {
        db: db.clone(),
        exporter: Exporter::new(db),
        triager,
        notifier,
        metrics,
        auth_token: config.server.auth_token.clone(),
    });

    serve(state, config.server.port).await
}

async fn run_ingest(config: Config, every: Option<u64>) -> Result<()> {
    let db = Database::open(&config.database_url)
        .with_context(|| format!("failed to open catalog at {}", config.database_url))?;

    let metrics = Arc::new(Metrics::new());
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .user_agent(concat!("iocwatch/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    loop {
        let report = run_ingestion(
            db.clone(),
            default_providers(),
            client.clone(),
            IngestConfig::default(),
            metrics.clone(),
        )
        .await;

        info!(
            "ingestion report: fetched={} saved={} provider_failures={} batches={} duration_ms={}",
            report.fetched,
            report.saved,
            report.provider_failures,
            report.batches,
            report.duration_ms
        );

        match every {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => break,
        }
    }

    Ok(())
}
