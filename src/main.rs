use anyhow::Result;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use repricer::config::{AppConfig, LoggingConfig};
use repricer::models::RetailerDirectory;
use repricer::plugins::FetcherRegistry;
use repricer::scraper::WebScraper;
use repricer::{store, CatalogPass, TriggerMonitor};

#[derive(Parser, Debug)]
#[command(name = "repricer", version, about = "Re-prices the product catalog when triggered")]
struct Cli {
    /// Directory holding default.toml and per-environment overrides
    #[arg(long, default_value = "config")]
    config_dir: String,

    /// Run a single pass immediately and exit instead of watching the trigger
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let config = AppConfig::load(&cli.config_dir)?;
    let _log_guard = init_tracing(&config.logging)?;

    info!("Starting repricer...");

    if config.metrics.enabled {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], config.metrics.port))
            .install()?;
        info!("Metrics exporter listening on port {}", config.metrics.port);
    }

    let store = store::connect(&config.database, config.trigger.poll_interval()).await?;
    let directory = Arc::new(
        RetailerDirectory::load(store.as_ref(), &config.catalog.retailers_collection).await?,
    );
    info!("Loaded {} retailers", directory.len());

    let scraper = Arc::new(WebScraper::new(config.scraper.clone()));
    let registry = FetcherRegistry::from_profiles(&config.retailers, scraper);
    for retailer_id in directory.ids() {
        if !registry.has_fetcher(retailer_id) {
            warn!(
                "No selector profile for retailer {} ({}); its links will fail",
                directory.display_name(retailer_id),
                retailer_id
            );
        }
    }

    let pass = Arc::new(CatalogPass::from_config(
        &config,
        Arc::clone(&store),
        Arc::new(registry),
        directory,
    )?);

    if cli.once {
        let report = pass.run().await?;
        info!(
            "Pass complete: {} items, {} links updated, {} failed, {} history writes",
            report.items_seen, report.links_updated, report.links_failed, report.history_writes
        );
        return Ok(());
    }

    let mut monitor = TriggerMonitor::new(store, pass, &config.trigger);
    monitor
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await;

    info!("Shutting down...");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::from_default_env().add_directive("repricer=debug".parse()?);

    let (file_layer, guard) = match &logging.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, "repricer.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    Ok(guard)
}
