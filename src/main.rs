use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use uatu_engine::config::LoggingConfig;
use uatu_engine::{
    AppConfig, CycleHandle, CycleRunner, CycleScheduler, HttpRenderer, MemoryStore, PluginManager, ProductManager,
    ProductRequest,
};

#[derive(Parser, Debug)]
#[command(name = "uatu-engine", version, about = "Tracks prices, versions and numbers across web pages")]
struct Cli {
    /// Configuration file; defaults to config/{default,RUN_MODE,local} plus UATU__* variables
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON array of products to seed the store with
    #[arg(long)]
    products: Option<PathBuf>,

    /// Run a single cycle, print its summary and exit
    #[arg(long)]
    once: bool,
}

fn init_tracing(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("uatu_engine={},warn", logging.level)));

    let (file_layer, guard) = match &logging.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, "uatu-engine.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(guard)
}

async fn seed_products(manager: &ProductManager, path: &Path) -> Result<()> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let requests: Vec<ProductRequest> =
        serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))?;

    for request in requests {
        let name = request.name.clone();
        match manager.create_product(request).await {
            Ok(product) => info!("Seeded product {} ({})", product.name, product.id),
            Err(e) => warn!("Skipping product {}: {}", name, e),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path),
        None => AppConfig::from_env(),
    }
    .context("failed to load configuration")?;

    let _log_guard = init_tracing(&config.logging)?;
    info!("Starting Uatu engine...");

    if config.metrics.enabled {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], config.metrics.port))
            .install()
            .context("failed to install Prometheus exporter")?;
        info!("Prometheus metrics on port {}", config.metrics.port);
    }

    let plugins = PluginManager::with_defaults(&config).await?;
    let renderer = Arc::new(HttpRenderer::new(&config.scraper)?);
    let store = Arc::new(MemoryStore::new());
    let manager = Arc::new(ProductManager::new(store, plugins.clone(), renderer, config.clone()));

    if let Some(path) = &cli.products {
        seed_products(&manager, path).await?;
    }

    let handle = CycleHandle::new(CycleRunner::new(manager, &config.scheduler));

    if cli.once {
        let summary = handle.run_now().await?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        let mut scheduler = CycleScheduler::new(handle, &config.scheduler).await?;
        scheduler.start().await?;

        tokio::signal::ctrl_c().await?;
        info!("Shutting down...");
        if let Err(e) = scheduler.shutdown().await {
            error!("Scheduler shutdown failed: {}", e);
        }
    }

    plugins.shutdown().await?;
    Ok(())
}
