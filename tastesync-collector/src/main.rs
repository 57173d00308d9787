//! tastesync-collector - listening history sync service
//!
//! Usage: `tastesync-collector [CONFIG_PATH]`. Without a path the bootstrap
//! file is read from the platform config directory.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tastesync_collector::auth::{CredentialRefresher, NoRefresh, TokenEndpointRefresher};
use tastesync_collector::config::CollectorConfig;
use tastesync_collector::enrichment::{strategy_from_name, EnrichmentResolver, ReferenceTable};
use tastesync_collector::fetcher::{Fetcher, SpotifyClient};
use tastesync_collector::store::{open_store, SnapshotWriter};
use tastesync_collector::sync::Collector;
use tastesync_collector::AppState;
use tastesync_common::config::{
    default_config_path, load_toml_config, LoggingConfig, RootFolderInitializer, RootFolderResolver,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

const MODULE_NAME: &str = "collector";

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    match &logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = match std::env::args().nth(1) {
        Some(path) => PathBuf::from(path),
        None => default_config_path(MODULE_NAME)?,
    };
    let toml_config = load_toml_config(&config_path)?;
    init_tracing(&toml_config.logging)?;

    info!("Starting tastesync-collector");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = CollectorConfig::resolve(toml_config)?;

    let root_folder = RootFolderResolver::new(MODULE_NAME)
        .with_toml(&config.toml)
        .resolve();
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .map_err(|e| anyhow::anyhow!("Failed to initialize root folder: {}", e))?;
    info!("Root folder: {}", initializer.root().display());

    let store = open_store(config.toml.storage.backend, &initializer).await?;
    let writer = SnapshotWriter::new(store);

    let reference_path = initializer.resolve_path(&config.toml.enrichment.reference_table);
    let table = ReferenceTable::load_or_empty(&reference_path)?;
    let strategy = strategy_from_name(&config.toml.enrichment.similarity)?;
    let resolver = Arc::new(EnrichmentResolver::new(
        table,
        strategy,
        config.toml.enrichment.fuzzy_threshold,
    ));

    let client = Arc::new(SpotifyClient::new(&config.toml.upstream.base_url, config.request_timeout())?);
    let fetcher = Arc::new(Fetcher::new(
        client,
        config.rate_limit_per_second,
        config.retry_policy(),
        config.toml.sync.worker_pool_size,
    )?);
    info!(
        rate_limit = config.rate_limit_per_second,
        workers = fetcher.effective_pool_size(),
        "Fetcher ready"
    );

    let refresher: Arc<dyn CredentialRefresher> = match config.client_credentials() {
        Some((client_id, client_secret)) => Arc::new(TokenEndpointRefresher::new(
            config.toml.upstream.token_url.clone(),
            client_id,
            client_secret,
            config.request_timeout(),
        )?),
        None => {
            info!("No client credentials configured, expired tokens will not be refreshed");
            Arc::new(NoRefresh)
        }
    };

    let collector = Collector::new(fetcher, resolver, writer, refresher, config.collector_settings())
        .with_retention(config.retention());

    let state = AppState::new(Arc::new(collector), reference_path);
    let app = tastesync_collector::build_router(state);

    let addr = format!("{}:{}", config.toml.server.host, config.toml.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
