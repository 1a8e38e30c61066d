//! API server binary.
//!
//! Serves the demo user service and `/healthz` behind the full handler chain,
//! reloads credentials and policy when the config file changes, and shuts down
//! gracefully on SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use apiserver_kit::config::watcher::{run_reloader, ConfigWatcher};
use apiserver_kit::config::{load_config, ServerConfig};
use apiserver_kit::demo::{api_router, UserStore};
use apiserver_kit::http::{ApiServer, ServerComponents};
use apiserver_kit::lifecycle::{shutdown_on_signal, SafeWaitGroup, StopSignal};
use apiserver_kit::observability::{logging, metrics};
use apiserver_kit::rest::ScopeRegistry;

#[derive(Parser)]
#[command(name = "apiserver-kit")]
#[command(about = "Kubernetes-style API server with a demo user service", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };

    logging::init_logging(config.observability.log_format);
    logging::install_panic_hook();

    tracing::info!("apiserver-kit v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        authorization = ?config.authorization.mode,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let components = ServerComponents::from_config(&config, SafeWaitGroup::new());

    // Keep the watcher alive for the lifetime of the server.
    let _watcher = match &cli.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            tokio::spawn(run_reloader(updates, components.reload.clone()));
            match watcher.run() {
                Ok(w) => Some(w),
                Err(e) => {
                    tracing::warn!(error = %e, "Config watcher unavailable, reload disabled");
                    None
                }
            }
        }
        None => None,
    };

    let mut scopes = ScopeRegistry::new();
    let api = api_router(Arc::new(UserStore::new()), &mut scopes)?;
    let scopes = scopes.freeze();
    for (scope, description) in scopes.iter() {
        tracing::debug!(%scope, %description, "ACL scope");
    }

    let server = ApiServer::new(config, api, components.chain);
    let stop = StopSignal::new();
    shutdown_on_signal(stop.clone());

    let handle = server.run(stop.subscribe()).await?;
    handle.stopped().await;
    tracing::info!("Listener stopped, waiting for in-flight requests");
    handle.wait().await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
