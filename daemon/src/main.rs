use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use capiops_daemon::config::Config;
use capiops_daemon::dashboard::Dashboard;
use capiops_daemon::dispatcher::Dispatcher;
use capiops_daemon::job_store::HttpJobStore;
use capiops_daemon::ledger::Ledger;
use capiops_daemon::logging::setup_logging;
use capiops_daemon::metrics::MetricsCollector;
use capiops_daemon::poller::Poller;
use capiops_daemon::server::{self, Server};

#[derive(Parser)]
#[command(name = "capiopsd")]
#[command(about = "Tracks CAPI/CAPA provisioning operations for the capiops CLI", long_about = None)]
struct Args {
    /// Configuration file (YAML or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Socket to listen on, overrides the configuration
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Backend base URL, overrides the configuration
    #[arg(long)]
    backend_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(socket) = args.socket {
        config.server.socket_path = socket;
    }
    if let Some(url) = args.backend_url {
        config.server.backend_url = url;
    }

    setup_logging(&config.logging)?;
    log::info!("Starting capiopsd against {}", config.server.backend_url);

    let store = Arc::new(
        HttpJobStore::new(
            &config.server.backend_url,
            Duration::from_millis(config.server.request_timeout_ms),
            config.job_store.max_jobs,
        )
        .context("creating backend client")?,
    );
    let ledger = Ledger::shared(config.ledger.max_entries);
    let metrics = Arc::new(MetricsCollector::new());
    let poller = Arc::new(Poller::new(store.clone(), ledger.clone(), metrics.clone()));
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        ledger.clone(),
        poller.clone(),
        metrics.clone(),
        &config,
    ));
    let dashboard = Arc::new(Dashboard::new(store, ledger, poller.clone()));
    let server = Arc::new(Server::new(dispatcher, dashboard, metrics));

    let socket_path = config.server.socket_path.clone();
    let listener = server::bind(&socket_path)?;
    log::info!("Listening on {}", socket_path.display());

    let result = tokio::select! {
        res = server.serve(listener) => res,
        _ = tokio::signal::ctrl_c() => {
            log::info!("Interrupted, shutting down");
            Ok(())
        }
    };

    poller.shutdown();
    if let Err(e) = std::fs::remove_file(&socket_path) {
        log::warn!("Could not remove socket {}: {}", socket_path.display(), e);
    }
    result
}
