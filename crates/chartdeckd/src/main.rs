//! chartdeckd: the chartdeck daemon.
//!
//! Single binary that assembles the deployment portal:
//! - State store (redb)
//! - Variable resolver + secret cipher
//! - Dispatcher, backend executor and deployment tracker
//! - Promoter, upgrade detector, dependency graphs
//! - REST API + Prometheus metrics
//!
//! # Usage
//!
//! ```text
//! CHARTDECK_PASSKEY=... chartdeckd serve --port 8420 --data-dir /var/lib/chartdeck
//! ```

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chartdeck_api::{ApiState, build_router};
use chartdeck_backend::{
    BackendExecutor, ChartBackend, CraneRegistry, HelmCli, StaticImageLookup, TemplateGate, completion_channel,
    dispatch_channel,
};
use chartdeck_dispatch::{DeploymentTracker, Dispatcher};
use chartdeck_insight::{DependencyGraphBuilder, UpgradeDetector};
use chartdeck_promote::Promoter;
use chartdeck_state::StateStore;
use chartdeck_vars::{RuleSet, SecretCipher, VariableResolver};

use crate::config::DaemonConfig;

const DEFAULT_FILTER: &str = "info,chartdeckd=debug,chartdeck=debug";

/// Bound of the dispatch and completion channels.
const CHANNEL_CAPACITY: usize = 256;

#[derive(Parser)]
#[command(name = "chartdeckd", about = "chartdeck deployment portal daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the API and run the deployment pipeline.
    Serve {
        /// Port to listen on (overrides the config file).
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state (overrides the config file).
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Configuration file.
        #[arg(long, default_value = "chartdeck.toml")]
        config: PathBuf,

        #[arg(long, value_enum, default_value_t = LogFormat::Text)]
        log_format: LogFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            port,
            data_dir,
            config,
            log_format,
        } => {
            init_tracing(log_format);
            let mut config = DaemonConfig::load(&config)?;
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(data_dir) = data_dir {
                config.server.data_dir = data_dir;
            }
            run_serve(config).await
        }
    }
}

async fn run_serve(config: DaemonConfig) -> anyhow::Result<()> {
    info!("chartdeck daemon starting");

    std::fs::create_dir_all(&config.server.data_dir)?;
    let db_path = config.server.data_dir.join("chartdeck.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let passkey = std::env::var(&config.secrets.passkey_env)
        .with_context(|| format!("{} is not set", config.secrets.passkey_env))?;
    let cipher = SecretCipher::from_passkey(&passkey);
    let resolver = VariableResolver::new(cipher.clone());

    let rules = RuleSet::compile(&config.rules)?;
    info!(rules = rules.len(), "value rules compiled");

    let mut helm = HelmCli::new(&config.backend.helm_bin);
    if let Some(dir) = &config.backend.kubeconfig_dir {
        std::fs::create_dir_all(dir)?;
        helm = helm.with_kubeconfig_dir(dir);
    }
    let backend: Arc<dyn ChartBackend> = Arc::new(helm);

    let mut crane = CraneRegistry::new(&config.backend.crane_bin);
    if let Some(dir) = &config.backend.docker_config {
        crane = crane.with_docker_config(dir);
    }
    let images = StaticImageLookup::new(config.images.clone());
    let detector = UpgradeDetector::new(Arc::new(crane), Arc::new(images), config.cache.policy());
    info!(services = config.images.len(), "upgrade detector initialized");

    // ── Pipeline ───────────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (publisher, dispatch_rx) = dispatch_channel(CHANNEL_CAPACITY);
    let (completions_tx, completions_rx) = completion_channel(CHANNEL_CAPACITY);

    let executor = BackendExecutor::new(backend.clone(), completions_tx.clone());
    let executor_handle = tokio::spawn(executor.run(dispatch_rx, shutdown_rx.clone()));

    let tracker = DeploymentTracker::new(store.clone());
    let tracker_stats = tracker.stats();
    let tracker_handle = tokio::spawn(tracker.run(completions_rx, shutdown_rx));

    let dispatcher = Dispatcher::new(store.clone(), resolver.clone(), Arc::new(publisher), completions_tx);
    let promoter = Promoter::new(
        store.clone(),
        backend.clone(),
        resolver,
        config.backend.default_repository.clone(),
    );

    // ── Start API server ───────────────────────────────────────

    let state = ApiState {
        store: store.clone(),
        cipher,
        rules: Arc::new(rules),
        dispatcher: Arc::new(dispatcher),
        promoter,
        templates: Arc::new(TemplateGate::new(backend.clone())),
        backend,
        detector: Arc::new(detector),
        graphs: Arc::new(DependencyGraphBuilder::new(store)),
        tracker: tracker_stats,
    };
    let router = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    let _ = executor_handle.await;
    let _ = tracker_handle.await;

    info!("chartdeck daemon stopped");
    Ok(())
}
