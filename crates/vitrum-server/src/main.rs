//! Vitrum Server
//!
//! The engine behind a local-first document workspace: indexes a folder of
//! markdown notes, keeps the index live via a file watcher, pushes events to
//! UI clients over WebSocket, and federates with peer instances on a trusted
//! private network.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use vitrum::federation::PeerClient;
use vitrum::{watcher, Config, DocumentIndex, LiveReloadBus, PeerRegistry, SyncService};
use vitrum_server::AppState;

/// Vitrum Server - local-first document workspace engine
#[derive(Parser, Debug)]
#[command(name = "vitrum-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Workspace root directory
    #[arg(long, default_value = ".", env = "ORG_ROOT")]
    org_root: PathBuf,

    /// HTTP listen port
    #[arg(long, default_value = "3847", env = "PORT")]
    port: u16,

    /// Hostname advertised to peers
    #[arg(long, default_value = "localhost", env = "VITRUM_HOST")]
    host: String,

    /// Display name used when the peer config is first created
    #[arg(long, default_value = "My Workspace", env = "VITRUM_DISPLAY_NAME")]
    display_name: String,

    /// Log level
    #[arg(long, default_value = "info", env = "VITRUM_LOG_LEVEL")]
    log_level: Level,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let org_root = args
        .org_root
        .canonicalize()
        .with_context(|| format!("Workspace root not found: {}", args.org_root.display()))?;

    info!("Starting Vitrum Server");
    info!(root = %org_root.display(), "Workspace root");
    info!(port = args.port, "HTTP port");

    let config = Config::new(&org_root)
        .with_port(args.port)
        .with_host(args.host)
        .with_display_name(args.display_name);

    // Build the index up front so the first request sees a full workspace
    let mut index = DocumentIndex::new(&org_root);
    let stats = index.build();
    info!(
        indexed = stats.indexed,
        failed = stats.failed,
        "Initial index built"
    );
    let index = Arc::new(RwLock::new(index));

    // Wire up the engine services
    let bus = LiveReloadBus::new();
    let registry = Arc::new(
        PeerRegistry::new(&config, bus.clone()).context("Failed to initialize peer registry")?,
    );
    let sync = Arc::new(
        SyncService::new(
            config.clone(),
            Arc::clone(&index),
            Arc::clone(&registry),
            bus.clone(),
        )
        .context("Failed to initialize sync service")?,
    );
    let client = PeerClient::new().context("Failed to initialize peer client")?;

    // One shutdown signal fans out to every background loop
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let peer_count = registry.peers().len();
    info!(peers = peer_count, "Starting peer polling");
    let _peer_loop = registry.start_polling(shutdown_rx.clone());

    let shared_count = sync.shared_documents().len();
    info!(adopted = shared_count, "Starting origin polling");
    let _sync_loop = sync.start_polling(shutdown_rx.clone());

    let watcher_handle = watcher::spawn(
        org_root.clone(),
        Arc::clone(&index),
        bus.clone(),
        Arc::clone(&sync),
    )
    .context("Failed to start file watcher")?;

    let state = Arc::new(AppState {
        config,
        index,
        bus,
        registry,
        sync,
        client,
        start_time: Instant::now(),
        last_indexed: RwLock::new(chrono::Utc::now()),
    });

    let app = vitrum_server::router(state);
    let addr: SocketAddr = ([0, 0, 0, 0], args.port).into();
    info!(addr = %addr, "Binding HTTP server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind HTTP server")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    // Stop the background loops and the watcher before exiting
    let _ = shutdown_tx.send(true);
    watcher_handle.shutdown().await;

    info!("Vitrum Server shutting down");
    Ok(())
}

/// Wait for a ctrl-c signal for graceful shutdown
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install ctrl-c signal handler");
    info!("Received ctrl-c, initiating graceful shutdown");
}
