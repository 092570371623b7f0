//! Entry point: reads a node configuration file, brings up every configured
//! MDS node through the Node Manager, and serves until asked to stop.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use mimalloc::MiMalloc;
use tracing_subscriber::EnvFilter;

use mds::backend::{BackendInterface, S3Backend, S3BackendOptions};
use mds::config::NodeConfig;
use mds::node_manager::{NodeManager, ServerConfig};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser, Debug)]
#[command(name = "mdsd", about = "Metadata server daemon")]
struct Cli {
    /// Path to the node configuration file (spec.md §6).
    #[arg(short = 'C', long = "config-file", env = "MDS_CONFIG_FILE")]
    config_file: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    // Config must be parsed before the runtime is built: `mds_threads`
    // (spec.md §6, 0 = auto) sizes the worker pool every node's transport
    // and background catch-up tasks share.
    let config = match NodeConfig::from_file(&cli.config_file) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "config validation failed");
            std::process::exit(1);
        }
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads())
        .enable_all()
        .build()?;

    runtime.block_on(run(config))
}

async fn run(config: NodeConfig) -> anyhow::Result<()> {
    let backend: Arc<dyn BackendInterface> =
        Arc::new(S3Backend::new(S3BackendOptions::from_env()?).await?);

    let manager = Arc::new(NodeManager::new());
    for node in &config.mds_nodes {
        let server_config = ServerConfig {
            host: node.host.clone(),
            port: node.port,
            db_directory: node.db_directory.clone(),
            scratch_directory: node.scratch_directory.clone(),
            engine_options: node.engine_options(config.mds_cached_pages),
            poll_interval: config.poll_interval(),
            timeout: config.timeout(),
        };
        manager.start(server_config, backend.clone()).await?;
        tracing::info!(host = %node.host, port = node.port, "node started");
    }

    wait_for_shutdown_signal().await;
    tracing::info!("shutting down");
    manager.stop_all();
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
