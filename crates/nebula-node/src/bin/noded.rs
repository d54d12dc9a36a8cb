//! Nebula worker daemon.
//!
//! `noded` holds ingested blocks in memory and serves the `Node` gRPC
//! surface: liveness, state, residency, task execution and plan fragment
//! queries. It exits on SIGINT/SIGTERM or on a shutdown command task from
//! the coordinator.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use nebula_common::memory::Pool;
use nebula_node::{BlockManager, NodeService, StaticSource, TaskExecutor};
use nebula_proto::NodeServer;

/// Nebula worker daemon.
#[derive(Parser, Debug)]
#[command(name = "noded", version, about = "Nebula worker node")]
struct Args {
    /// Host address to bind to.
    #[arg(long, default_value = "0.0.0.0", env = "NEBULA_NODE_HOST")]
    host: String,

    /// Port to listen on.
    #[arg(short = 'p', long, default_value_t = 9199, env = "NEBULA_NODE_PORT")]
    port: u16,

    /// Page size in bytes for block memory.
    #[arg(long, default_value_t = 64 * 1024)]
    page_size: usize,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, default_value = "info", env = "NEBULA_LOG_LEVEL")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .context("invalid bind address")?;

    let pool = Pool::shared(args.page_size);
    let blocks = BlockManager::new(pool);
    // Row sources are wired by deployment; the daemon itself starts empty.
    let source = StaticSource::new();
    let executor = Arc::new(TaskExecutor::new(Arc::clone(&blocks), source));
    let shutdown = executor.shutdown_signal();

    let service = NodeService::new(blocks, executor);
    info!(%addr, "nebula node listening");

    tonic::transport::Server::builder()
        .add_service(NodeServer::new(service))
        .serve_with_shutdown(addr, async move {
            tokio::select! {
                _ = signal::ctrl_c() => info!("interrupt received"),
                _ = shutdown.notified() => info!("shutdown command received"),
            }
        })
        .await
        .context("node server failed")?;

    info!("nebula node stopped");
    Ok(())
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
