//! Nebula coordinator daemon.
//!
//! `nebulad` serves the `V1` and `Echo` gRPC surfaces and drives the
//! reconciliation loop that keeps the worker fleet converged on the
//! cluster config. It holds no persistent state: everything is rebuilt
//! from the config file plus node polling.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::Notify;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use nebula_client::{ClientConfig, RemoteNodeConnector};
use nebula_ingest::LocalScanner;
use nebula_meta::ConfigLoader;
use nebula_server::{EchoService, NodeSync, Runtime, SyncOptions, V1Service};
use nebula_proto::{EchoServer, V1Server};

/// Nebula coordinator daemon.
#[derive(Parser, Debug)]
#[command(name = "nebulad", version, about = "Nebula coordinator")]
struct Args {
    /// Host address to bind to.
    #[arg(long, default_value = "0.0.0.0", env = "NEBULA_HOST")]
    host: String,

    /// Port to listen on.
    #[arg(short = 'p', long, default_value_t = 9190, env = "NEBULA_PORT")]
    port: u16,

    /// Cluster config file; the `NCONF` env var overrides it.
    #[arg(long = "cls-conf", default_value = "configs/cluster.yml")]
    cls_conf: String,

    /// Interval in milliseconds between cluster config checks.
    #[arg(long = "cls-conf-update-interval", default_value_t = 5000)]
    cls_conf_update_interval: u64,

    /// Interval in milliseconds between node sync ticks.
    #[arg(long = "node-sync-interval", default_value_t = 5000)]
    node_sync_interval: u64,

    /// Max tables returned by the Tables RPC when no limit is given.
    #[arg(long = "max-tables-return", default_value_t = 500)]
    max_tables_return: usize,

    /// Fan-out pool size; keep it at least `max(node count, query
    /// concurrency) + 1` so reconciliation and queries cannot starve
    /// each other.
    #[arg(long, default_value_t = 32)]
    pool_size: usize,

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

    // NCONF overrides the flag, matching the container deployment shape.
    let conf_uri = std::env::var("NCONF").unwrap_or_else(|_| args.cls_conf.clone());
    let interval = Duration::from_millis(args.node_sync_interval);

    let runtime = Runtime::new(args.pool_size);
    let connector = Arc::new(RemoteNodeConnector::new(ClientConfig {
        connect_timeout: Duration::from_secs(2),
        // Tick-scoped deadline: a slow node never stalls the loop.
        rpc_timeout: interval.mul_f64(0.8),
    }));

    let sync = NodeSync::new(
        Arc::clone(&runtime),
        connector.clone(),
        Arc::new(LocalScanner),
        ConfigLoader::new(),
        SyncOptions {
            conf_uri: conf_uri.clone(),
            interval,
            conf_check_interval: Duration::from_millis(args.cls_conf_update_interval),
        },
    );

    let shutdown = Arc::new(Notify::new());
    let mut sync_handle = tokio::spawn(sync.run(Arc::clone(&shutdown)));

    let v1 = V1Service::new(Arc::clone(&runtime), connector, args.max_tables_return);
    info!(%addr, conf = %conf_uri, "nebula server listening");

    let server = tonic::transport::Server::builder()
        .add_service(V1Server::new(v1))
        .add_service(EchoServer::new(EchoService))
        .serve_with_shutdown(addr, {
            let shutdown = Arc::clone(&shutdown);
            async move {
                let _ = signal::ctrl_c().await;
                info!("interrupt received");
                shutdown.notify_waiters();
            }
        });
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            result.context("server failed")?;
            shutdown.notify_waiters();
            sync_handle.await.context("scheduler panicked")??;
        }
        result = &mut sync_handle => {
            // The scheduler only returns early on a fatal invariant;
            // propagate it so the process exits non-zero and gets
            // restarted cleanly.
            error!("scheduler stopped before server shutdown");
            result.context("scheduler panicked")??;
        }
    }

    info!("nebula server stopped");
    Ok(())
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
