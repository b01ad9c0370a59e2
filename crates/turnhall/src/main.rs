//! `turnhall-server`: runs a Turnhall server backed by a directory of
//! table snapshots.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use turnhall::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "turnhall-server")]
#[command(about = "Authoritative server for turn-based card tables", version)]
struct Args {
    /// Address to accept WebSocket connections on
    #[arg(long, env = "TURNHALL_BIND", default_value = "127.0.0.1:8080")]
    bind: String,

    /// Directory holding snapshots of ongoing tables
    #[arg(long, env = "TURNHALL_DATA_DIR", default_value = "./ongoing_tables")]
    data_dir: PathBuf,

    /// Seconds a disconnected player keeps their seat before it is vacated
    #[arg(long, env = "TURNHALL_GRACE_SECS", default_value_t = 30)]
    grace_secs: u64,

    /// Committed actions per snapshot write
    #[arg(long, env = "TURNHALL_SNAPSHOT_EVERY", default_value_t = 1)]
    snapshot_every: usize,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, env = "TURNHALL_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), TurnhallError> {
    let args = Args::parse();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let store = FileTableStore::new(&args.data_dir)?;
    let server = TurnhallServer::builder()
        .bind(&args.bind)
        .store(Arc::new(store))
        .session_config(SessionConfig {
            reconnect_grace_secs: args.grace_secs,
            ..SessionConfig::default()
        })
        .registry_config(RegistryConfig::default().with_snapshot_every(args.snapshot_every))
        .build(DevAuthenticator)
        .await?;

    match server.local_addr() {
        Ok(addr) => tracing::info!(%addr, data_dir = %args.data_dir.display(), "listening"),
        Err(e) => tracing::warn!(error = %e, "local address unavailable"),
    }

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await
}
