use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use cashback_mirror::config;
use cashback_mirror::remote::TursoClient;
use cashback_mirror::Mirror;

#[derive(Debug, Parser)]
#[command(author, version, about = "Keep the local cashback replica in sync with the remote catalog")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let remote = Arc::new(TursoClient::from_config(&cfg)?);
    let mut mirror = Mirror::open(&cfg.database_url(), remote, cfg.sync_settings()).await?;

    let status = mirror.sync_status().await?;
    info!(
        stores = status.stores,
        cashbacks = status.cashbacks,
        last_sync = ?status.last_sync,
        "replica opened"
    );

    mirror.start_background();
    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    mirror.shutdown().await;
    Ok(())
}
