use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use cashback_mirror::config;
use cashback_mirror::remote::TursoClient;
use cashback_mirror::{Mirror, SyncOutcome};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Force one reconciliation from the remote catalog and exit"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Respect the probe window instead of forcing a pass
    #[arg(long)]
    if_stale: bool,
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
    let mirror = Mirror::open(&cfg.database_url(), remote, cfg.sync_settings()).await?;

    info!("starting manual sync");
    let outcome = if args.if_stale {
        mirror.try_sync_if_stale().await
    } else {
        mirror.sync().await
    };
    mirror.shutdown().await;

    match outcome? {
        SyncOutcome::Synced(report) => {
            info!(
                stores = report.stores,
                platforms = report.platforms,
                partnerships = report.partnerships,
                new_cashbacks = report.new_cashbacks,
                "sync finished successfully"
            );
        }
        SyncOutcome::UpToDate => info!("replica already up to date"),
        SyncOutcome::RemoteFailed(reason) => {
            warn!(%reason, "remote unavailable; replica unchanged");
            bail!("sync failed: {reason}");
        }
    }
    Ok(())
}
