use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;

use cashback_mirror::config;
use cashback_mirror::db::{self, HistoryQuery};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Query the local cashback replica and print JSON"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Stores with their best current offer
    Stores {
        /// Case-insensitive substring of the store name
        #[arg(long)]
        search: Option<String>,
    },
    /// One store with the latest cashback per platform
    Store { id: i64 },
    /// Cashback history of a store
    History {
        id: i64,
        /// First day of the range (YYYY-MM-DD)
        #[arg(long)]
        start: Option<NaiveDate>,
        /// Last day of the range (YYYY-MM-DD)
        #[arg(long)]
        end: Option<NaiveDate>,
        /// Comma-separated platform ids
        #[arg(long, value_delimiter = ',')]
        platforms: Vec<i64>,
    },
    /// All platforms by name
    Platforms,
    /// Last probe/sync times and row counts
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    match args.command {
        Command::Stores { search } => {
            print_json(&db::list_stores_with_best_offer(&pool, search.as_deref()).await?)?
        }
        Command::Store { id } => {
            let detail = db::store_detail(&pool, id)
                .await?
                .with_context(|| format!("store {id} not found"))?;
            print_json(&detail)?
        }
        Command::History {
            id,
            start,
            end,
            platforms,
        } => {
            let query = HistoryQuery {
                start,
                end,
                platform_ids: platforms,
            };
            print_json(&db::cashback_history(&pool, id, &query).await?)?
        }
        Command::Platforms => print_json(&db::platforms(&pool).await?)?,
        Command::Status => print_json(&db::sync_status(&pool).await?)?,
    }

    pool.close().await;
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
