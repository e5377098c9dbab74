use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use cashback_mirror::config;
use cashback_mirror::remote::{Statement, TursoClient};

const MIRRORED_TABLES: [&str; 4] = ["stores", "platforms", "partnerships", "cashbacks"];

#[derive(Debug, Parser)]
#[command(author, version, about = "Check the remote schema the mirror depends on")]
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
    let client = TursoClient::from_config(&cfg)?;

    let tables = names_of(&client, "table").await?;
    println!("Tables found: {tables:?}");
    for table in MIRRORED_TABLES {
        report(tables.iter().any(|t| t == table), &format!("table '{table}'"));
    }

    let has_updates = tables.iter().any(|t| t == "table_updates");
    report(has_updates, "table 'table_updates'");
    if has_updates {
        let rs = client
            .execute(Statement::new("SELECT * FROM table_updates"))
            .await?;
        println!("table_updates rows: {}", rs.rows.len());
        println!("  columns: {}", rs.column_names().join(", "));
        for row in rs.iter() {
            let cells: Vec<String> = row.values().iter().map(ToString::to_string).collect();
            println!("  - {}", cells.join(" | "));
        }
    }

    let triggers = names_of(&client, "trigger").await?;
    println!("\nTriggers found: {triggers:?}");
    let missing: Vec<String> = expected_triggers()
        .into_iter()
        .filter(|t| !triggers.contains(t))
        .collect();
    if missing.is_empty() {
        println!("PASS: all sync triggers exist.");
    } else {
        println!("FAIL: missing triggers: {missing:?}");
    }

    let views = names_of(&client, "view").await?;
    println!("\nViews found: {views:?}");
    Ok(())
}

async fn names_of(client: &TursoClient, kind: &str) -> Result<Vec<String>> {
    let rs = client
        .execute(
            Statement::new("SELECT name FROM sqlite_master WHERE type = ? ORDER BY name")
                .bind(cashback_mirror::remote::Value::text(kind)),
        )
        .await?;
    Ok(rs.map_rows(|row| row.text("name"))?)
}

/// `tr_<table>_{ins,upd,del}` for every mirrored table.
fn expected_triggers() -> Vec<String> {
    MIRRORED_TABLES
        .iter()
        .flat_map(|table| ["ins", "upd", "del"].map(|op| format!("tr_{table}_{op}")))
        .collect()
}

fn report(ok: bool, what: &str) {
    if ok {
        println!("PASS: {what} exists.");
    } else {
        println!("FAIL: {what} MISSING.");
    }
}
