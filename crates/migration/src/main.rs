//! Schema tool for the ledger database.
//!
//! The target is taken from `LEDGER__DATABASE__URL` (same variable the service
//! reads), then `DATABASE_URL`, then a local SQLite file.

use sea_orm::Database;
use sea_orm_migration::prelude::*;

const DEFAULT_URL: &str = "sqlite:./ledger.db?mode=rwc";

const HELP: &str = "\
ledger schema tool

usage: migration [COMMAND]

commands:
  up       apply pending migrations (default)
  down     revert the latest migration
  fresh    drop every table and re-apply all migrations
  status   list applied and pending migrations

environment:
  LEDGER__DATABASE__URL, DATABASE_URL   database to migrate";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let command = std::env::args().nth(1).unwrap_or_else(|| "up".to_string());
    if matches!(command.as_str(), "-h" | "--help" | "help") {
        println!("{HELP}");
        return Ok(());
    }

    let url = ["LEDGER__DATABASE__URL", "DATABASE_URL"]
        .into_iter()
        .find_map(|name| std::env::var(name).ok())
        .unwrap_or_else(|| DEFAULT_URL.to_string());
    let db = Database::connect(&url).await?;

    match command.as_str() {
        "up" => migration::Migrator::up(&db, None).await?,
        "down" => migration::Migrator::down(&db, Some(1)).await?,
        "fresh" => migration::Migrator::fresh(&db).await?,
        "status" => migration::Migrator::status(&db).await?,
        other => {
            eprintln!("unknown command `{other}`\n\n{HELP}");
            std::process::exit(2);
        }
    }

    Ok(())
}
