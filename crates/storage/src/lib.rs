//! Storage layer: SQLite schemas and helpers.
//!
//! Holds DB pool setup, migration runner, and row models.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

pub mod models;

/// `sqlite::memory:`, `sqlite://:memory:` or any URL with `mode=memory`.
fn is_memory_url(url: &str) -> bool {
    url.trim_start_matches("sqlite:").trim_start_matches("//") == ":memory:"
        || url.split_once('?').is_some_and(|(_, query)| {
            query.split('&').any(|param| param == "mode=memory")
        })
}

pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
    let mut url = database_url.to_string();
    if !database_url.starts_with("sqlite:") {
        let path = std::path::PathBuf::from(database_url);
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let norm = path.to_string_lossy().replace('\\', "/");
        if path.is_absolute() {
            url = format!("sqlite:///{}", norm.trim_start_matches('/'));
        } else {
            url = format!("sqlite://{}", norm);
        }
    }
    let in_memory = is_memory_url(&url);
    let mut options = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);
    if !in_memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }
    let mut opts = SqlitePoolOptions::new();
    if in_memory {
        // The database lives and dies with its only connection.
        opts = opts.max_connections(1).idle_timeout(None).max_lifetime(None);
    } else {
        opts = opts.max_connections(5);
    }
    let pool = opts.connect_with(options).await?;
    tracing::debug!(url = %url, "sqlite pool ready");
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    // Applies SQLx migrations located in crates/storage/migrations.
    // Safe to run multiple times (idempotent).
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
