use std::{borrow::Cow, path::Path};

use anyhow::Context;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};

const PAGE_SIZE: u64 = 4096;
const MIN_PAGES: u64 = 8;

/// Convert a byte quota into a `max_page_count` for the default page size.
pub fn quota_pages(quota_bytes: u64) -> u64 {
    (quota_bytes / PAGE_SIZE).max(MIN_PAGES)
}

/// Open (creating if missing) the session database and bring its schema up
/// to date.
pub(super) async fn connect(db_file: &Path, quota_bytes: Option<u64>) -> anyhow::Result<SqlitePool> {
    if let Some(parent) = db_file.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create storage directory {:?}", parent))?;
    }

    let mut connect_opts = SqliteConnectOptions::new()
        .filename(db_file)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal);
    if let Some(bytes) = quota_bytes {
        connect_opts = connect_opts.pragma(
            "max_page_count",
            Cow::<'static, str>::Owned(quota_pages(bytes).to_string()),
        );
    }

    // A single connection keeps snapshot writes strictly ordered.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(connect_opts)
        .await
        .with_context(|| format!("Failed to open session database {:?}", db_file))?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .with_context(|| format!("Failed to migrate session database {:?}", db_file))?;

    Ok(pool)
}
