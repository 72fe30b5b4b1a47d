mod snapshot;
mod state;

use std::future::Future;

use crate::models::StagedImage;

pub use snapshot::{IMAGES_KEY, SqliteSnapshotStore};
pub use state::quota_pages;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// The backing store could not be opened at all.
    #[error("durable storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage quota exceeded")]
    QuotaExceeded,
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("stored snapshot is corrupt: {0}")]
    Corrupt(String),
}

/// SQLITE_FULL, what SQLite reports once `max_page_count` is reached.
const SQLITE_FULL: &str = "13";

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().as_deref() == Some(SQLITE_FULL)
                || db_err.message().contains("database or disk is full")
            {
                return StorageError::QuotaExceeded;
            }
        }
        StorageError::Backend(err.to_string())
    }
}

/// Durable home of the whole session. Every write replaces the previous
/// snapshot entirely.
pub trait SnapshotStore {
    /// The stored sequence, or an empty one if nothing was ever written.
    fn read_all(&self) -> impl Future<Output = Result<Vec<StagedImage>, StorageError>>;
    fn write_all(&self, images: &[StagedImage]) -> impl Future<Output = Result<(), StorageError>>;
    fn clear(&self) -> impl Future<Output = Result<(), StorageError>>;
}

/// Process-wide durability flags. `available` only ever goes from true to
/// false within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistenceState {
    pub available: bool,
    pub warned_once: bool,
}

impl Default for PersistenceState {
    fn default() -> Self {
        Self {
            available: true,
            warned_once: false,
        }
    }
}
