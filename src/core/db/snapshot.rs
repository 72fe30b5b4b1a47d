use std::path::{Path, PathBuf};

use sqlx::SqlitePool;

use super::{SnapshotStore, StorageError, state};
use crate::models::StagedImage;

/// Key of the one record that holds the session.
pub const IMAGES_KEY: &str = "images";

pub struct SqliteSnapshotStore {
    path: PathBuf,
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteSnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSnapshotStore")
            .field("path", &self.path)
            .finish()
    }
}

impl SqliteSnapshotStore {
    /// Connect to the store at `path`, creating the collection on first use.
    /// `quota_bytes` caps how large the database may grow.
    pub async fn open<P: AsRef<Path>>(path: P, quota_bytes: Option<u64>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let pool = state::connect(&path, quota_bytes)
            .await
            .map_err(|e| StorageError::Unavailable(format!("{:#}", e)))?;
        tracing::debug!(path = ?path, "snapshot store opened");
        Ok(Self { path, pool })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let value = sqlx::query_scalar::<_, Vec<u8>>("SELECT value FROM uploaded_images WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    pub async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO uploaded_images (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Release the connection so the file can be reopened elsewhere.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl SnapshotStore for SqliteSnapshotStore {
    async fn read_all(&self) -> Result<Vec<StagedImage>, StorageError> {
        match self.get(IMAGES_KEY).await? {
            Some(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupt(e.to_string()))
            }
            None => Ok(Vec::new()),
        }
    }

    async fn write_all(&self, images: &[StagedImage]) -> Result<(), StorageError> {
        let value = serde_json::to_vec(images).map_err(|e| StorageError::Backend(e.to_string()))?;

        // Clear-then-put inside one transaction: readers see either the old
        // snapshot or the new one.
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM uploaded_images")
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO uploaded_images (key, value) VALUES (?, ?)")
            .bind(IMAGES_KEY)
            .bind(&value)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::debug!(images = images.len(), bytes = value.len(), "snapshot written");
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM uploaded_images")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
