use std::path::PathBuf;
use std::time::Duration;

use crate::core::db::SqliteSnapshotStore;
use crate::core::session::{DEFAULT_CAPACITY, SessionStore};
use crate::detection::HttpDetectionClient;

pub const DEFAULT_ENDPOINT: &str = "http://localhost:5001/api/v1/detect";
pub const DEFAULT_STORE_PATH: &str = ".anonymizer/session.db";

/// Runtime settings. The binary fills these from flags and environment
/// variables; anything left unset keeps the default.
#[derive(Debug, Clone)]
pub struct Settings {
    pub endpoint: String,
    pub store_path: PathBuf,
    pub capacity: usize,
    /// Upper bound on the session database size. `None` means unbounded.
    pub quota_bytes: Option<u64>,
    /// Deadline for one detection request. `None` leaves it to the transport.
    pub request_timeout: Option<Duration>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            store_path: PathBuf::from(DEFAULT_STORE_PATH),
            capacity: DEFAULT_CAPACITY,
            quota_bytes: None,
            request_timeout: None,
        }
    }
}

impl Settings {
    /// Restore the persisted session, degrading to memory-only on failure.
    pub async fn open_session(&self) -> SessionStore<SqliteSnapshotStore> {
        SessionStore::restore(
            self.capacity,
            SqliteSnapshotStore::open(&self.store_path, self.quota_bytes),
        )
        .await
    }

    pub fn detection_client(&self) -> anyhow::Result<HttpDetectionClient> {
        HttpDetectionClient::new(&self.endpoint, self.request_timeout)
    }
}
