use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, broadcast};

use crate::core::db::{PersistenceState, SnapshotStore, StorageError};
use crate::models::{Annotation, DataUrl, DetectionBox, FileBlob, ImageId, StagedImage};

/// Hard ceiling on staged images.
pub const DEFAULT_CAPACITY: usize = 10;

pub const QUOTA_WARNING: &str = "Storage is full. Your images are kept for this session only \
and will be lost when the session ends. Tip: process the current images, then clear them \
before adding new ones.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The staged set changed; views should refresh.
    Changed { len: usize },
    /// Durable storage was lost to the quota. Sent at most once per session.
    QuotaWarning,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("position {position} is out of range (session holds {len} images)")]
    OutOfRange { position: usize, len: usize },
    #[error("image {0} is no longer staged")]
    NotFound(ImageId),
}

struct Inner<S> {
    images: Vec<StagedImage>,
    backing: Option<S>,
    persistence: PersistenceState,
}

/// Authoritative ordered set of staged images.
///
/// Every structural mutation takes the lock, applies the change, writes the
/// full snapshot and only then releases the lock, so mutations and their
/// writes never interleave.
pub struct SessionStore<S> {
    capacity: usize,
    inner: Mutex<Inner<S>>,
    events: broadcast::Sender<SessionEvent>,
    batch_running: AtomicBool,
}

/// Held while an annotation batch runs over a session. Dropping it lets the
/// next batch start.
pub struct BatchGuard<'a>(&'a AtomicBool);

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<S: SnapshotStore> SessionStore<S> {
    /// A session with no durable backing at all.
    pub fn in_memory(capacity: usize) -> Self {
        Self::build(capacity, Vec::new(), None)
    }

    /// Open the backing store and load the previous snapshot. Any failure
    /// leaves a usable, memory-only session behind.
    pub async fn restore<F>(capacity: usize, open: F) -> Self
    where
        F: Future<Output = Result<S, StorageError>>,
    {
        let store = match open.await {
            Ok(store) => store,
            Err(e) => {
                tracing::warn!(error = %e, "durable storage unavailable, using session-only mode");
                return Self::in_memory(capacity);
            }
        };

        match store.read_all().await {
            Ok(mut images) => {
                if images.len() > capacity {
                    tracing::warn!(stored = images.len(), capacity, "stored session exceeds capacity, truncating");
                    images.truncate(capacity);
                }
                tracing::info!(images = images.len(), "session restored");
                Self::build(capacity, images, Some(store))
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to load stored session, using session-only mode");
                Self::in_memory(capacity)
            }
        }
    }

    fn build(capacity: usize, images: Vec<StagedImage>, backing: Option<S>) -> Self {
        let (events, _) = broadcast::channel(64);
        let persistence = PersistenceState {
            available: backing.is_some(),
            warned_once: false,
        };
        Self {
            capacity,
            inner: Mutex::new(Inner {
                images,
                backing,
                persistence,
            }),
            events,
            batch_running: AtomicBool::new(false),
        }
    }

    /// Claim the session for one annotation batch. `None` while another
    /// batch, from any pipeline, still holds it.
    pub fn begin_batch(&self) -> Option<BatchGuard<'_>> {
        if self.batch_running.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(BatchGuard(&self.batch_running))
    }

    pub fn batch_running(&self) -> bool {
        self.batch_running.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.images.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.len().await)
    }

    pub async fn images(&self) -> Vec<StagedImage> {
        self.inner.lock().await.images.clone()
    }

    pub async fn get(&self, position: usize) -> Option<StagedImage> {
        self.inner.lock().await.images.get(position).cloned()
    }

    pub async fn contains(&self, id: ImageId) -> bool {
        self.inner.lock().await.images.iter().any(|image| image.id == id)
    }

    pub async fn persistence(&self) -> PersistenceState {
        self.inner.lock().await.persistence
    }

    /// Stage as many `files` as still fit; the rest are dropped without
    /// error. Returns how many were staged.
    pub async fn add_files<I>(&self, files: I) -> usize
    where
        I: IntoIterator<Item = FileBlob>,
    {
        let mut inner = self.inner.lock().await;
        let remaining = self.capacity.saturating_sub(inner.images.len());
        let mut added = 0;

        for blob in files.into_iter().take(remaining) {
            let image = StagedImage::from_blob(&blob);
            tracing::debug!(id = %image.id, name = %image.name, mime = %image.mime_type, "image staged");
            inner.images.push(image);
            added += 1;
            self.commit(&mut inner).await;
        }
        added
    }

    pub async fn remove_at(&self, position: usize) -> Result<StagedImage, SessionError> {
        let mut inner = self.inner.lock().await;
        let len = inner.images.len();
        if position >= len {
            return Err(SessionError::OutOfRange { position, len });
        }
        let removed = inner.images.remove(position);
        self.commit(&mut inner).await;
        Ok(removed)
    }

    pub async fn remove(&self, id: ImageId) -> Result<StagedImage, SessionError> {
        let mut inner = self.inner.lock().await;
        let position = position_of(&inner.images, id)?;
        let removed = inner.images.remove(position);
        self.commit(&mut inner).await;
        Ok(removed)
    }

    pub async fn clear_all(&self) {
        let mut inner = self.inner.lock().await;
        inner.images.clear();
        self.commit(&mut inner).await;
    }

    /// Attach an overlay and its boxes to the image at `position`. A stale
    /// position yields `OutOfRange`, which callers treat as a no-op.
    pub async fn replace_annotation(
        &self,
        position: usize,
        annotated_data: DataUrl,
        boxes: Vec<DetectionBox>,
    ) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        let len = inner.images.len();
        let image = inner
            .images
            .get_mut(position)
            .ok_or(SessionError::OutOfRange { position, len })?;
        image.annotation = Some(Annotation {
            annotated_data,
            boxes,
        });
        self.commit(&mut inner).await;
        Ok(())
    }

    /// Same as [`replace_annotation`](Self::replace_annotation), addressed by id so
    /// the result lands on the right image even if earlier ones were removed.
    pub async fn replace_annotation_for(
        &self,
        id: ImageId,
        annotated_data: DataUrl,
        boxes: Vec<DetectionBox>,
    ) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        let position = position_of(&inner.images, id)?;
        inner.images[position].annotation = Some(Annotation {
            annotated_data,
            boxes,
        });
        self.commit(&mut inner).await;
        Ok(())
    }

    /// Persist the current snapshot and notify subscribers.
    async fn commit(&self, inner: &mut Inner<S>) {
        let result = match inner.backing.as_ref() {
            Some(store) => store.write_all(&inner.images).await,
            None => Ok(()),
        };

        match result {
            Ok(()) => {}
            Err(StorageError::QuotaExceeded) => {
                // No retries for the rest of the session.
                inner.backing = None;
                inner.persistence.available = false;
                if !inner.persistence.warned_once {
                    inner.persistence.warned_once = true;
                    tracing::warn!("{}", QUOTA_WARNING);
                    let _ = self.events.send(SessionEvent::QuotaWarning);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to persist session snapshot");
            }
        }

        let _ = self.events.send(SessionEvent::Changed {
            len: inner.images.len(),
        });
    }
}

fn position_of(images: &[StagedImage], id: ImageId) -> Result<usize, SessionError> {
    images
        .iter()
        .position(|image| image.id == id)
        .ok_or(SessionError::NotFound(id))
}
