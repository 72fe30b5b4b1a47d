use crate::core::db::SnapshotStore;
use crate::core::session::SessionStore;
use crate::detection::{AnnotateError, DetectionClient, DetectionRequest};
use crate::models::{ImageId, StagedImage, Subject};
use crate::overlay::{self, OverlayError};

/// Receives per-image lifecycle notifications during a batch.
pub trait ProgressReporter {
    /// A request for `id` is about to go out.
    fn started(&self, id: ImageId);
    /// The result for `id` has been applied. Never called for failures.
    fn finished(&self, id: ImageId);
}

impl ProgressReporter for () {
    fn started(&self, _id: ImageId) {}
    fn finished(&self, _id: ImageId) {}
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Annotated { boxes: usize },
    /// The service answered but found nothing; the original stays on display.
    NoDetections,
    Failed(AnnotateError),
    /// The image was removed before its result could be attached.
    Dropped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemReport {
    pub id: ImageId,
    pub name: String,
    pub outcome: ItemOutcome,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub items: Vec<ItemReport>,
}

impl BatchReport {
    pub fn annotated(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Annotated { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Failed(_)))
    }

    fn count(&self, pred: impl Fn(&ItemOutcome) -> bool) -> usize {
        self.items.iter().filter(|item| pred(&item.outcome)).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchError {
    #[error("an annotation batch is already running")]
    AlreadyRunning,
}

/// Sends staged images to the detection service one at a time and folds the
/// results back into the session.
///
/// Only one batch runs per session at a time, however many pipelines are
/// built over it.
pub struct AnnotationPipeline<'a, S, C, P> {
    store: &'a SessionStore<S>,
    client: &'a C,
    progress: &'a P,
}

impl<'a, S, C, P> AnnotationPipeline<'a, S, C, P>
where
    S: SnapshotStore,
    C: DetectionClient,
    P: ProgressReporter,
{
    pub fn new(store: &'a SessionStore<S>, client: &'a C, progress: &'a P) -> Self {
        Self {
            store,
            client,
            progress,
        }
    }

    pub fn is_running(&self) -> bool {
        self.store.batch_running()
    }

    /// Annotate every image staged when the batch starts, in position order.
    ///
    /// Individual failures are recorded in the report and never stop the
    /// batch. An empty session yields an empty report.
    pub async fn run_batch(&self, subject: Subject) -> Result<BatchReport, BatchError> {
        let Some(_guard) = self.store.begin_batch() else {
            return Err(BatchError::AlreadyRunning);
        };

        let images = self.store.images().await;
        let mut report = BatchReport::default();
        if images.is_empty() {
            tracing::debug!("no staged images, nothing to annotate");
            return Ok(report);
        }

        tracing::info!(images = images.len(), subject = %subject, "annotation batch started");
        for (index, image) in images.iter().enumerate() {
            let outcome = self.annotate(subject, image).await;
            match &outcome {
                ItemOutcome::Annotated { boxes } => {
                    tracing::debug!(position = index + 1, name = %image.name, boxes, "image annotated")
                }
                ItemOutcome::NoDetections => {
                    tracing::debug!(position = index + 1, name = %image.name, "no detections")
                }
                ItemOutcome::Failed(e) => {
                    tracing::warn!(position = index + 1, name = %image.name, error = %e, "annotation failed")
                }
                ItemOutcome::Dropped => {
                    tracing::debug!(id = %image.id, name = %image.name, "image removed mid-batch, result dropped")
                }
            }
            report.items.push(ItemReport {
                id: image.id,
                name: image.name.clone(),
                outcome,
            });
        }

        tracing::info!(
            annotated = report.annotated(),
            failed = report.failed(),
            "annotation batch finished"
        );
        Ok(report)
    }

    async fn annotate(&self, subject: Subject, image: &StagedImage) -> ItemOutcome {
        // Removed before its turn came: no request, no indicator.
        if !self.store.contains(image.id).await {
            return ItemOutcome::Dropped;
        }
        self.progress.started(image.id);

        let request = DetectionRequest::for_image(subject, image);
        let response = match self.client.detect(&request).await {
            Ok(response) => response,
            // The progress bar is left where it is.
            Err(e) => return ItemOutcome::Failed(e),
        };

        if response.objects.is_empty() {
            self.progress.finished(image.id);
            return ItemOutcome::NoDetections;
        }

        let boxes = response.objects;
        let source = image.source_data.clone();
        let drawn = boxes.clone();
        let annotated = match tokio::task::spawn_blocking(move || overlay::render(&source, &drawn)).await {
            Ok(Ok(annotated)) => annotated,
            Ok(Err(e)) => return ItemOutcome::Failed(e.into()),
            Err(e) => {
                return ItemOutcome::Failed(AnnotateError::Overlay(OverlayError::Encode(format!(
                    "render task failed: {e}"
                ))));
            }
        };

        let count = boxes.len();
        match self.store.replace_annotation_for(image.id, annotated, boxes).await {
            Ok(()) => {
                self.progress.finished(image.id);
                ItemOutcome::Annotated { boxes: count }
            }
            Err(_) => ItemOutcome::Dropped,
        }
    }
}
