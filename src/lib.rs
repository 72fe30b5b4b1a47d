pub mod config;
pub mod core;
pub mod detection;
pub mod logging;
pub mod models;
pub mod overlay;
pub mod pipeline;
pub mod progress;

pub use config::Settings;
pub use crate::core::db::{PersistenceState, SnapshotStore, SqliteSnapshotStore, StorageError};
pub use crate::core::session::{BatchGuard, SessionError, SessionEvent, SessionStore};
pub use detection::{AnnotateError, DetectionClient, DetectionRequest, DetectionResponse, HttpDetectionClient};
pub use models::{Annotation, CornerRect, DataUrl, DetectionBox, FileBlob, ImageId, StagedImage, Subject};
pub use pipeline::{AnnotationPipeline, BatchError, BatchReport, ItemOutcome, ItemReport, ProgressReporter};
pub use progress::{ProgressFrame, ProgressIndicator, ProgressTracker};
