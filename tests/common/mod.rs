mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from anonymizer for tests
pub use anonymizer::{
    AnnotateError, AnnotationPipeline, BatchError, DataUrl, DetectionBox, DetectionClient, DetectionRequest,
    DetectionResponse, FileBlob, ImageId, ItemOutcome, PersistenceState, ProgressReporter, SessionError,
    SessionEvent, SessionStore, SnapshotStore, SqliteSnapshotStore, StagedImage, StorageError, Subject,
};
