use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anonymizer::{
    AnnotateError, DetectionBox, DetectionClient, DetectionRequest, DetectionResponse, FileBlob, ImageId,
    ProgressReporter, SessionEvent, SnapshotStore, SqliteSnapshotStore, StagedImage, StorageError,
};
use image::{ImageBuffer, ImageFormat, Rgb};
use rand::Rng;
use tokio::sync::broadcast;

/// Encodes a solid grey `width`x`height` PNG.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_fn(width, height, |_, _| Rgb([128u8, 128u8, 128u8]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)
        .expect("Failed to encode test image");
    out.into_inner()
}

/// Encodes a PNG of random pixels, which compresses badly and so takes real
/// space once stored.
pub fn noisy_png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut rng = rand::rng();
    let img = ImageBuffer::from_fn(width, height, |_, _| Rgb([rng.random::<u8>(), rng.random::<u8>(), rng.random::<u8>()]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)
        .expect("Failed to encode test image");
    out.into_inner()
}

/// A small PNG file blob named `name`.
pub fn png_blob(name: &str) -> FileBlob {
    FileBlob::new(name, Some("image/png".to_string()), png_bytes(64, 48))
}

pub fn png_blobs(count: usize) -> Vec<FileBlob> {
    (1..=count).map(|i| png_blob(&format!("img{i}.png"))).collect()
}

pub fn names(images: &[StagedImage]) -> Vec<String> {
    images.iter().map(|image| image.name.clone()).collect()
}

/// Creates a SqliteSnapshotStore in a temporary directory.
/// Returns both the store and the temp directory (which must be kept alive).
pub async fn create_test_store(quota_bytes: Option<u64>) -> (SqliteSnapshotStore, tempfile::TempDir) {
    let dir = tempfile::TempDir::new().expect("Failed to create temp directory");
    let store = SqliteSnapshotStore::open(dir.path().join("session.db"), quota_bytes)
        .await
        .expect("Failed to open test store");
    (store, dir)
}

/// Drains every event currently queued on `events`.
pub fn drain(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

pub fn face_box(x: f64, y: f64) -> DetectionBox {
    DetectionBox {
        x,
        y,
        w: 10.0,
        h: 10.0,
        label: Some("face".to_string()),
    }
}

pub fn response_with(objects: Vec<DetectionBox>) -> DetectionResponse {
    DetectionResponse {
        status: Some("success".to_string()),
        message: None,
        objects,
    }
}

/// What a [`ScriptedStore`] saw, shared with the test after the store has
/// been handed to a session.
#[derive(Debug, Default)]
pub struct WriteLog {
    attempts: AtomicUsize,
    snapshots: Mutex<Vec<Vec<String>>>,
}

impl WriteLog {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Names in every successfully written snapshot, oldest first.
    pub fn snapshots(&self) -> Vec<Vec<String>> {
        self.snapshots.lock().unwrap().clone()
    }
}

/// In-memory SnapshotStore that starts failing with `QuotaExceeded` after a
/// fixed number of successful writes.
#[derive(Debug, Default)]
pub struct ScriptedStore {
    stored: Mutex<Vec<StagedImage>>,
    quota_after: Option<usize>,
    log: Arc<WriteLog>,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_images(images: Vec<StagedImage>) -> Self {
        Self {
            stored: Mutex::new(images),
            ..Self::default()
        }
    }

    pub fn quota_after(writes: usize) -> Self {
        Self {
            quota_after: Some(writes),
            ..Self::default()
        }
    }

    pub fn log(&self) -> Arc<WriteLog> {
        Arc::clone(&self.log)
    }
}

impl SnapshotStore for ScriptedStore {
    async fn read_all(&self) -> Result<Vec<StagedImage>, StorageError> {
        Ok(self.stored.lock().unwrap().clone())
    }

    async fn write_all(&self, images: &[StagedImage]) -> Result<(), StorageError> {
        let attempt = self.log.attempts.fetch_add(1, Ordering::SeqCst);
        if self.quota_after.is_some_and(|limit| attempt >= limit) {
            return Err(StorageError::QuotaExceeded);
        }
        *self.stored.lock().unwrap() = images.to_vec();
        self.log.snapshots.lock().unwrap().push(names(images));
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.stored.lock().unwrap().clear();
        Ok(())
    }
}

/// DetectionClient answering from a table keyed by filename. Unknown files
/// get an empty response.
#[derive(Debug, Default)]
pub struct ScriptedClient {
    answers: HashMap<String, Result<DetectionResponse, AnnotateError>>,
    requests: Mutex<Vec<DetectionRequest>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(mut self, filename: &str, result: Result<DetectionResponse, AnnotateError>) -> Self {
        self.answers.insert(filename.to_string(), result);
        self
    }

    pub fn requests(&self) -> Vec<DetectionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl DetectionClient for ScriptedClient {
    async fn detect(&self, request: &DetectionRequest) -> Result<DetectionResponse, AnnotateError> {
        self.requests.lock().unwrap().push(request.clone());
        // Stay pending once so concurrent callers interleave.
        tokio::task::yield_now().await;
        self.answers
            .get(&request.filename)
            .cloned()
            .unwrap_or_else(|| Ok(DetectionResponse::default()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Started(ImageId),
    Finished(ImageId),
}

#[derive(Debug, Default)]
pub struct RecordingReporter {
    signals: Mutex<Vec<Signal>>,
}

impl RecordingReporter {
    pub fn signals(&self) -> Vec<Signal> {
        self.signals.lock().unwrap().clone()
    }
}

impl ProgressReporter for RecordingReporter {
    fn started(&self, id: ImageId) {
        self.signals.lock().unwrap().push(Signal::Started(id));
    }

    fn finished(&self, id: ImageId) {
        self.signals.lock().unwrap().push(Signal::Finished(id));
    }
}
