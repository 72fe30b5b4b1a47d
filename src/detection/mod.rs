mod http;

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::models::{DataUrl, DetectionBox, StagedImage, Subject};
use crate::overlay::OverlayError;

pub use http::HttpDetectionClient;

/// Body POSTed to the detection endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRequest {
    pub subject: Subject,
    pub image: DataUrl,
    pub filename: String,
    #[serde(rename = "type")]
    pub mime_type: String,
}

impl DetectionRequest {
    pub fn for_image(subject: Subject, image: &StagedImage) -> Self {
        Self {
            subject,
            image: image.source_data.clone(),
            filename: image.name.clone(),
            mime_type: image.mime_type.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DetectionResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    /// Absent is treated the same as empty.
    #[serde(default)]
    pub objects: Vec<DetectionBox>,
}

/// Why a single image could not be annotated. Never fatal to a batch.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AnnotateError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("detection service returned {status}: {body}")]
    Service { status: u16, body: String },
    #[error("malformed detection response: {0}")]
    Decode(String),
    #[error("overlay failed: {0}")]
    Overlay(#[from] OverlayError),
}

pub trait DetectionClient {
    fn detect(
        &self,
        request: &DetectionRequest,
    ) -> impl Future<Output = Result<DetectionResponse, AnnotateError>>;
}
