use std::fmt;
use std::path::Path;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Stable identifier assigned to an image when it is staged.
///
/// Positions shift whenever an earlier image is removed; the id does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageId(Uuid);

impl ImageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ImageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DataUrlError {
    #[error("missing `data:` prefix")]
    MissingPrefix,
    #[error("only base64 data URLs are supported")]
    NotBase64,
    #[error("invalid base64 payload: {0}")]
    Payload(String),
}

/// Self-contained, transportable image text: `data:<mime>;base64,<payload>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataUrl(String);

impl DataUrl {
    pub fn encode(mime_type: &str, bytes: &[u8]) -> Self {
        Self(format!("data:{};base64,{}", mime_type, BASE64.encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn split(&self) -> Result<(&str, &str), DataUrlError> {
        let rest = self.0.strip_prefix("data:").ok_or(DataUrlError::MissingPrefix)?;
        let (header, payload) = rest.split_once(',').ok_or(DataUrlError::NotBase64)?;
        let mime = header.strip_suffix(";base64").ok_or(DataUrlError::NotBase64)?;
        Ok((mime, payload))
    }

    pub fn mime_type(&self) -> Result<&str, DataUrlError> {
        self.split().map(|(mime, _)| mime)
    }

    pub fn decode(&self) -> Result<Vec<u8>, DataUrlError> {
        let (_, payload) = self.split()?;
        BASE64
            .decode(payload)
            .map_err(|e| DataUrlError::Payload(e.to_string()))
    }
}

impl From<String> for DataUrl {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// One detected region. `x`/`y` are the centre, `w`/`h` the size, all in
/// source-image pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Corner-based rectangle, the form the renderer strokes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CornerRect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl DetectionBox {
    pub fn to_rect(&self) -> CornerRect {
        CornerRect {
            x: self.x - self.w / 2.0,
            y: self.y - self.h / 2.0,
            w: self.w,
            h: self.h,
        }
    }
}

/// Overlay output and the boxes it was drawn from. Kept together so one
/// is never stored without the other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub annotated_data: DataUrl,
    pub boxes: Vec<DetectionBox>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedImage {
    pub id: ImageId,
    pub name: String,
    pub mime_type: String,
    pub source_data: DataUrl,
    #[serde(with = "time::serde::rfc3339")]
    pub added_at: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<Annotation>,
}

impl StagedImage {
    pub fn from_blob(blob: &FileBlob) -> Self {
        let mime_type = blob.mime_type();
        Self {
            id: ImageId::new(),
            name: blob.name.clone(),
            source_data: DataUrl::encode(&mime_type, &blob.bytes),
            mime_type,
            added_at: OffsetDateTime::now_utc(),
            annotation: None,
        }
    }

    pub fn annotated_data(&self) -> Option<&DataUrl> {
        self.annotation.as_ref().map(|a| &a.annotated_data)
    }

    pub fn annotations(&self) -> Option<&[DetectionBox]> {
        self.annotation.as_ref().map(|a| a.boxes.as_slice())
    }

    /// What a preview shows: the overlay if one exists, the original otherwise.
    pub fn display_data(&self) -> &DataUrl {
        self.annotated_data().unwrap_or(&self.source_data)
    }
}

/// What the user asked the detector to look for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subject {
    Faces,
    Eyes,
    Body,
}

impl Subject {
    pub fn as_str(&self) -> &'static str {
        match self {
            Subject::Faces => "faces",
            Subject::Eyes => "eyes",
            Subject::Body => "body",
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Subject {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "faces" | "face" => Ok(Subject::Faces),
            "eyes" | "eye" => Ok(Subject::Eyes),
            "body" | "bodies" => Ok(Subject::Body),
            other => Err(anyhow::anyhow!("Unknown subject: {}", other)),
        }
    }
}

/// Raw file contents as handed over by the user, before staging.
#[derive(Debug, Clone)]
pub struct FileBlob {
    pub name: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl FileBlob {
    pub fn new(name: impl Into<String>, mime_type: Option<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type,
            bytes,
        }
    }

    pub async fn read<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        use anyhow::Context;

        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {:?}", path))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Ok(Self::new(name, None, bytes))
    }

    /// Declared MIME type, else a guess from the file extension.
    pub fn mime_type(&self) -> String {
        if let Some(mime) = self.mime_type.as_deref().filter(|m| !m.is_empty()) {
            return mime.to_string();
        }
        image::ImageFormat::from_path(&self.name)
            .map(|format| format.to_mime_type().to_string())
            .unwrap_or_else(|_| "application/octet-stream".to_string())
    }
}
