//! Validated images handed to the generation service.

use std::path::Path;
use std::sync::Arc;

use image::ImageFormat;
use thiserror::Error;

use crate::constants::MAX_UPLOAD_BYTES;

/// Reasons an image is refused before it reaches the service.
#[derive(Debug, Error)]
pub enum SubmissionError {
    /// The file couldn't be read.
    #[error("Failed to read {path}: {source}")]
    Read {
        /// Path as given
        path: String,
        /// Underlying IO error
        source: std::io::Error,
    },
    /// Over the upload limit.
    #[error("File size must be under {} MB (got {size} bytes)", MAX_UPLOAD_BYTES / 1024 / 1024)]
    TooLarge {
        /// Actual size in bytes
        size: usize,
    },
    /// Zero bytes.
    #[error("File is empty")]
    Empty,
    /// Not JPEG, PNG or WebP.
    #[error("Invalid file type. Allowed: image/jpeg, image/png, image/webp")]
    UnsupportedType,
}

/// One image file, shared cheaply between concurrent requests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageBlob {
    file_name: String,
    mime_type: &'static str,
    bytes: Arc<[u8]>,
}

impl ImageBlob {
    /// Validates raw bytes: non-empty, under the size limit, JPEG/PNG/WebP.
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, SubmissionError> {
        if bytes.is_empty() {
            return Err(SubmissionError::Empty);
        }
        if bytes.len() > MAX_UPLOAD_BYTES {
            return Err(SubmissionError::TooLarge { size: bytes.len() });
        }
        let mime_type = match image::guess_format(&bytes) {
            Ok(ImageFormat::Jpeg) => "image/jpeg",
            Ok(ImageFormat::Png) => "image/png",
            Ok(ImageFormat::WebP) => "image/webp",
            _ => return Err(SubmissionError::UnsupportedType),
        };
        Ok(Self {
            file_name: file_name.into(),
            mime_type,
            bytes: bytes.into(),
        })
    }

    /// Reads and validates an image from disk.
    pub async fn from_path(path: &Path) -> Result<Self, SubmissionError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| SubmissionError::Read {
                path: path.display().to_string(),
                source,
            })?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        Self::new(file_name, bytes)
    }

    /// Name sent with the multipart part.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// MIME type sniffed from the bytes.
    pub fn mime_type(&self) -> &'static str {
        self.mime_type
    }

    /// Raw file contents.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false for a validated blob.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// The photo plus optional style template for one generation attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    primary: ImageBlob,
    template: Option<ImageBlob>,
}

impl Submission {
    /// A submission with just the photo.
    pub fn new(primary: ImageBlob) -> Self {
        Self {
            primary,
            template: None,
        }
    }

    /// Adds the style/pose template.
    pub fn with_template(mut self, template: ImageBlob) -> Self {
        self.template = Some(template);
        self
    }

    /// The photo.
    pub fn primary(&self) -> &ImageBlob {
        &self.primary
    }

    /// The template, when one was given.
    pub fn template(&self) -> Option<&ImageBlob> {
        self.template.as_ref()
    }
}
