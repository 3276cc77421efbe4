//! Cover image storage.
//!
//! The catalog only ever sees [`StoredImage`] values: a locator persisted on
//! the book and an optional handle used to release the file later.

mod local;

use async_trait::async_trait;
use axum::body::Bytes;
use thiserror::Error;

pub use local::LocalImageStore;

/// MIME types accepted for covers, with the extension files are stored under.
pub const ACCEPTED_TYPES: &[(&str, &str)] = &[
    ("image/jpeg", "jpg"),
    ("image/jpg", "jpg"),
    ("image/png", "png"),
    ("image/webp", "webp"),
];

/// URL segment covers are served under.
pub const IMAGES_ROUTE: &str = "/images";

/// An uploaded file as received from the multipart body.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

/// Where a stored image lives and how to release it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    pub locator: String,
    pub delete_handle: Option<String>,
}

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("unsupported image type '{0}'")]
    UnsupportedType(String),

    #[error("image is {size} bytes, the limit is {limit}")]
    TooLarge { size: usize, limit: usize },

    #[error("image could not be decoded: {0}")]
    Decode(#[from] image::ImageError),

    #[error("image I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("image processing task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ImageError {
    /// Whether the client can fix this by sending another file.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ImageError::UnsupportedType(_) | ImageError::TooLarge { .. } | ImageError::Decode(_)
        )
    }
}

#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Persist an upload and return its locator and release handle.
    async fn store(&self, upload: ImageUpload) -> Result<StoredImage, ImageError>;

    /// Release a previously stored image.
    async fn delete(&self, handle: &str) -> Result<(), ImageError>;

    /// Turn a stored locator into a URL clients can fetch.
    fn resolve_url(&self, locator: &str) -> String;
}

/// Extension for an accepted MIME type.
pub fn extension_for(content_type: &str) -> Option<&'static str> {
    let content_type = content_type.trim().to_ascii_lowercase();
    ACCEPTED_TYPES
        .iter()
        .find(|(mime, _)| *mime == content_type)
        .map(|(_, ext)| *ext)
}

/// Prefix the file part of `locator` with `{base_url}/images/`.
///
/// Locators written under another host keep only what follows their last
/// `/images/` segment, so moving the service does not break old records.
pub fn public_url(base_url: &str, locator: &str) -> String {
    let marker = format!("{IMAGES_ROUTE}/");
    let file = match locator.rfind(&marker) {
        Some(index) => &locator[index + marker.len()..],
        None => locator.trim_start_matches('/'),
    };
    format!("{}{}/{}", base_url.trim_end_matches('/'), IMAGES_ROUTE, file)
}
