use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use axum::body::Bytes;
use image::{imageops::FilterType, ImageFormat};
use libris_kernel::settings::{ResizeSettings, Settings};
use uuid::Uuid;

use super::{extension_for, public_url, ImageError, ImageStore, ImageUpload, StoredImage};

/// Stores covers as files in one directory, served by the HTTP layer under
/// `/images`. Locator and delete handle are both the bare file name.
pub struct LocalImageStore {
    dir: PathBuf,
    base_url: String,
    max_bytes: usize,
    resize: Option<ResizeSettings>,
}

impl LocalImageStore {
    pub fn new(
        dir: impl Into<PathBuf>,
        base_url: impl Into<String>,
        max_bytes: usize,
        resize: Option<ResizeSettings>,
    ) -> Self {
        Self {
            dir: dir.into(),
            base_url: base_url.into(),
            max_bytes,
            resize,
        }
    }

    /// Build from settings, creating the image directory if needed.
    pub async fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let images = &settings.images;
        tokio::fs::create_dir_all(&images.dir)
            .await
            .with_context(|| format!("failed to create image directory {}", images.dir.display()))?;

        Ok(Self::new(
            images.dir.clone(),
            settings.server.public_base_url.clone(),
            images.max_bytes,
            images.resize,
        ))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn write_new(&self, stem: &str, ext: &str, bytes: &[u8]) -> Result<String, ImageError> {
        let millis = chrono::Utc::now().timestamp_millis();
        let preferred = format!("{stem}-{millis}.{ext}");

        match write_exclusive(&self.dir.join(&preferred), bytes).await {
            Ok(()) => Ok(preferred),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let suffix = Uuid::now_v7().simple().to_string();
                let fallback = format!("{stem}-{millis}-{}.{ext}", &suffix[suffix.len() - 8..]);
                write_exclusive(&self.dir.join(&fallback), bytes).await?;
                Ok(fallback)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ImageStore for LocalImageStore {
    async fn store(&self, upload: ImageUpload) -> Result<StoredImage, ImageError> {
        let ext = extension_for(&upload.content_type)
            .ok_or_else(|| ImageError::UnsupportedType(upload.content_type.clone()))?;

        if upload.bytes.len() > self.max_bytes {
            return Err(ImageError::TooLarge {
                size: upload.bytes.len(),
                limit: self.max_bytes,
            });
        }

        let bytes = match self.resize {
            Some(size) => {
                let format = format_for(ext);
                let source = upload.bytes.clone();
                Bytes::from(
                    tokio::task::spawn_blocking(move || resize_cover(&source, format, size))
                        .await??,
                )
            }
            None => upload.bytes,
        };

        let stem = sanitize_stem(&upload.file_name);
        let file_name = self.write_new(&stem, ext, &bytes).await?;

        tracing::info!(file = %file_name, bytes = bytes.len(), "cover image stored");
        Ok(StoredImage {
            locator: file_name.clone(),
            delete_handle: Some(file_name),
        })
    }

    async fn delete(&self, handle: &str) -> Result<(), ImageError> {
        if handle.is_empty() || handle.contains(['/', '\\']) || handle.contains("..") {
            return Err(ImageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("refusing to delete suspicious image handle '{handle}'"),
            )));
        }

        tokio::fs::remove_file(self.dir.join(handle)).await?;
        tracing::debug!(file = handle, "cover image deleted");
        Ok(())
    }

    fn resolve_url(&self, locator: &str) -> String {
        public_url(&self.base_url, locator)
    }
}

async fn write_exclusive(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(bytes).await?;
    file.flush().await
}

/// File-name stem from the client's name: whitespace runs become `_`, and
/// anything outside `[A-Za-z0-9_-]` is dropped.
fn sanitize_stem(original: &str) -> String {
    let stem = Path::new(original)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut out = String::with_capacity(stem.len());
    let mut in_whitespace = false;
    for c in stem.chars() {
        if c.is_whitespace() {
            if !in_whitespace {
                out.push('_');
            }
            in_whitespace = true;
            continue;
        }
        in_whitespace = false;
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            out.push(c);
        }
    }

    if out.is_empty() {
        "cover".to_string()
    } else {
        out
    }
}

fn format_for(ext: &str) -> ImageFormat {
    match ext {
        "png" => ImageFormat::Png,
        "webp" => ImageFormat::WebP,
        _ => ImageFormat::Jpeg,
    }
}

fn resize_cover(
    bytes: &[u8],
    format: ImageFormat,
    size: ResizeSettings,
) -> Result<Vec<u8>, ImageError> {
    let decoded = image::load_from_memory_with_format(bytes, format)?;
    let resized = decoded.resize_to_fill(size.width, size.height, FilterType::Lanczos3);

    let mut out = Cursor::new(Vec::new());
    resized.write_to(&mut out, format)?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;

    fn png_bytes(width: u32, height: u32) -> Bytes {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 30, 30]));
        let mut out = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        Bytes::from(out.into_inner())
    }

    fn upload(name: &str, content_type: &str, bytes: Bytes) -> ImageUpload {
        ImageUpload {
            file_name: name.to_string(),
            content_type: content_type.to_string(),
            bytes,
        }
    }

    #[test]
    fn stems_are_sanitized() {
        assert_eq!(sanitize_stem("My  Cover (1).png"), "My_Cover_1");
        assert_eq!(sanitize_stem("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_stem("été.jpg"), "t");
        assert_eq!(sanitize_stem("???.jpg"), "cover");
        assert_eq!(sanitize_stem(""), "cover");
    }

    #[tokio::test]
    async fn store_writes_a_resized_file_and_delete_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalImageStore::new(
            dir.path(),
            "http://localhost:4000",
            1024 * 1024,
            Some(ResizeSettings {
                width: 20,
                height: 30,
            }),
        );

        let stored = store
            .store(upload("front cover.png", "image/png", png_bytes(64, 48)))
            .await
            .unwrap();

        assert!(stored.locator.starts_with("front_cover-"));
        assert!(stored.locator.ends_with(".png"));
        assert_eq!(stored.delete_handle.as_deref(), Some(stored.locator.as_str()));

        let path = dir.path().join(&stored.locator);
        let written = image::open(&path).unwrap();
        assert_eq!(written.dimensions(), (20, 30));

        assert_eq!(
            store.resolve_url(&stored.locator),
            format!("http://localhost:4000/images/{}", stored.locator)
        );

        store.delete(&stored.locator).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn same_name_in_the_same_millisecond_does_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalImageStore::new(dir.path(), "http://h", 1024 * 1024, None);

        let a = store
            .store(upload("c.png", "image/png", png_bytes(2, 2)))
            .await
            .unwrap();
        let b = store
            .store(upload("c.png", "image/png", png_bytes(2, 2)))
            .await
            .unwrap();

        assert_ne!(a.locator, b.locator);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn unsupported_and_oversized_uploads_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalImageStore::new(dir.path(), "http://h", 16, None);

        let err = store
            .store(upload("c.gif", "image/gif", Bytes::from_static(b"GIF89a")))
            .await
            .unwrap_err();
        assert!(matches!(err, ImageError::UnsupportedType(_)));
        assert!(err.is_client_error());

        let err = store
            .store(upload("c.png", "image/png", png_bytes(8, 8)))
            .await
            .unwrap_err();
        assert!(matches!(err, ImageError::TooLarge { limit: 16, .. }));

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn undecodable_bytes_fail_when_resizing() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalImageStore::new(
            dir.path(),
            "http://h",
            1024,
            Some(ResizeSettings {
                width: 10,
                height: 10,
            }),
        );

        let err = store
            .store(upload("c.jpg", "image/jpeg", Bytes::from_static(b"not an image")))
            .await
            .unwrap_err();
        assert!(matches!(err, ImageError::Decode(_)));
    }

    #[tokio::test]
    async fn delete_refuses_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalImageStore::new(dir.path(), "http://h", 1024, None);

        assert!(store.delete("../outside.jpg").await.is_err());
        assert!(store.delete("nested/file.jpg").await.is_err());
        assert!(store.delete("missing.jpg").await.is_err());
    }
}
