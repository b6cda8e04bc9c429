//! Opaque byte storage for avatars, news images and documents.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::ServiceError;

/// Generated blob name (`<uuid v4>.<ext>`), as persisted on records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct BlobRef(String);

impl BlobRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<String> for BlobRef {
    fn from(name: String) -> Self {
        Self(name)
    }
}

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid blob name: {0}")]
    InvalidName(String),
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under a fresh name with the given extension.
    async fn store(&self, bytes: &[u8], ext: &str) -> Result<BlobRef, BlobError>;

    async fn read(&self, blob: &BlobRef) -> Result<Vec<u8>, BlobError>;

    async fn delete(&self, blob: &BlobRef) -> Result<(), BlobError>;
}

/// Blobs as flat files under one directory.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_of(&self, name: &str) -> Result<PathBuf, BlobError> {
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
        if !valid {
            return Err(BlobError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn store(&self, bytes: &[u8], ext: &str) -> Result<BlobRef, BlobError> {
        fs::create_dir_all(&self.root).await?;

        let name = format!("{}.{}", Uuid::new_v4(), ext);
        let path = self.path_of(&name)?;

        let mut file = fs::File::create(&path).await?;
        file.write_all(bytes).await?;
        file.flush().await?;

        tracing::debug!(blob = %name, size = bytes.len(), "blob stored");
        Ok(BlobRef(name))
    }

    async fn read(&self, blob: &BlobRef) -> Result<Vec<u8>, BlobError> {
        let path = self.path_of(blob.as_str())?;
        Ok(fs::read(&path).await?)
    }

    async fn delete(&self, blob: &BlobRef) -> Result<(), BlobError> {
        let path = self.path_of(blob.as_str())?;
        fs::remove_file(&path).await?;
        tracing::debug!(blob = %blob.as_str(), "blob deleted");
        Ok(())
    }
}

/// Image formats accepted for avatars and news images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Gif,
    Webp,
}

impl ImageKind {
    /// Detect the format from magic bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [0xFF, 0xD8, 0xFF, ..] => Some(ImageKind::Jpeg),
            [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, ..] => Some(ImageKind::Png),
            [b'G', b'I', b'F', b'8', b'7' | b'9', b'a', ..] => Some(ImageKind::Gif),
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => {
                Some(ImageKind::Webp)
            }
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ImageKind::Jpeg => "jpg",
            ImageKind::Png => "png",
            ImageKind::Gif => "gif",
            ImageKind::Webp => "webp",
        }
    }
}

/// Accept an image upload of at most `max_bytes`.
pub fn validate_image(bytes: &[u8], max_bytes: usize) -> Result<ImageKind, ServiceError> {
    if bytes.is_empty() {
        return Err(ServiceError::validation("image is empty"));
    }
    if bytes.len() > max_bytes {
        return Err(ServiceError::validation(format!(
            "image exceeds {max_bytes} bytes"
        )));
    }
    ImageKind::sniff(bytes)
        .ok_or_else(|| ServiceError::validation("only JPEG, PNG, GIF and WebP images are accepted"))
}

/// Extension for an uploaded document, taken from its original file name.
pub fn document_extension(original_name: &str) -> String {
    original_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| {
            !ext.is_empty() && ext.len() <= 10 && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .unwrap_or_else(|| "bin".to_string())
}
