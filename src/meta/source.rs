//! Metadata lookup.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::error::MetadataError;

use super::ImageMeta;

/// Lookup service mapping image identifiers to their metadata.
///
/// Implementations may cache; the dispatcher calls this once per request.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Fetch the metadata of an image.
    async fn get_image_meta(&self, image_id: u64) -> Result<ImageMeta, MetadataError>;
}

/// Metadata source backed by a directory of `<image_id>.json` documents.
///
/// Each document is an [`ImageMeta`] serialized as JSON. Relative paths in
/// the storage locator are resolved against the directory.
#[derive(Debug, Clone)]
pub struct DirectoryMetadataSource {
    root: PathBuf,
}

impl DirectoryMetadataSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn document_path(&self, image_id: u64) -> PathBuf {
        self.root.join(format!("{}.json", image_id))
    }
}

#[async_trait]
impl MetadataSource for DirectoryMetadataSource {
    async fn get_image_meta(&self, image_id: u64) -> Result<ImageMeta, MetadataError> {
        let path = self.document_path(image_id);
        debug!(image_id, path = %path.display(), "Loading image metadata");

        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MetadataError::NotFound(image_id))
            }
            Err(e) => return Err(MetadataError::Io(e.to_string())),
        };

        let mut meta: ImageMeta =
            serde_json::from_slice(&raw).map_err(|e| MetadataError::Invalid {
                image_id,
                message: e.to_string(),
            })?;

        if meta.image_id != image_id {
            return Err(MetadataError::Invalid {
                image_id,
                message: format!("document describes image {}", meta.image_id),
            });
        }
        meta.validate()
            .map_err(|message| MetadataError::Invalid { image_id, message })?;

        if let Some(path) = meta.storage.pixels_path.as_mut() {
            if path.is_relative() {
                *path = self.root.join(&*path);
            }
        }
        if let Some(path) = meta.storage.ngff_root.as_mut() {
            if path.is_relative() {
                *path = self.root.join(&*path);
            }
        }

        Ok(meta)
    }
}
