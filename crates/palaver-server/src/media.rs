//! Local media storage.
//!
//! Stands in for the upload collaborator: hand it bytes and a content
//! type, get back a URL and the message kind to record. The message row
//! only ever stores the returned URL, never raw bytes.

use std::path::PathBuf;

use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use palaver_shared::MessageKind;

use crate::error::ApiError;

/// Accepted upload content types and their file extension / message kind.
const ALLOWED_TYPES: &[(&str, &str, MessageKind)] = &[
    ("image/jpeg", "jpg", MessageKind::Image),
    ("image/png", "png", MessageKind::Image),
    ("image/gif", "gif", MessageKind::Image),
    ("video/mp4", "mp4", MessageKind::Video),
];

/// Result of a successful upload.
#[derive(Debug, Clone)]
pub struct StoredMedia {
    /// URL the stored file is served under (`/media/<name>`).
    pub url: String,
    pub kind: MessageKind,
}

#[derive(Debug, Clone)]
pub struct MediaStore {
    base_path: PathBuf,
    max_size: usize,
}

impl MediaStore {
    pub async fn new(base_path: PathBuf, max_size: usize) -> Result<Self, ApiError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ApiError::Internal(format!(
                "Failed to create media directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "Media store initialized");

        Ok(Self { base_path, max_size })
    }

    /// Validate and persist one upload.
    pub async fn store(&self, data: &[u8], content_type: &str) -> Result<StoredMedia, ApiError> {
        if data.is_empty() {
            return Err(ApiError::Validation {
                field: "file",
                message: "Uploaded file is empty".to_string(),
            });
        }
        if data.len() > self.max_size {
            return Err(ApiError::PayloadTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let Some((_, ext, kind)) = ALLOWED_TYPES.iter().find(|(t, _, _)| *t == content_type)
        else {
            return Err(ApiError::Validation {
                field: "file",
                message: "Only JPEG, PNG, GIF images and MP4 videos are allowed".to_string(),
            });
        };

        let name = format!("{}.{ext}", Uuid::new_v4());
        let path = self.safe_media_path(&name)?;

        fs::write(&path, data)
            .await
            .map_err(|e| ApiError::Internal(format!("Failed to write media {name}: {e}")))?;

        debug!(name = %name, size = data.len(), "Stored media file");

        Ok(StoredMedia {
            url: format!("/media/{name}"),
            kind: *kind,
        })
    }

    /// Read a stored file back for serving.
    pub async fn read(&self, name: &str) -> Result<Vec<u8>, ApiError> {
        let path = self.safe_media_path(name)?;

        if !path.exists() {
            return Err(ApiError::NotFound(format!("media '{name}' not found")));
        }

        fs::read(&path)
            .await
            .map_err(|e| ApiError::Internal(format!("Failed to read media {name}: {e}")))
    }

    /// Resolve a file name within the base directory, rejecting traversal.
    fn safe_media_path(&self, name: &str) -> Result<PathBuf, ApiError> {
        if name.contains('/') || name.contains('\\') || name.contains("..") {
            return Err(ApiError::Validation {
                field: "file",
                message: "Path traversal detected".to_string(),
            });
        }
        Ok(self.base_path.join(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_store() -> (MediaStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = MediaStore::new(dir.path().to_path_buf(), 1024).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn store_and_read_round_trip() {
        let (store, _dir) = test_store().await;

        let stored = store.store(b"fake-png-bytes", "image/png").await.unwrap();
        assert_eq!(stored.kind, MessageKind::Image);
        assert!(stored.url.starts_with("/media/"));
        assert!(stored.url.ends_with(".png"));

        let name = stored.url.strip_prefix("/media/").unwrap();
        let data = store.read(name).await.unwrap();
        assert_eq!(data, b"fake-png-bytes");
    }

    #[tokio::test]
    async fn rejects_disallowed_content_type() {
        let (store, _dir) = test_store().await;
        let err = store.store(b"#!/bin/sh", "application/x-sh").await.unwrap_err();
        assert!(matches!(err, ApiError::Validation { field: "file", .. }));
    }

    #[tokio::test]
    async fn rejects_oversize_upload() {
        let (store, _dir) = test_store().await;
        let big = vec![0u8; 2048];
        let err = store.store(&big, "image/png").await.unwrap_err();
        assert!(matches!(err, ApiError::PayloadTooLarge { .. }));
    }

    #[tokio::test]
    async fn rejects_traversal_in_read() {
        let (store, _dir) = test_store().await;
        assert!(store.read("../etc/passwd").await.is_err());
    }
}
