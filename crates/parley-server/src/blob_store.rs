//! On-disk storage for uploaded attachments.
//!
//! Each upload is written as `<id>` with a `<id>.json` sidecar holding the
//! original file name and content type.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parley_shared::constants::ALLOWED_UPLOAD_TYPES;
use parley_shared::FileRef;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ServerError;

const MAX_FILE_NAME_LEN: usize = 255;

/// Verify that a resolved path stays within the expected base directory.
/// Prevents path traversal attacks.
fn ensure_within(base: &Path, target: &Path) -> Result<PathBuf, ServerError> {
    let canonical_base = base.canonicalize().unwrap_or_else(|_| base.to_path_buf());
    let mut resolved = canonical_base.clone();
    for component in target
        .strip_prefix(base)
        .or_else(|_| target.strip_prefix(&canonical_base))
        .unwrap_or(target)
        .components()
    {
        match component {
            std::path::Component::Normal(c) => resolved.push(c),
            std::path::Component::ParentDir => {
                return Err(ServerError::BadRequest("Path traversal detected".to_string()));
            }
            _ => {}
        }
    }
    if !resolved.starts_with(&canonical_base) {
        return Err(ServerError::BadRequest("Path traversal detected".to_string()));
    }
    Ok(resolved)
}

/// Sidecar metadata for a stored upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadMeta {
    pub content_type: String,
    pub name: String,
    pub size: usize,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct BlobStore {
    base_path: PathBuf,
    max_size: usize,
}

impl BlobStore {
    pub async fn new(base_path: PathBuf, max_size: usize) -> Result<Self, ServerError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ServerError::Storage(format!(
                "Failed to create upload directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "Upload store initialized");

        Ok(Self {
            base_path,
            max_size,
        })
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Store an upload and return the reference clients attach to messages.
    pub async fn store(
        &self,
        name: &str,
        content_type: &str,
        data: &[u8],
    ) -> Result<(FileRef, UploadMeta), ServerError> {
        if data.is_empty() {
            return Err(ServerError::BadRequest("Empty file".to_string()));
        }
        if data.len() > self.max_size {
            return Err(ServerError::PayloadTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }
        let content_type = normalize_content_type(content_type);
        if !ALLOWED_UPLOAD_TYPES.contains(&content_type.as_str()) {
            return Err(ServerError::UnsupportedType(content_type));
        }

        let id = Uuid::new_v4();
        let meta = UploadMeta {
            content_type,
            name: sanitize_file_name(name),
            size: data.len(),
            uploaded_at: Utc::now(),
        };
        let sidecar = serde_json::to_vec(&meta)
            .map_err(|e| ServerError::Internal(format!("Failed to encode metadata: {e}")))?;

        fs::write(self.safe_path(&id.to_string())?, data)
            .await
            .map_err(|e| ServerError::Storage(format!("Failed to write upload {}: {}", id, e)))?;
        fs::write(self.safe_path(&format!("{id}.json"))?, sidecar)
            .await
            .map_err(|e| ServerError::Storage(format!("Failed to write metadata {}: {}", id, e)))?;

        debug!(id = %id, size = data.len(), content_type = %meta.content_type, "Stored upload");
        let file = FileRef {
            url: format!("/uploads/{id}"),
            content_type: meta.content_type.clone(),
            name: meta.name.clone(),
        };
        Ok((file, meta))
    }

    pub async fn get(&self, id: Uuid) -> Result<(UploadMeta, Vec<u8>), ServerError> {
        let path = self.safe_path(&id.to_string())?;
        let sidecar = self.safe_path(&format!("{id}.json"))?;

        if !path.exists() || !sidecar.exists() {
            return Err(ServerError::NotFound(format!("upload {id}")));
        }

        let meta_bytes = fs::read(&sidecar)
            .await
            .map_err(|e| ServerError::Storage(format!("Failed to read metadata {}: {}", id, e)))?;
        let meta: UploadMeta = serde_json::from_slice(&meta_bytes)
            .map_err(|e| ServerError::Storage(format!("Corrupt metadata {}: {}", id, e)))?;
        let data = fs::read(&path)
            .await
            .map_err(|e| ServerError::Storage(format!("Failed to read upload {}: {}", id, e)))?;

        debug!(id = %id, size = data.len(), "Retrieved upload");
        Ok((meta, data))
    }

    fn safe_path(&self, file_name: &str) -> Result<PathBuf, ServerError> {
        ensure_within(&self.base_path, &self.base_path.join(file_name))
    }
}

/// Lower-case the media type and drop parameters such as `charset`.
fn normalize_content_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Keep only the final path segment of a client-supplied file name.
fn sanitize_file_name(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if base.is_empty() || base == "." || base == ".." {
        return "file".to_string();
    }
    base.chars().take(MAX_FILE_NAME_LEN).collect()
}
