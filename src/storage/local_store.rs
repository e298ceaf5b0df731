//! Local filesystem storage backend.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio_util::io::ReaderStream;

use crate::storage::error::StorageError;
use crate::storage::{
    authorize, composite_key, validate_ids, ByteStream, FileStore, StoredFile, STREAM_CHUNK_SIZE,
};

/// Sidecar record persisted next to each content file.
#[derive(Debug, Serialize, Deserialize)]
struct LocalMeta {
    mime_type: String,
    created_at: DateTime<Utc>,
}

/// Local filesystem implementation of `FileStore`.
///
/// Each file lives at `<root>/<user_id>/<file_id>` with a sibling
/// `<file_id>.meta` JSON record holding the content type and store time.
pub struct LocalFileStore {
    root: PathBuf,
    namespace_scan: bool,
}

impl LocalFileStore {
    /// Create a backend rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            StorageError::configuration(format!(
                "cannot create storage root {}: {}",
                root.display(),
                e
            ))
        })?;
        info!("Using local storage root: {}", root.display());
        Ok(Self {
            root,
            namespace_scan: true,
        })
    }

    /// Enable or disable the cross-namespace owner scan.
    pub fn with_namespace_scan(mut self, enabled: bool) -> Self {
        self.namespace_scan = enabled;
        self
    }

    fn user_dir(&self, user_id: &str) -> PathBuf {
        self.root.join(user_id)
    }

    fn content_path(&self, user_id: &str, file_id: &str) -> PathBuf {
        self.user_dir(user_id).join(file_id)
    }

    fn meta_path(&self, user_id: &str, file_id: &str) -> PathBuf {
        self.user_dir(user_id).join(format!("{}.meta", file_id))
    }

    async fn entry_exists(&self, user_id: &str, file_id: &str) -> Result<bool, StorageError> {
        Ok(path_exists(&self.content_path(user_id, file_id)).await?
            || path_exists(&self.meta_path(user_id, file_id)).await?)
    }

    /// Scan every user directory for `file_id` and return the owning user.
    async fn find_owner(&self, file_id: &str) -> Result<Option<String>, StorageError> {
        let mut entries = fs::read_dir(&self.root).await.map_err(io_backend)?;
        while let Some(entry) = entries.next_entry().await.map_err(io_backend)? {
            if !entry.file_type().await.map_err(io_backend)?.is_dir() {
                continue;
            }
            let Some(user_id) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if self.entry_exists(&user_id, file_id).await? {
                return Ok(Some(user_id));
            }
        }
        Ok(None)
    }

    /// Resolve the owning namespace for a lookup. Existence is decided
    /// before permission: a file nobody owns is not found, whoever asks.
    async fn resolve_owner(
        &self,
        file_id: &str,
        user_id: &str,
        owner_id: Option<&str>,
    ) -> Result<String, StorageError> {
        let primary = owner_id.unwrap_or(user_id);
        if self.entry_exists(primary, file_id).await? {
            return authorize(primary, user_id, owner_id, file_id);
        }
        if self.namespace_scan {
            if let Some(owner) = self.find_owner(file_id).await? {
                debug!("Owner scan resolved {} to user {}", file_id, owner);
                return authorize(&owner, user_id, owner_id, file_id);
            }
        }
        Err(StorageError::not_found(composite_key(primary, file_id)))
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn store(
        &self,
        content: &[u8],
        file_id: &str,
        user_id: &str,
        mime_type: &str,
    ) -> Result<StoredFile, StorageError> {
        validate_ids(file_id, user_id, None)?;

        let dir = self.user_dir(user_id);
        fs::create_dir_all(&dir).await.map_err(io_backend)?;

        let content_path = self.content_path(user_id, file_id);
        let record = StoredFile::active(
            file_id,
            user_id,
            content_path.display().to_string(),
            content.len() as u64,
            mime_type,
        );

        // Content first, metadata second; there is no rollback for the pair.
        fs::write(&content_path, content).await.map_err(io_backend)?;

        let meta = LocalMeta {
            mime_type: record.mime_type.clone(),
            created_at: record.created_at,
        };
        let meta_json =
            serde_json::to_vec(&meta).map_err(|e| StorageError::backend(e.to_string()))?;
        if let Err(e) = fs::write(self.meta_path(user_id, file_id), meta_json).await {
            error!(
                "Metadata write failed after content write for {}: {}",
                composite_key(user_id, file_id),
                e
            );
            return Err(io_backend(e));
        }

        info!(
            "Stored {} bytes for {}",
            content.len(),
            composite_key(user_id, file_id)
        );
        Ok(record)
    }

    async fn retrieve(
        &self,
        file_id: &str,
        user_id: &str,
        owner_id: Option<&str>,
    ) -> Result<ByteStream, StorageError> {
        validate_ids(file_id, user_id, owner_id)?;
        let owner = self.resolve_owner(file_id, user_id, owner_id).await?;
        let key = composite_key(&owner, file_id);

        let open_key = key.clone();
        let file = fs::File::open(self.content_path(&owner, file_id))
            .await
            .map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    StorageError::not_found(open_key)
                } else {
                    io_backend(e)
                }
            })?;

        debug!("Streaming {} in {}-byte chunks", key, STREAM_CHUNK_SIZE);
        let stream = ReaderStream::with_capacity(file, STREAM_CHUNK_SIZE).map(move |chunk| {
            chunk.map_err(|e| StorageError::backend(format!("read of {} failed: {}", key, e)))
        });
        Ok(stream.boxed())
    }

    async fn delete(&self, file_id: &str, user_id: &str) -> Result<(), StorageError> {
        validate_ids(file_id, user_id, None)?;
        let key = composite_key(user_id, file_id);

        let content_path = self.content_path(user_id, file_id);
        let meta_path = self.meta_path(user_id, file_id);
        let content_exists = path_exists(&content_path).await?;
        let meta_exists = path_exists(&meta_path).await?;

        if !content_exists && !meta_exists {
            if self.namespace_scan {
                if let Some(owner) = self.find_owner(file_id).await? {
                    return Err(StorageError::permission_denied(
                        user_id,
                        composite_key(&owner, file_id),
                    ));
                }
            }
            return Err(StorageError::not_found(key));
        }

        // Content first, metadata last, so an interrupted delete can still
        // be resolved through the metadata record on retry.
        if content_exists {
            fs::remove_file(&content_path).await.map_err(io_backend)?;
        }
        if meta_exists {
            fs::remove_file(&meta_path).await.map_err(io_backend)?;
        }

        self.cleanup_user_dir(user_id).await;

        info!("Deleted {}", key);
        Ok(())
    }

    async fn get_metadata(
        &self,
        file_id: &str,
        user_id: &str,
        owner_id: Option<&str>,
    ) -> Result<StoredFile, StorageError> {
        validate_ids(file_id, user_id, owner_id)?;
        let owner = self.resolve_owner(file_id, user_id, owner_id).await?;
        let key = composite_key(&owner, file_id);

        let read_key = key.clone();
        let raw = fs::read(self.meta_path(&owner, file_id))
            .await
            .map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    StorageError::not_found(read_key)
                } else {
                    io_backend(e)
                }
            })?;
        let meta: LocalMeta = serde_json::from_slice(&raw)
            .map_err(|e| StorageError::backend(format!("malformed metadata for {}: {}", key, e)))?;

        let content_path = self.content_path(&owner, file_id);
        let stat = fs::metadata(&content_path).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                StorageError::not_found(key.clone())
            } else {
                io_backend(e)
            }
        })?;

        let mut record = StoredFile::active(
            file_id,
            owner.as_str(),
            content_path.display().to_string(),
            stat.len(),
            meta.mime_type,
        );
        record.created_at = meta.created_at;
        Ok(record)
    }
}

impl LocalFileStore {
    /// Remove the owner directory when it is empty. Best effort; failures
    /// are logged and swallowed.
    async fn cleanup_user_dir(&self, user_id: &str) {
        let dir = self.user_dir(user_id);
        let is_empty = match fs::read_dir(&dir).await {
            Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
            Err(_) => false,
        };
        if is_empty {
            if let Err(e) = fs::remove_dir(&dir).await {
                warn!("Could not remove empty directory {}: {}", dir.display(), e);
            }
        }
    }
}

async fn path_exists(path: &Path) -> Result<bool, StorageError> {
    fs::try_exists(path).await.map_err(io_backend)
}

fn io_backend(err: std::io::Error) -> StorageError {
    StorageError::backend(err.to_string())
}
