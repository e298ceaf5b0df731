//! Storage service layer that provides a clean interface to the storage
//! abstraction.

use std::sync::Arc;

use log::{error, info};

use crate::storage::config::StorageConfig;
use crate::storage::error::StorageError;
use crate::storage::{read_all, ByteStream, FileStore, StoredFile};

/// Storage service that fronts a storage backend for the domain services
/// (documents, notes, task attachments). Callers hand it the acting user on
/// every call; it never caches ownership decisions.
pub struct StorageService {
    store: Arc<dyn FileStore>,
}

impl StorageService {
    /// Create a new storage service with an injected storage backend.
    pub fn new(store: Arc<dyn FileStore>) -> Self {
        Self { store }
    }

    /// Create a service backed by the configured backend.
    pub fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        Ok(Self::new(config.create_store()?))
    }

    /// Store content for a user.
    pub async fn store(
        &self,
        content: &[u8],
        file_id: &str,
        user_id: &str,
        mime_type: &str,
    ) -> Result<StoredFile, StorageError> {
        self.store
            .store(content, file_id, user_id, mime_type)
            .await
            .map_err(|e| {
                error!("Failed to store {} for user {}: {}", file_id, user_id, e);
                e
            })
    }

    /// Retrieve content as a stream of bounded chunks.
    pub async fn retrieve(
        &self,
        file_id: &str,
        user_id: &str,
        owner_id: Option<&str>,
    ) -> Result<ByteStream, StorageError> {
        self.store.retrieve(file_id, user_id, owner_id).await
    }

    /// Retrieve content fully buffered. Prefer `retrieve` for large files.
    pub async fn retrieve_bytes(
        &self,
        file_id: &str,
        user_id: &str,
        owner_id: Option<&str>,
    ) -> Result<Vec<u8>, StorageError> {
        let stream = self.store.retrieve(file_id, user_id, owner_id).await?;
        read_all(stream).await
    }

    /// Delete a file. Only the owner may delete.
    pub async fn delete(&self, file_id: &str, user_id: &str) -> Result<(), StorageError> {
        self.store.delete(file_id, user_id).await.map_err(|e| {
            error!("Failed to delete {} for user {}: {}", file_id, user_id, e);
            e
        })
    }

    /// Fetch the metadata record for a file without transferring content.
    pub async fn get_metadata(
        &self,
        file_id: &str,
        user_id: &str,
        owner_id: Option<&str>,
    ) -> Result<StoredFile, StorageError> {
        self.store.get_metadata(file_id, user_id, owner_id).await
    }

    /// Verify content integrity against an expected MD5 checksum.
    ///
    /// The content is retrieved through the normal permission path, so
    /// not-found and permission errors surface exactly as they would for
    /// `retrieve`.
    pub async fn verify(
        &self,
        file_id: &str,
        user_id: &str,
        owner_id: Option<&str>,
        expected_checksum: &str,
    ) -> Result<bool, StorageError> {
        let content = self.retrieve_bytes(file_id, user_id, owner_id).await?;
        let actual = Self::calculate_checksum(&content);
        let matches = actual.eq_ignore_ascii_case(expected_checksum);
        if !matches {
            info!(
                "Checksum mismatch for {}: expected {}, got {}",
                file_id, expected_checksum, actual
            );
        }
        Ok(matches)
    }

    /// Calculate the MD5 checksum for data.
    pub fn calculate_checksum(data: &[u8]) -> String {
        let hash = md5::compute(data);
        hex::encode(hash.0)
    }
}
