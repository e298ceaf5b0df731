//! File Storage Layer Abstraction
//!
//! This module provides an abstraction over file storage backends,
//! allowing the system to use different storage implementations (local
//! filesystem, in-memory mock, S3-style object stores) without affecting
//! higher-level services.
//!
//! Every backend enforces the same ownership rules: a caller reads its own
//! namespace unless it passes an explicit owner id, in which case the lookup
//! targets the owner's namespace and the caller is trusted to have checked
//! that the file is public. Existence is always decided before permission,
//! so a file stored by nobody is reported as not found no matter who asks.

pub mod config;
pub mod error;
pub mod local_store;
pub mod mock_store;
pub mod object_store;


use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::storage::error::StorageError;

/// File identifier type
pub type FileId = String;

/// User identifier type
pub type UserId = String;

/// Chunk size used when streaming content back to callers.
pub const STREAM_CHUNK_SIZE: usize = 8 * 1024;

/// Stream of content chunks produced by `retrieve`.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

/// Lifecycle state of a stored file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FileStatus {
    Pending,
    Active,
    Error,
}

/// Metadata record describing a stored file.
///
/// Identity and location (`id`, `user_id`, `path`) are immutable once the
/// file is stored; only `status`, `updated_at` and `error_message` may
/// change afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredFile {
    /// Caller-supplied file identifier, unique within the owner's namespace.
    pub id: String,
    /// Identifier of the owning user.
    pub user_id: String,
    /// Backend-specific location descriptor.
    pub path: String,
    /// Exact byte length of the stored content.
    pub size_bytes: u64,
    /// Content type as supplied at store time.
    pub mime_type: String,
    /// Lifecycle marker; `Active` once stored successfully.
    pub status: FileStatus,
    /// Set at store time.
    pub created_at: DateTime<Utc>,
    /// Set on later metadata refresh.
    pub updated_at: Option<DateTime<Utc>>,
    /// Populated when `status` is `Error`.
    pub error_message: Option<String>,
}

impl StoredFile {
    /// Create an `Active` record for freshly stored content.
    pub fn active(
        id: impl Into<String>,
        user_id: impl Into<String>,
        path: impl Into<String>,
        size_bytes: u64,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            path: path.into(),
            size_bytes,
            mime_type: mime_type.into(),
            status: FileStatus::Active,
            created_at: Utc::now(),
            updated_at: None,
            error_message: None,
        }
    }

    /// Record a metadata refresh.
    pub fn refreshed(mut self) -> Self {
        self.updated_at = Some(Utc::now());
        self
    }

    /// Mark the record as failed with a diagnostic message.
    pub fn mark_error(mut self, message: impl Into<String>) -> Self {
        self.status = FileStatus::Error;
        self.error_message = Some(message.into());
        self.updated_at = Some(Utc::now());
        self
    }
}

/// Trait defining the file storage interface
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Store content under the owner's namespace, overwriting any previous
    /// file with the same identifier. Content is written before metadata.
    async fn store(
        &self,
        content: &[u8],
        file_id: &str,
        user_id: &str,
        mime_type: &str,
    ) -> Result<StoredFile, StorageError>;

    /// Retrieve content as a stream of bounded chunks. Passing `owner_id`
    /// reads that owner's namespace (public-file access).
    async fn retrieve(
        &self,
        file_id: &str,
        user_id: &str,
        owner_id: Option<&str>,
    ) -> Result<ByteStream, StorageError>;

    /// Delete content and metadata together. Only the owner may delete.
    async fn delete(&self, file_id: &str, user_id: &str) -> Result<(), StorageError>;

    /// Fetch the metadata record without transferring content.
    async fn get_metadata(
        &self,
        file_id: &str,
        user_id: &str,
        owner_id: Option<&str>,
    ) -> Result<StoredFile, StorageError>;
}

/// Composite key used in log messages and error payloads.
pub(crate) fn composite_key(user_id: &str, file_id: &str) -> String {
    format!("{}/{}", user_id, file_id)
}

/// Validate caller-supplied identifiers before any I/O happens.
pub(crate) fn validate_ids(
    file_id: &str,
    user_id: &str,
    owner_id: Option<&str>,
) -> Result<(), StorageError> {
    check_id("file_id", file_id)?;
    check_id("user_id", user_id)?;
    if let Some(owner) = owner_id {
        check_id("owner_id", owner)?;
    }
    Ok(())
}

fn check_id(label: &str, value: &str) -> Result<(), StorageError> {
    if value.is_empty() {
        return Err(StorageError::invalid_key(format!(
            "{} must not be empty",
            label
        )));
    }
    if value.contains('/') || value.contains('\\') || value == "." || value == ".." {
        return Err(StorageError::invalid_key(format!(
            "{} '{}' must not contain path separators",
            label, value
        )));
    }
    Ok(())
}

/// Ownership rule shared by every backend: access is granted when the caller
/// is the resolved owner, or when it explicitly asserted an owner namespace.
fn access_allowed(owner: &str, caller: &str, asserted_owner: Option<&str>) -> bool {
    owner == caller || asserted_owner.is_some()
}

/// Apply the ownership rule, returning the resolved owner namespace.
pub(crate) fn authorize(
    owner: &str,
    caller: &str,
    asserted_owner: Option<&str>,
    file_id: &str,
) -> Result<String, StorageError> {
    if access_allowed(owner, caller, asserted_owner) {
        Ok(owner.to_string())
    } else {
        Err(StorageError::permission_denied(
            caller,
            composite_key(owner, file_id),
        ))
    }
}

/// Wrap fully buffered content in a stream of bounded chunks.
pub(crate) fn chunked_stream(data: Vec<u8>) -> ByteStream {
    let mut rest = Bytes::from(data);
    let mut chunks = Vec::new();
    while rest.len() > STREAM_CHUNK_SIZE {
        chunks.push(Ok(rest.split_to(STREAM_CHUNK_SIZE)));
    }
    if !rest.is_empty() {
        chunks.push(Ok(rest));
    }
    stream::iter(chunks).boxed()
}

/// Collect a retrieval stream into a single buffer.
pub async fn read_all(mut stream: ByteStream) -> Result<Vec<u8>, StorageError> {
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf)
}
