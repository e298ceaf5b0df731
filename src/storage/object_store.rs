//! S3-style object storage backend built on Apache OpenDAL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use opendal::{services, ErrorKind, Operator};
use serde::{Deserialize, Serialize};

use crate::storage::config::S3Config;
use crate::storage::error::StorageError;
use crate::storage::{
    authorize, chunked_stream, composite_key, validate_ids, ByteStream, FileStore, StoredFile,
};

/// Metadata blob stored next to each content object. Unlike the local
/// backend, the owner is recorded here because an object listing alone
/// cannot answer who owns a key.
#[derive(Debug, Serialize, Deserialize)]
struct ObjectMeta {
    user_id: String,
    mime_type: String,
    created_at: DateTime<Utc>,
}

/// S3-style implementation of `FileStore`.
///
/// Keys mirror the local layout: `<user_id>/<file_id>` holds content and
/// `<user_id>/<file_id>.meta` the metadata blob. Writes go content first,
/// then metadata; a metadata write that fails after the content write leaves
/// the pair inconsistent until the next store or delete. There is no
/// rollback.
pub struct ObjectFileStore {
    op: Operator,
    bucket: String,
    namespace_scan: bool,
}

impl ObjectFileStore {
    /// Build an operator for the configured bucket.
    pub fn new(config: &S3Config) -> Result<Self, StorageError> {
        if config.bucket.is_empty() {
            return Err(StorageError::configuration(
                "S3 bucket name must not be empty",
            ));
        }

        let mut builder = services::S3::default()
            .bucket(&config.bucket)
            .region(&config.region);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint(endpoint);
        }
        if let Some(access_key_id) = &config.access_key_id {
            builder = builder.access_key_id(access_key_id);
        }
        if let Some(secret_access_key) = &config.secret_access_key {
            builder = builder.secret_access_key(secret_access_key);
        }

        let op = Operator::new(builder)
            .map_err(|e| StorageError::configuration(e.to_string()))?
            .finish();

        info!(
            "Using S3 object storage: bucket={}, region={}",
            config.bucket, config.region
        );
        Ok(Self {
            op,
            bucket: config.bucket.clone(),
            namespace_scan: true,
        })
    }

    /// Enable or disable the cross-namespace prefix scan.
    pub fn with_namespace_scan(mut self, enabled: bool) -> Self {
        self.namespace_scan = enabled;
        self
    }

    fn content_key(user_id: &str, file_id: &str) -> String {
        format!("{}/{}", user_id, file_id)
    }

    fn meta_key(user_id: &str, file_id: &str) -> String {
        format!("{}/{}.meta", user_id, file_id)
    }

    fn object_url(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }

    async fn key_exists(&self, key: &str) -> Result<bool, StorageError> {
        match self.op.stat(key).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::from(e)),
        }
    }

    async fn entry_exists(&self, user_id: &str, file_id: &str) -> Result<bool, StorageError> {
        Ok(self.key_exists(&Self::meta_key(user_id, file_id)).await?
            || self.key_exists(&Self::content_key(user_id, file_id)).await?)
    }

    /// Probe every top-level prefix for the file. This costs one listing
    /// plus a stat per user; callers that know the owner should pass it and
    /// skip the scan entirely.
    async fn find_owner(&self, file_id: &str) -> Result<Option<String>, StorageError> {
        warn!(
            "Scanning all namespaces for {}; pass the owner to avoid this",
            file_id
        );
        let entries = self.op.list("/").await.map_err(StorageError::from)?;
        for entry in entries {
            let path = entry.path();
            if !path.ends_with('/') {
                continue;
            }
            let user_id = path.trim_end_matches('/');
            if user_id.is_empty() {
                continue;
            }
            if self.entry_exists(user_id, file_id).await? {
                return Ok(Some(user_id.to_string()));
            }
        }
        Ok(None)
    }

    /// Resolve the owning namespace. Existence checks stat the metadata
    /// object before any content transfer happens.
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
                debug!("Prefix scan resolved {} to user {}", file_id, owner);
                return authorize(&owner, user_id, owner_id, file_id);
            }
        }
        Err(StorageError::not_found(composite_key(primary, file_id)))
    }
}

#[async_trait]
impl FileStore for ObjectFileStore {
    async fn store(
        &self,
        content: &[u8],
        file_id: &str,
        user_id: &str,
        mime_type: &str,
    ) -> Result<StoredFile, StorageError> {
        validate_ids(file_id, user_id, None)?;

        let content_key = Self::content_key(user_id, file_id);
        let record = StoredFile::active(
            file_id,
            user_id,
            self.object_url(&content_key),
            content.len() as u64,
            mime_type,
        );

        self.op
            .write(&content_key, content.to_vec())
            .await
            .map_err(|e| {
                error!("Content write failed for {}: {}", content_key, e);
                StorageError::from(e)
            })?;

        let meta = ObjectMeta {
            user_id: record.user_id.clone(),
            mime_type: record.mime_type.clone(),
            created_at: record.created_at,
        };
        let meta_json =
            serde_json::to_vec(&meta).map_err(|e| StorageError::backend(e.to_string()))?;
        if let Err(e) = self.op.write(&Self::meta_key(user_id, file_id), meta_json).await {
            // The content object is already written; the pair stays
            // inconsistent until the next successful store or delete.
            error!(
                "Metadata write failed after content write for {}: {}",
                content_key, e
            );
            return Err(StorageError::from(e));
        }

        info!("Stored {} bytes at {}", content.len(), record.path);
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

        let content_key = Self::content_key(&owner, file_id);
        let buffer = self.op.read(&content_key).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                StorageError::not_found(composite_key(&owner, file_id))
            } else {
                StorageError::from(e)
            }
        })?;

        debug!("Retrieved {}", self.object_url(&content_key));
        Ok(chunked_stream(buffer.to_vec()))
    }

    async fn delete(&self, file_id: &str, user_id: &str) -> Result<(), StorageError> {
        validate_ids(file_id, user_id, None)?;

        let content_key = Self::content_key(user_id, file_id);
        let meta_key = Self::meta_key(user_id, file_id);
        let content_exists = self.key_exists(&content_key).await?;
        let meta_exists = self.key_exists(&meta_key).await?;

        if !content_exists && !meta_exists {
            if self.namespace_scan {
                if let Some(owner) = self.find_owner(file_id).await? {
                    return Err(StorageError::permission_denied(
                        user_id,
                        composite_key(&owner, file_id),
                    ));
                }
            }
            return Err(StorageError::not_found(composite_key(user_id, file_id)));
        }

        // Content first, metadata last. A half-deleted pair is finished off
        // here instead of being reported as a failure.
        if content_exists {
            self.op.delete(&content_key).await.map_err(StorageError::from)?;
        }
        if meta_exists {
            self.op.delete(&meta_key).await.map_err(StorageError::from)?;
        }

        info!("Deleted {}", self.object_url(&content_key));
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

        let raw = self
            .op
            .read(&Self::meta_key(&owner, file_id))
            .await
            .map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    StorageError::not_found(key.clone())
                } else {
                    StorageError::from(e)
                }
            })?
            .to_vec();
        let meta: ObjectMeta = serde_json::from_slice(&raw)
            .map_err(|e| StorageError::backend(format!("malformed metadata for {}: {}", key, e)))?;

        let content_key = Self::content_key(&owner, file_id);
        let stat = self.op.stat(&content_key).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                StorageError::not_found(key.clone())
            } else {
                StorageError::from(e)
            }
        })?;

        let mut record = StoredFile::active(
            file_id,
            owner.as_str(),
            self.object_url(&content_key),
            stat.content_length(),
            meta.mime_type,
        );
        record.created_at = meta.created_at;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> S3Config {
        S3Config {
            bucket: "life-drive-test".to_string(),
            endpoint: Some("http://localhost:9000".to_string()),
            access_key_id: Some("minioadmin".to_string()),
            secret_access_key: Some("minioadmin".to_string()),
            region: "us-east-1".to_string(),
        }
    }

    #[test]
    fn test_construction_requires_bucket() {
        let config = S3Config {
            bucket: String::new(),
            ..test_config()
        };
        let err = ObjectFileStore::new(&config).err().unwrap();
        assert!(matches!(err, StorageError::Configuration(_)));
    }

    #[test]
    fn test_construction_with_endpoint_and_credentials() {
        let store = ObjectFileStore::new(&test_config()).expect("operator should build");
        assert_eq!(store.bucket, "life-drive-test");
        assert!(store.namespace_scan);
        assert!(!store.with_namespace_scan(false).namespace_scan);
    }

    #[test]
    fn test_key_layout() {
        assert_eq!(
            ObjectFileStore::content_key("user1", "photo.jpg"),
            "user1/photo.jpg"
        );
        assert_eq!(
            ObjectFileStore::meta_key("user1", "photo.jpg"),
            "user1/photo.jpg.meta"
        );

        let store = ObjectFileStore::new(&test_config()).unwrap();
        assert_eq!(
            store.object_url("user1/photo.jpg"),
            "s3://life-drive-test/user1/photo.jpg"
        );
    }

    #[test]
    fn test_meta_blob_records_owner() {
        let meta = ObjectMeta {
            user_id: "user1".to_string(),
            mime_type: "image/png".to_string(),
            created_at: Utc::now(),
        };
        let value: serde_json::Value =
            serde_json::from_slice(&serde_json::to_vec(&meta).unwrap()).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 3);
        assert_eq!(object["user_id"], "user1");
        assert_eq!(object["mime_type"], "image/png");
        assert!(object["created_at"].is_string());
    }
}
