//! Mock implementation of the FileStore trait for testing.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use log::{info, warn};

use crate::storage::error::StorageError;
use crate::storage::{
    authorize, chunked_stream, composite_key, validate_ids, ByteStream, FileId, FileStore,
    StoredFile,
};

#[derive(Default)]
struct FailureState {
    all: bool,
    users: HashSet<String>,
}

/// In-memory implementation of `FileStore` for tests.
///
/// Content and metadata live together under a `"user_id/file_id"` composite
/// key. A failure mode can be switched on globally or per user so callers
/// can exercise the generic storage error path without a real backend.
pub struct MockFileStore {
    // "user_id/file_id" -> (content, record)
    entries: Mutex<HashMap<String, (Vec<u8>, StoredFile)>>,
    failures: Mutex<FailureState>,
    namespace_scan: bool,
}

impl MockFileStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            failures: Mutex::new(FailureState::default()),
            namespace_scan: true,
        }
    }

    /// Enable or disable the cross-namespace suffix scan.
    pub fn with_namespace_scan(mut self, enabled: bool) -> Self {
        self.namespace_scan = enabled;
        self
    }

    /// Make every operation fail with a generic storage error.
    pub fn simulate_failure(&self, enabled: bool) {
        self.failures.lock().unwrap().all = enabled;
    }

    /// Make operations by one user fail with a generic storage error.
    pub fn simulate_failure_for(&self, user_id: &str) {
        self.failures.lock().unwrap().users.insert(user_id.to_string());
    }

    /// Clear all simulated failures.
    pub fn clear_failures(&self) {
        let mut failures = self.failures.lock().unwrap();
        failures.all = false;
        failures.users.clear();
    }

    /// Total number of stored files across all users.
    pub fn file_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Number of files stored for one user.
    pub fn file_count_for(&self, user_id: &str) -> usize {
        let prefix = format!("{}/", user_id);
        let entries = self.entries.lock().unwrap();
        entries.keys().filter(|key| key.starts_with(&prefix)).count()
    }

    /// Check if a file exists for a user.
    pub fn contains(&self, user_id: &str, file_id: &str) -> bool {
        self.entries
            .lock()
            .unwrap()
            .contains_key(&composite_key(user_id, file_id))
    }

    /// List all file identifiers stored for a user.
    pub fn list_files(&self, user_id: &str) -> Vec<FileId> {
        let prefix = format!("{}/", user_id);
        let entries = self.entries.lock().unwrap();
        entries
            .keys()
            .filter_map(|key| key.strip_prefix(&prefix).map(str::to_owned))
            .collect()
    }

    /// Clear all stored data.
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    fn ensure_available(&self, user_id: &str) -> Result<(), StorageError> {
        let failures = self.failures.lock().unwrap();
        if failures.all || failures.users.contains(user_id) {
            warn!("Mock: simulated failure for user {}", user_id);
            return Err(StorageError::backend(format!(
                "simulated storage failure for user {}",
                user_id
            )));
        }
        Ok(())
    }

    /// Find the owner of `file_id` by scanning all composite keys.
    fn find_owner(&self, file_id: &str) -> Option<String> {
        let suffix = format!("/{}", file_id);
        let entries = self.entries.lock().unwrap();
        entries
            .keys()
            .find(|key| key.ends_with(&suffix))
            .map(|key| key[..key.len() - suffix.len()].to_string())
    }

    fn resolve_owner(
        &self,
        file_id: &str,
        user_id: &str,
        owner_id: Option<&str>,
    ) -> Result<String, StorageError> {
        let primary = owner_id.unwrap_or(user_id);
        let direct_hit = self
            .entries
            .lock()
            .unwrap()
            .contains_key(&composite_key(primary, file_id));
        if direct_hit {
            return authorize(primary, user_id, owner_id, file_id);
        }
        if self.namespace_scan {
            if let Some(owner) = self.find_owner(file_id) {
                return authorize(&owner, user_id, owner_id, file_id);
            }
        }
        Err(StorageError::not_found(composite_key(primary, file_id)))
    }
}

impl Default for MockFileStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileStore for MockFileStore {
    async fn store(
        &self,
        content: &[u8],
        file_id: &str,
        user_id: &str,
        mime_type: &str,
    ) -> Result<StoredFile, StorageError> {
        validate_ids(file_id, user_id, None)?;
        self.ensure_available(user_id)?;

        let key = composite_key(user_id, file_id);
        let record = StoredFile::active(
            file_id,
            user_id,
            format!("mock://{}", key),
            content.len() as u64,
            mime_type,
        );
        self.entries
            .lock()
            .unwrap()
            .insert(key.clone(), (content.to_vec(), record.clone()));

        info!("Mock: stored {} bytes for {}", content.len(), key);
        Ok(record)
    }

    async fn retrieve(
        &self,
        file_id: &str,
        user_id: &str,
        owner_id: Option<&str>,
    ) -> Result<ByteStream, StorageError> {
        validate_ids(file_id, user_id, owner_id)?;
        self.ensure_available(user_id)?;

        let owner = self.resolve_owner(file_id, user_id, owner_id)?;
        let key = composite_key(&owner, file_id);
        let content = self
            .entries
            .lock()
            .unwrap()
            .get(&key)
            .map(|(content, _)| content.clone())
            .ok_or_else(|| StorageError::not_found(key))?;

        Ok(chunked_stream(content))
    }

    async fn delete(&self, file_id: &str, user_id: &str) -> Result<(), StorageError> {
        validate_ids(file_id, user_id, None)?;
        self.ensure_available(user_id)?;

        let key = composite_key(user_id, file_id);
        if self.entries.lock().unwrap().remove(&key).is_some() {
            info!("Mock: deleted {}", key);
            return Ok(());
        }

        if self.namespace_scan {
            if let Some(owner) = self.find_owner(file_id) {
                return Err(StorageError::permission_denied(
                    user_id,
                    composite_key(&owner, file_id),
                ));
            }
        }
        Err(StorageError::not_found(key))
    }

    async fn get_metadata(
        &self,
        file_id: &str,
        user_id: &str,
        owner_id: Option<&str>,
    ) -> Result<StoredFile, StorageError> {
        validate_ids(file_id, user_id, owner_id)?;
        self.ensure_available(user_id)?;

        let owner = self.resolve_owner(file_id, user_id, owner_id)?;
        let key = composite_key(&owner, file_id);
        let entries = self.entries.lock().unwrap();
        entries
            .get(&key)
            .map(|(_, record)| record.clone())
            .ok_or_else(|| StorageError::not_found(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::read_all;

    #[tokio::test]
    async fn test_basic_operations() {
        let store = MockFileStore::new();

        assert_eq!(store.file_count(), 0);
        assert!(!store.contains("user1", "note.txt"));

        let record = store
            .store(b"Hello, Mock Storage!", "note.txt", "user1", "text/plain")
            .await
            .unwrap();
        assert_eq!(record.size_bytes, 20);
        assert_eq!(record.path, "mock://user1/note.txt");
        assert!(store.contains("user1", "note.txt"));
        assert_eq!(store.file_count_for("user1"), 1);

        let stream = store.retrieve("note.txt", "user1", None).await.unwrap();
        assert_eq!(read_all(stream).await.unwrap(), b"Hello, Mock Storage!");

        store.delete("note.txt", "user1").await.unwrap();
        assert_eq!(store.file_count(), 0);
    }

    #[tokio::test]
    async fn test_store_overwrites() {
        let store = MockFileStore::new();

        store
            .store(b"first", "draft.md", "user1", "text/markdown")
            .await
            .unwrap();
        store
            .store(b"second version", "draft.md", "user1", "text/markdown")
            .await
            .unwrap();

        assert_eq!(store.file_count_for("user1"), 1);
        let meta = store.get_metadata("draft.md", "user1", None).await.unwrap();
        assert_eq!(meta.size_bytes, 14);
    }

    #[tokio::test]
    async fn test_ownership_rules() {
        let store = MockFileStore::new();
        store
            .store(b"secret", "diary.txt", "user1", "text/plain")
            .await
            .unwrap();

        let err = store.retrieve("diary.txt", "user2", None).await.err().unwrap();
        assert!(matches!(err, StorageError::PermissionDenied { .. }));

        let stream = store
            .retrieve("diary.txt", "user2", Some("user1"))
            .await
            .unwrap();
        assert_eq!(read_all(stream).await.unwrap(), b"secret");

        let err = store.delete("diary.txt", "user2").await.unwrap_err();
        assert!(matches!(err, StorageError::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn test_suffix_scan_can_be_disabled() {
        let store = MockFileStore::new().with_namespace_scan(false);
        store
            .store(b"secret", "diary.txt", "user1", "text/plain")
            .await
            .unwrap();

        // Without the scan a foreign lookup cannot even learn the file exists.
        assert!(store
            .retrieve("diary.txt", "user2", None)
            .await
            .err().unwrap()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_failure_simulation() {
        let store = MockFileStore::new();
        store
            .store(b"x", "a.txt", "user1", "text/plain")
            .await
            .unwrap();

        store.simulate_failure(true);
        assert!(matches!(
            store.retrieve("a.txt", "user1", None).await,
            Err(StorageError::Backend(_))
        ));
        assert!(matches!(
            store.store(b"y", "b.txt", "user1", "text/plain").await,
            Err(StorageError::Backend(_))
        ));

        store.clear_failures();
        let stream = store.retrieve("a.txt", "user1", None).await.unwrap();
        assert_eq!(read_all(stream).await.unwrap(), b"x");
    }

    #[tokio::test]
    async fn test_per_user_failure_simulation() {
        let store = MockFileStore::new();
        store
            .store(b"a", "a.txt", "user1", "text/plain")
            .await
            .unwrap();
        store
            .store(b"b", "b.txt", "user2", "text/plain")
            .await
            .unwrap();

        store.simulate_failure_for("user1");
        assert!(matches!(
            store.get_metadata("a.txt", "user1", None).await,
            Err(StorageError::Backend(_))
        ));
        // Other users are unaffected.
        assert!(store.get_metadata("b.txt", "user2", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_error_cases() {
        let store = MockFileStore::new();

        assert!(store
            .retrieve("ghost.txt", "user1", None)
            .await
            .err().unwrap()
            .is_not_found());
        assert!(store
            .delete("ghost.txt", "user1")
            .await
            .unwrap_err()
            .is_not_found());
        assert!(store
            .get_metadata("ghost.txt", "user1", Some("user2"))
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_list_and_clear() {
        let store = MockFileStore::new();
        store
            .store(b"1", "one.txt", "user1", "text/plain")
            .await
            .unwrap();
        store
            .store(b"2", "two.txt", "user1", "text/plain")
            .await
            .unwrap();

        let mut files = store.list_files("user1");
        files.sort();
        assert_eq!(files, vec!["one.txt".to_string(), "two.txt".to_string()]);

        store.clear();
        assert_eq!(store.file_count(), 0);
    }
}
