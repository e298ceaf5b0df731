//! Configuration for file storage backends.

use std::env;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::storage::error::StorageError;
use crate::storage::local_store::LocalFileStore;
use crate::storage::mock_store::MockFileStore;
use crate::storage::object_store::ObjectFileStore;
use crate::storage::FileStore;

/// Default AWS region when none is configured.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Available storage backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Local,
    Mock,
    S3,
}

impl Default for StorageBackend {
    fn default() -> Self {
        StorageBackend::Local
    }
}

impl FromStr for StorageBackend {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(StorageBackend::Local),
            "mock" => Ok(StorageBackend::Mock),
            "s3" => Ok(StorageBackend::S3),
            _ => Err(StorageError::configuration(format!(
                "unknown storage backend: {}",
                s
            ))),
        }
    }
}

/// Connection settings for the S3-style backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    /// Bucket name. Required when the s3 backend is selected.
    pub bucket: String,
    /// Custom endpoint for S3-compatible stores (MinIO, R2, ...).
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub region: String,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            region: DEFAULT_REGION.to_string(),
        }
    }
}

/// Configuration for file storage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage backend type
    pub backend: StorageBackend,
    /// Root directory for the local backend. Required when selected.
    pub storage_path: Option<String>,
    /// S3 settings, used when the s3 backend is selected.
    pub s3: S3Config,
    /// Cross-namespace owner scan for lookups without an owner id. On by
    /// default; disabling it turns ownerless foreign lookups into not-found.
    pub namespace_scan: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            storage_path: None,
            s3: S3Config::default(),
            namespace_scan: true,
        }
    }
}

impl StorageConfig {
    /// Create a new storage configuration from environment variables.
    pub fn from_env() -> Result<Self, StorageError> {
        let backend = match env::var("STORAGE_BACKEND") {
            Ok(tag) => {
                let backend = tag.parse::<StorageBackend>()?;
                info!("Using storage backend from environment: {:?}", backend);
                backend
            }
            Err(_) => {
                info!(
                    "No storage backend specified in environment, using default {:?}",
                    StorageBackend::default()
                );
                StorageBackend::default()
            }
        };

        let namespace_scan = match env::var("STORAGE_NAMESPACE_SCAN") {
            Ok(value) => match value.to_lowercase().as_str() {
                "true" | "1" => true,
                "false" | "0" => false,
                other => {
                    return Err(StorageError::configuration(format!(
                        "invalid STORAGE_NAMESPACE_SCAN value: {}",
                        other
                    )))
                }
            },
            Err(_) => true,
        };

        Ok(Self {
            backend,
            storage_path: env::var("STORAGE_PATH").ok(),
            s3: S3Config {
                bucket: env::var("S3_BUCKET_NAME").unwrap_or_default(),
                endpoint: env::var("S3_ENDPOINT_URL").ok(),
                access_key_id: env::var("AWS_ACCESS_KEY_ID").ok(),
                secret_access_key: env::var("AWS_SECRET_ACCESS_KEY").ok(),
                region: env::var("AWS_REGION").unwrap_or_else(|_| DEFAULT_REGION.to_string()),
            },
            namespace_scan,
        })
    }

    /// Load configuration from a YAML file, using defaults if not found.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if !path.exists() {
            warn!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            StorageError::configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: StorageConfig = serde_yaml::from_str(&content).map_err(|e| {
            StorageError::configuration(format!("cannot parse {}: {}", path.display(), e))
        })?;
        info!("Loaded storage configuration from {}", path.display());
        Ok(config)
    }

    /// Create a storage instance based on the configuration.
    ///
    /// Missing required settings for the selected backend fail here, at
    /// construction time, never at first use.
    pub fn create_store(&self) -> Result<Arc<dyn FileStore>, StorageError> {
        match self.backend {
            StorageBackend::Local => {
                let root = self.storage_path.as_deref().ok_or_else(|| {
                    StorageError::configuration("STORAGE_PATH is required for the local backend")
                })?;
                Ok(Arc::new(
                    LocalFileStore::new(root)?.with_namespace_scan(self.namespace_scan),
                ))
            }
            StorageBackend::Mock => Ok(Arc::new(
                MockFileStore::new().with_namespace_scan(self.namespace_scan),
            )),
            StorageBackend::S3 => {
                if self.s3.bucket.is_empty() {
                    return Err(StorageError::configuration(
                        "S3_BUCKET_NAME is required for the s3 backend",
                    ));
                }
                Ok(Arc::new(
                    ObjectFileStore::new(&self.s3)?.with_namespace_scan(self.namespace_scan),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn clear_storage_env() {
        for var in [
            "STORAGE_BACKEND",
            "STORAGE_PATH",
            "STORAGE_NAMESPACE_SCAN",
            "S3_BUCKET_NAME",
            "S3_ENDPOINT_URL",
            "AWS_ACCESS_KEY_ID",
            "AWS_SECRET_ACCESS_KEY",
            "AWS_REGION",
        ] {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_storage_backend_from_str() {
        assert_eq!("local".parse::<StorageBackend>().unwrap(), StorageBackend::Local);
        assert_eq!("LOCAL".parse::<StorageBackend>().unwrap(), StorageBackend::Local);
        assert_eq!("mock".parse::<StorageBackend>().unwrap(), StorageBackend::Mock);
        assert_eq!("s3".parse::<StorageBackend>().unwrap(), StorageBackend::S3);
        assert_eq!("S3".parse::<StorageBackend>().unwrap(), StorageBackend::S3);

        assert!(matches!(
            "invalid".parse::<StorageBackend>(),
            Err(StorageError::Configuration(_))
        ));
    }

    #[test]
    fn test_storage_config_default() {
        let config = StorageConfig::default();
        assert_eq!(config.backend, StorageBackend::Local);
        assert!(config.storage_path.is_none());
        assert!(config.namespace_scan);
        assert_eq!(config.s3.region, DEFAULT_REGION);
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear_storage_env();
        let config = StorageConfig::from_env().unwrap();
        assert_eq!(config.backend, StorageBackend::Local);
        assert_eq!(config.s3.region, DEFAULT_REGION);
        assert!(config.namespace_scan);
    }

    #[test]
    #[serial]
    fn test_from_env_reads_variables() {
        clear_storage_env();
        env::set_var("STORAGE_BACKEND", "s3");
        env::set_var("S3_BUCKET_NAME", "tracker-files");
        env::set_var("S3_ENDPOINT_URL", "http://localhost:9000");
        env::set_var("AWS_REGION", "eu-central-1");
        env::set_var("STORAGE_NAMESPACE_SCAN", "false");

        let config = StorageConfig::from_env().unwrap();
        assert_eq!(config.backend, StorageBackend::S3);
        assert_eq!(config.s3.bucket, "tracker-files");
        assert_eq!(config.s3.endpoint.as_deref(), Some("http://localhost:9000"));
        assert_eq!(config.s3.region, "eu-central-1");
        assert!(!config.namespace_scan);

        clear_storage_env();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_unknown_backend() {
        clear_storage_env();
        env::set_var("STORAGE_BACKEND", "carrier-pigeon");

        let err = StorageConfig::from_env().unwrap_err();
        assert!(matches!(err, StorageError::Configuration(_)));

        clear_storage_env();
    }

    #[test]
    fn test_create_store_mock_and_local() {
        let mock_config = StorageConfig {
            backend: StorageBackend::Mock,
            ..StorageConfig::default()
        };
        mock_config.create_store().expect("mock store should build");

        let dir = TempDir::new().unwrap();
        let local_config = StorageConfig {
            backend: StorageBackend::Local,
            storage_path: Some(dir.path().display().to_string()),
            ..StorageConfig::default()
        };
        local_config.create_store().expect("local store should build");
    }

    #[test]
    fn test_create_store_missing_required_settings() {
        let local_config = StorageConfig {
            backend: StorageBackend::Local,
            storage_path: None,
            ..StorageConfig::default()
        };
        assert!(matches!(
            local_config.create_store(),
            Err(StorageError::Configuration(_))
        ));

        let s3_config = StorageConfig {
            backend: StorageBackend::S3,
            ..StorageConfig::default()
        };
        assert!(matches!(
            s3_config.create_store(),
            Err(StorageError::Configuration(_))
        ));
    }

    #[test]
    fn test_load_yaml_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("storage.yaml");
        std::fs::write(
            &path,
            "backend: s3\nnamespace_scan: false\ns3:\n  bucket: tracker-files\n  region: eu-west-1\n",
        )
        .unwrap();

        let config = StorageConfig::load(&path).unwrap();
        assert_eq!(config.backend, StorageBackend::S3);
        assert!(!config.namespace_scan);
        assert_eq!(config.s3.bucket, "tracker-files");
        assert_eq!(config.s3.region, "eu-west-1");
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = StorageConfig::load("/nonexistent/storage.yaml").unwrap();
        assert_eq!(config.backend, StorageBackend::Local);
    }

    #[test]
    fn test_load_rejects_malformed_yaml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("storage.yaml");
        std::fs::write(&path, "backend: [not, a, tag").unwrap();

        assert!(matches!(
            StorageConfig::load(&path),
            Err(StorageError::Configuration(_))
        ));
    }
}
