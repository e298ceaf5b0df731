//! Storage error types.

use thiserror::Error;

/// Errors raised by storage backends and the configuration factory.
///
/// Backend-native failures are translated into these variants at the backend
/// boundary; callers never see `std::io::Error` or `opendal::Error` directly.
/// The conventional caller mapping is `NotFound` to 404, `PermissionDenied`
/// to 403 and everything else to 500, but that mapping belongs to the
/// caller, not to this layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No file exists at the resolved (owner, file) location, for anyone.
    #[error("file not found: {key}")]
    NotFound {
        /// Composite `user/file` key that was not found.
        key: String,
    },

    /// The file exists but the caller is not authorized to access it.
    #[error("user '{user_id}' is not permitted to access '{key}'")]
    PermissionDenied {
        /// The calling user.
        user_id: String,
        /// Composite `user/file` key of the file.
        key: String,
    },

    /// Malformed caller-supplied identifier.
    #[error("invalid storage key: {0}")]
    InvalidKey(String),

    /// Invalid or missing settings, raised at construction time.
    #[error("storage configuration error: {0}")]
    Configuration(String),

    /// Any other failure: I/O error, network failure, malformed response.
    #[error("storage operation failed: {0}")]
    Backend(String),
}

impl StorageError {
    /// Create a not found error.
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Create a permission denied error.
    pub fn permission_denied(user_id: impl Into<String>, key: impl Into<String>) -> Self {
        Self::PermissionDenied {
            user_id: user_id.into(),
            key: key.into(),
        }
    }

    /// Create an invalid key error.
    pub fn invalid_key(msg: impl Into<String>) -> Self {
        Self::InvalidKey(msg.into())
    }

    /// Create a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a generic backend error.
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// True when the error is the not-found variant.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<opendal::Error> for StorageError {
    fn from(err: opendal::Error) -> Self {
        match err.kind() {
            opendal::ErrorKind::NotFound => Self::NotFound {
                key: err.to_string(),
            },
            _ => Self::Backend(err.to_string()),
        }
    }
}
