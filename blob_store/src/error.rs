//! Error types for blob store operations.

use std::fmt;

/// Result type for blob store operations.
pub type BlobResult<T> = Result<T, BlobError>;

/// Errors that can occur during blob store operations.
#[derive(Debug)]
pub enum BlobError {
    /// No blob exists under the key.
    NotFound { key: String },

    /// The key cannot be stored verbatim by the backend.
    InvalidKey { key: String },

    /// Storage configuration is incomplete or malformed.
    InvalidConfig { reason: String },

    /// The storage URL scheme has no backend.
    UnsupportedBackend { scheme: String },

    /// Transport, authentication or service error from the backend.
    Backend { source: anyhow::Error },
}

impl BlobError {
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        BlobError::InvalidConfig {
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BlobError::NotFound { .. })
    }
}

impl fmt::Display for BlobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlobError::NotFound { key } => write!(f, "blob not found: {}", key),
            BlobError::InvalidKey { key } => write!(
                f,
                "invalid blob key '{}': contains characters the object store would escape",
                key
            ),
            BlobError::InvalidConfig { reason } => {
                write!(f, "invalid blob storage configuration: {}", reason)
            }
            BlobError::UnsupportedBackend { scheme } => {
                write!(f, "unsupported blob storage backend: {}", scheme)
            }
            BlobError::Backend { source } => write!(f, "blob storage error: {}", source),
        }
    }
}

impl std::error::Error for BlobError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BlobError::Backend { source } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<object_store::Error> for BlobError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => BlobError::NotFound { key: path },
            _ => BlobError::Backend {
                source: anyhow::Error::from(err),
            },
        }
    }
}

impl From<anyhow::Error> for BlobError {
    fn from(err: anyhow::Error) -> Self {
        BlobError::Backend { source: err }
    }
}

impl From<url::ParseError> for BlobError {
    fn from(err: url::ParseError) -> Self {
        BlobError::invalid_config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_store_not_found_maps_to_not_found() {
        let err = object_store::Error::NotFound {
            path: "data_v1.csv".to_string(),
            source: "missing".into(),
        };
        let err = BlobError::from(err);
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "blob not found: data_v1.csv");
    }

    #[test]
    fn test_other_object_store_errors_map_to_backend() {
        let err = object_store::Error::NotImplemented;
        assert!(matches!(BlobError::from(err), BlobError::Backend { .. }));
    }
}
