use std::fmt;

use blob_store::BlobError;

pub type DatasetResult<T> = Result<T, DatasetError>;

/// Failures of the dataset operations.
#[derive(Debug)]
pub enum DatasetError {
    /// The filename has no `.` separating base name and extension, or the
    /// resolved key cannot be stored as-is.
    InvalidFilename { filename: String, reason: String },

    /// The extension is not one of the recognized dataset formats.
    UnsupportedFormat { extension: String },

    /// The bytes do not parse under the claimed format.
    MalformedInput { reason: String },

    /// No blob exists under the resolved key.
    NotFound { key: String },

    /// The dataset hub could not produce the requested file.
    RemoteFetchFailed { reason: String },

    /// Storage transport, authentication or configuration failure.
    StorageUnavailable { source: BlobError },
}

impl DatasetError {
    pub fn malformed(reason: impl fmt::Display) -> Self {
        DatasetError::MalformedInput {
            reason: reason.to_string(),
        }
    }

    pub fn remote_fetch(reason: impl fmt::Display) -> Self {
        DatasetError::RemoteFetchFailed {
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for DatasetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetError::InvalidFilename { filename, reason } => {
                write!(f, "invalid filename '{}': {}", filename, reason)
            }
            DatasetError::UnsupportedFormat { extension } => write!(
                f,
                "unsupported file format '{}': only csv, json and jsonl are allowed",
                extension
            ),
            DatasetError::MalformedInput { reason } => write!(f, "malformed input: {}", reason),
            DatasetError::NotFound { key } => write!(f, "dataset not found: {}", key),
            DatasetError::RemoteFetchFailed { reason } => {
                write!(f, "failed to fetch dataset from hub: {}", reason)
            }
            DatasetError::StorageUnavailable { source } => write!(f, "{}", source),
        }
    }
}

impl std::error::Error for DatasetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DatasetError::StorageUnavailable { source } => Some(source),
            _ => None,
        }
    }
}

impl From<BlobError> for DatasetError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::NotFound { key } => DatasetError::NotFound { key },
            BlobError::InvalidKey { key } => DatasetError::InvalidFilename {
                filename: key,
                reason: "contains characters that cannot be stored verbatim".to_string(),
            },
            source => DatasetError::StorageUnavailable { source },
        }
    }
}
