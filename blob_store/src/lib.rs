//! Blob storage for the dataset gateway.
//!
//! [`BlobStorage`] is a single immutable handle over one container, built on
//! `object_store`. It supports:
//!
//! - Azure Blob Storage (`az://container`, or a container plus a storage
//!   account connection string)
//! - Amazon S3 (`s3://bucket/prefix`, credentials from `AWS_*`)
//! - Local filesystem (`file:///path`) and in-memory (`memory://`) stores
//!
//! Reads are lazy streams, writes replace whatever blob already sits under
//! the key, and read-only signed URLs are issued where the backend can sign.
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use blob_store::{BlobStorage, BlobStorageConfig};
//!
//! # async fn example() -> Result<(), blob_store::BlobError> {
//! let storage = BlobStorage::new(&BlobStorageConfig::in_memory())?;
//! storage.put_bytes("prompts_v1.csv", "act,prompt\n".into()).await?;
//! let url = storage
//!     .signed_url("prompts_v1.csv", Duration::from_secs(3600))
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod metrics;
mod storage;

pub use config::{AzureConnectionString, BlobStorageConfig};
pub use error::{BlobError, BlobResult};
pub use metrics::BlobMetrics;
pub use storage::{check_key, BlobMetadata, BlobStorage, PutResult};
