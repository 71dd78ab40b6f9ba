use std::{sync::Arc, time::Duration};

use blob_store::{check_key, BlobStorage};
use bytes::Bytes;
use futures::{stream::BoxStream, Stream, StreamExt};
use serde::Serialize;
use tracing::info;

use crate::{
    config::StreamConfig,
    error::{DatasetError, DatasetResult},
    format::{DatasetContent, DatasetFormat},
    hub::DatasetHub,
    line_stream::paced_lines,
    naming::versioned_key,
};

/// Lifetime of generated download links.
pub const DOWNLOAD_LINK_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDataset {
    pub key: String,
    pub version: String,
}

/// A dataset read as a lazy sequence of lines.
pub struct DatasetStream {
    pub key: String,
    pub format: DatasetFormat,
    pub lines: BoxStream<'static, DatasetResult<Bytes>>,
}

/// A dataset decoded into its structured form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetPreview {
    pub filename: String,
    #[serde(flatten)]
    pub content: DatasetContent,
}

/// The dataset operations, each a single pass over the storage handle.
pub struct DatasetGateway {
    storage: Arc<BlobStorage>,
    hub: Arc<dyn DatasetHub>,
    line_delay: Duration,
}

impl DatasetGateway {
    pub fn new(storage: Arc<BlobStorage>, hub: Arc<dyn DatasetHub>, stream: &StreamConfig) -> Self {
        Self {
            storage,
            hub,
            line_delay: stream.line_delay(),
        }
    }

    pub async fn list(&self) -> DatasetResult<Vec<String>> {
        Ok(self.storage.list().await?)
    }

    pub async fn download_link(&self, filename: &str, version: &str) -> DatasetResult<String> {
        let key = resolve_key(filename, version)?;
        Ok(self.storage.signed_url(&key, DOWNLOAD_LINK_TTL).await?)
    }

    /// Deletes one version of a dataset and returns its key.
    pub async fn delete(&self, filename: &str, version: &str) -> DatasetResult<String> {
        let key = resolve_key(filename, version)?;
        self.storage.delete(&key).await?;
        info!(key, "deleted dataset");
        Ok(key)
    }

    /// Stores the uploaded bytes unmodified, replacing any blob with the same
    /// filename and version.
    pub async fn upload(
        &self,
        filename: &str,
        version: &str,
        data: impl Stream<Item = anyhow::Result<Bytes>> + Send + Unpin,
    ) -> DatasetResult<StoredDataset> {
        DatasetFormat::from_filename(filename)?;
        let key = resolve_key(filename, version)?;
        let put = self.storage.put(&key, data).await?;
        info!(key, size_bytes = put.size_bytes, "uploaded dataset");
        Ok(StoredDataset {
            key,
            version: version.to_string(),
        })
    }

    /// Imports a file from the hub. The file is decoded and re-encoded before
    /// it is stored, so a file that does not parse is never written.
    pub async fn fetch_and_store(
        &self,
        repo_id: &str,
        filename: &str,
        version: &str,
    ) -> DatasetResult<StoredDataset> {
        let format = DatasetFormat::from_filename(filename)?;
        let key = resolve_key(filename, version)?;

        let local_path = self.hub.download(repo_id, filename).await?;
        let raw = tokio::fs::read(&local_path).await.map_err(|e| {
            DatasetError::remote_fetch(format!("reading {}: {}", local_path.display(), e))
        })?;
        let normalized = format.encode(&format.decode(&raw)?)?;

        let put = self.storage.put_bytes(&key, Bytes::from(normalized)).await?;
        info!(repo_id, filename, key, size_bytes = put.size_bytes, "imported dataset from hub");
        Ok(StoredDataset {
            key,
            version: version.to_string(),
        })
    }

    /// Opens a paced line stream over one version of a dataset.
    pub async fn stream(&self, filename: &str, version: &str) -> DatasetResult<DatasetStream> {
        let format = DatasetFormat::from_filename(filename)?;
        let key = resolve_key(filename, version)?;
        let source = self.storage.get(&key).await?;
        let lines = paced_lines(source, format.codec(), self.line_delay).boxed();
        Ok(DatasetStream { key, format, lines })
    }

    /// Reads and decodes a whole dataset.
    pub async fn preview(&self, filename: &str, version: &str) -> DatasetResult<DatasetPreview> {
        let format = DatasetFormat::from_filename(filename)?;
        let key = resolve_key(filename, version)?;
        let bytes = self.storage.read_bytes(&key).await?;
        let content = format.decode(&bytes)?;
        Ok(DatasetPreview {
            filename: key,
            content,
        })
    }
}

/// Resolves the blob key and checks that storage keeps it verbatim, so the
/// key reported to callers is the key that `list` returns.
fn resolve_key(filename: &str, version: &str) -> DatasetResult<String> {
    let key = versioned_key(filename, version)?;
    check_key(&key)?;
    Ok(key)
}
