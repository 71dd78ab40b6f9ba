//! Blob storage handle used by the gateway.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use futures::{stream::BoxStream, Stream, StreamExt, TryStreamExt};
use object_store::{
    aws::AmazonS3Builder,
    azure::MicrosoftAzureBuilder,
    local::LocalFileSystem,
    memory::InMemory,
    path::{Path, PathPart, DELIMITER},
    signer::Signer,
    ObjectStore,
    ObjectStoreScheme,
    PutPayload,
    WriteMultipart,
};
use opentelemetry::metrics::Meter;
use reqwest::Method;
use tracing::{debug, info};
use url::Url;

use crate::{
    config::AzureConnectionString,
    metrics::OpTimer,
    BlobError,
    BlobMetrics,
    BlobResult,
    BlobStorageConfig,
};

/// Result of a PUT operation.
#[derive(Debug, Clone)]
pub struct PutResult {
    pub key: String,
    pub url: String,
    pub size_bytes: u64,
}

/// Metadata about a stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobMetadata {
    pub key: String,
    pub size_bytes: u64,
    pub etag: Option<String>,
}

/// Handle over one storage container.
///
/// Keys are flat names relative to the container (and the optional prefix of
/// the configured URL). The handle is immutable once built and cheap to share
/// behind an `Arc`.
pub struct BlobStorage {
    object_store: Arc<dyn ObjectStore>,

    /// URL signer, present for backends that support signed URLs.
    signer: Option<Arc<dyn Signer>>,

    prefix: Path,

    base_url: String,

    metrics: Option<BlobMetrics>,
}

impl BlobStorage {
    pub fn new(config: &BlobStorageConfig) -> BlobResult<Self> {
        let location = config.location()?;
        let url = location.parse::<Url>()?;
        let (scheme, prefix) = ObjectStoreScheme::parse(&url).map_err(object_store::Error::from)?;
        let (object_store, signer): (Arc<dyn ObjectStore>, Option<Arc<dyn Signer>>) = match scheme
        {
            ObjectStoreScheme::Local => {
                let dir = url
                    .to_file_path()
                    .map_err(|_| BlobError::invalid_config(format!("invalid file url: {}", url)))?;
                std::fs::create_dir_all(&dir).map_err(|e| BlobError::Backend {
                    source: anyhow::anyhow!("failed to create {:?}: {}", dir, e),
                })?;
                let store = LocalFileSystem::new_with_prefix(&dir)?;
                // The local store is rooted at the directory itself.
                return Ok(Self::from_parts(Arc::new(store), None, Path::default(), location));
            }
            ObjectStoreScheme::Memory => (Arc::new(InMemory::new()), None),
            ObjectStoreScheme::MicrosoftAzure => {
                let store = Arc::new(Self::build_azure(&url, config)?);
                (store.clone(), Some(store))
            }
            ObjectStoreScheme::AmazonS3 => {
                let store = Arc::new(AmazonS3Builder::from_env().with_url(url.as_str()).build()?);
                (store.clone(), Some(store))
            }
            other => {
                return Err(BlobError::UnsupportedBackend {
                    scheme: format!("{:?}", other),
                })
            }
        };
        info!(location = %location, "using blob storage");
        Ok(Self::from_parts(object_store, signer, prefix, location))
    }

    fn build_azure(
        url: &Url,
        config: &BlobStorageConfig,
    ) -> BlobResult<object_store::azure::MicrosoftAzure> {
        let Some(connection_string) = &config.connection_string else {
            // Credentials come from the AZURE_* environment variables.
            return Ok(MicrosoftAzureBuilder::from_env()
                .with_url(url.as_str())
                .build()?);
        };
        let container = url
            .host_str()
            .ok_or_else(|| BlobError::invalid_config(format!("missing container in {}", url)))?;
        let parsed = AzureConnectionString::parse(connection_string)?;
        debug!(account = %parsed.account_name, container, "building azure blob client");

        let mut builder = MicrosoftAzureBuilder::new()
            .with_account(&parsed.account_name)
            .with_container_name(container)
            .with_use_emulator(parsed.use_emulator);
        if let Some(key) = parsed.account_key {
            builder = builder.with_access_key(key);
        }
        if let Some(sas) = parsed.sas_token {
            let pairs: Vec<(String, String)> =
                url::form_urlencoded::parse(sas.trim_start_matches('?').as_bytes())
                    .into_owned()
                    .collect();
            builder = builder.with_sas_authorization(pairs);
        }
        if let Some(endpoint) = parsed.blob_endpoint {
            builder = builder
                .with_allow_http(endpoint.starts_with("http://"))
                .with_endpoint(endpoint);
        }
        Ok(builder.build()?)
    }

    fn from_parts(
        object_store: Arc<dyn ObjectStore>,
        signer: Option<Arc<dyn Signer>>,
        prefix: Path,
        base_url: String,
    ) -> Self {
        Self {
            object_store,
            signer,
            prefix,
            base_url,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, meter: &Meter) -> Self {
        self.metrics = Some(BlobMetrics::new(meter));
        self
    }

    pub fn get_url(&self) -> &str {
        &self.base_url
    }

    fn timer(&self, op: &'static str) -> Option<OpTimer> {
        self.metrics.as_ref().map(|m| m.start(op))
    }

    fn path(&self, key: &str) -> BlobResult<Path> {
        check_key(key)?;
        Ok(self.prefix.child(key))
    }

    fn key_of(&self, location: &Path) -> String {
        let location = location.as_ref();
        let prefix = self.prefix.as_ref();
        if prefix.is_empty() {
            return location.to_string();
        }
        location
            .strip_prefix(prefix)
            .map(|rest| rest.trim_start_matches(DELIMITER))
            .unwrap_or(location)
            .to_string()
    }

    fn direct_url(&self, key: &str) -> String {
        if self.base_url.ends_with('/') {
            format!("{}{}", self.base_url, key)
        } else {
            format!("{}/{}", self.base_url, key)
        }
    }

    /// Lists every key in the container, in the order the backend yields them.
    pub async fn list(&self) -> BlobResult<Vec<String>> {
        let mut timer = self.timer("list");
        let prefix = (!self.prefix.as_ref().is_empty()).then_some(&self.prefix);
        let result = self
            .object_store
            .list(prefix)
            .map_ok(|meta| self.key_of(&meta.location))
            .map_err(BlobError::from)
            .try_collect::<Vec<_>>()
            .await;
        if let Some(t) = timer.as_mut() {
            t.observe(&result);
        }
        result
    }

    pub async fn head(&self, key: &str) -> BlobResult<BlobMetadata> {
        let path = self.path(key)?;
        let mut timer = self.timer("head");
        let result = self
            .object_store
            .head(&path)
            .await
            .map(|meta| BlobMetadata {
                key: key.to_string(),
                size_bytes: meta.size as u64,
                etag: meta.e_tag,
            })
            .map_err(|e| with_key(e, key));
        if let Some(t) = timer.as_mut() {
            t.observe(&result);
        }
        result
    }

    /// Streams `data` into the blob at `key`, replacing any existing blob.
    ///
    /// If the input stream fails, the upload is aborted and nothing is
    /// committed under `key`.
    pub async fn put(
        &self,
        key: &str,
        data: impl Stream<Item = anyhow::Result<Bytes>> + Send + Unpin,
    ) -> BlobResult<PutResult> {
        let mut timer = self.timer("put");
        let result = self.put_stream(key, data).await;
        if let Some(t) = timer.as_mut() {
            t.observe(&result);
        }
        result
    }

    async fn put_stream(
        &self,
        key: &str,
        mut data: impl Stream<Item = anyhow::Result<Bytes>> + Send + Unpin,
    ) -> BlobResult<PutResult> {
        let path = self.path(key)?;
        let upload = self.object_store.put_multipart(&path).await?;
        let mut writer = WriteMultipart::new(upload);
        let mut size_bytes = 0;

        while let Some(chunk) = data.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    if let Err(abort_err) = writer.abort().await {
                        debug!(key, "failed to abort upload: {}", abort_err);
                    }
                    return Err(BlobError::Backend { source: e });
                }
            };
            writer.wait_for_capacity(1).await?;
            size_bytes += chunk.len() as u64;
            writer.write(&chunk);
        }
        writer.finish().await?;

        Ok(PutResult {
            key: key.to_string(),
            url: self.direct_url(key),
            size_bytes,
        })
    }

    /// Writes `data` to `key` in a single request, replacing any existing blob.
    pub async fn put_bytes(&self, key: &str, data: Bytes) -> BlobResult<PutResult> {
        let path = self.path(key)?;
        let mut timer = self.timer("put");
        let size_bytes = data.len() as u64;
        let result = self
            .object_store
            .put(&path, PutPayload::from(data))
            .await
            .map(|_| PutResult {
                key: key.to_string(),
                url: self.direct_url(key),
                size_bytes,
            })
            .map_err(BlobError::from);
        if let Some(t) = timer.as_mut() {
            t.observe(&result);
        }
        result
    }

    /// Opens a read stream over the blob at `key`.
    ///
    /// Chunks are fetched from the backend only as the stream is polled;
    /// dropping the stream releases the underlying read.
    pub async fn get(&self, key: &str) -> BlobResult<BoxStream<'static, BlobResult<Bytes>>> {
        let path = self.path(key)?;
        let mut timer = self.timer("get");
        let result = self
            .object_store
            .get(&path)
            .await
            .map_err(|e| with_key(e, key));
        if let Some(t) = timer.as_mut() {
            t.observe(&result);
        }
        let key = key.to_string();
        Ok(result?
            .into_stream()
            .map_err(move |e| with_key(e, &key))
            .boxed())
    }

    pub async fn read_bytes(&self, key: &str) -> BlobResult<Bytes> {
        let chunks: Vec<Bytes> = self.get(key).await?.try_collect().await?;
        Ok(Bytes::from(chunks.concat()))
    }

    /// Deletes the blob at `key`. A missing blob is reported as `NotFound`,
    /// whatever the backend's own delete semantics are.
    pub async fn delete(&self, key: &str) -> BlobResult<()> {
        let path = self.path(key)?;
        self.head(key).await?;
        let mut timer = self.timer("delete");
        let result = self
            .object_store
            .delete(&path)
            .await
            .map_err(|e| with_key(e, key));
        if let Some(t) = timer.as_mut() {
            t.observe(&result);
        }
        result
    }

    /// Returns a read-only URL for the blob at `key`, valid for `expires_in`.
    ///
    /// Backends without URL signing (local disk, in-memory) return the blob's
    /// direct location instead.
    pub async fn signed_url(&self, key: &str, expires_in: Duration) -> BlobResult<String> {
        let path = self.path(key)?;
        self.head(key).await?;
        let Some(signer) = &self.signer else {
            return Ok(self.direct_url(key));
        };
        let mut timer = self.timer("sign");
        let result = signer
            .signed_url(Method::GET, &path, expires_in)
            .await
            .map(|url| url.to_string())
            .map_err(BlobError::from);
        if let Some(t) = timer.as_mut() {
            t.observe(&result);
        }
        result
    }
}

/// Checks that `key` is a single path segment the object store keeps as-is.
///
/// `object_store` percent-encodes characters such as `[`, `#` or `%` in path
/// segments, which would make the stored name differ from `key`.
pub fn check_key(key: &str) -> BlobResult<()> {
    if key.is_empty() || PathPart::from(key).as_ref() != key {
        return Err(BlobError::InvalidKey {
            key: key.to_string(),
        });
    }
    Ok(())
}

fn with_key(err: object_store::Error, key: &str) -> BlobError {
    match BlobError::from(err) {
        BlobError::NotFound { .. } => BlobError::NotFound {
            key: key.to_string(),
        },
        other => other,
    }
}
