use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

use crate::{
    config::HubConfig,
    error::{DatasetError, DatasetResult},
};

/// Read-only source of dataset files.
#[async_trait]
pub trait DatasetHub: Send + Sync {
    /// Fetches `filename` from the dataset repository `repo_id` and returns
    /// the path of a local copy.
    async fn download(&self, repo_id: &str, filename: &str) -> DatasetResult<PathBuf>;
}

/// Hugging Face Hub dataset repositories, fetched over the `resolve` endpoint.
pub struct HuggingFaceHub {
    client: reqwest::Client,
    config: HubConfig,
}

impl HuggingFaceHub {
    pub fn new(config: HubConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("dataset-gateway/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building hub http client")?;
        Ok(Self { client, config })
    }

    fn file_url(&self, repo_id: &str, filename: &str) -> DatasetResult<Url> {
        let raw = format!(
            "{}/datasets/{}/resolve/{}/{}",
            self.config.endpoint.trim_end_matches('/'),
            repo_id,
            self.config.revision,
            filename
        );
        Url::parse(&raw).map_err(|e| DatasetError::remote_fetch(format!("{raw}: {e}")))
    }

    fn local_path(&self, repo_id: &str, filename: &str) -> PathBuf {
        self.config
            .cache_dir
            .join("datasets")
            .join(repo_id.replace('/', "--"))
            .join(&self.config.revision)
            .join(filename)
    }

    async fn fetch_to(&self, url: Url, path: &Path) -> Result<u64> {
        let mut request = self.client.get(url.clone());
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("requesting {url}"))?
            .error_for_status()
            .with_context(|| format!("requesting {url}"))?;

        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("{} has no parent directory", path.display()))?;
        tokio::fs::create_dir_all(parent).await?;
        // A unique sibling temp file, renamed into place once complete. It is
        // removed when dropped, so a failed transfer leaves nothing behind.
        let (file, partial) = tempfile::Builder::new()
            .prefix(".download-")
            .suffix(".partial")
            .tempfile_in(parent)?
            .into_parts();
        let mut file = tokio::fs::File::from_std(file);
        let mut size = 0u64;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.with_context(|| format!("reading {url}"))?;
            size += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);
        partial
            .persist(path)
            .with_context(|| format!("moving download into {}", path.display()))?;
        Ok(size)
    }
}

fn check_segments(value: &str, what: &str) -> DatasetResult<()> {
    let bad = value.is_empty()
        || value.starts_with('/')
        || value.split('/').any(|s| s.is_empty() || s == "." || s == "..");
    if bad {
        return Err(DatasetError::remote_fetch(format!("invalid {what}: {value:?}")));
    }
    Ok(())
}

#[async_trait]
impl DatasetHub for HuggingFaceHub {
    async fn download(&self, repo_id: &str, filename: &str) -> DatasetResult<PathBuf> {
        check_segments(repo_id, "repo id")?;
        check_segments(filename, "filename")?;
        let url = self.file_url(repo_id, filename)?;
        let path = self.local_path(repo_id, filename);
        debug!(%url, path = ?path, "downloading dataset file");

        let size = self
            .fetch_to(url, &path)
            .await
            .map_err(|e| DatasetError::remote_fetch(format!("{repo_id}/{filename}: {e:#}")))?;
        info!(repo_id, filename, size, "downloaded dataset file from hub");
        Ok(path)
    }
}
