use std::{env, net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::Result;
use blob_store::BlobStorageConfig;
use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

const ENV_PREFIX: &str = "DATASET_GATEWAY_";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub structured_logging: bool,
    pub telemetry: TelemetryConfig,
    pub blob_storage: BlobStorageConfig,
    pub stream: StreamConfig,
    pub hub: HubConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen_addr: "0.0.0.0:8000".to_string(),
            structured_logging: false,
            telemetry: TelemetryConfig::default(),
            blob_storage: BlobStorageConfig::default(),
            stream: StreamConfig::default(),
            hub: HubConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Export spans over OTLP.
    pub enable_tracing: bool,
    /// Export blob storage metrics over OTLP.
    pub enable_metrics: bool,
    /// OTLP collector endpoint for traces and metrics; the exporter default is
    /// used when unset.
    pub endpoint: Option<String>,
    pub metrics_interval_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enable_tracing: false,
            enable_metrics: false,
            endpoint: None,
            metrics_interval_secs: 10,
        }
    }
}

impl TelemetryConfig {
    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Pause between two streamed lines. 0 disables pacing.
    pub line_delay_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            line_delay_ms: 1000,
        }
    }
}

impl StreamConfig {
    pub fn line_delay(&self) -> Duration {
        Duration::from_millis(self.line_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub endpoint: String,
    pub revision: String,
    /// Access token for private or gated repositories.
    pub token: Option<String>,
    /// Where downloaded hub files are kept.
    pub cache_dir: PathBuf,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://huggingface.co".to_string(),
            revision: "main".to_string(),
            token: None,
            cache_dir: env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join("dataset_gateway_cache/hub"),
        }
    }
}

impl ServerConfig {
    /// Loads the configuration from an optional YAML file, then the
    /// environment: `DATASET_GATEWAY_*` (with `__` for nesting) and the
    /// `AZURE_CONNECTION_STRING`, `CONTAINER_NAME` and `HF_TOKEN` variables.
    pub fn load(path: Option<&str>) -> Result<ServerConfig> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            let config_str = std::fs::read_to_string(path)?;
            figment = figment.merge(Yaml::string(&config_str));
        }
        Self::from_figment(figment)
    }

    fn from_figment(figment: Figment) -> Result<ServerConfig> {
        let config: ServerConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(
                Env::raw()
                    .only(&["AZURE_CONNECTION_STRING", "CONTAINER_NAME", "HF_TOKEN"])
                    .map(|key| match key.as_str().to_ascii_uppercase().as_str() {
                        "AZURE_CONNECTION_STRING" => "blob_storage.connection_string".into(),
                        "CONTAINER_NAME" => "blob_storage.container".into(),
                        _ => "hub.token".into(),
                    }),
            )
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.parse::<SocketAddr>().is_err() {
            return Err(anyhow::anyhow!(
                "invalid listen address: {}",
                self.listen_addr
            ));
        }
        self.blob_storage.validate()?;
        if url::Url::parse(&self.hub.endpoint).is_err() {
            return Err(anyhow::anyhow!(
                "invalid hub endpoint: {}",
                self.hub.endpoint
            ));
        }
        Ok(())
    }
}
