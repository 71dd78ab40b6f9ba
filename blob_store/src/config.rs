//! Blob storage configuration.

use serde::{Deserialize, Serialize};

use crate::{BlobError, BlobResult};

/// Configuration for blob storage.
///
/// Either `url` names the storage location directly (`az://container`,
/// `s3://bucket/prefix`, `file:///path`, `memory://`), or `container` names an
/// Azure container reached with `connection_string`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlobStorageConfig {
    #[serde(default)]
    pub url: Option<String>,

    /// Azure container name.
    #[serde(default)]
    pub container: Option<String>,

    /// Azure storage account connection string.
    #[serde(default)]
    pub connection_string: Option<String>,
}

impl BlobStorageConfig {
    pub fn azure(container: &str, connection_string: &str) -> Self {
        Self {
            url: None,
            container: Some(container.to_string()),
            connection_string: Some(connection_string.to_string()),
        }
    }

    pub fn local(path: &str) -> Self {
        Self {
            url: Some(format!("file://{}", path)),
            ..Default::default()
        }
    }

    pub fn in_memory() -> Self {
        Self {
            url: Some("memory://".to_string()),
            ..Default::default()
        }
    }

    /// Storage location URL this configuration resolves to.
    pub fn location(&self) -> BlobResult<String> {
        if let Some(url) = &self.url {
            return Ok(url.clone());
        }
        match &self.container {
            Some(container) if !container.is_empty() => Ok(format!("az://{}", container)),
            _ => Err(BlobError::invalid_config(
                "either blob_storage.url or blob_storage.container must be set",
            )),
        }
    }

    pub fn validate(&self) -> BlobResult<()> {
        let location = self.location()?;
        if self.url.is_none() {
            let connection_string = self.connection_string.as_deref().unwrap_or_default();
            if connection_string.trim().is_empty() {
                return Err(BlobError::invalid_config(
                    "a connection string is required for the Azure container",
                ));
            }
            AzureConnectionString::parse(connection_string)?;
        }
        url::Url::parse(&location)?;
        Ok(())
    }
}

/// Parsed Azure storage connection string
/// (`DefaultEndpointsProtocol=https;AccountName=...;AccountKey=...`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureConnectionString {
    pub account_name: String,
    pub account_key: Option<String>,
    pub sas_token: Option<String>,
    pub blob_endpoint: Option<String>,
    pub use_emulator: bool,
}

const EMULATOR_ACCOUNT: &str = "devstoreaccount1";
const PUBLIC_ENDPOINT_SUFFIX: &str = "core.windows.net";

impl AzureConnectionString {
    pub fn parse(value: &str) -> BlobResult<Self> {
        let mut account_name = None;
        let mut account_key = None;
        let mut sas_token = None;
        let mut blob_endpoint = None;
        let mut protocol = "https".to_string();
        let mut endpoint_suffix = None;
        let mut use_emulator = false;

        for part in value.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            // Account keys are base64 and may end in '=', so split on the first one.
            let (key, val) = part.split_once('=').ok_or_else(|| {
                BlobError::invalid_config(format!("malformed connection string segment: {}", part))
            })?;
            match key.to_ascii_lowercase().as_str() {
                "accountname" => account_name = Some(val.to_string()),
                "accountkey" => account_key = Some(val.to_string()),
                "sharedaccesssignature" => sas_token = Some(val.to_string()),
                "blobendpoint" => blob_endpoint = Some(val.trim_end_matches('/').to_string()),
                "defaultendpointsprotocol" => protocol = val.to_string(),
                "endpointsuffix" => endpoint_suffix = Some(val.to_string()),
                "usedevelopmentstorage" => use_emulator = val.eq_ignore_ascii_case("true"),
                _ => {}
            }
        }

        let account_name = match (account_name, use_emulator) {
            (Some(name), _) => name,
            (None, true) => EMULATOR_ACCOUNT.to_string(),
            (None, false) => {
                return Err(BlobError::invalid_config(
                    "connection string is missing AccountName",
                ))
            }
        };
        if account_key.is_none() && sas_token.is_none() && !use_emulator {
            return Err(BlobError::invalid_config(
                "connection string has neither AccountKey nor SharedAccessSignature",
            ));
        }
        if blob_endpoint.is_none() {
            if let Some(suffix) = endpoint_suffix.filter(|s| s != PUBLIC_ENDPOINT_SUFFIX) {
                blob_endpoint = Some(format!("{}://{}.blob.{}", protocol, account_name, suffix));
            }
        }

        Ok(Self {
            account_name,
            account_key,
            sas_token,
            blob_endpoint,
            use_emulator,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONNECTION_STRING: &str = "DefaultEndpointsProtocol=https;AccountName=datasets;AccountKey=c2VjcmV0a2V5==;EndpointSuffix=core.windows.net";

    #[test]
    fn test_parse_connection_string() {
        let parsed = AzureConnectionString::parse(CONNECTION_STRING).unwrap();
        assert_eq!(parsed.account_name, "datasets");
        assert_eq!(parsed.account_key.as_deref(), Some("c2VjcmV0a2V5=="));
        assert_eq!(parsed.blob_endpoint, None);
        assert!(!parsed.use_emulator);
    }

    #[test]
    fn test_parse_connection_string_with_custom_suffix() {
        let parsed = AzureConnectionString::parse(
            "AccountName=acct;AccountKey=a2V5;EndpointSuffix=core.chinacloudapi.cn",
        )
        .unwrap();
        assert_eq!(
            parsed.blob_endpoint.as_deref(),
            Some("https://acct.blob.core.chinacloudapi.cn")
        );
    }

    #[test]
    fn test_parse_emulator_connection_string() {
        let parsed = AzureConnectionString::parse("UseDevelopmentStorage=true").unwrap();
        assert_eq!(parsed.account_name, EMULATOR_ACCOUNT);
        assert!(parsed.use_emulator);
    }

    #[test]
    fn test_parse_rejects_missing_credentials() {
        let err = AzureConnectionString::parse("AccountName=acct").unwrap_err();
        assert!(matches!(err, BlobError::InvalidConfig { .. }));
        assert!(AzureConnectionString::parse("AccountKey=a2V5").is_err());
        assert!(AzureConnectionString::parse("AccountName").is_err());
    }

    #[test]
    fn test_location() {
        let config = BlobStorageConfig::azure("datasets", CONNECTION_STRING);
        assert_eq!(config.location().unwrap(), "az://datasets");
        config.validate().unwrap();

        let config = BlobStorageConfig::local("/tmp/blobs");
        assert_eq!(config.location().unwrap(), "file:///tmp/blobs");
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_requires_container_and_credentials() {
        assert!(BlobStorageConfig::default().validate().is_err());

        let config = BlobStorageConfig {
            container: Some("datasets".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
