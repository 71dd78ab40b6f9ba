use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::{IntoParams, ToSchema};

use crate::{error::DatasetError, naming::DEFAULT_VERSION};

#[derive(Debug, ToSchema, Serialize)]
pub struct GatewayAPIError {
    #[serde(skip)]
    status_code: StatusCode,
    #[serde(rename = "detail")]
    message: String,
}

impl GatewayAPIError {
    pub fn new(status_code: StatusCode, message: &str) -> Self {
        Self {
            status_code,
            message: message.to_string(),
        }
    }

    pub fn bad_request(message: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn status_code(&self) -> StatusCode {
        self.status_code
    }
}

impl IntoResponse for GatewayAPIError {
    fn into_response(self) -> Response {
        error!("API Error: {} - {}", self.status_code, self.message);
        (self.status_code, Json(self)).into_response()
    }
}

impl From<DatasetError> for GatewayAPIError {
    fn from(e: DatasetError) -> Self {
        let status_code = match &e {
            DatasetError::InvalidFilename { .. } |
            DatasetError::UnsupportedFormat { .. } |
            DatasetError::MalformedInput { .. } => StatusCode::BAD_REQUEST,
            DatasetError::NotFound { .. } => StatusCode::NOT_FOUND,
            DatasetError::RemoteFetchFailed { .. } => StatusCode::BAD_GATEWAY,
            DatasetError::StorageUnavailable { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status_code, &e.to_string())
    }
}

fn default_version() -> String {
    DEFAULT_VERSION.to_string()
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct VersionParams {
    /// Version tag of the dataset, defaults to `1`.
    #[serde(default = "default_version")]
    pub version: String,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FetchParams {
    /// Hub dataset repository, e.g. `fka/awesome-chatgpt-prompts`.
    pub repo_id: String,
    /// File inside the repository.
    pub filename: String,
    #[serde(default = "default_version")]
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DatasetList {
    pub datasets: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DownloadLink {
    pub download_url: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeleteResponse {
    pub message: String,
    pub filename: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UploadResponse {
    pub message: String,
    pub filename: String,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FetchResponse {
    pub message: String,
}
