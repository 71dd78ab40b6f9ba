use std::sync::Arc;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, MatchedPath, Multipart, Path, Query, Request, State},
    http::{header, Method},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json,
    Router,
};
use futures::{StreamExt, TryStreamExt};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::error;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    gateway::{DatasetGateway, DatasetPreview},
    http_objects::{
        DatasetList,
        DeleteResponse,
        DownloadLink,
        FetchParams,
        FetchResponse,
        GatewayAPIError,
        UploadResponse,
        VersionParams,
    },
};

#[derive(OpenApi)]
#[openapi(
        paths(
            list_datasets,
            download_link,
            delete_dataset,
            upload_dataset,
            stream_dataset,
            preview_dataset,
            fetch_dataset,
        ),
        components(
            schemas(
                DatasetList,
                DownloadLink,
                DeleteResponse,
                UploadResponse,
                FetchResponse,
                GatewayAPIError,
            )
        ),
        tags(
            (name = "datasets", description = "Dataset Gateway API")
        )
    )]
struct ApiDoc;

#[derive(Clone)]
pub struct RouteState {
    pub gateway: Arc<DatasetGateway>,
}

pub fn create_routes(route_state: RouteState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        .merge(SwaggerUi::new("/docs/swagger").url("/docs/openapi.json", ApiDoc::openapi()))
        .route("/", get(index))
        .route("/list/", get(list_datasets).with_state(route_state.clone()))
        .route(
            "/download/{filename}",
            get(download_link).with_state(route_state.clone()),
        )
        .route(
            "/delete/{filename}",
            delete(delete_dataset).with_state(route_state.clone()),
        )
        .route(
            "/upload/",
            post(upload_dataset).with_state(route_state.clone()),
        )
        .route(
            "/stream/{filename}",
            get(stream_dataset).with_state(route_state.clone()),
        )
        .route(
            "/preview/{filename}",
            get(preview_dataset).with_state(route_state.clone()),
        )
        .route("/fetch", get(fetch_dataset).with_state(route_state.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request| {
                    let method = req.method();
                    let uri = req.uri();

                    let matched_path = req
                        .extensions()
                        .get::<MatchedPath>()
                        .map(|matched_path| matched_path.as_str());

                    tracing::debug_span!("request", %method, %uri, matched_path)
                })
                .on_failure(()),
        )
        .layer(cors)
        .layer(DefaultBodyLimit::disable())
}

async fn index() -> &'static str {
    "Dataset Gateway"
}

/// List all stored datasets
#[utoipa::path(
    get,
    path = "/list/",
    tag = "datasets",
    responses(
        (status = 200, description = "Keys of all stored datasets", body = DatasetList),
        (status = INTERNAL_SERVER_ERROR, description = "Storage unavailable", body = GatewayAPIError)
    ),
)]
#[tracing::instrument(skip_all)]
async fn list_datasets(
    State(state): State<RouteState>,
) -> Result<Json<DatasetList>, GatewayAPIError> {
    let datasets = state.gateway.list().await?;
    Ok(Json(DatasetList { datasets }))
}

/// Generate a time limited download link for a dataset version
#[utoipa::path(
    get,
    path = "/download/{filename}",
    tag = "datasets",
    params(
        ("filename" = String, Path, description = "Logical dataset filename"),
        VersionParams,
    ),
    responses(
        (status = 200, description = "Download link valid for one hour", body = DownloadLink),
        (status = NOT_FOUND, description = "Dataset version does not exist", body = GatewayAPIError)
    ),
)]
#[tracing::instrument(skip(state))]
async fn download_link(
    Path(filename): Path<String>,
    Query(params): Query<VersionParams>,
    State(state): State<RouteState>,
) -> Result<Json<DownloadLink>, GatewayAPIError> {
    let download_url = state
        .gateway
        .download_link(&filename, &params.version)
        .await?;
    Ok(Json(DownloadLink { download_url }))
}

/// Delete a dataset version
#[utoipa::path(
    delete,
    path = "/delete/{filename}",
    tag = "datasets",
    params(
        ("filename" = String, Path, description = "Logical dataset filename"),
        VersionParams,
    ),
    responses(
        (status = 200, description = "Dataset deleted", body = DeleteResponse),
        (status = NOT_FOUND, description = "Dataset version does not exist", body = GatewayAPIError)
    ),
)]
#[tracing::instrument(skip(state))]
async fn delete_dataset(
    Path(filename): Path<String>,
    Query(params): Query<VersionParams>,
    State(state): State<RouteState>,
) -> Result<Json<DeleteResponse>, GatewayAPIError> {
    let key = state.gateway.delete(&filename, &params.version).await?;
    Ok(Json(DeleteResponse {
        message: "Dataset deleted successfully".to_string(),
        filename: key,
    }))
}

/// Upload a dataset file as a new version
#[utoipa::path(
    post,
    path = "/upload/",
    tag = "datasets",
    params(VersionParams),
    request_body(content_type = "multipart/form-data", description = "Dataset file in the `file` field"),
    responses(
        (status = 200, description = "Dataset stored", body = UploadResponse),
        (status = BAD_REQUEST, description = "Missing file or unsupported format", body = GatewayAPIError)
    ),
)]
#[tracing::instrument(skip(state, files))]
async fn upload_dataset(
    Query(params): Query<VersionParams>,
    State(state): State<RouteState>,
    mut files: Multipart,
) -> Result<Json<UploadResponse>, GatewayAPIError> {
    while let Some(field) = files
        .next_field()
        .await
        .map_err(|e| GatewayAPIError::bad_request(&e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| GatewayAPIError::bad_request("file field has no filename"))?;
        let stream = field.map(|res| res.map_err(|err| anyhow::anyhow!(err)));
        let stored = state
            .gateway
            .upload(&filename, &params.version, stream)
            .await?;
        return Ok(Json(UploadResponse {
            message: "Upload successful".to_string(),
            filename: stored.key,
            version: stored.version,
        }));
    }
    Err(GatewayAPIError::bad_request("file field is required"))
}

/// Stream a dataset version line by line
#[utoipa::path(
    get,
    path = "/stream/{filename}",
    tag = "datasets",
    params(
        ("filename" = String, Path, description = "Logical dataset filename"),
        VersionParams,
    ),
    responses(
        (status = 200, description = "Chunked body, one line per chunk"),
        (status = NOT_FOUND, description = "Dataset version does not exist", body = GatewayAPIError)
    ),
)]
#[tracing::instrument(skip(state))]
async fn stream_dataset(
    Path(filename): Path<String>,
    Query(params): Query<VersionParams>,
    State(state): State<RouteState>,
) -> Result<Response, GatewayAPIError> {
    let stream = state.gateway.stream(&filename, &params.version).await?;
    let key = stream.key;
    let lines = stream
        .lines
        .inspect_err(move |e| error!(%key, "dataset stream aborted: {}", e));
    Ok((
        [(header::CONTENT_TYPE, stream.format.content_type())],
        Body::from_stream(lines),
    )
        .into_response())
}

/// Read a dataset version as structured content
#[utoipa::path(
    get,
    path = "/preview/{filename}",
    tag = "datasets",
    params(
        ("filename" = String, Path, description = "Logical dataset filename"),
        VersionParams,
    ),
    responses(
        (status = 200, description = "Decoded dataset content"),
        (status = BAD_REQUEST, description = "Content does not parse", body = GatewayAPIError),
        (status = NOT_FOUND, description = "Dataset version does not exist", body = GatewayAPIError)
    ),
)]
#[tracing::instrument(skip(state))]
async fn preview_dataset(
    Path(filename): Path<String>,
    Query(params): Query<VersionParams>,
    State(state): State<RouteState>,
) -> Result<Json<DatasetPreview>, GatewayAPIError> {
    let preview = state.gateway.preview(&filename, &params.version).await?;
    Ok(Json(preview))
}

/// Import a dataset file from the hub
#[utoipa::path(
    get,
    path = "/fetch",
    tag = "datasets",
    params(FetchParams),
    responses(
        (status = 200, description = "Dataset imported", body = FetchResponse),
        (status = BAD_GATEWAY, description = "Hub download failed", body = GatewayAPIError)
    ),
)]
#[tracing::instrument(skip(state))]
async fn fetch_dataset(
    Query(params): Query<FetchParams>,
    State(state): State<RouteState>,
) -> Result<Json<FetchResponse>, GatewayAPIError> {
    let stored = state
        .gateway
        .fetch_and_store(&params.repo_id, &params.filename, &params.version)
        .await?;
    Ok(Json(FetchResponse {
        message: format!(
            "Dataset {} fetched and uploaded as {}",
            params.filename, stored.key
        ),
    }))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::to_bytes,
        http::{Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::gateway::tests::{test_gateway, StubHub};

    const BOUNDARY: &str = "dataset-gateway-boundary";

    fn router(hub: StubHub) -> Router {
        let (gateway, _) = test_gateway(hub);
        create_routes(RouteState {
            gateway: Arc::new(gateway),
        })
    }

    fn upload_request(filename: &str, content: &str, version: Option<&str>) -> Request<Body> {
        let body = format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n\
             {content}\r\n\
             --{BOUNDARY}--\r\n"
        );
        let uri = match version {
            Some(version) => format!("/upload/?version={version}"),
            None => "/upload/".to_string(),
        };
        Request::post(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let (status, body) = send(app, request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_upload_list_stream_delete() {
        let app = router(StubHub::new());

        let (status, body) =
            send_json(&app, upload_request("data.csv", "id,name\n1,a\n2,b\n", Some("2"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"message": "Upload successful", "filename": "data_v2.csv", "version": "2"})
        );

        let (status, body) = send_json(&app, get("/list/")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"datasets": ["data_v2.csv"]}));

        let response = app
            .clone()
            .oneshot(get("/stream/data.csv?version=2"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/csv");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), b"id,name\n1,a\n2,b\n");

        let request = Request::delete("/delete/data.csv?version=2")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send_json(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"message": "Dataset deleted successfully", "filename": "data_v2.csv"})
        );

        let request = Request::delete("/delete/data.csv?version=2")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send_json(&app, request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({"detail": "dataset not found: data_v2.csv"}));
    }

    #[tokio::test]
    async fn test_upload_defaults_to_version_one() {
        let app = router(StubHub::new());
        let (status, body) = send_json(&app, upload_request("rows.jsonl", "{\"a\":1}\n", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["filename"], "rows_v1.jsonl");
        assert_eq!(body["version"], "1");
    }

    #[tokio::test]
    async fn test_upload_unsupported_format() {
        let app = router(StubHub::new());
        let (status, body) = send_json(&app, upload_request("notes.txt", "hello", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"]
            .as_str()
            .unwrap()
            .starts_with("unsupported file format 'txt'"));

        let (_, body) = send_json(&app, get("/list/")).await;
        assert_eq!(body, json!({"datasets": []}));
    }

    #[tokio::test]
    async fn test_upload_without_file_field() {
        let app = router(StubHub::new());
        let body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"other\"\r\n\r\nx\r\n--{BOUNDARY}--\r\n"
        );
        let request = Request::post("/upload/")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap();
        let (status, body) = send_json(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"detail": "file field is required"}));
    }

    #[tokio::test]
    async fn test_download_link() {
        let app = router(StubHub::new());

        let (status, _) = send_json(&app, get("/download/data.csv")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        send(&app, upload_request("data.csv", "a\n1\n", None)).await;
        let (status, body) = send_json(&app, get("/download/data.csv")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["download_url"]
            .as_str()
            .unwrap()
            .ends_with("data_v1.csv"));
    }

    #[tokio::test]
    async fn test_stream_content_types() {
        let app = router(StubHub::new());
        send(&app, upload_request("rows.jsonl", "{\"a\":1}\n{\"a\":2}\n", None)).await;
        send(&app, upload_request("doc.json", "{\n\"a\": 1\n}", None)).await;

        let response = app.clone().oneshot(get("/stream/rows.jsonl")).await.unwrap();
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/x-ndjson"
        );
        let response = app.clone().oneshot(get("/stream/doc.json")).await.unwrap();
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), b"{\n\"a\": 1\n}");
    }

    #[tokio::test]
    async fn test_stream_errors() {
        let app = router(StubHub::new());

        let (status, _) = send_json(&app, get("/stream/missing.csv")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send_json(&app, get("/stream/README")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body,
            json!({"detail": "invalid filename 'README': missing extension"})
        );
    }

    #[tokio::test]
    async fn test_preview() {
        let app = router(StubHub::new());
        send(&app, upload_request("data.csv", "a,b\n1,2\n", None)).await;

        let (status, body) = send_json(&app, get("/preview/data.csv")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({
                "filename": "data_v1.csv",
                "type": "csv",
                "columns": ["a", "b"],
                "rows": [{"a": "1", "b": "2"}],
            })
        );
    }

    #[tokio::test]
    async fn test_fetch() {
        let hub = StubHub::new().with_file(
            "fka/awesome-chatgpt-prompts",
            "prompts.csv",
            b"act,prompt\nPoet,write a poem\n",
        );
        let app = router(hub);

        let (status, body) = send_json(
            &app,
            get("/fetch?repo_id=fka/awesome-chatgpt-prompts&filename=prompts.csv&version=4"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"message": "Dataset prompts.csv fetched and uploaded as prompts_v4.csv"})
        );

        let (status, body) = send_json(
            &app,
            get("/fetch?repo_id=fka/awesome-chatgpt-prompts&filename=missing.csv"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["detail"]
            .as_str()
            .unwrap()
            .starts_with("failed to fetch dataset from hub"));
    }

    #[tokio::test]
    async fn test_index_and_openapi() {
        let app = router(StubHub::new());
        let (status, body) = send(&app, get("/")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"Dataset Gateway");

        let (status, body) = send_json(&app, get("/docs/openapi.json")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["paths"]["/upload/"].is_object());
    }
}
