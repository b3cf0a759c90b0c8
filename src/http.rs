use crate::avatar::{self, AvatarInput, MetadataSource};
use crate::download::{DownloadError, FetchedContent};
use crate::state::AppState;
use crate::storage;
use crate::transform::CropSpec;
use axum::extract::{Multipart, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

const OPENAPI_YAML: &str = include_str!("../openapi.yaml");

const KIND_HEADER: &str = "X-Cardgate-Kind";
const RESULT_HEADER: &str = "X-Cardgate-Result";
const ERROR_HEADER: &str = "X-Cardgate-Error";

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/probe", post(probe))
        .route("/import-url", post(import_url))
        .route("/import-id", post(import_id))
        .route("/edit-avatar", post(edit_avatar))
        .route("/openapi.yaml", get(openapi_yaml))
        .with_state(state)
}

async fn probe() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn openapi_yaml() -> impl IntoResponse {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/yaml"),
    );
    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    (headers, OPENAPI_YAML)
}

#[derive(Debug, Deserialize)]
struct ImportRequest {
    url: Option<String>,
}

async fn import_url(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ImportRequest>,
) -> Result<Response, ApiError> {
    let url = required_url(&request)?;
    let content = state
        .downloader
        .fetch_url(url)
        .await
        .map_err(map_download_error)?;
    Ok(content_response(content))
}

async fn import_id(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ImportRequest>,
) -> Result<Response, ApiError> {
    let handle = required_url(&request)?;
    let content = state
        .downloader
        .fetch_handle(handle)
        .await
        .map_err(map_download_error)?;
    Ok(content_response(content))
}

fn required_url(request: &ImportRequest) -> Result<&str, ApiError> {
    request
        .url
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::bad_request("url is required"))
}

fn content_response(content: FetchedContent) -> Response {
    let is_fallback = content.outcome.is_fallback();
    let file = content.outcome.into_file();
    let mut headers = HeaderMap::new();
    let content_type = HeaderValue::from_str(file.file_type.as_ref())
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    headers.insert(header::CONTENT_TYPE, content_type);
    let disposition = format!("attachment; filename=\"{}\"", file.file_name);
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    headers.insert(KIND_HEADER, HeaderValue::from_static(content.kind.as_str()));
    headers.insert(
        RESULT_HEADER,
        HeaderValue::from_static(if is_fallback { "fallback" } else { "asset" }),
    );
    (StatusCode::OK, headers, file.buffer).into_response()
}

#[derive(Debug, Deserialize)]
struct EditAvatarQuery {
    crop: Option<String>,
}

async fn edit_avatar(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EditAvatarQuery>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let crop = query.crop.as_deref().and_then(parse_crop);

    let mut avatar_name: Option<String> = None;
    let mut metadata: Option<String> = None;
    let mut upload: Option<Bytes> = None;
    while let Some(field) = multipart.next_field().await.map_err(|err| {
        ApiError::bad_request("malformed multipart body").with_log_detail(err.to_string())
    })? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "name" => {
                avatar_name = Some(field.text().await.map_err(|err| {
                    ApiError::bad_request("unreadable name field").with_log_detail(err.to_string())
                })?);
            }
            "metadata" => {
                metadata = Some(field.text().await.map_err(|err| {
                    ApiError::bad_request("unreadable metadata field")
                        .with_log_detail(err.to_string())
                })?);
            }
            "avatar" => {
                upload = Some(field.bytes().await.map_err(|err| {
                    ApiError::bad_request("unreadable avatar file").with_log_detail(err.to_string())
                })?);
            }
            _ => {}
        }
    }

    let avatar_name = avatar_name
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("name is required"))?;
    let upload = upload.ok_or_else(|| ApiError::bad_request("avatar file is required"))?;
    let metadata = metadata
        .filter(|value| !value.is_empty())
        .map(MetadataSource::Supplied)
        .unwrap_or(MetadataSource::FromExisting);

    let staged = storage::stage_upload(&state.config, &upload).await?;
    avatar::replace_avatar(
        &state.config,
        &avatar_name,
        AvatarInput::Upload(staged),
        metadata,
        crop,
    )
    .await?;
    Ok((StatusCode::OK, Json(serde_json::json!({ "avatar": avatar_name }))).into_response())
}

fn parse_crop(raw: &str) -> Option<CropSpec> {
    serde_json::from_str(raw).ok()
}

fn map_download_error(error: anyhow::Error) -> ApiError {
    let detail = error.to_string();
    if let Some(DownloadError::Unmatched) = error.downcast_ref::<DownloadError>() {
        return ApiError::new(StatusCode::NOT_FOUND, "no provider matches the requested source")
            .with_log_detail(detail);
    }
    tracing::warn!(error = ?error, "content download failed");
    ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "content download failed")
        .with_log_detail(detail)
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: Value,
    pub log_detail: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: &str) -> Self {
        Self {
            status,
            body: serde_json::json!({ "error": message }),
            log_detail: None,
        }
    }

    pub fn bad_request(message: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn with_log_detail(mut self, detail: String) -> Self {
        if !detail.is_empty() {
            self.log_detail = Some(detail);
        }
        self
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::warn!(error = ?error, "request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "request failed")
            .with_log_detail(error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Some(detail) = &self.log_detail {
            debug!(status = %self.status, detail, "request error detail");
        }
        let error_message = extract_error_message(&self.body);
        let mut response = (self.status, Json(self.body)).into_response();
        if let Some(message) = error_message {
            let sanitized = sanitize_error_header(&message);
            if let Ok(value) = HeaderValue::from_str(&sanitized) {
                response.headers_mut().insert(ERROR_HEADER, value);
            }
        }
        response
    }
}

fn extract_error_message(body: &Value) -> Option<String> {
    let Value::Object(map) = body else {
        return None;
    };
    map.get("error")
        .and_then(|value| value.as_str())
        .map(|value| value.to_string())
}

fn sanitize_error_header(value: &str) -> String {
    let mut sanitized: String = value
        .chars()
        .filter(|ch| ch.is_ascii() && !ch.is_control())
        .collect();
    sanitized.truncate(200);
    sanitized
}
