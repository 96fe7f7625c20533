//! HTTP handlers for file operations.
//!
//! Thin translation layer: request shapes in, service calls, response shapes
//! out. Upload, dedup, derivation, and range logic all live in the service
//! layer; handlers only stream bodies and set headers.

use crate::{
    errors::AppError,
    models::level::CompressionLevel,
    services::{
        AppState, ServiceError,
        derived::Resolution,
        metadata::ListQuery,
        range::RangeOutcome,
        upload::{CompleteRequest, MultipartCreate, UploadOutcome},
    },
    store::{ByteStream, CACHE_PREFIX, CompletedPart, FILES_PREFIX, bytes_stream},
};
use axum::{
    Json,
    body::Body,
    extract::{
        Multipart, Path, Query, State,
        multipart::{Field, MultipartError},
    },
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::io;

#[derive(Debug, Deserialize)]
pub struct MultipartCreateReq {
    pub filename: String,
    pub hash: String,
}

#[derive(Debug, Deserialize)]
pub struct PartQuery {
    pub upload_id: String,
    pub key: String,
    pub part_number: u16,
}

#[derive(Debug, Deserialize)]
pub struct CompletedPartDto {
    #[serde(rename = "partNumber")]
    pub part_number: u16,
    pub etag: String,
}

#[derive(Debug, Deserialize)]
pub struct MultipartCompleteReq {
    pub upload_id: String,
    pub parts: Vec<CompletedPartDto>,
    pub mime_type: String,
    pub size: u64,
    pub filename: String,
    pub hash: String,
}

#[derive(Debug, Deserialize)]
pub struct AbortQuery {
    pub upload_id: String,
    pub key: String,
}

#[derive(Debug, Deserialize)]
pub struct FetchQuery {
    pub level: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FileUpdateReq {
    pub title: Option<String>,
    pub description: Option<String>,
}

/// GET `/api/files` — list records with filter/search/sort/pagination.
pub async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Response, AppError> {
    let files = state.meta.list(&query).await.map_err(ServiceError::from)?;

    let mut body = json!({
        "files": files,
        "count": files.len(),
    });
    if let Some(limit) = query.limit {
        body["pagination"] = json!({
            "limit": limit,
            "offset": query.offset.unwrap_or(0),
            "has_more": files.len() == limit,
        });
    }
    Ok(Json(body).into_response())
}

/// POST `/api/files` — single-shot upload as a multipart form with a `file`
/// field and an optional precomputed `hash` field.
///
/// When the client sends `hash` before `file`, the upload takes the fast
/// path straight to the final key; otherwise the bytes stage under a temp
/// key and the store's digest becomes the identifier.
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let limit = state.uploads.max_single_bytes();
    let mut hash: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(form_error)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("hash") => {
                let value = field.text().await.map_err(form_error)?;
                if !value.is_empty() {
                    hash = Some(value);
                }
            }
            Some("file") => {
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| AppError::new(StatusCode::BAD_REQUEST, "File is required"))?;
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let Some(data) = read_field(field, limit).await? else {
                    return Ok(oversize_response(limit));
                };
                if data.is_empty() {
                    return Err(AppError::new(StatusCode::BAD_REQUEST, "File cannot be empty"));
                }
                let outcome = state
                    .uploads
                    .store_stream(&filename, hash.as_deref(), &content_type, bytes_stream(data))
                    .await?;
                return Ok(upload_response(&outcome));
            }
            _ => {}
        }
    }
    Err(AppError::new(StatusCode::BAD_REQUEST, "File is required"))
}

/// POST `/api/files/multipart/create`
pub async fn multipart_create(
    State(state): State<AppState>,
    Json(req): Json<MultipartCreateReq>,
) -> Result<Response, AppError> {
    match state.uploads.multipart_create(&req.filename, &req.hash).await? {
        MultipartCreate::Existing(record) => Ok(existing_response(record)),
        MultipartCreate::Session { upload_id, key } => Ok(Json(json!({
            "upload_id": upload_id,
            "key": key,
        }))
        .into_response()),
    }
}

/// PUT `/api/files/multipart/upload?upload_id&key&part_number` — the raw
/// request body is one part. Parts may arrive out of order and concurrently.
pub async fn multipart_upload_part(
    State(state): State<AppState>,
    Query(query): Query<PartQuery>,
    body: Body,
) -> Result<Response, AppError> {
    let stream: ByteStream = Box::pin(
        body.into_data_stream()
            .map(|chunk| chunk.map_err(io::Error::other)),
    );
    let tag = state
        .uploads
        .multipart_upload_part(&query.upload_id, &query.key, query.part_number, stream)
        .await?;
    Ok(Json(json!({
        "partNumber": tag.part_number,
        "etag": tag.etag,
    }))
    .into_response())
}

/// POST `/api/files/multipart/complete`
pub async fn multipart_complete(
    State(state): State<AppState>,
    Json(req): Json<MultipartCompleteReq>,
) -> Result<Response, AppError> {
    let outcome = state
        .uploads
        .multipart_complete(CompleteRequest {
            upload_id: req.upload_id,
            parts: req
                .parts
                .into_iter()
                .map(|p| CompletedPart {
                    part_number: p.part_number,
                    etag: p.etag,
                })
                .collect(),
            mime_type: req.mime_type,
            declared_size: req.size,
            filename: req.filename,
            hash: req.hash,
        })
        .await?;
    Ok(upload_response(&outcome))
}

/// DELETE `/api/files/multipart/abort?upload_id&key`
pub async fn multipart_abort(
    State(state): State<AppState>,
    Query(query): Query<AbortQuery>,
) -> Result<Response, AppError> {
    state
        .uploads
        .multipart_abort(&query.upload_id, &query.key)
        .await?;
    Ok(Json(json!({ "message": "Multipart upload aborted successfully" })).into_response())
}

/// GET `/api/files/multipart/sessions` — operator view of sessions that were
/// never completed or aborted.
pub async fn multipart_sessions(State(state): State<AppState>) -> Result<Response, AppError> {
    let sessions = state.uploads.sessions().await?;
    Ok(Json(json!({ "sessions": sessions })).into_response())
}

/// GET `/files/{identifier}?level=` — resolve through the derived cache and
/// redirect to the raw serving path for the original or the cached variant.
pub async fn fetch_file(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
    Query(query): Query<FetchQuery>,
) -> Result<Response, AppError> {
    let record = state
        .meta
        .get(&identifier)
        .await
        .map_err(ServiceError::from)?
        .ok_or_else(|| AppError::not_found(format!("file `{}` not found", identifier)))?;

    let location = match state.derived.resolve(&record, query.level.as_deref()).await {
        Resolution::Original => format!("/raw/{}/{}", FILES_PREFIX, identifier),
        Resolution::Derived(level) => format!("/raw/{}/{}/{}", CACHE_PREFIX, level, identifier),
    };
    redirect(&location)
}

/// GET `/raw/files/{identifier}` — byte serving with Range support.
pub async fn raw_original(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let range = range_header(&headers);
    let outcome = state.ranges.serve(FILES_PREFIX, &identifier, range).await?;
    Ok(range_response(outcome))
}

/// GET `/raw/cache/{level}/{identifier}` — cached-variant byte serving.
pub async fn raw_cached(
    State(state): State<AppState>,
    Path((level, identifier)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let Some(level) = CompressionLevel::parse(&level) else {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "Invalid compression level",
        ));
    };
    let namespace = format!("{}/{}", CACHE_PREFIX, level);
    let range = range_header(&headers);
    let outcome = state.ranges.serve(&namespace, &identifier, range).await?;
    Ok(range_response(outcome))
}

/// PUT `/api/files/{identifier}` — edit title/description.
pub async fn update_file(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
    Json(req): Json<FileUpdateReq>,
) -> Result<Response, AppError> {
    let updated = state
        .meta
        .update_info(&identifier, req.title, req.description)
        .await
        .map_err(ServiceError::from)?
        .ok_or_else(|| AppError::not_found(format!("file `{}` not found", identifier)))?;
    Ok(Json(json!({
        "message": "File information updated successfully",
        "info": updated,
    }))
    .into_response())
}

/// DELETE `/api/files/{identifier}` — record, blob, and all cached variants.
pub async fn delete_file(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Result<Response, AppError> {
    state.uploads.remove(&identifier).await?;
    Ok(Json(json!({ "message": "File deleted successfully" })).into_response())
}

fn form_error(err: MultipartError) -> AppError {
    AppError::new(
        StatusCode::BAD_REQUEST,
        format!("invalid form data: {}", err),
    )
}

/// Collect an upload field, bounded by the single-shot ceiling. `None` means
/// the field exceeded the ceiling.
async fn read_field(mut field: Field<'_>, limit: u64) -> Result<Option<Bytes>, AppError> {
    let mut buf = Vec::new();
    while let Some(chunk) = field.chunk().await.map_err(form_error)? {
        if buf.len() as u64 + chunk.len() as u64 > limit {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(Some(Bytes::from(buf)))
}

fn oversize_response(limit: u64) -> Response {
    (
        StatusCode::PAYLOAD_TOO_LARGE,
        Json(json!({
            "error": format!("File too large. Maximum size is {}MB", limit / 1024 / 1024),
            "use_multipart": true,
        })),
    )
        .into_response()
}

fn upload_response(outcome: &UploadOutcome) -> Response {
    let record = outcome.record();
    if outcome.existed() {
        existing_response(record.clone())
    } else {
        Json(json!({
            "message": "File uploaded successfully",
            "exists": false,
            "url": format!("/files/{}", record.identifier),
            "metadata": record,
        }))
        .into_response()
    }
}

fn existing_response(record: crate::models::file_record::FileRecord) -> Response {
    Json(json!({
        "message": "File already exists",
        "exists": true,
        "url": format!("/files/{}", record.identifier),
        "metadata": record,
    }))
    .into_response()
}

fn range_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::RANGE).and_then(|v| v.to_str().ok())
}

fn redirect(location: &str) -> Result<Response, AppError> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::FOUND;
    response.headers_mut().insert(
        header::LOCATION,
        HeaderValue::from_str(location)
            .map_err(|_| AppError::internal("invalid redirect target"))?,
    );
    Ok(response)
}

fn range_response(outcome: RangeOutcome) -> Response {
    match outcome {
        RangeOutcome::Full(got) => {
            let mut response = Response::new(Body::from_stream(got.stream));
            *response.status_mut() = StatusCode::OK;
            set_body_headers(
                response.headers_mut(),
                got.content_type.as_deref(),
                got.etag.as_deref(),
                got.size_bytes,
            );
            response
        }
        RangeOutcome::Partial {
            stream,
            start,
            end,
            total_size,
            content_type,
            etag,
        } => {
            let mut response = Response::new(Body::from_stream(stream));
            *response.status_mut() = StatusCode::PARTIAL_CONTENT;
            set_body_headers(
                response.headers_mut(),
                content_type.as_deref(),
                etag.as_deref(),
                end - start + 1,
            );
            if let Ok(value) =
                HeaderValue::from_str(&format!("bytes {}-{}/{}", start, end, total_size))
            {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
            response
        }
        RangeOutcome::NotSatisfiable { total_size } => {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
            if let Ok(value) = HeaderValue::from_str(&format!("bytes */{}", total_size)) {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
            response
        }
    }
}

fn set_body_headers(
    headers: &mut HeaderMap,
    content_type: Option<&str>,
    etag: Option<&str>,
    content_length: u64,
) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type.unwrap_or("application/octet-stream"))
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&content_length.to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Some(etag) = etag {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", etag)) {
            headers.insert(header::ETAG, value);
        }
    }
}
