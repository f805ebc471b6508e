//! HTTP handlers for photo ingestion, retrieval, update and deletion.
//! Handlers only translate between HTTP and `PhotoService`; every decision
//! about storage lives in the service.

use crate::{
    errors::AppError,
    models::photo::PhotoPayload,
    services::photo_service::{PhotoService, UploadParts},
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State, rejection::QueryRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::Deserialize;

/// Query params accepted by the resize endpoint.
#[derive(Debug, Deserialize)]
pub struct ResizeQuery {
    pub width: u32,
    pub height: u32,
}

/// POST `/photos` — multipart upload with one `metadata` part (JSON) and one
/// `file` part. Other parts are ignored.
pub async fn upload_photo(
    State(service): State<PhotoService>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut parts = UploadParts::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_input(None, format!("Multipart error: {e}")))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("metadata") => parts.metadata.push(read_field(field).await?),
            Some("file") => parts.files.push(read_field(field).await?),
            _ => {}
        }
    }

    let photo = service.ingest(parts).await?;
    Ok((StatusCode::CREATED, Json(photo)))
}

async fn read_field(field: axum::extract::multipart::Field<'_>) -> Result<Bytes, AppError> {
    field
        .bytes()
        .await
        .map_err(|e| AppError::bad_input(None, format!("Failed to read multipart field: {e}")))
}

/// GET `/photos/{key}` — metadata record as JSON.
pub async fn get_photo(
    State(service): State<PhotoService>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let photo = service.fetch_metadata(&key).await?;
    Ok(Json(photo))
}

/// PUT `/photos/{key}` — replace the descriptive fields.
pub async fn update_photo(
    State(service): State<PhotoService>,
    Path(key): Path<String>,
    Json(payload): Json<PhotoPayload>,
) -> Result<impl IntoResponse, AppError> {
    let photo = service.update(&key, payload).await?;
    Ok(Json(photo))
}

/// DELETE `/photos/{key}` — remove record and blob.
pub async fn delete_photo(
    State(service): State<PhotoService>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    service.delete_by_key(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET `/photos/{key}/file` — the stored JPEG.
pub async fn get_photo_file(
    State(service): State<PhotoService>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let data = service.fetch_blob(&key).await?;
    Ok(jpeg_response(data, Some(&key)))
}

/// GET `/photos/{key}/resize?width=&height=` — the stored JPEG scaled to
/// exactly the requested size. Larger-than-source requests are refused.
pub async fn resize_photo(
    State(service): State<PhotoService>,
    Path(key): Path<String>,
    query: Result<Query<ResizeQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    let Query(q) = query.map_err(|e| AppError::bad_input(None, e.body_text()))?;
    let data = service.resize(&key, q.width, q.height).await?;
    Ok(jpeg_response(data, None))
}

fn jpeg_response(data: Bytes, etag: Option<&str>) -> Response {
    let mut response = Response::new(Body::from(data));
    set_jpeg_headers(response.headers_mut(), etag);
    *response.status_mut() = StatusCode::OK;
    response
}

/// Blobs are content addressed, so the key doubles as a strong ETag and the
/// body never changes for a given URL.
fn set_jpeg_headers(headers: &mut HeaderMap, etag: Option<&str>) {
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/jpeg"));
    if let Some(etag) = etag {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", etag)) {
            headers.insert(header::ETAG, value);
        }
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("public, max-age=31536000, immutable"),
        );
    }
}
