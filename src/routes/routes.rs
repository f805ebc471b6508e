//! Defines routes for photo ingestion and retrieval.
//!
//! ## Structure
//! - `POST   /photos`                    — multipart upload (`metadata` + `file`)
//! - `GET    /photos/{key}`              — metadata record
//! - `PUT    /photos/{key}`              — replace descriptive fields
//! - `DELETE /photos/{key}`              — delete record and blob
//! - `GET    /photos/{key}/file`         — stored JPEG
//! - `GET    /photos/{key}/resize`       — stored JPEG at `?width=&height=`
//!
//! Health endpoints live at the root.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        photo_handlers::{
            delete_photo, get_photo, get_photo_file, resize_photo, update_photo, upload_photo,
        },
    },
    services::photo_service::PhotoService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build the router. The router carries shared state (`PhotoService`) to all
/// handlers; uploads larger than `max_upload_bytes` are rejected before
/// reaching the pipeline.
pub fn routes(max_upload_bytes: usize) -> Router<PhotoService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/photos",
            post(upload_photo).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route(
            "/photos/{key}",
            get(get_photo).put(update_photo).delete(delete_photo),
        )
        .route("/photos/{key}/file", get(get_photo_file))
        .route("/photos/{key}/resize", get(resize_photo))
}
