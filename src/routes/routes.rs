//! Defines routes for all file, multipart-upload, and serving operations.
//!
//! ## Structure
//! - **Record endpoints**
//!   - `GET    /api/files` — list records (filter, search, sort, paginate)
//!   - `POST   /api/files` — single-shot upload (multipart form)
//!   - `PUT    /api/files/{identifier}` — edit title/description
//!   - `DELETE /api/files/{identifier}` — delete record, blob, and variants
//!
//! - **Multipart-upload endpoints**
//!   - `POST   /api/files/multipart/create`
//!   - `PUT    /api/files/multipart/upload?upload_id&key&part_number`
//!   - `POST   /api/files/multipart/complete`
//!   - `DELETE /api/files/multipart/abort?upload_id&key`
//!   - `GET    /api/files/multipart/sessions` — stale-session view
//!
//! - **Serving endpoints**
//!   - `GET /files/{identifier}?level=` — resolve and redirect
//!   - `GET /raw/files/{identifier}` — original bytes, Range-aware
//!   - `GET /raw/cache/{level}/{identifier}` — cached variant bytes

use crate::{
    handlers::{
        file_handlers::{
            delete_file, fetch_file, list_files, multipart_abort, multipart_complete,
            multipart_create, multipart_sessions, multipart_upload_part, raw_cached, raw_original,
            update_file, upload_file,
        },
        health_handlers::{healthz, readyz},
    },
    services::AppState,
};
use axum::{
    Router,
    routing::{delete, get, post, put},
};

/// Build and return the router for every endpoint.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // record endpoints
        .route("/api/files", get(list_files).post(upload_file))
        .route(
            "/api/files/{identifier}",
            put(update_file).delete(delete_file),
        )
        // multipart-upload endpoints
        .route("/api/files/multipart/create", post(multipart_create))
        .route("/api/files/multipart/upload", put(multipart_upload_part))
        .route("/api/files/multipart/complete", post(multipart_complete))
        .route("/api/files/multipart/abort", delete(multipart_abort))
        .route("/api/files/multipart/sessions", get(multipart_sessions))
        // serving endpoints
        .route("/files/{identifier}", get(fetch_file))
        .route("/raw/files/{identifier}", get(raw_original))
        .route("/raw/cache/{level}/{identifier}", get(raw_cached))
}
