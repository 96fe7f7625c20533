//! Service layer: metadata records, upload coordination, derived-variant
//! caching, range serving, and the external transform boundary.

pub mod derived;
pub mod metadata;
pub mod range;
pub mod transform;
pub mod upload;

use crate::store::{BlobError, BlobStore};
use metadata::FileMetadataStore;
use std::sync::Arc;
use thiserror::Error;

/// Error taxonomy shared by the service layer.
///
/// `NotFound` and `InvalidInput` are declarative outcomes handled at the
/// point of detection; `Upstream` during a transform degrades to serving the
/// original but is fatal to an upload.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("payload exceeds the {limit_bytes} byte limit")]
    Oversize { limit_bytes: u64 },
    #[error("upstream failure: {0}")]
    Upstream(String),
    #[error(transparent)]
    Blob(#[from] BlobError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Shared handler state: one explicitly constructed instance per process,
/// passed to every component that needs it.
#[derive(Clone)]
pub struct AppState {
    pub blobs: Arc<dyn BlobStore>,
    pub meta: FileMetadataStore,
    pub uploads: upload::UploadService,
    pub derived: derived::DerivedCache,
    pub ranges: range::RangeServer,
}

#[cfg(test)]
pub(crate) async fn test_pool() -> Arc<sqlx::SqlitePool> {
    use sqlx::sqlite::SqlitePoolOptions;

    // a single connection keeps every query on the same in-memory database
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    for stmt in include_str!("../../migrations/0001_init.sql")
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        sqlx::query(stmt).execute(&pool).await.expect("migration");
    }
    Arc::new(pool)
}
