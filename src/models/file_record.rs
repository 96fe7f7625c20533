//! Represents a stored file's descriptive metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One record per distinct content identifier.
///
/// Created on the first successful upload of a given content hash, mutated
/// only by title/description edits, destroyed when the object is deleted.
/// A record's lifetime is tied 1:1 to the presence of its blob: the blob is
/// written before the record, and the record is deleted before the blob.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct FileRecord {
    /// Content-hash-derived identifier, e.g. `d41d8c...27e.jpg`.
    pub identifier: String,

    /// Display title; defaults to the original filename on upload.
    pub title: Option<String>,

    /// Free-form description.
    pub description: Option<String>,

    /// Content type (MIME type).
    pub mime_type: String,

    /// Size in bytes.
    pub size_bytes: i64,

    /// Timestamp of the first upload of this content.
    pub uploaded_at: DateTime<Utc>,
}
