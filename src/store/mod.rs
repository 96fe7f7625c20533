//! Blob storage abstraction.
//!
//! A `BlobStore` holds opaque byte objects under string keys, namespaced by
//! logical prefix (`files/` for originals, `cache/{level}/` for derived
//! variants, `tmp/` for staged single-shot uploads). Backends are selected at
//! process startup and accessed through a trait object; the filesystem
//! backend is the durable default, the in-memory backend exists for ephemeral
//! deployments and tests.

pub mod fs;
pub mod memory;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::{io, pin::Pin};
use thiserror::Error;
use uuid::Uuid;

/// Boxed asynchronous byte stream accepted and returned by blob operations.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("invalid object key")]
    InvalidKey,
    #[error("upload session `{0}` not found")]
    UploadNotFound(String),
    #[error("invalid upload session token")]
    InvalidUploadId,
    #[error("part {part_number} is missing or does not match its integrity tag")]
    PartMismatch { part_number: u16 },
    #[error("ranged reads are not supported by this backend")]
    RangeUnsupported,
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type BlobResult<T> = Result<T, BlobError>;

/// Outcome of a committed write.
#[derive(Debug, Clone)]
pub struct PutResult {
    /// Lowercase hex MD5 of the stored bytes, computed while streaming.
    pub etag: String,
    pub size_bytes: u64,
}

/// An opened object ready for streaming out.
pub struct GetResult {
    pub stream: ByteStream,
    pub size_bytes: u64,
    pub content_type: Option<String>,
    pub etag: Option<String>,
}

/// Object metadata without content.
#[derive(Debug, Clone)]
pub struct ObjectHead {
    pub size_bytes: u64,
    pub content_type: Option<String>,
    pub etag: Option<String>,
}

/// Integrity tag returned for one uploaded part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartTag {
    pub part_number: u16,
    pub etag: String,
}

/// Part reference supplied by the caller when completing a session.
#[derive(Debug, Clone)]
pub struct CompletedPart {
    pub part_number: u16,
    pub etag: String,
}

/// A still-open multipart session, as visible to an operator.
#[derive(Debug, Clone, Serialize)]
pub struct UploadInfo {
    pub upload_id: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StoreCapabilities {
    pub supports_range: bool,
}

/// Core blob operations. `NotFound` is a distinguishable outcome, not a
/// failure; callers branch on it for dedup checks and cascade deletes.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stream an object into the store, replacing any previous value.
    async fn put(
        &self,
        key: &str,
        content_type: Option<&str>,
        stream: ByteStream,
    ) -> BlobResult<PutResult>;

    /// Open an object for reading.
    async fn get(&self, key: &str) -> BlobResult<GetResult>;

    /// Open a byte window of an object. Only available when
    /// `capabilities().supports_range`; the returned stream yields at most
    /// `length` bytes starting at `offset` without reading the rest.
    async fn get_range(&self, key: &str, offset: u64, length: u64) -> BlobResult<GetResult>;

    /// Fetch metadata without opening the content.
    async fn head(&self, key: &str) -> BlobResult<ObjectHead>;

    /// Remove an object.
    async fn delete(&self, key: &str) -> BlobResult<()>;

    /// Move a staged object to its final key.
    async fn promote(&self, src_key: &str, dst_key: &str) -> BlobResult<()>;

    /// Open a multipart session targeting `key`. Parts are staged out of band
    /// and nothing is visible under `key` until completion.
    async fn create_multipart(&self, key: &str) -> BlobResult<String>;

    /// Stage one part. Re-uploading the same part number replaces the prior
    /// attempt, which makes caller retries idempotent.
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u16,
        stream: ByteStream,
    ) -> BlobResult<PartTag>;

    /// Assemble the staged parts in ascending part-number order and commit
    /// the result under `key`. Integrity tags are re-verified per part.
    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
        content_type: Option<&str>,
    ) -> BlobResult<PutResult>;

    /// Discard all staged parts. Aborting a session that no longer exists is
    /// not an error.
    async fn abort_multipart(&self, key: &str, upload_id: &str) -> BlobResult<()>;

    /// Enumerate sessions that were neither completed nor aborted, so an
    /// operator can clean up after disconnected clients.
    async fn list_multipart(&self) -> BlobResult<Vec<UploadInfo>>;

    fn capabilities(&self) -> StoreCapabilities;
}

/// Namespace prefix for original uploads.
pub const FILES_PREFIX: &str = "files";
/// Namespace prefix for derived variants; level is appended as a segment.
pub const CACHE_PREFIX: &str = "cache";
/// Namespace prefix for staged single-shot uploads.
pub const TMP_PREFIX: &str = "tmp";

/// Join a namespace prefix and a key, collapsing repeated separators.
pub fn join_key(prefix: &str, key: &str) -> String {
    let joined = format!("{}/{}", prefix.trim_end_matches('/'), key.trim_start_matches('/'));
    let mut out = String::with_capacity(joined.len());
    let mut prev_slash = false;
    for ch in joined.chars() {
        if ch == '/' {
            if !prev_slash {
                out.push(ch);
            }
            prev_slash = true;
        } else {
            out.push(ch);
            prev_slash = false;
        }
    }
    out
}

/// Key of an original object.
pub fn file_key(identifier: &str) -> String {
    join_key(FILES_PREFIX, identifier)
}

/// Key of a cached derived variant.
pub fn cache_key(level: &str, identifier: &str) -> String {
    join_key(&format!("{}/{}", CACHE_PREFIX, level), identifier)
}

/// Fresh staging key for an upload whose identifier is not yet known.
pub fn tmp_key() -> String {
    join_key(TMP_PREFIX, &Uuid::new_v4().simple().to_string())
}

/// Mint an opaque session token. The token is URL-safe and round-trips to the
/// staging UUID via [`decode_upload_id`], so it never exposes storage layout.
pub fn new_upload_id() -> (String, Uuid) {
    let uuid = Uuid::new_v4();
    (URL_SAFE_NO_PAD.encode(uuid.as_bytes()), uuid)
}

/// Decode a session token back to its staging UUID. Rejects anything that is
/// not a token this store minted, which also keeps tokens out of paths.
pub fn decode_upload_id(upload_id: &str) -> BlobResult<Uuid> {
    let bytes = URL_SAFE_NO_PAD
        .decode(upload_id)
        .map_err(|_| BlobError::InvalidUploadId)?;
    Uuid::from_slice(&bytes).map_err(|_| BlobError::InvalidUploadId)
}

/// Drain a stream into memory, failing once `cap` bytes are exceeded. Used by
/// callers that must hold an object fully in memory (derived-variant
/// generation, fallback range slicing) and may never do so unboundedly.
pub async fn collect_stream(mut stream: ByteStream, cap: u64) -> io::Result<Bytes> {
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if buf.len() as u64 + chunk.len() as u64 > cap {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("object exceeds the {} byte in-memory bound", cap),
            ));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(buf))
}

/// Wrap already-materialized bytes as a one-chunk stream.
pub fn bytes_stream(bytes: Bytes) -> ByteStream {
    Box::pin(futures::stream::once(async move { Ok(bytes) }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_collapses_repeated_separators() {
        assert_eq!(join_key("files", "abc.jpg"), "files/abc.jpg");
        assert_eq!(join_key("files/", "/abc.jpg"), "files/abc.jpg");
        assert_eq!(join_key("cache//low", "a//b.png"), "cache/low/a/b.png");
    }

    #[test]
    fn cache_keys_never_collide_with_originals() {
        let id = "d41d8cd98f00b204e9800998ecf8427e.jpg";
        let original = file_key(id);
        let low = cache_key("low", id);
        let high = cache_key("high", id);
        assert_ne!(original, low);
        assert_ne!(low, high);
        assert!(low.starts_with("cache/low/"));
    }

    #[test]
    fn upload_id_round_trips() {
        let (token, uuid) = new_upload_id();
        assert_eq!(decode_upload_id(&token).unwrap(), uuid);
    }

    #[test]
    fn upload_id_rejects_foreign_tokens() {
        assert!(matches!(
            decode_upload_id("../../etc/passwd"),
            Err(BlobError::InvalidUploadId)
        ));
        assert!(matches!(
            decode_upload_id("abc"),
            Err(BlobError::InvalidUploadId)
        ));
    }

    #[tokio::test]
    async fn collect_stream_enforces_cap() {
        let data = Bytes::from(vec![0u8; 64]);
        let ok = collect_stream(bytes_stream(data.clone()), 64).await.unwrap();
        assert_eq!(ok.len(), 64);
        let err = collect_stream(bytes_stream(data), 63).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
