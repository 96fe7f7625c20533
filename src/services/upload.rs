//! Upload coordination.
//!
//! Owns the path from incoming bytes to a durable (blob, record) pair:
//! identifier derivation, dedup against the metadata store, temp staging,
//! promotion to final keys, the multipart session state machine, and
//! best-effort cleanup of partial state on failure.
//!
//! Write ordering is the consistency invariant: the blob always commits
//! before its record, and the record is always deleted before the blob, so a
//! record never points at missing bytes. The metadata store's uniqueness
//! constraint on `identifier` is the final arbiter when two uploads of
//! identical content race.

use crate::models::file_record::FileRecord;
use crate::models::level::CompressionLevel;
use crate::services::ServiceError;
use crate::services::metadata::{FileMetadataStore, InsertOutcome};
use crate::store::{
    BlobError, BlobStore, ByteStream, CompletedPart, PartTag, UploadInfo, cache_key, file_key,
    tmp_key,
};
use chrono::Utc;
use futures::StreamExt;
use std::{fmt, io, sync::Arc};
use tracing::{debug, error, warn};

pub const MIN_PART_NUMBER: u16 = 1;
pub const MAX_PART_NUMBER: u16 = 10_000;

/// Result of a finished upload. `Existing` means the content was already
/// stored and the caller should reference the prior record.
#[derive(Debug)]
pub enum UploadOutcome {
    Created(FileRecord),
    Existing(FileRecord),
}

impl UploadOutcome {
    pub fn record(&self) -> &FileRecord {
        match self {
            UploadOutcome::Created(record) | UploadOutcome::Existing(record) => record,
        }
    }

    pub fn existed(&self) -> bool {
        matches!(self, UploadOutcome::Existing(_))
    }
}

/// Result of opening a multipart session: either the content already exists
/// and no session is opened, or a session is ready for parts.
#[derive(Debug)]
pub enum MultipartCreate {
    Existing(FileRecord),
    Session { upload_id: String, key: String },
}

/// Completion request, mirroring the wire shape of the complete call.
#[derive(Debug)]
pub struct CompleteRequest {
    pub upload_id: String,
    pub parts: Vec<CompletedPart>,
    pub mime_type: String,
    pub declared_size: u64,
    pub filename: String,
    pub hash: String,
}

#[derive(Clone)]
pub struct UploadService {
    blobs: Arc<dyn BlobStore>,
    meta: FileMetadataStore,
    max_single_bytes: u64,
}

impl UploadService {
    pub fn new(blobs: Arc<dyn BlobStore>, meta: FileMetadataStore, max_single_bytes: u64) -> Self {
        Self {
            blobs,
            meta,
            max_single_bytes,
        }
    }

    pub fn max_single_bytes(&self) -> u64 {
        self.max_single_bytes
    }

    /// Single-shot upload.
    ///
    /// With a declared hash the bytes stream straight to their final key and
    /// the hash is re-verified against the digest the store computed while
    /// writing; the fast path never trusts the caller blindly. Without a
    /// hash the bytes stage under a temp key and the store's own digest
    /// becomes the identifier, avoiding a second read of the payload.
    pub async fn store_stream(
        &self,
        filename: &str,
        declared_hash: Option<&str>,
        content_type: &str,
        stream: ByteStream,
    ) -> Result<UploadOutcome, ServiceError> {
        let guarded = limited(stream, self.max_single_bytes);
        match declared_hash {
            Some(hash) => {
                let hash = validate_hash(hash)?;
                let identifier = object_identifier(filename, &hash);
                if let Some(existing) = self.meta.get(&identifier).await? {
                    debug!(identifier, "dedup hit before any bytes were written");
                    return Ok(UploadOutcome::Existing(existing));
                }
                let key = file_key(&identifier);
                let put = self
                    .blobs
                    .put(&key, Some(content_type), guarded)
                    .await
                    .map_err(|err| self.map_put_error(err))?;
                if put.etag != hash {
                    self.discard(&key).await;
                    return Err(ServiceError::InvalidInput(
                        "declared content hash does not match the uploaded bytes".into(),
                    ));
                }
                self.finalize(identifier, filename, content_type, put.size_bytes, &key)
                    .await
            }
            None => {
                let tmp = tmp_key();
                let put = self
                    .blobs
                    .put(&tmp, Some(content_type), guarded)
                    .await
                    .map_err(|err| self.map_put_error(err))?;
                let identifier = object_identifier(filename, &put.etag);
                if let Some(existing) = self.meta.get(&identifier).await? {
                    debug!(identifier, "staged upload is a duplicate, dropping it");
                    self.discard(&tmp).await;
                    return Ok(UploadOutcome::Existing(existing));
                }
                let key = file_key(&identifier);
                if let Err(err) = self.blobs.promote(&tmp, &key).await {
                    self.discard(&tmp).await;
                    return Err(err.into());
                }
                self.finalize(identifier, filename, content_type, put.size_bytes, &key)
                    .await
            }
        }
    }

    /// Open a multipart session, unless the content already exists.
    pub async fn multipart_create(
        &self,
        filename: &str,
        hash: &str,
    ) -> Result<MultipartCreate, ServiceError> {
        let hash = validate_hash(hash)?;
        let identifier = object_identifier(filename, &hash);
        if let Some(existing) = self.meta.get(&identifier).await? {
            return Ok(MultipartCreate::Existing(existing));
        }
        let upload_id = self.blobs.create_multipart(&file_key(&identifier)).await?;
        Ok(MultipartCreate::Session {
            upload_id,
            key: identifier,
        })
    }

    /// Stage one part. Retrying a part number replaces the prior attempt.
    pub async fn multipart_upload_part(
        &self,
        upload_id: &str,
        key: &str,
        part_number: u16,
        stream: ByteStream,
    ) -> Result<PartTag, ServiceError> {
        if !(MIN_PART_NUMBER..=MAX_PART_NUMBER).contains(&part_number) {
            return Err(ServiceError::InvalidInput(format!(
                "part number must be between {} and {}",
                MIN_PART_NUMBER, MAX_PART_NUMBER
            )));
        }
        let guarded = limited(stream, self.max_single_bytes);
        self.blobs
            .upload_part(&file_key(key), upload_id, part_number, guarded)
            .await
            .map_err(|err| match err {
                BlobError::UploadNotFound(id) => {
                    ServiceError::NotFound(format!("upload session `{}`", id))
                }
                other => self.map_put_error(other),
            })
    }

    /// Commit a session: re-check dedup, assemble the parts, write the
    /// record. Two clients multipart-uploading identical content race here;
    /// the loser's session is aborted and the winner's record returned.
    pub async fn multipart_complete(
        &self,
        request: CompleteRequest,
    ) -> Result<UploadOutcome, ServiceError> {
        let hash = validate_hash(&request.hash)?;
        let identifier = object_identifier(&request.filename, &hash);
        if request.parts.is_empty() {
            return Err(ServiceError::InvalidInput("no parts to commit".into()));
        }
        if request
            .parts
            .iter()
            .any(|p| !(MIN_PART_NUMBER..=MAX_PART_NUMBER).contains(&p.part_number))
        {
            return Err(ServiceError::InvalidInput(format!(
                "part number must be between {} and {}",
                MIN_PART_NUMBER, MAX_PART_NUMBER
            )));
        }

        let key = file_key(&identifier);
        if let Some(existing) = self.meta.get(&identifier).await? {
            debug!(identifier, "duplicate multipart upload, aborting session");
            if let Err(err) = self.blobs.abort_multipart(&key, &request.upload_id).await {
                warn!(
                    upload_id = %request.upload_id,
                    "failed to abort duplicate session: {}", err
                );
            }
            return Ok(UploadOutcome::Existing(existing));
        }

        let put = self
            .blobs
            .complete_multipart(&key, &request.upload_id, &request.parts, Some(&request.mime_type))
            .await
            .map_err(|err| match err {
                BlobError::UploadNotFound(_) => ServiceError::Conflict(
                    "upload session was already completed or aborted".into(),
                ),
                BlobError::PartMismatch { part_number } => ServiceError::InvalidInput(format!(
                    "part {} is missing or does not match its integrity tag",
                    part_number
                )),
                other => other.into(),
            })?;
        if put.size_bytes != request.declared_size {
            debug!(
                identifier,
                declared = request.declared_size,
                actual = put.size_bytes,
                "declared size differs from assembled size, storing actual"
            );
        }

        let record = FileRecord {
            identifier: identifier.clone(),
            title: Some(request.filename.clone()),
            description: Some(String::new()),
            mime_type: request.mime_type.clone(),
            size_bytes: put.size_bytes as i64,
            uploaded_at: Utc::now(),
        };
        match self.meta.create_if_absent(record).await {
            Ok(InsertOutcome::Created(record)) => Ok(UploadOutcome::Created(record)),
            Ok(InsertOutcome::Exists(winner)) => {
                // the assembled blob sits under the winner's key and is shared
                debug!(identifier, "lost dedup race after assembly");
                Ok(UploadOutcome::Existing(winner))
            }
            Err(err) => {
                // assembled object now has no record; this is surfaced for
                // operator reconciliation rather than silently repaired
                error!(
                    identifier,
                    "metadata write failed after multipart assembly: {}", err
                );
                Err(err.into())
            }
        }
    }

    /// Discard a session's staged parts. Idempotent: aborting a session that
    /// was already aborted or completed reports success.
    pub async fn multipart_abort(&self, upload_id: &str, key: &str) -> Result<(), ServiceError> {
        self.blobs
            .abort_multipart(&file_key(key), upload_id)
            .await?;
        Ok(())
    }

    /// Sessions that are still holding staged parts.
    pub async fn sessions(&self) -> Result<Vec<UploadInfo>, ServiceError> {
        Ok(self.blobs.list_multipart().await?)
    }

    /// Delete an object: record first, then the blob, then every cached
    /// derived variant. Cleanup failures past the record delete are logged
    /// and do not fail the call.
    pub async fn remove(&self, identifier: &str) -> Result<(), ServiceError> {
        if !self.meta.delete(identifier).await? {
            return Err(ServiceError::NotFound(format!("file `{}`", identifier)));
        }
        match self.blobs.delete(&file_key(identifier)).await {
            Ok(()) => {}
            Err(BlobError::NotFound(_)) => {
                warn!(identifier, "record existed without a blob");
            }
            Err(err) => warn!(identifier, "failed to delete blob: {}", err),
        }
        for level in CompressionLevel::ALL {
            match self.blobs.delete(&cache_key(level.as_str(), identifier)).await {
                Ok(()) => debug!(identifier, %level, "deleted cached variant"),
                Err(BlobError::NotFound(_)) => {}
                Err(err) => {
                    warn!(identifier, %level, "failed to delete cached variant: {}", err)
                }
            }
        }
        Ok(())
    }

    fn map_put_error(&self, err: BlobError) -> ServiceError {
        match oversize_limit(&err) {
            Some(limit_bytes) => ServiceError::Oversize { limit_bytes },
            None => err.into(),
        }
    }

    /// Write the record for a blob that just committed under `key`.
    async fn finalize(
        &self,
        identifier: String,
        filename: &str,
        content_type: &str,
        size_bytes: u64,
        key: &str,
    ) -> Result<UploadOutcome, ServiceError> {
        let record = FileRecord {
            identifier: identifier.clone(),
            title: Some(filename.to_string()),
            description: Some(String::new()),
            mime_type: content_type.to_string(),
            size_bytes: size_bytes as i64,
            uploaded_at: Utc::now(),
        };
        match self.meta.create_if_absent(record).await {
            Ok(InsertOutcome::Created(record)) => Ok(UploadOutcome::Created(record)),
            Ok(InsertOutcome::Exists(winner)) => {
                // identical bytes, identical key: the blob is the winner's too
                debug!(identifier, "lost dedup race, returning winner's record");
                Ok(UploadOutcome::Existing(winner))
            }
            Err(err) => {
                // an unrecorded object under a final key must not leak
                self.discard(key).await;
                Err(err.into())
            }
        }
    }

    async fn discard(&self, key: &str) {
        if let Err(err) = self.blobs.delete(key).await {
            if !matches!(err, BlobError::NotFound(_)) {
                warn!(key, "failed to clean up staged object: {}", err);
            }
        }
    }
}

/// Validate a client-declared content hash: 32 hex characters, normalized to
/// lowercase.
pub fn validate_hash(hash: &str) -> Result<String, ServiceError> {
    if hash.len() != 32 || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ServiceError::InvalidInput(
            "content hash must be 32 hexadecimal characters".into(),
        ));
    }
    Ok(hash.to_ascii_lowercase())
}

/// Derive the object identifier from the content hash plus the original
/// filename's extension. The extension is advisory (it keeps URLs and
/// content-type sniffing friendly); identity is the hash alone.
pub fn object_identifier(filename: &str, hash: &str) -> String {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| {
            !ext.is_empty() && ext.len() <= 8 && ext.bytes().all(|b| b.is_ascii_alphanumeric())
        });
    match ext {
        Some(ext) => format!("{}.{}", hash, ext),
        None => hash.to_string(),
    }
}

/// Marker error raised when a stream exceeds the configured ceiling.
#[derive(Debug)]
struct PayloadTooLarge {
    limit: u64,
}

impl fmt::Display for PayloadTooLarge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "payload exceeds the {} byte limit", self.limit)
    }
}

impl std::error::Error for PayloadTooLarge {}

/// Enforce the size ceiling while streaming, so oversize uploads abort
/// mid-flight instead of being buffered and rejected afterwards.
fn limited(stream: ByteStream, limit: u64) -> ByteStream {
    let mut total: u64 = 0;
    Box::pin(stream.map(move |chunk| {
        let chunk = chunk?;
        total += chunk.len() as u64;
        if total > limit {
            Err(io::Error::new(
                io::ErrorKind::InvalidData,
                PayloadTooLarge { limit },
            ))
        } else {
            Ok(chunk)
        }
    }))
}

fn oversize_limit(err: &BlobError) -> Option<u64> {
    if let BlobError::Io(io_err) = err {
        io_err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<PayloadTooLarge>())
            .map(|marker| marker.limit)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_pool;
    use crate::store::{bytes_stream, collect_stream, memory::MemBlobStore};
    use bytes::Bytes;

    async fn service() -> (UploadService, Arc<MemBlobStore>, FileMetadataStore) {
        let blobs = Arc::new(MemBlobStore::new());
        let meta = FileMetadataStore::new(test_pool().await);
        let service = UploadService::new(blobs.clone(), meta.clone(), 1024);
        (service, blobs, meta)
    }

    fn md5_hex(data: &[u8]) -> String {
        format!("{:x}", md5::compute(data))
    }

    async fn read_key(blobs: &MemBlobStore, key: &str) -> Bytes {
        let got = blobs.get(key).await.unwrap();
        collect_stream(got.stream, u64::MAX).await.unwrap()
    }

    #[test]
    fn identifier_keeps_a_sanitized_extension() {
        let hash = "d41d8cd98f00b204e9800998ecf8427e";
        assert_eq!(object_identifier("Photo.JPG", hash), format!("{}.jpg", hash));
        assert_eq!(object_identifier("archive.tar.gz", hash), format!("{}.gz", hash));
        assert_eq!(object_identifier("noext", hash), hash);
        assert_eq!(object_identifier("trailing.", hash), hash);
        assert_eq!(object_identifier("weird.häh", hash), hash);
        assert_eq!(object_identifier("long.extension9", hash), hash);
    }

    #[test]
    fn hash_validation_normalizes_and_rejects() {
        let ok = validate_hash("D41D8CD98F00B204E9800998ECF8427E").unwrap();
        assert_eq!(ok, "d41d8cd98f00b204e9800998ecf8427e");
        assert!(validate_hash("abc").is_err());
        assert!(validate_hash("zz1d8cd98f00b204e9800998ecf8427e").is_err());
    }

    #[tokio::test]
    async fn declared_hash_upload_creates_and_dedups() {
        let (service, blobs, meta) = service().await;
        let data = b"hello world";
        let hash = md5_hex(data);

        let first = service
            .store_stream("a.jpg", Some(&hash), "image/jpeg", bytes_stream(Bytes::from_static(data)))
            .await
            .unwrap();
        assert!(!first.existed());
        let identifier = first.record().identifier.clone();
        assert_eq!(identifier, format!("{}.jpg", hash));
        assert_eq!(read_key(&blobs, &file_key(&identifier)).await, Bytes::from_static(data));
        assert!(meta.get(&identifier).await.unwrap().is_some());

        // identical bytes under a different name reference the first record
        let second = service
            .store_stream("b.jpg", Some(&hash), "image/jpeg", bytes_stream(Bytes::from_static(data)))
            .await
            .unwrap();
        assert!(second.existed());
        assert_eq!(second.record().identifier, identifier);
        assert_eq!(blobs.object_keys().await.len(), 1);
    }

    #[tokio::test]
    async fn mismatched_declared_hash_is_rejected_and_cleaned_up() {
        let (service, blobs, _meta) = service().await;
        let wrong = md5_hex(b"other bytes");
        let err = service
            .store_stream("a.bin", Some(&wrong), "application/octet-stream", bytes_stream(Bytes::from_static(b"actual bytes")))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
        assert!(blobs.object_keys().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_hash_upload_adopts_the_store_digest() {
        let (service, blobs, _meta) = service().await;
        let data = b"no hash supplied";
        let outcome = service
            .store_stream("clip.mp4", None, "video/mp4", bytes_stream(Bytes::from_static(data)))
            .await
            .unwrap();
        assert!(!outcome.existed());
        assert_eq!(
            outcome.record().identifier,
            format!("{}.mp4", md5_hex(data))
        );
        // temp staging fully promoted, nothing left behind
        let keys = blobs.object_keys().await;
        assert_eq!(keys.len(), 1);
        assert!(keys[0].starts_with("files/"));

        let again = service
            .store_stream("other-name.mp4", None, "video/mp4", bytes_stream(Bytes::from_static(data)))
            .await
            .unwrap();
        assert!(again.existed());
        assert_eq!(blobs.object_keys().await.len(), 1);
    }

    #[tokio::test]
    async fn oversize_uploads_abort_without_residue() {
        let blobs = Arc::new(MemBlobStore::new());
        let meta = FileMetadataStore::new(test_pool().await);
        let service = UploadService::new(blobs.clone(), meta, 8);

        let err = service
            .store_stream("big.bin", None, "application/octet-stream", bytes_stream(Bytes::from_static(b"nine byte")))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Oversize { limit_bytes: 8 }));
        assert!(blobs.object_keys().await.is_empty());
    }

    #[tokio::test]
    async fn multipart_flow_matches_single_shot_bytes() {
        let (service, blobs, _meta) = service().await;
        let part_a = b"part-a-".to_vec();
        let part_b = b"part-b".to_vec();
        let mut whole = part_a.clone();
        whole.extend_from_slice(&part_b);
        let hash = md5_hex(&whole);

        let created = service.multipart_create("movie.mp4", &hash).await.unwrap();
        let MultipartCreate::Session { upload_id, key } = created else {
            panic!("expected a fresh session");
        };
        assert_eq!(key, format!("{}.mp4", hash));

        // out of order
        let t2 = service
            .multipart_upload_part(&upload_id, &key, 2, bytes_stream(Bytes::from(part_b)))
            .await
            .unwrap();
        let t1 = service
            .multipart_upload_part(&upload_id, &key, 1, bytes_stream(Bytes::from(part_a)))
            .await
            .unwrap();

        let outcome = service
            .multipart_complete(CompleteRequest {
                upload_id,
                parts: vec![
                    CompletedPart { part_number: 2, etag: t2.etag },
                    CompletedPart { part_number: 1, etag: t1.etag },
                ],
                mime_type: "video/mp4".into(),
                declared_size: whole.len() as u64,
                filename: "movie.mp4".into(),
                hash: hash.clone(),
            })
            .await
            .unwrap();
        assert!(!outcome.existed());
        assert_eq!(outcome.record().size_bytes, whole.len() as i64);
        assert_eq!(read_key(&blobs, &file_key(&key)).await, Bytes::from(whole));

        // a fresh create for the same content returns the record, no session
        match service.multipart_create("again.mp4", &hash).await.unwrap() {
            MultipartCreate::Existing(record) => assert_eq!(record.identifier, key),
            MultipartCreate::Session { .. } => panic!("dedup must short-circuit"),
        }
    }

    #[tokio::test]
    async fn complete_loses_race_to_concurrent_identical_upload() {
        let (service, _blobs, meta) = service().await;
        let data = b"racing bytes";
        let hash = md5_hex(data);

        let MultipartCreate::Session { upload_id, key } =
            service.multipart_create("race.bin", &hash).await.unwrap()
        else {
            panic!("expected session");
        };
        let tag = service
            .multipart_upload_part(&upload_id, &key, 1, bytes_stream(Bytes::from_static(data)))
            .await
            .unwrap();

        // another client finishes first
        meta.create_if_absent(FileRecord {
            identifier: key.clone(),
            title: Some("winner.bin".into()),
            description: Some(String::new()),
            mime_type: "application/octet-stream".into(),
            size_bytes: data.len() as i64,
            uploaded_at: Utc::now(),
        })
        .await
        .unwrap();

        let outcome = service
            .multipart_complete(CompleteRequest {
                upload_id,
                parts: vec![CompletedPart { part_number: 1, etag: tag.etag }],
                mime_type: "application/octet-stream".into(),
                declared_size: data.len() as u64,
                filename: "race.bin".into(),
                hash,
            })
            .await
            .unwrap();
        assert!(outcome.existed());
        assert_eq!(outcome.record().title.as_deref(), Some("winner.bin"));
        // the loser's staged parts were released
        assert!(service.sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn abort_leaves_no_object_and_no_record() {
        let (service, blobs, meta) = service().await;
        let hash = md5_hex(b"abandoned");
        let MultipartCreate::Session { upload_id, key } =
            service.multipart_create("gone.bin", &hash).await.unwrap()
        else {
            panic!("expected session");
        };
        service
            .multipart_upload_part(&upload_id, &key, 1, bytes_stream(Bytes::from_static(b"abandoned")))
            .await
            .unwrap();
        assert_eq!(service.sessions().await.unwrap().len(), 1);

        service.multipart_abort(&upload_id, &key).await.unwrap();
        assert!(service.sessions().await.unwrap().is_empty());
        assert!(blobs.object_keys().await.is_empty());
        assert!(meta.get(&key).await.unwrap().is_none());

        // idempotent
        service.multipart_abort(&upload_id, &key).await.unwrap();

        // completing a dead session is a conflict, not a crash
        let err = service
            .multipart_complete(CompleteRequest {
                upload_id,
                parts: vec![CompletedPart { part_number: 1, etag: "00".repeat(16) }],
                mime_type: "application/octet-stream".into(),
                declared_size: 9,
                filename: "gone.bin".into(),
                hash,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn part_numbers_outside_the_domain_are_rejected() {
        let (service, _blobs, _meta) = service().await;
        let hash = md5_hex(b"x");
        let MultipartCreate::Session { upload_id, key } =
            service.multipart_create("p.bin", &hash).await.unwrap()
        else {
            panic!("expected session");
        };
        for bad in [0u16, 10_001] {
            let err = service
                .multipart_upload_part(&upload_id, &key, bad, bytes_stream(Bytes::from_static(b"x")))
                .await
                .unwrap_err();
            assert!(matches!(err, ServiceError::InvalidInput(_)));
        }
    }

    #[tokio::test]
    async fn remove_cascades_to_record_blob_and_variants() {
        let (service, blobs, meta) = service().await;
        let data = b"image bytes";
        let outcome = service
            .store_stream("pic.jpg", None, "image/jpeg", bytes_stream(Bytes::from_static(data)))
            .await
            .unwrap();
        let identifier = outcome.record().identifier.clone();

        // seed cached variants at every level
        for level in CompressionLevel::ALL {
            blobs
                .put(
                    &cache_key(level.as_str(), &identifier),
                    Some("image/jpeg"),
                    bytes_stream(Bytes::from_static(b"variant")),
                )
                .await
                .unwrap();
        }
        assert_eq!(blobs.object_keys().await.len(), 4);

        service.remove(&identifier).await.unwrap();
        assert!(meta.get(&identifier).await.unwrap().is_none());
        assert!(blobs.object_keys().await.is_empty());

        let err = service.remove(&identifier).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }
}
