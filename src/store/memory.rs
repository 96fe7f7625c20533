//! In-memory blob store.
//!
//! Holds every object as a contiguous `Bytes` value behind an async RwLock.
//! Reports no native range support, so read paths exercise the caller-side
//! slicing fallback. Used for ephemeral deployments and tests.

use super::{
    BlobError, BlobResult, BlobStore, ByteStream, CompletedPart, GetResult, ObjectHead, PartTag,
    PutResult, StoreCapabilities, UploadInfo, bytes_stream, collect_stream, decode_upload_id,
    new_upload_id,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone)]
struct MemObject {
    data: Bytes,
    content_type: Option<String>,
    etag: String,
}

struct MemUpload {
    parts: BTreeMap<u16, (Bytes, String)>,
    started_at: DateTime<Utc>,
}

#[derive(Default)]
struct MemInner {
    objects: HashMap<String, MemObject>,
    uploads: HashMap<String, MemUpload>,
}

#[derive(Clone, Default)]
pub struct MemBlobStore {
    inner: Arc<RwLock<MemInner>>,
}

impl MemBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of live object keys, for tests and diagnostics.
    pub async fn object_keys(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut keys: Vec<String> = inner.objects.keys().cloned().collect();
        keys.sort();
        keys
    }
}

fn hex_md5(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

#[async_trait]
impl BlobStore for MemBlobStore {
    async fn put(
        &self,
        key: &str,
        content_type: Option<&str>,
        stream: ByteStream,
    ) -> BlobResult<PutResult> {
        let data = collect_stream(stream, u64::MAX).await?;
        let etag = hex_md5(&data);
        let size_bytes = data.len() as u64;
        let mut inner = self.inner.write().await;
        inner.objects.insert(
            key.to_string(),
            MemObject {
                data,
                content_type: content_type.map(str::to_string),
                etag: etag.clone(),
            },
        );
        Ok(PutResult { etag, size_bytes })
    }

    async fn get(&self, key: &str) -> BlobResult<GetResult> {
        let inner = self.inner.read().await;
        let obj = inner
            .objects
            .get(key)
            .ok_or_else(|| BlobError::NotFound(key.to_string()))?
            .clone();
        Ok(GetResult {
            size_bytes: obj.data.len() as u64,
            stream: bytes_stream(obj.data),
            content_type: obj.content_type,
            etag: Some(obj.etag),
        })
    }

    async fn get_range(&self, _key: &str, _offset: u64, _length: u64) -> BlobResult<GetResult> {
        Err(BlobError::RangeUnsupported)
    }

    async fn head(&self, key: &str) -> BlobResult<ObjectHead> {
        let inner = self.inner.read().await;
        let obj = inner
            .objects
            .get(key)
            .ok_or_else(|| BlobError::NotFound(key.to_string()))?;
        Ok(ObjectHead {
            size_bytes: obj.data.len() as u64,
            content_type: obj.content_type.clone(),
            etag: Some(obj.etag.clone()),
        })
    }

    async fn delete(&self, key: &str) -> BlobResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| BlobError::NotFound(key.to_string()))
    }

    async fn promote(&self, src_key: &str, dst_key: &str) -> BlobResult<()> {
        let mut inner = self.inner.write().await;
        let obj = inner
            .objects
            .remove(src_key)
            .ok_or_else(|| BlobError::NotFound(src_key.to_string()))?;
        inner.objects.insert(dst_key.to_string(), obj);
        Ok(())
    }

    async fn create_multipart(&self, _key: &str) -> BlobResult<String> {
        let (token, _) = new_upload_id();
        let mut inner = self.inner.write().await;
        inner.uploads.insert(
            token.clone(),
            MemUpload {
                parts: BTreeMap::new(),
                started_at: Utc::now(),
            },
        );
        Ok(token)
    }

    async fn upload_part(
        &self,
        _key: &str,
        upload_id: &str,
        part_number: u16,
        stream: ByteStream,
    ) -> BlobResult<PartTag> {
        decode_upload_id(upload_id)?;
        let data = collect_stream(stream, u64::MAX).await?;
        let etag = hex_md5(&data);
        let mut inner = self.inner.write().await;
        let upload = inner
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| BlobError::UploadNotFound(upload_id.to_string()))?;
        upload.parts.insert(part_number, (data, etag.clone()));
        Ok(PartTag { part_number, etag })
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
        content_type: Option<&str>,
    ) -> BlobResult<PutResult> {
        decode_upload_id(upload_id)?;
        let mut ordered: Vec<CompletedPart> = parts.to_vec();
        ordered.sort_by_key(|p| p.part_number);

        let mut inner = self.inner.write().await;
        let upload = inner
            .uploads
            .get(upload_id)
            .ok_or_else(|| BlobError::UploadNotFound(upload_id.to_string()))?;

        // verify before consuming the session so a failed complete can be
        // retried with corrected parts
        let mut assembled = Vec::new();
        for part in &ordered {
            let (data, etag) = upload.parts.get(&part.part_number).ok_or(
                BlobError::PartMismatch {
                    part_number: part.part_number,
                },
            )?;
            if !etag.eq_ignore_ascii_case(&part.etag) {
                return Err(BlobError::PartMismatch {
                    part_number: part.part_number,
                });
            }
            assembled.extend_from_slice(data);
        }
        inner.uploads.remove(upload_id);

        let etag = hex_md5(&assembled);
        let size_bytes = assembled.len() as u64;
        inner.objects.insert(
            key.to_string(),
            MemObject {
                data: Bytes::from(assembled),
                content_type: content_type.map(str::to_string),
                etag: etag.clone(),
            },
        );
        Ok(PutResult { etag, size_bytes })
    }

    async fn abort_multipart(&self, _key: &str, upload_id: &str) -> BlobResult<()> {
        decode_upload_id(upload_id)?;
        let mut inner = self.inner.write().await;
        inner.uploads.remove(upload_id);
        Ok(())
    }

    async fn list_multipart(&self) -> BlobResult<Vec<UploadInfo>> {
        let inner = self.inner.read().await;
        Ok(inner
            .uploads
            .iter()
            .map(|(token, upload)| UploadInfo {
                upload_id: token.clone(),
                started_at: upload.started_at,
            })
            .collect())
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities {
            supports_range: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip_and_not_found() {
        let store = MemBlobStore::new();
        store
            .put("files/a", Some("text/plain"), bytes_stream(Bytes::from_static(b"abc")))
            .await
            .unwrap();
        let got = store.get("files/a").await.unwrap();
        assert_eq!(got.size_bytes, 3);
        assert_eq!(got.content_type.as_deref(), Some("text/plain"));
        assert!(matches!(
            store.get("files/missing").await,
            Err(BlobError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn native_range_reads_are_unsupported() {
        let store = MemBlobStore::new();
        assert!(!store.capabilities().supports_range);
        assert!(matches!(
            store.get_range("files/a", 0, 1).await,
            Err(BlobError::RangeUnsupported)
        ));
    }

    #[tokio::test]
    async fn multipart_assembles_in_part_order() {
        let store = MemBlobStore::new();
        let id = store.create_multipart("files/m").await.unwrap();
        let t2 = store
            .upload_part("files/m", &id, 2, bytes_stream(Bytes::from_static(b"world")))
            .await
            .unwrap();
        let t1 = store
            .upload_part("files/m", &id, 1, bytes_stream(Bytes::from_static(b"hello ")))
            .await
            .unwrap();
        store
            .complete_multipart(
                "files/m",
                &id,
                &[
                    CompletedPart { part_number: 2, etag: t2.etag },
                    CompletedPart { part_number: 1, etag: t1.etag },
                ],
                None,
            )
            .await
            .unwrap();
        let got = store.get("files/m").await.unwrap();
        let data = collect_stream(got.stream, u64::MAX).await.unwrap();
        assert_eq!(&data[..], b"hello world");
        assert!(store.list_multipart().await.unwrap().is_empty());
    }
}
