//! Derived-variant cache.
//!
//! On the first read of an eligible image at a given compression level, the
//! original is fetched, run through the external transform, and the result is
//! cached under `cache/{level}/{identifier}`. Cache entries are immutable
//! (the original is content-addressed, so a cached variant can never go
//! stale) and are removed only when the original is deleted.
//!
//! Every failure on this path degrades to serving the original. A client
//! asking for a compressed image never sees a hard error because the
//! transform is down.

use crate::models::{file_record::FileRecord, level::CompressionLevel};
use crate::services::transform::ImageTransformer;
use crate::store::{BlobError, BlobStore, bytes_stream, cache_key, collect_stream, file_key};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where a read for `identifier?level=` should be routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Serve the untransformed object.
    Original,
    /// Serve the cached variant at this level.
    Derived(CompressionLevel),
}

#[derive(Clone)]
pub struct DerivedCache {
    blobs: Arc<dyn BlobStore>,
    transformer: Option<Arc<dyn ImageTransformer>>,
    /// Objects above this size always serve the original, uncompressed.
    generate_ceiling_bytes: u64,
}

impl DerivedCache {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        transformer: Option<Arc<dyn ImageTransformer>>,
        generate_ceiling_bytes: u64,
    ) -> Self {
        Self {
            blobs,
            transformer,
            generate_ceiling_bytes,
        }
    }

    /// Resolve a read request to the original or a cached variant,
    /// generating and caching the variant on first demand.
    pub async fn resolve(&self, record: &FileRecord, level: Option<&str>) -> Resolution {
        let Some(raw) = level else {
            return Resolution::Original;
        };
        let Some(level) = CompressionLevel::parse(raw) else {
            debug!(level = raw, "unrecognized compression level, serving original");
            return Resolution::Original;
        };
        if !record.mime_type.starts_with("image/")
            || record.size_bytes < 0
            || record.size_bytes as u64 > self.generate_ceiling_bytes
        {
            return Resolution::Original;
        }

        let variant_key = cache_key(level.as_str(), &record.identifier);
        match self.blobs.head(&variant_key).await {
            Ok(_) => return Resolution::Derived(level),
            Err(BlobError::NotFound(_)) => {}
            Err(err) => {
                warn!(identifier = %record.identifier, %level, "cache lookup failed: {}", err);
                return Resolution::Original;
            }
        }

        let Some(transformer) = &self.transformer else {
            debug!("no transformer configured, serving original");
            return Resolution::Original;
        };

        let original = match self.blobs.get(&file_key(&record.identifier)).await {
            Ok(got) => got,
            Err(err) => {
                warn!(identifier = %record.identifier, "original unavailable for derivation: {}", err);
                return Resolution::Original;
            }
        };
        let data = match collect_stream(original.stream, self.generate_ceiling_bytes).await {
            Ok(data) => data,
            Err(err) => {
                warn!(identifier = %record.identifier, "failed to buffer original: {}", err);
                return Resolution::Original;
            }
        };

        let transformed = match transformer.compress(&data, level).await {
            Ok(result) => result,
            Err(err) => {
                warn!(identifier = %record.identifier, %level, "transform failed, serving original: {}", err);
                return Resolution::Original;
            }
        };

        let size = transformed.bytes.len();
        if let Err(err) = self
            .blobs
            .put(
                &variant_key,
                Some(&transformed.mime_type),
                bytes_stream(transformed.bytes),
            )
            .await
        {
            warn!(identifier = %record.identifier, %level, "failed to cache variant: {}", err);
            return Resolution::Original;
        }
        info!(
            identifier = %record.identifier,
            %level,
            original_size = data.len(),
            derived_size = size,
            "generated derived variant"
        );
        Resolution::Derived(level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::transform::{TransformError, TransformedImage};
    use crate::store::memory::MemBlobStore;
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubTransformer {
        calls: AtomicUsize,
        fail: bool,
    }

    impl StubTransformer {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ImageTransformer for StubTransformer {
        async fn compress(
            &self,
            _bytes: &[u8],
            _level: CompressionLevel,
        ) -> Result<TransformedImage, TransformError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TransformError::Command("stub failure".into()));
            }
            Ok(TransformedImage {
                bytes: Bytes::from_static(b"derived-bytes"),
                mime_type: "image/jpeg".to_string(),
            })
        }
    }

    fn record(identifier: &str, mime: &str, size: i64) -> FileRecord {
        FileRecord {
            identifier: identifier.to_string(),
            title: None,
            description: None,
            mime_type: mime.to_string(),
            size_bytes: size,
            uploaded_at: Utc::now(),
        }
    }

    async fn seeded(data: &[u8], identifier: &str) -> Arc<MemBlobStore> {
        let store = Arc::new(MemBlobStore::new());
        store
            .put(
                &file_key(identifier),
                Some("image/jpeg"),
                bytes_stream(Bytes::copy_from_slice(data)),
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn generates_once_then_serves_the_cache() {
        let store = seeded(b"jpegjpegjpeg", "h.jpg").await;
        let stub = StubTransformer::new(false);
        let cache = DerivedCache::new(store.clone(), Some(stub.clone()), 1024);
        let rec = record("h.jpg", "image/jpeg", 12);

        assert_eq!(
            cache.resolve(&rec, Some("low")).await,
            Resolution::Derived(CompressionLevel::Low)
        );
        assert_eq!(stub.calls(), 1);
        assert!(store.head(&cache_key("low", "h.jpg")).await.is_ok());

        // second request is a cache hit, the transform is not re-invoked
        assert_eq!(
            cache.resolve(&rec, Some("low")).await,
            Resolution::Derived(CompressionLevel::Low)
        );
        assert_eq!(stub.calls(), 1);

        // a different level is its own entry
        assert_eq!(
            cache.resolve(&rec, Some("high")).await,
            Resolution::Derived(CompressionLevel::High)
        );
        assert_eq!(stub.calls(), 2);
    }

    #[tokio::test]
    async fn non_images_never_touch_the_transform() {
        let store = seeded(b"%PDF-1.4", "doc.pdf").await;
        let stub = StubTransformer::new(false);
        let cache = DerivedCache::new(store.clone(), Some(stub.clone()), 1024);
        let rec = record("doc.pdf", "application/pdf", 8);

        assert_eq!(cache.resolve(&rec, Some("low")).await, Resolution::Original);
        assert_eq!(stub.calls(), 0);
        assert!(matches!(
            store.head(&cache_key("low", "doc.pdf")).await,
            Err(BlobError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn oversize_images_always_serve_the_original() {
        let store = seeded(&[0u8; 64], "big.jpg").await;
        let stub = StubTransformer::new(false);
        let cache = DerivedCache::new(store, Some(stub.clone()), 32);
        let rec = record("big.jpg", "image/jpeg", 64);

        for level in ["low", "mid", "high"] {
            assert_eq!(cache.resolve(&rec, Some(level)).await, Resolution::Original);
        }
        assert_eq!(stub.calls(), 0);
    }

    #[tokio::test]
    async fn unrecognized_level_and_no_level_serve_the_original() {
        let store = seeded(b"img", "a.jpg").await;
        let stub = StubTransformer::new(false);
        let cache = DerivedCache::new(store, Some(stub.clone()), 1024);
        let rec = record("a.jpg", "image/jpeg", 3);

        assert_eq!(cache.resolve(&rec, None).await, Resolution::Original);
        assert_eq!(cache.resolve(&rec, Some("ultra")).await, Resolution::Original);
        assert_eq!(stub.calls(), 0);
    }

    #[tokio::test]
    async fn transform_failure_degrades_to_the_original() {
        let store = seeded(b"img", "f.jpg").await;
        let stub = StubTransformer::new(true);
        let cache = DerivedCache::new(store.clone(), Some(stub.clone()), 1024);
        let rec = record("f.jpg", "image/jpeg", 3);

        assert_eq!(cache.resolve(&rec, Some("mid")).await, Resolution::Original);
        assert_eq!(stub.calls(), 1);
        // nothing was cached
        assert!(matches!(
            store.head(&cache_key("mid", "f.jpg")).await,
            Err(BlobError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn absent_transformer_serves_the_original() {
        let store = seeded(b"img", "n.jpg").await;
        let cache = DerivedCache::new(store, None, 1024);
        let rec = record("n.jpg", "image/jpeg", 3);
        assert_eq!(cache.resolve(&rec, Some("low")).await, Resolution::Original);
    }

    #[tokio::test]
    async fn upload_dedup_derive_and_serve_end_to_end() {
        use crate::services::metadata::FileMetadataStore;
        use crate::services::range::{RangeOutcome, RangeServer};
        use crate::services::test_pool;
        use crate::services::upload::UploadService;
        use crate::store::CACHE_PREFIX;

        let blobs = Arc::new(MemBlobStore::new());
        let meta = FileMetadataStore::new(test_pool().await);
        let uploads = UploadService::new(blobs.clone(), meta.clone(), 1024);
        let stub = StubTransformer::new(false);
        let cache = DerivedCache::new(blobs.clone(), Some(stub.clone()), 1024);
        let ranges = RangeServer::new(blobs.clone(), 1024);

        let data = b"fake jpeg content";
        let hash = format!("{:x}", md5::compute(data));

        // upload a.jpg, then identical bytes as b.jpg
        let first = uploads
            .store_stream("a.jpg", Some(&hash), "image/jpeg", bytes_stream(Bytes::from_static(data)))
            .await
            .unwrap();
        assert!(!first.existed());
        let identifier = first.record().identifier.clone();
        assert_eq!(identifier, format!("{}.jpg", hash));

        let second = uploads
            .store_stream("b.jpg", Some(&hash), "image/jpeg", bytes_stream(Bytes::from_static(data)))
            .await
            .unwrap();
        assert!(second.existed());
        assert_eq!(second.record().identifier, identifier);

        // first low-level request generates and caches, second serves the cache
        let record = meta.get(&identifier).await.unwrap().unwrap();
        assert_eq!(
            cache.resolve(&record, Some("low")).await,
            Resolution::Derived(CompressionLevel::Low)
        );
        assert_eq!(stub.calls(), 1);
        assert_eq!(
            cache.resolve(&record, Some("low")).await,
            Resolution::Derived(CompressionLevel::Low)
        );
        assert_eq!(stub.calls(), 1);

        // the cached variant is servable, with the transform's output bytes
        let namespace = format!("{}/{}", CACHE_PREFIX, CompressionLevel::Low);
        match ranges.serve(&namespace, &identifier, None).await.unwrap() {
            RangeOutcome::Full(got) => {
                let body = collect_stream(got.stream, u64::MAX).await.unwrap();
                assert_eq!(body, Bytes::from_static(b"derived-bytes"));
                assert_eq!(got.content_type.as_deref(), Some("image/jpeg"));
            }
            _ => panic!("expected full body for the cached variant"),
        }
    }
}
