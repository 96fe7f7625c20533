//! Byte-range serving.
//!
//! Parses single-range `Range` headers, validates the requested window
//! against the object's size, and serves the window through one of two
//! strategies: a native ranged read when the backend supports it, or a
//! bounded full-read-and-slice fallback when it does not. Both strategies
//! produce byte-identical output; objects above the in-memory bound are
//! streamed whole rather than sliced.

use crate::services::ServiceError;
use crate::store::{BlobStore, ByteStream, GetResult, bytes_stream, collect_stream, join_key};
use std::sync::Arc;
use tracing::warn;

/// A parsed single-range request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSpec {
    /// `bytes=A-B`, both ends inclusive.
    Bounded(u64, u64),
    /// `bytes=A-`, from A to the end.
    From(u64),
    /// `bytes=-N`, the last N bytes.
    Suffix(u64),
}

/// What the caller should send back.
pub enum RangeOutcome {
    /// Whole object, 200.
    Full(GetResult),
    /// A satisfiable window, 206.
    Partial {
        stream: ByteStream,
        start: u64,
        end: u64,
        total_size: u64,
        content_type: Option<String>,
        etag: Option<String>,
    },
    /// Out-of-bounds or inverted window, 416 with the true size.
    NotSatisfiable { total_size: u64 },
}

/// Parse a `Range` header value. Only single ranges are accepted; anything
/// else is malformed input surfaced at the point of detection.
pub fn parse_range(header: &str) -> Option<RangeSpec> {
    let rest = header.trim().strip_prefix("bytes=")?;
    if rest.contains(',') {
        return None;
    }
    let (start, end) = rest.split_once('-')?;
    let (start, end) = (start.trim(), end.trim());
    match (start.is_empty(), end.is_empty()) {
        (true, true) => None,
        (true, false) => end.parse().ok().map(RangeSpec::Suffix),
        (false, true) => start.parse().ok().map(RangeSpec::From),
        (false, false) => {
            let start = start.parse().ok()?;
            let end = end.parse().ok()?;
            Some(RangeSpec::Bounded(start, end))
        }
    }
}

/// Resolve a spec against the object size into an inclusive (start, end)
/// window, or report the window unsatisfiable.
fn resolve_span(spec: RangeSpec, size: u64) -> Result<(u64, u64), ()> {
    if size == 0 {
        return Err(());
    }
    match spec {
        RangeSpec::Bounded(start, end) => {
            if start > end || start >= size || end >= size {
                Err(())
            } else {
                Ok((start, end))
            }
        }
        RangeSpec::From(start) => {
            if start >= size {
                Err(())
            } else {
                Ok((start, size - 1))
            }
        }
        RangeSpec::Suffix(0) => Err(()),
        // a suffix longer than the object covers the whole object
        RangeSpec::Suffix(n) => Ok((size.saturating_sub(n), size - 1)),
    }
}

#[derive(Clone)]
pub struct RangeServer {
    blobs: Arc<dyn BlobStore>,
    max_slice_bytes: u64,
}

impl RangeServer {
    pub fn new(blobs: Arc<dyn BlobStore>, max_slice_bytes: u64) -> Self {
        Self {
            blobs,
            max_slice_bytes,
        }
    }

    /// Serve `key` from `namespace`, honoring an optional Range header.
    pub async fn serve(
        &self,
        namespace: &str,
        key: &str,
        range_header: Option<&str>,
    ) -> Result<RangeOutcome, ServiceError> {
        let full_key = join_key(namespace, key);
        let spec = match range_header {
            None => None,
            Some(header) => Some(parse_range(header).ok_or_else(|| {
                ServiceError::InvalidInput(format!("malformed range header `{}`", header))
            })?),
        };

        if self.blobs.capabilities().supports_range {
            self.serve_native(&full_key, spec).await
        } else {
            self.serve_sliced(&full_key, spec).await
        }
    }

    /// Strategy (a): ask the backend for exactly the requested window.
    async fn serve_native(
        &self,
        key: &str,
        spec: Option<RangeSpec>,
    ) -> Result<RangeOutcome, ServiceError> {
        let head = self.blobs.head(key).await?;
        let Some(spec) = spec else {
            return Ok(RangeOutcome::Full(self.blobs.get(key).await?));
        };
        let Ok((start, end)) = resolve_span(spec, head.size_bytes) else {
            return Ok(RangeOutcome::NotSatisfiable {
                total_size: head.size_bytes,
            });
        };
        let got = self
            .blobs
            .get_range(key, start, end - start + 1)
            .await?;
        Ok(RangeOutcome::Partial {
            stream: got.stream,
            start,
            end,
            total_size: head.size_bytes,
            content_type: head.content_type,
            etag: head.etag,
        })
    }

    /// Strategy (b): read the full object and slice locally, bounded so very
    /// large objects are never buffered.
    async fn serve_sliced(
        &self,
        key: &str,
        spec: Option<RangeSpec>,
    ) -> Result<RangeOutcome, ServiceError> {
        let got = self.blobs.get(key).await?;
        let Some(spec) = spec else {
            return Ok(RangeOutcome::Full(got));
        };
        let Ok((start, end)) = resolve_span(spec, got.size_bytes) else {
            return Ok(RangeOutcome::NotSatisfiable {
                total_size: got.size_bytes,
            });
        };
        if got.size_bytes > self.max_slice_bytes {
            warn!(
                key,
                size = got.size_bytes,
                "object too large to slice in memory, serving full body"
            );
            return Ok(RangeOutcome::Full(got));
        }
        let data = collect_stream(got.stream, self.max_slice_bytes)
            .await
            .map_err(|err| ServiceError::Upstream(err.to_string()))?;
        let slice = data.slice(start as usize..(end + 1) as usize);
        Ok(RangeOutcome::Partial {
            stream: bytes_stream(slice),
            start,
            end,
            total_size: got.size_bytes,
            content_type: got.content_type,
            etag: got.etag,
        })
    }
}
