//! Filesystem blob store.
//!
//! Object payloads live beneath `base/{shard}/{shard}/{key}` where the two
//! shard levels are the first bytes of MD5(key), keeping directory fan-out
//! bounded. Writes stream into a `.tmp-{uuid}` sibling, are fsynced, and then
//! atomically renamed into place; the MD5 digest computed while streaming
//! becomes the object's etag. A small `.meta` sidecar holds the content type
//! and etag so reads do not have to re-hash the payload.
//!
//! Multipart sessions stage parts under `base/.uploads/{session}/part-NNNNN`
//! until completion assembles them, in ascending part order, into a normal
//! object.

use super::{
    BlobError, BlobResult, BlobStore, ByteStream, CompletedPart, GetResult, ObjectHead, PartTag,
    PutResult, StoreCapabilities, UploadInfo, decode_upload_id, new_upload_id,
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use md5::Context;
use serde::{Deserialize, Serialize};
use std::{
    io::{self, ErrorKind, SeekFrom},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

const MAX_KEY_LEN: usize = 1024;
const UPLOADS_DIR: &str = ".uploads";
const ASSEMBLY_CHUNK: usize = 64 * 1024;

#[derive(Debug, Serialize, Deserialize)]
struct SidecarMeta {
    content_type: Option<String>,
    etag: String,
}

#[derive(Clone)]
pub struct FsBlobStore {
    base: PathBuf,
}

impl FsBlobStore {
    /// Create a store rooted at `base`, creating the directory if needed.
    pub fn new(base: impl Into<PathBuf>) -> io::Result<Self> {
        let base = base.into();
        std::fs::create_dir_all(&base)?;
        Ok(Self { base })
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    fn ensure_key_safe(key: &str) -> BlobResult<()> {
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return Err(BlobError::InvalidKey);
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(BlobError::InvalidKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(BlobError::InvalidKey);
        }
        Ok(())
    }

    /// Two-level shard identifiers derived from MD5(key).
    fn shards(key: &str) -> (String, String) {
        let digest = md5::compute(key);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::shards(key);
        let mut path = self.base.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    fn sidecar_path(path: &Path) -> PathBuf {
        let mut os = path.as_os_str().to_owned();
        os.push(".meta");
        PathBuf::from(os)
    }

    fn staging_dir(&self, session: &Uuid) -> PathBuf {
        self.base
            .join(UPLOADS_DIR)
            .join(session.simple().to_string())
    }

    async fn read_sidecar(path: &Path) -> Option<SidecarMeta> {
        let bytes = fs::read(Self::sidecar_path(path)).await.ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    async fn write_sidecar(path: &Path, meta: &SidecarMeta) -> io::Result<()> {
        let bytes = serde_json::to_vec(meta).map_err(io::Error::other)?;
        fs::write(Self::sidecar_path(path), bytes).await
    }

    async fn open_object(&self, key: &str) -> BlobResult<(File, u64, Option<SidecarMeta>)> {
        Self::ensure_key_safe(key)?;
        let path = self.object_path(key);
        let file = File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                BlobError::NotFound(key.to_string())
            } else {
                BlobError::Io(err)
            }
        })?;
        let size = file
            .metadata()
            .await
            .map_err(BlobError::Io)?
            .len();
        let sidecar = Self::read_sidecar(&path).await;
        Ok((file, size, sidecar))
    }

    /// Rename with replace semantics, tolerating backends that report
    /// `AlreadyExists` instead of replacing.
    async fn rename_into_place(tmp: &Path, dst: &Path) -> io::Result<()> {
        match fs::rename(tmp, dst).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                fs::remove_file(dst).await?;
                fs::rename(tmp, dst).await
            }
            Err(err) => Err(err),
        }
    }

    /// Recursively remove empty directories up to the store root.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.base) && current != self.base {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }

    /// Stream `stream` into `dst` via a temp sibling, returning (etag, size).
    async fn write_streamed(dst: &Path, mut stream: ByteStream) -> BlobResult<(String, u64)> {
        let parent = dst
            .parent()
            .ok_or_else(|| BlobError::Io(io::Error::other("object path missing parent")))?
            .to_path_buf();
        fs::create_dir_all(&parent).await?;
        let tmp = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp).await?;

        let mut size: u64 = 0;
        let mut digest = Context::new();
        let result: BlobResult<()> = async {
            while let Some(chunk_res) = stream.next().await {
                let chunk = chunk_res?;
                size += chunk.len() as u64;
                digest.consume(&chunk);
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            file.sync_all().await?;
            Ok(())
        }
        .await;

        if let Err(err) = result {
            let _ = fs::remove_file(&tmp).await;
            return Err(err);
        }
        if let Err(err) = Self::rename_into_place(&tmp, dst).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(BlobError::Io(err));
        }
        Ok((format!("{:x}", digest.compute()), size))
    }

    fn part_path(dir: &Path, part_number: u16) -> PathBuf {
        dir.join(format!("part-{:05}", part_number))
    }

    /// Concatenate staged parts into `tmp`, verifying each part's tag and
    /// hashing the assembled bytes. Returns (etag, size).
    async fn assemble_parts(
        staging: &Path,
        tmp: &Path,
        parts: &[CompletedPart],
    ) -> BlobResult<(String, u64)> {
        let mut out = File::create(tmp).await?;
        let mut whole = Context::new();
        let mut size: u64 = 0;
        let mut buf = vec![0u8; ASSEMBLY_CHUNK];

        for part in parts {
            let path = Self::part_path(staging, part.part_number);
            let mut file = File::open(&path).await.map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    BlobError::PartMismatch {
                        part_number: part.part_number,
                    }
                } else {
                    BlobError::Io(err)
                }
            })?;
            let mut part_digest = Context::new();
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                whole.consume(&buf[..n]);
                part_digest.consume(&buf[..n]);
                out.write_all(&buf[..n]).await?;
                size += n as u64;
            }
            let tag = format!("{:x}", part_digest.compute());
            if !tag.eq_ignore_ascii_case(&part.etag) {
                return Err(BlobError::PartMismatch {
                    part_number: part.part_number,
                });
            }
        }
        out.flush().await?;
        out.sync_all().await?;
        Ok((format!("{:x}", whole.compute()), size))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(
        &self,
        key: &str,
        content_type: Option<&str>,
        stream: ByteStream,
    ) -> BlobResult<PutResult> {
        Self::ensure_key_safe(key)?;
        let path = self.object_path(key);
        let (etag, size_bytes) = Self::write_streamed(&path, stream).await?;

        let meta = SidecarMeta {
            content_type: content_type.map(str::to_string),
            etag: etag.clone(),
        };
        if let Err(err) = Self::write_sidecar(&path, &meta).await {
            let _ = fs::remove_file(&path).await;
            return Err(BlobError::Io(err));
        }
        Ok(PutResult { etag, size_bytes })
    }

    async fn get(&self, key: &str) -> BlobResult<GetResult> {
        let (file, size, sidecar) = self.open_object(key).await?;
        Ok(GetResult {
            stream: Box::pin(ReaderStream::new(file)),
            size_bytes: size,
            content_type: sidecar.as_ref().and_then(|m| m.content_type.clone()),
            etag: sidecar.map(|m| m.etag),
        })
    }

    async fn get_range(&self, key: &str, offset: u64, length: u64) -> BlobResult<GetResult> {
        let (mut file, size, sidecar) = self.open_object(key).await?;
        let offset = offset.min(size);
        let length = length.min(size - offset);
        file.seek(SeekFrom::Start(offset)).await?;
        Ok(GetResult {
            stream: Box::pin(ReaderStream::new(file.take(length))),
            size_bytes: size,
            content_type: sidecar.as_ref().and_then(|m| m.content_type.clone()),
            etag: sidecar.map(|m| m.etag),
        })
    }

    async fn head(&self, key: &str) -> BlobResult<ObjectHead> {
        Self::ensure_key_safe(key)?;
        let path = self.object_path(key);
        let meta = fs::metadata(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                BlobError::NotFound(key.to_string())
            } else {
                BlobError::Io(err)
            }
        })?;
        let sidecar = Self::read_sidecar(&path).await;
        Ok(ObjectHead {
            size_bytes: meta.len(),
            content_type: sidecar.as_ref().and_then(|m| m.content_type.clone()),
            etag: sidecar.map(|m| m.etag),
        })
    }

    async fn delete(&self, key: &str) -> BlobResult<()> {
        Self::ensure_key_safe(key)?;
        let path = self.object_path(key);
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(BlobError::NotFound(key.to_string()));
            }
            Err(err) => return Err(BlobError::Io(err)),
        }
        if let Err(err) = fs::remove_file(Self::sidecar_path(&path)).await {
            if err.kind() != ErrorKind::NotFound {
                debug!("failed to remove sidecar for {}: {}", key, err);
            }
        }
        if let Some(parent) = path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }

    async fn promote(&self, src_key: &str, dst_key: &str) -> BlobResult<()> {
        Self::ensure_key_safe(src_key)?;
        Self::ensure_key_safe(dst_key)?;
        let src = self.object_path(src_key);
        let dst = self.object_path(dst_key);
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).await?;
        }
        match Self::rename_into_place(&src, &dst).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(BlobError::NotFound(src_key.to_string()));
            }
            Err(err) => return Err(BlobError::Io(err)),
        }
        match Self::rename_into_place(&Self::sidecar_path(&src), &Self::sidecar_path(&dst)).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(BlobError::Io(err)),
        }
        if let Some(parent) = src.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }

    async fn create_multipart(&self, key: &str) -> BlobResult<String> {
        Self::ensure_key_safe(key)?;
        let (token, uuid) = new_upload_id();
        fs::create_dir_all(self.staging_dir(&uuid)).await?;
        Ok(token)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u16,
        stream: ByteStream,
    ) -> BlobResult<PartTag> {
        Self::ensure_key_safe(key)?;
        let uuid = decode_upload_id(upload_id)?;
        let staging = self.staging_dir(&uuid);
        if !staging.is_dir() {
            return Err(BlobError::UploadNotFound(upload_id.to_string()));
        }
        let path = Self::part_path(&staging, part_number);
        let (etag, _) = Self::write_streamed(&path, stream).await?;
        Ok(PartTag { part_number, etag })
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
        content_type: Option<&str>,
    ) -> BlobResult<PutResult> {
        Self::ensure_key_safe(key)?;
        let uuid = decode_upload_id(upload_id)?;
        let staging = self.staging_dir(&uuid);
        if !staging.is_dir() {
            return Err(BlobError::UploadNotFound(upload_id.to_string()));
        }

        let mut ordered: Vec<CompletedPart> = parts.to_vec();
        ordered.sort_by_key(|p| p.part_number);
        for pair in ordered.windows(2) {
            if pair[0].part_number == pair[1].part_number {
                return Err(BlobError::PartMismatch {
                    part_number: pair[0].part_number,
                });
            }
        }

        let dst = self.object_path(key);
        let parent = dst
            .parent()
            .ok_or_else(|| BlobError::Io(io::Error::other("object path missing parent")))?
            .to_path_buf();
        fs::create_dir_all(&parent).await?;
        let tmp = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let assembled = Self::assemble_parts(&staging, &tmp, &ordered).await;
        let (etag, size_bytes) = match assembled {
            Ok(done) => done,
            Err(err) => {
                let _ = fs::remove_file(&tmp).await;
                return Err(err);
            }
        };
        if let Err(err) = Self::rename_into_place(&tmp, &dst).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(BlobError::Io(err));
        }

        let meta = SidecarMeta {
            content_type: content_type.map(str::to_string),
            etag: etag.clone(),
        };
        if let Err(err) = Self::write_sidecar(&dst, &meta).await {
            let _ = fs::remove_file(&dst).await;
            return Err(BlobError::Io(err));
        }
        if let Err(err) = fs::remove_dir_all(&staging).await {
            debug!("failed to remove staging dir for {}: {}", upload_id, err);
        }
        Ok(PutResult { etag, size_bytes })
    }

    async fn abort_multipart(&self, _key: &str, upload_id: &str) -> BlobResult<()> {
        let uuid = decode_upload_id(upload_id)?;
        match fs::remove_dir_all(self.staging_dir(&uuid)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("abort of already-discarded session {}", upload_id);
                Ok(())
            }
            Err(err) => Err(BlobError::Io(err)),
        }
    }

    async fn list_multipart(&self) -> BlobResult<Vec<UploadInfo>> {
        let dir = self.base.join(UPLOADS_DIR);
        let mut sessions = Vec::new();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(sessions),
            Err(err) => return Err(BlobError::Io(err)),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Ok(uuid) = Uuid::parse_str(name) else {
                continue;
            };
            let started_at = entry
                .metadata()
                .await
                .ok()
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(Utc::now);
            sessions.push(UploadInfo {
                upload_id: URL_SAFE_NO_PAD.encode(uuid.as_bytes()),
                started_at,
            });
        }
        Ok(sessions)
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities {
            supports_range: true,
        }
    }
}
