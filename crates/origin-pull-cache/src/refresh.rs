//! Download-and-replace of a single cache entry
//!
//! Writers for one cache path are serialized by an exclusive lock on a
//! sibling `.lock` file. The body is streamed into a sibling `.part` file and
//! renamed over the canonical path only after it is complete, so readers see
//! either the previous file or the new one.

use crate::error::{CacheError, Result};
use crate::origin::OriginClient;
use crate::postprocess::PostProcessor;
use crate::resolver::purge;
use fs2::FileExt;
use futures::StreamExt;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, warn};

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Path of the lock file guarding `path`
pub fn lock_path(path: &Path) -> PathBuf {
    sibling(path, ".lock")
}

/// Path the body is staged in before the rename
pub fn part_path(path: &Path) -> PathBuf {
    sibling(path, ".part")
}

/// Path recording the origin size of a transformed entry
pub fn size_path(path: &Path) -> PathBuf {
    sibling(path, ".size")
}

async fn record_size(path: &Path, bytes: u64) -> std::io::Result<()> {
    let target = size_path(path);
    let staging = part_path(&target);
    fs::write(&staging, bytes.to_string()).await?;
    if let Err(e) = fs::rename(&staging, &target).await {
        let _ = fs::remove_file(&staging).await;
        return Err(e);
    }
    Ok(())
}

/// Origin size recorded when `path` was transformed, if any
pub async fn recorded_size(path: &Path) -> Option<u64> {
    fs::read_to_string(size_path(path))
        .await
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

/// Held exclusive lock for one cache path, released on drop
#[derive(Debug)]
pub struct RefreshLock {
    file: std::fs::File,
}

impl Drop for RefreshLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(error = %e, "Failed to release refresh lock");
        }
    }
}

/// Try to take the refresh lock for `path` without blocking.
///
/// Fails with [`CacheError::ServiceBusy`] when another refresh holds it.
pub async fn try_lock(path: &Path) -> Result<RefreshLock> {
    let lock = lock_path(path);
    let locked = tokio::task::spawn_blocking(move || -> std::io::Result<Option<RefreshLock>> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(RefreshLock { file })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(e),
        }
    })
    .await
    .map_err(std::io::Error::other)??;

    locked.ok_or_else(|| {
        CacheError::ServiceBusy("cache entry is being refreshed, retry shortly".to_string())
    })
}

async fn create_parent_dir(path: &Path) -> Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o755);
    builder.create(parent).await?;
    Ok(())
}

/// Entry produced by a successful refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshOutcome {
    /// Path now holding the served bytes
    pub path: PathBuf,
    pub mime: String,
    /// Bytes downloaded from the origin
    pub bytes: u64,
    /// Whether a post-processor replaced the downloaded file
    pub transformed: bool,
}

/// Sole writer of cache entry bytes, including post-processed variants
#[derive(Clone)]
pub struct RefreshExecutor {
    origin: Arc<dyn OriginClient>,
    post_processor: Option<Arc<dyn PostProcessor>>,
}

impl RefreshExecutor {
    pub fn new(origin: Arc<dyn OriginClient>) -> Self {
        Self {
            origin,
            post_processor: None,
        }
    }

    pub fn with_post_processor(mut self, post_processor: Arc<dyn PostProcessor>) -> Self {
        self.post_processor = Some(post_processor);
        self
    }

    pub fn post_processor(&self) -> Option<&Arc<dyn PostProcessor>> {
        self.post_processor.as_ref()
    }

    /// Refetch `request_uri` into `path` and run the post-processor on it.
    ///
    /// The work runs on its own task so that dropping the caller (for example
    /// on client disconnect) does not abandon a half-finished write.
    pub async fn refresh(&self, request_uri: &str, path: &Path, mime: &str) -> Result<RefreshOutcome> {
        let executor = self.clone();
        let request_uri = request_uri.to_string();
        let path = path.to_path_buf();
        let mime = mime.to_string();

        tokio::spawn(async move { executor.run(&request_uri, &path, &mime).await })
            .await
            .map_err(|e| CacheError::InternalServerError(format!("refresh task failed: {}", e)))?
    }

    async fn run(&self, request_uri: &str, path: &Path, mime: &str) -> Result<RefreshOutcome> {
        create_parent_dir(path).await?;
        let _lock = try_lock(path).await?;

        let bytes = self.replace(request_uri, path).await?;
        let downloaded = RefreshOutcome {
            path: path.to_path_buf(),
            mime: mime.to_string(),
            bytes,
            transformed: false,
        };

        let Some(post_processor) = &self.post_processor else {
            return Ok(downloaded);
        };

        match post_processor.process(path, mime).await {
            Ok(Some(processed)) => {
                // The variant's own size says nothing about the origin file
                if let Err(e) = record_size(path, bytes).await {
                    warn!(path = ?path, error = %e, "Failed to record origin size");
                }
                if let Err(e) = purge(path).await {
                    warn!(path = ?path, error = %e, "Failed to remove original after transform");
                }
                Ok(RefreshOutcome {
                    path: processed.path,
                    mime: processed.mime,
                    bytes,
                    transformed: true,
                })
            }
            Ok(None) => Ok(downloaded),
            Err(e) => {
                warn!(path = ?path, error = %e, "Post-processing failed, serving original");
                if let Some(variant) = post_processor.variant(path, mime) {
                    for leftover in [variant.path, size_path(path)] {
                        if let Err(e) = purge(&leftover).await {
                            warn!(path = ?leftover, error = %e, "Failed to remove stale variant");
                        }
                    }
                }
                Ok(downloaded)
            }
        }
    }

    /// Stream the origin body into `path` via the staging file
    async fn replace(&self, request_uri: &str, path: &Path) -> Result<u64> {
        let part = part_path(path);
        let result = match self.download(request_uri, &part).await {
            Ok(written) => fs::rename(&part, path)
                .await
                .map(|()| written)
                .map_err(CacheError::from),
            Err(e) => Err(e),
        };

        match result {
            Ok(written) => {
                debug!(path = ?path, bytes = written, "Cache entry refreshed");
                Ok(written)
            }
            Err(e) => {
                error!(path = ?path, error = %e, "Cache refresh failed");
                if let Err(rm) = fs::remove_file(&part).await {
                    if rm.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = ?part, error = %rm, "Failed to remove partial download");
                    }
                }
                Err(e)
            }
        }
    }

    async fn download(&self, request_uri: &str, part: &Path) -> Result<u64> {
        let response = self
            .origin
            .get(request_uri)
            .await
            .map_err(|e| CacheError::InternalServerError(e.to_string()))?;

        let mut file = fs::File::create(part).await?;
        let mut body = response.body;
        let mut written = 0u64;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| CacheError::InternalServerError(e.to_string()))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OriginError;
    use crate::origin::{BodyStream, OriginMetadata, OriginResponse};
    use crate::postprocess::{PostProcessError, ProcessedEntry};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    /// Origin whose GET yields the given chunks, optionally failing afterwards
    struct ScriptedOrigin {
        chunks: Vec<&'static str>,
        fail_after: bool,
    }

    #[async_trait]
    impl OriginClient for ScriptedOrigin {
        async fn head(&self, _request_uri: &str) -> std::result::Result<OriginMetadata, OriginError> {
            Ok(OriginMetadata::default())
        }

        async fn get(&self, _request_uri: &str) -> std::result::Result<OriginResponse, OriginError> {
            let mut items: Vec<std::result::Result<Bytes, OriginError>> = self
                .chunks
                .iter()
                .map(|c| Ok(Bytes::from_static(c.as_bytes())))
                .collect();
            if self.fail_after {
                items.push(Err(OriginError::Other("connection reset".to_string())));
            }
            let body: BodyStream = futures::stream::iter(items).boxed();
            Ok(OriginResponse {
                headers: BTreeMap::new(),
                body,
            })
        }
    }

    fn executor(chunks: Vec<&'static str>, fail_after: bool) -> RefreshExecutor {
        RefreshExecutor::new(Arc::new(ScriptedOrigin { chunks, fail_after }))
    }

    #[test]
    fn test_sibling_paths() {
        let path = Path::new("/c/img/a.png");
        assert_eq!(lock_path(path), PathBuf::from("/c/img/a.png.lock"));
        assert_eq!(part_path(path), PathBuf::from("/c/img/a.png.part"));
        assert_eq!(size_path(path), PathBuf::from("/c/img/a.png.size"));
    }

    #[tokio::test]
    async fn test_refresh_creates_directories_and_writes_body() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("img/deep/a.png");

        let outcome = executor(vec!["ab", "c"], false)
            .refresh("/img/deep/a.png", &path, "image/png")
            .await
            .unwrap();

        assert_eq!(outcome.bytes, 3);
        assert_eq!(outcome.path, path);
        assert!(!outcome.transformed);
        assert_eq!(std::fs::read(&path).unwrap(), b"abc");
        assert!(!part_path(&path).exists());
    }

    #[tokio::test]
    async fn test_failed_download_leaves_no_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.png");

        let err = executor(vec!["partial"], true)
            .refresh("/a.png", &path, "image/png")
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::InternalServerError(_)));
        assert!(err.to_string().contains("connection reset"));
        assert!(!path.exists());
        assert!(!part_path(&path).exists());
    }

    #[tokio::test]
    async fn test_failed_download_keeps_previous_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.png");
        std::fs::write(&path, b"previous complete body").unwrap();

        let result = executor(vec!["new but trunc"], true)
            .refresh("/a.png", &path, "image/png")
            .await;

        assert!(result.is_err());
        assert_eq!(std::fs::read(&path).unwrap(), b"previous complete body");
    }

    #[tokio::test]
    async fn test_lock_contention_is_service_busy() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.png");

        let held = try_lock(&path).await.unwrap();
        let err = executor(vec!["abc"], false)
            .refresh("/a.png", &path, "image/png")
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::ServiceBusy(_)));
        assert!(!path.exists());

        drop(held);
        executor(vec!["abc"], false)
            .refresh("/a.png", &path, "image/png")
            .await
            .unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"abc");
    }

    /// Post-processor that either copies the file to a `.alt` sibling or fails
    struct FakeProcessor {
        fail: bool,
    }

    #[async_trait]
    impl PostProcessor for FakeProcessor {
        fn variant(&self, path: &Path, mime: &str) -> Option<ProcessedEntry> {
            (mime == "image/png").then(|| ProcessedEntry {
                path: sibling(path, ".alt"),
                mime: "image/alt".to_string(),
            })
        }

        async fn process(
            &self,
            path: &Path,
            mime: &str,
        ) -> std::result::Result<Option<ProcessedEntry>, PostProcessError> {
            let Some(variant) = self.variant(path, mime) else {
                return Ok(None);
            };
            if self.fail {
                return Err("encoder exploded".into());
            }
            std::fs::copy(path, &variant.path)?;
            Ok(Some(variant))
        }
    }

    #[tokio::test]
    async fn test_post_processor_replaces_download() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.png");

        let outcome = executor(vec!["abc"], false)
            .with_post_processor(Arc::new(FakeProcessor { fail: false }))
            .refresh("/a.png", &path, "image/png")
            .await
            .unwrap();

        assert!(outcome.transformed);
        assert_eq!(outcome.mime, "image/alt");
        assert_eq!(outcome.path, dir.path().join("a.png.alt"));
        assert!(!path.exists());
        assert_eq!(std::fs::read(&outcome.path).unwrap(), b"abc");
        assert_eq!(recorded_size(&path).await, Some(3));
    }

    #[tokio::test]
    async fn test_transform_survives_unwritable_size_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.png");

        // a directory where the size record belongs cannot be replaced by a file
        std::fs::create_dir_all(size_path(&path)).unwrap();

        let outcome = executor(vec!["abc"], false)
            .with_post_processor(Arc::new(FakeProcessor { fail: false }))
            .refresh("/a.png", &path, "image/png")
            .await
            .unwrap();

        assert!(outcome.transformed);
        assert_eq!(std::fs::read(&outcome.path).unwrap(), b"abc");
        assert_eq!(recorded_size(&path).await, None);
        assert!(!part_path(&size_path(&path)).exists());
    }

    #[tokio::test]
    async fn test_failed_transform_cleanup_does_not_fail_refresh() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.png");

        // the variant path is a directory, so removing it as a file fails
        std::fs::create_dir_all(dir.path().join("a.png.alt")).unwrap();

        let outcome = executor(vec!["abc"], false)
            .with_post_processor(Arc::new(FakeProcessor { fail: true }))
            .refresh("/a.png", &path, "image/png")
            .await
            .unwrap();

        assert!(!outcome.transformed);
        assert_eq!(outcome.path, path);
        assert_eq!(std::fs::read(&path).unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_post_processor_failure_falls_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.png");

        let outcome = executor(vec!["abc"], false)
            .with_post_processor(Arc::new(FakeProcessor { fail: true }))
            .refresh("/a.png", &path, "image/png")
            .await
            .unwrap();

        assert!(!outcome.transformed);
        assert_eq!(outcome.path, path);
        assert_eq!(outcome.mime, "image/png");
        assert_eq!(std::fs::read(&path).unwrap(), b"abc");
        assert_eq!(recorded_size(&path).await, None);
    }

    #[tokio::test]
    async fn test_post_processor_declines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("site.css");

        let outcome = executor(vec!["body{}"], false)
            .with_post_processor(Arc::new(FakeProcessor { fail: false }))
            .refresh("/site.css", &path, "text/css")
            .await
            .unwrap();

        assert!(!outcome.transformed);
        assert_eq!(outcome.path, path);
    }
}
