//! Freshness decision for cache entries
//!
//! An entry younger than the revalidation interval is served as-is. Older
//! entries are checked against the origin with a HEAD request: if the
//! reported `content-length` is within [`SIZE_SLACK_BYTES`] of the local size
//! the entry is kept and its mtime refreshed, otherwise it is dropped and
//! refetched.
//!
//! Size is a heuristic. Two different files whose sizes differ by less than
//! the slack are indistinguishable from an unchanged file; this imprecision
//! is accepted because the origin is treated as a plain static host without
//! strong validators.

use crate::error::Result;
use crate::origin::OriginMetadata;
use crate::resolver::purge;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tracing::debug;

/// Origin and local sizes closer than this are treated as the same content
pub const SIZE_SLACK_BYTES: u64 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Serve immediately
    Fresh,
    /// Ask the origin before serving
    Revalidate,
    /// Refetch from the origin
    Stale,
}

/// Filesystem state of one cache path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub path: PathBuf,
    pub exists: bool,
    pub last_modified: Option<SystemTime>,
    pub size_bytes: u64,
}

impl CacheEntry {
    /// Read the current state of `path`
    pub async fn inspect(path: &Path) -> Result<Self> {
        match fs::metadata(path).await {
            Ok(meta) if meta.is_file() => Ok(Self {
                path: path.to_path_buf(),
                exists: true,
                last_modified: meta.modified().ok(),
                size_bytes: meta.len(),
            }),
            Ok(_) => Ok(Self::absent(path)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::absent(path)),
            Err(e) => Err(e.into()),
        }
    }

    fn absent(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            exists: false,
            last_modified: None,
            size_bytes: 0,
        }
    }

    /// Time since the last write; zero if the mtime is unknown or in the future
    pub fn age(&self, now: SystemTime) -> Duration {
        self.last_modified
            .and_then(|mtime| now.duration_since(mtime).ok())
            .unwrap_or(Duration::ZERO)
    }
}

/// Decides whether an entry may be served without refetching
#[derive(Debug, Clone, Copy)]
pub struct FreshnessEvaluator {
    revalidate_after: Duration,
}

impl FreshnessEvaluator {
    pub fn new(revalidate_after: Duration) -> Self {
        Self { revalidate_after }
    }

    /// Initial state from the entry's existence and age
    pub fn evaluate(&self, entry: &CacheEntry, now: SystemTime) -> Freshness {
        if !entry.exists {
            Freshness::Stale
        } else if entry.age(now) >= self.revalidate_after {
            Freshness::Revalidate
        } else {
            Freshness::Fresh
        }
    }

    /// Compare local size with the size reported by the origin
    pub fn compare(&self, entry: &CacheEntry, origin: &OriginMetadata) -> Freshness {
        if !entry.exists {
            return Freshness::Stale;
        }
        if origin.content_length().abs_diff(entry.size_bytes) < SIZE_SLACK_BYTES {
            Freshness::Fresh
        } else {
            Freshness::Stale
        }
    }

    /// Resolve a `Revalidate` state using the origin's HEAD metadata.
    ///
    /// A matching entry gets its mtime refreshed; a mismatching one is deleted.
    pub async fn revalidate(&self, entry: &CacheEntry, origin: &OriginMetadata) -> Result<Freshness> {
        let state = self.compare(entry, origin);
        match state {
            Freshness::Fresh => {
                debug!(path = ?entry.path, size = entry.size_bytes, "Entry unchanged at origin, touching");
                touch(&entry.path).await?;
            }
            _ => {
                debug!(
                    path = ?entry.path,
                    local = entry.size_bytes,
                    origin = origin.content_length(),
                    "Entry changed at origin, discarding"
                );
                purge(&entry.path).await?;
            }
        }
        Ok(state)
    }
}

/// Set a file's mtime to now without touching its contents
pub async fn touch(path: &Path) -> Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        std::fs::File::options()
            .write(true)
            .open(&path)?
            .set_modified(SystemTime::now())
    })
    .await
    .map_err(std::io::Error::other)??;
    Ok(())
}
