//! Maps a request to its canonical on-disk cache path

use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::mime::mime_type;
use crate::request::RequestDescriptor;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Cache path and MIME type resolved for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    pub path: PathBuf,
    pub mime: String,
}

/// Resolves requests to cache keys. Pure: never touches the filesystem.
#[derive(Debug, Clone)]
pub struct CacheKeyResolver {
    cache_root: PathBuf,
    accepted_extensions: HashSet<String>,
    accepted_directories: Vec<String>,
}

impl CacheKeyResolver {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            cache_root: config.cache_root.clone(),
            accepted_extensions: config
                .accepted_extensions
                .iter()
                .map(|e| e.to_ascii_lowercase())
                .collect(),
            accepted_directories: config.accepted_directories.clone(),
        }
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Resolve `<cache_root>/<dirname>/<filename>[_<ver>].<extension>`
    pub fn resolve(&self, request: &RequestDescriptor) -> Result<CacheKey> {
        let extension = request
            .extension
            .as_deref()
            .ok_or_else(|| CacheError::BadRequest("extension is missing".to_string()))?;

        let lowered = extension.to_ascii_lowercase();
        if !self.accepted_extensions.contains(&lowered) {
            return Err(CacheError::UnsupportedMediaType(format!(
                "extension '{}' is not accepted",
                extension
            )));
        }
        let mime = mime_type(&lowered);
        if mime.is_empty() {
            return Err(CacheError::UnsupportedMediaType(format!(
                "no MIME type for extension '{}'",
                extension
            )));
        }

        if !self.directory_allowed(&request.dirname) {
            return Err(CacheError::BadRequest(format!(
                "directory '{}' is not allowed",
                request.dirname
            )));
        }

        let mut file_name = request.filename.clone();
        if let Some(ver) = &request.ver {
            file_name.push('_');
            file_name.push_str(ver);
        }
        file_name.push('.');
        file_name.push_str(extension);

        let mut path = self.cache_root.clone();
        for segment in request.dirname.split('/').filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        path.push(file_name);

        Ok(CacheKey {
            path,
            mime: mime.to_string(),
        })
    }

    fn directory_allowed(&self, dirname: &str) -> bool {
        self.accepted_directories.is_empty()
            || self
                .accepted_directories
                .iter()
                .any(|prefix| dirname.starts_with(prefix.as_str()))
    }
}

/// Delete a cache file. Missing files are not an error.
pub async fn purge(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => {
            debug!(path = ?path, "Purged cache entry");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
