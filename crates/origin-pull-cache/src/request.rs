//! Per-request descriptor, parsed once at the entry point

use crate::error::{CacheError, Result};
use url::form_urlencoded;

/// Everything the cache needs to know about one incoming request.
///
/// Built once by the front end and passed by reference through every stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    /// Path and query as forwarded to the origin
    pub request_uri: String,
    /// Percent-decoded request path
    pub path: String,
    /// Directory part of `path`, always starting with `/`
    pub dirname: String,
    /// Base file name without extension
    pub filename: String,
    pub extension: Option<String>,
    /// Cache-busting version alias (`?ver=`)
    pub ver: Option<String>,
    /// Unconditional refresh (`?force`)
    pub force: bool,
    /// Raw `If-Modified-Since` header value
    pub if_modified_since: Option<String>,
}

/// Remove `prefix` only when it ends on a segment boundary
fn strip_path_prefix<'a>(uri: &'a str, prefix: &str) -> &'a str {
    let prefix = prefix.trim_end_matches('/');
    match uri.strip_prefix(prefix) {
        Some(rest) if rest.is_empty() || rest.starts_with(['/', '?']) => rest,
        _ => uri,
    }
}

impl RequestDescriptor {
    /// Parse a raw request URI (path plus optional query).
    ///
    /// `path_prefix` is stripped first when the front end is mounted below `/`.
    pub fn parse(raw_uri: &str, path_prefix: Option<&str>) -> Result<Self> {
        let uri = match path_prefix {
            Some(prefix) if !prefix.is_empty() => strip_path_prefix(raw_uri, prefix),
            _ => raw_uri,
        };
        let request_uri = if uri.starts_with('/') {
            uri.to_string()
        } else {
            format!("/{}", uri)
        };

        let (raw_path, query) = match request_uri.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (request_uri.as_str(), None),
        };

        let path = urlencoding::decode(raw_path)
            .map_err(|_| CacheError::BadRequest("path is not valid UTF-8".to_string()))?
            .into_owned();

        if path.contains('\0') {
            return Err(CacheError::BadRequest("path contains NUL".to_string()));
        }
        if path.split('/').any(|seg| seg == ".." || seg == ".") {
            return Err(CacheError::BadRequest(
                "path contains relative segments".to_string(),
            ));
        }

        let (dirname, basename) = match path.rsplit_once('/') {
            Some(("", base)) => ("/".to_string(), base),
            Some((dir, base)) => (dir.to_string(), base),
            None => ("/".to_string(), path.as_str()),
        };

        let (filename, extension) = match basename.rsplit_once('.') {
            Some((name, ext)) if !ext.is_empty() => (name.to_string(), Some(ext.to_string())),
            _ => (basename.to_string(), None),
        };

        let mut ver = None;
        let mut force = false;
        if let Some(query) = query {
            for (key, value) in form_urlencoded::parse(query.as_bytes()) {
                match key.as_ref() {
                    "ver" if !value.is_empty() => ver = Some(value.into_owned()),
                    "force" => force = true,
                    _ => {}
                }
            }
        }

        if let Some(v) = &ver {
            if v.contains(|c: char| matches!(c, '/' | '\\' | '\0')) {
                return Err(CacheError::BadRequest(
                    "ver contains path separators".to_string(),
                ));
            }
        }

        Ok(Self {
            request_uri,
            path,
            dirname,
            filename,
            extension,
            ver,
            force,
            if_modified_since: None,
        })
    }

    /// Attach the client's `If-Modified-Since` header
    pub fn with_if_modified_since(mut self, value: Option<String>) -> Self {
        self.if_modified_since = value;
        self
    }
}
