//! Builds the client-facing response for a resolved cache entry

use crate::error::Result;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs::File;
use tracing::warn;

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// How the entry was obtained, reported in `X-Cache`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served without contacting the origin
    Hit,
    /// Confirmed unchanged by a HEAD request
    Revalidated,
    /// Downloaded for this request
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Revalidated => "REVALIDATED",
            CacheStatus::Miss => "MISS",
        }
    }
}

/// Response body handed to the front end
#[derive(Debug)]
pub enum ResponseBody {
    Empty,
    /// Open cache file to be streamed in full
    File { file: File, len: u64 },
}

/// Framework-agnostic response produced by the cache
#[derive(Debug)]
pub struct ServedResponse {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: ResponseBody,
    pub cache_status: CacheStatus,
}

impl ServedResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Format a timestamp as an HTTP date (IMF-fixdate)
pub fn format_http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).format(HTTP_DATE_FORMAT).to_string()
}

/// Parse an HTTP date; `None` if it cannot be understood
pub fn parse_http_date(value: &str) -> Option<SystemTime> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(SystemTime::from)
}

fn unix_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// True when the client's copy is at least as new as `last_modified`
pub fn is_not_modified(if_modified_since: Option<&str>, last_modified: SystemTime) -> bool {
    if_modified_since
        .and_then(parse_http_date)
        .map(|since| unix_secs(since) >= unix_secs(last_modified))
        .unwrap_or(false)
}

/// Emits either a 304 or a full response with caching headers
#[derive(Debug, Clone, Copy)]
pub struct ResponseAssembler {
    client_max_age: Duration,
}

impl ResponseAssembler {
    pub fn new(client_max_age: Duration) -> Self {
        Self { client_max_age }
    }

    fn cache_control(&self) -> String {
        format!("public, max-age={}", self.client_max_age.as_secs())
    }

    /// Assemble the response for the entry at `path`.
    ///
    /// `last_modified` overrides the file's mtime (used when a revalidation
    /// touched the file without changing its content). A 304 is only possible
    /// for entries that were not downloaded by this request.
    pub async fn assemble(
        &self,
        path: &Path,
        mime: &str,
        last_modified: Option<SystemTime>,
        cache_status: CacheStatus,
        if_modified_since: Option<&str>,
        now: SystemTime,
    ) -> Result<ServedResponse> {
        if cache_status != CacheStatus::Miss {
            if let Some(lm) = last_modified {
                if is_not_modified(if_modified_since, lm) {
                    return Ok(self.not_modified(lm, cache_status));
                }
            }
        }

        let file = match File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = ?path, "Cache entry vanished before it could be served");
                return Ok(Self::placeholder(cache_status));
            }
            Err(e) => return Err(e.into()),
        };
        let meta = file.metadata().await?;
        let modified = last_modified
            .or_else(|| meta.modified().ok())
            .unwrap_or(now);

        let headers = vec![
            ("pragma", "public".to_string()),
            ("cache-control", self.cache_control()),
            ("expires", format_http_date(now + self.client_max_age)),
            ("last-modified", format_http_date(modified)),
            ("content-type", mime.to_string()),
            ("content-length", meta.len().to_string()),
            ("access-control-allow-origin", "*".to_string()),
            ("x-content-type-options", "nosniff".to_string()),
            ("x-xss-protection", "1; mode=block".to_string()),
            ("server", "pop-cdn".to_string()),
            ("x-powered-by", "pop-cdn".to_string()),
            ("x-cache", cache_status.as_str().to_string()),
        ];

        Ok(ServedResponse {
            status: 200,
            headers,
            body: ResponseBody::File {
                file,
                len: meta.len(),
            },
            cache_status,
        })
    }

    fn not_modified(&self, last_modified: SystemTime, cache_status: CacheStatus) -> ServedResponse {
        ServedResponse {
            status: 304,
            headers: vec![
                ("cache-control", self.cache_control()),
                ("last-modified", format_http_date(last_modified)),
                ("x-cache", cache_status.as_str().to_string()),
            ],
            body: ResponseBody::Empty,
            cache_status,
        }
    }

    /// Stand-in when the entry disappeared between decision and serving
    fn placeholder(cache_status: CacheStatus) -> ServedResponse {
        ServedResponse {
            status: 503,
            headers: vec![
                ("retry-after", "1".to_string()),
                ("cache-control", "no-store".to_string()),
                ("x-cache", cache_status.as_str().to_string()),
            ],
            body: ResponseBody::Empty,
            cache_status,
        }
    }
}
