//! Cache and origin configuration

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Extensions accepted when no explicit list is configured
pub const DEFAULT_ACCEPTED_EXTENSIONS: &[&str] = &[
    "jpeg", "jpg", "png", "gif", "webp", "jfif", "bmp", "tif", "ico", "js", "css", "html", "htm",
    "xml", "kml", "json", "txt", "eot", "svg", "otf", "ttf", "woff", "woff2",
];

/// Browser-like User-Agent sent to the origin
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/98.0.4758.102 Safari/537.36";

/// Configuration for the cache core
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub cache_root: PathBuf,
    /// Age after which an entry must be revalidated against the origin
    pub revalidate_after: Duration,
    /// `max-age` advertised to clients
    pub client_max_age: Duration,
    /// Lower-cased extensions that may be cached
    pub accepted_extensions: Vec<String>,
    /// Directory prefixes that may be cached; empty allows all
    pub accepted_directories: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_root: PathBuf::from("./cache"),
            revalidate_after: Duration::from_secs(24 * 60 * 60), // 1 day
            client_max_age: Duration::from_secs(90 * 24 * 60 * 60), // 90 days
            accepted_extensions: DEFAULT_ACCEPTED_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
            accepted_directories: Vec::new(),
        }
    }
}

/// Configuration for the HTTP origin client
#[derive(Debug, Clone)]
pub struct OriginConfig {
    /// Base URL requests are appended to, without trailing slash
    pub base_url: String,
    /// Static IP for the origin host, bypassing DNS
    pub ip_override: Option<IpAddr>,
    /// Port paired with `ip_override`
    pub port: Option<u16>,
    pub user_agent: String,
    pub connect_timeout: Duration,
    pub head_timeout: Duration,
    pub get_timeout: Duration,
    /// How long resolved origin addresses are reused
    pub dns_cache_ttl: Duration,
}

impl OriginConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            ip_override: None,
            port: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            connect_timeout: Duration::from_secs(10),
            head_timeout: Duration::from_secs(15),
            get_timeout: Duration::from_secs(120),
            dns_cache_ttl: Duration::from_secs(60 * 60),
        }
    }
}

/// Configuration for the image post-processor
#[derive(Debug, Clone, Copy)]
pub struct TranscodeConfig {
    pub enabled: bool,
    /// Lossy WebP quality, 1-100
    pub quality: u8,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            quality: 80,
        }
    }
}
