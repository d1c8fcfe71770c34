//! Environment configuration for pop-cdn

use crate::error::{PopCdnError, Result};
use crate::types::PopCdnConfig;
use origin_pull_cache::{CacheConfig, OriginConfig, TranscodeConfig};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Load configuration from the process environment
pub fn load_config() -> Result<PopCdnConfig> {
    load_config_from(|key| std::env::var(key).ok())
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Directory prefixes are matched against the request dirname, which always
/// starts with `/`
fn parse_directories(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            if s.starts_with('/') {
                s.to_string()
            } else {
                format!("/{}", s)
            }
        })
        .collect()
}

/// Load configuration through `lookup`; invalid numbers fall back to defaults
pub fn load_config_from<F>(lookup: F) -> Result<PopCdnConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = PopCdnConfig::default();
    let cache_defaults = CacheConfig::default();

    let port = lookup("PORT")
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(defaults.port);

    let origin_url = lookup("ORIGIN_URL")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| PopCdnError::Config("ORIGIN_URL must be set".to_string()))?;
    let parsed = url::Url::parse(&origin_url)
        .map_err(|e| PopCdnError::Config(format!("invalid ORIGIN_URL '{}': {}", origin_url, e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(PopCdnError::Config(format!(
            "ORIGIN_URL must be http or https, got '{}'",
            parsed.scheme()
        )));
    }

    let mut origin = OriginConfig::new(origin_url);
    origin.ip_override = lookup("ORIGIN_IP").and_then(|s| s.trim().parse::<IpAddr>().ok());
    origin.port = lookup("ORIGIN_PORT").and_then(|s| s.parse::<u16>().ok());

    let cache = CacheConfig {
        cache_root: lookup("CACHE_DIR")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or(cache_defaults.cache_root),
        revalidate_after: lookup("CACHE_EXPIRY_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(cache_defaults.revalidate_after),
        client_max_age: lookup("CLIENT_MAX_AGE_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(cache_defaults.client_max_age),
        accepted_extensions: lookup("ACCEPTED_EXTENSIONS")
            .map(|s| parse_list(&s))
            .filter(|v| !v.is_empty())
            .unwrap_or(cache_defaults.accepted_extensions),
        accepted_directories: lookup("ACCEPTED_DIRECTORIES")
            .map(|s| parse_directories(&s))
            .unwrap_or_default(),
    };

    let transcode = TranscodeConfig {
        enabled: lookup("TRANSCODE_IMAGES")
            .map(|s| matches!(s.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false),
        quality: lookup("TRANSCODE_QUALITY")
            .and_then(|s| s.parse::<u8>().ok())
            .filter(|q| (1..=100).contains(q))
            .unwrap_or(TranscodeConfig::default().quality),
    };

    let path_prefix = lookup("PATH_PREFIX")
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty());

    Ok(PopCdnConfig {
        port,
        origin,
        cache,
        transcode,
        path_prefix,
    })
}
