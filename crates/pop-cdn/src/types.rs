//! Core types for the pop-cdn edge server

use origin_pull_cache::{CacheConfig, CacheStats, OriginConfig, TranscodeConfig};
use serde::Serialize;

/// Configuration for the edge server
#[derive(Debug, Clone)]
pub struct PopCdnConfig {
    pub port: u16,
    pub origin: OriginConfig,
    pub cache: CacheConfig,
    pub transcode: TranscodeConfig,
    /// Leading path stripped from request URIs before they reach the cache
    pub path_prefix: Option<String>,
}

impl Default for PopCdnConfig {
    fn default() -> Self {
        Self {
            port: 3001,
            origin: OriginConfig::new(""),
            cache: CacheConfig::default(),
            transcode: TranscodeConfig::default(),
            path_prefix: None,
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub cache: CacheStats,
}
