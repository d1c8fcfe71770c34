//! Per-request pipeline: resolve, evaluate, refresh, assemble

use crate::config::CacheConfig;
use crate::error::{CacheError, OriginError, Result};
use crate::freshness::{CacheEntry, Freshness, FreshnessEvaluator};
use crate::origin::OriginClient;
use crate::postprocess::PostProcessor;
use crate::refresh::{recorded_size, size_path, RefreshExecutor};
use crate::request::RequestDescriptor;
use crate::resolver::{purge, CacheKeyResolver};
use crate::response::{CacheStatus, ResponseAssembler, ServedResponse};
use crate::types::CacheStats;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::fs;
use tracing::{debug, info, warn};

/// Origin-pull cache over a local directory tree
pub struct PullCache {
    resolver: CacheKeyResolver,
    origin: Arc<dyn OriginClient>,
    freshness: FreshnessEvaluator,
    executor: RefreshExecutor,
    assembler: ResponseAssembler,
    hits: AtomicU64,
    revalidated: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

impl PullCache {
    pub fn new(config: &CacheConfig, origin: Arc<dyn OriginClient>) -> Self {
        Self {
            resolver: CacheKeyResolver::new(config),
            executor: RefreshExecutor::new(origin.clone()),
            origin,
            freshness: FreshnessEvaluator::new(config.revalidate_after),
            assembler: ResponseAssembler::new(config.client_max_age),
            hits: AtomicU64::new(0),
            revalidated: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn with_post_processor(mut self, post_processor: Arc<dyn PostProcessor>) -> Self {
        self.executor = self.executor.with_post_processor(post_processor);
        self
    }

    /// Ensure the cache root exists
    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(self.resolver.cache_root()).await?;
        info!(cache_root = ?self.resolver.cache_root(), "Cache initialized");
        Ok(())
    }

    /// Serve one request, refreshing the cache entry when needed
    pub async fn serve(&self, request: &RequestDescriptor) -> Result<ServedResponse> {
        let result = self.handle(request).await;
        match &result {
            Ok(response) => {
                let counter = match response.cache_status {
                    CacheStatus::Hit => &self.hits,
                    CacheStatus::Revalidated => &self.revalidated,
                    CacheStatus::Miss => &self.misses,
                };
                counter.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                debug!(uri = %request.request_uri, error = %e, "Request failed");
            }
        }
        result
    }

    async fn handle(&self, request: &RequestDescriptor) -> Result<ServedResponse> {
        let key = self.resolver.resolve(request)?;
        let variant = self
            .executor
            .post_processor()
            .and_then(|pp| pp.variant(&key.path, &key.mime));

        if request.force {
            debug!(path = ?key.path, "Forced refresh requested");
            purge(&key.path).await?;
            if let Some(variant) = &variant {
                purge(&variant.path).await?;
                purge(&size_path(&key.path)).await?;
            }
        }

        // A transformed variant, once written, replaces the downloaded file
        let mut entry = CacheEntry::inspect(&key.path).await?;
        let mut mime = key.mime.clone();
        if let Some(variant) = variant {
            let transformed = CacheEntry::inspect(&variant.path).await?;
            if transformed.exists {
                entry = transformed;
                mime = variant.mime;
                // revalidate against what the origin sent, not the variant
                if let Some(size) = recorded_size(&key.path).await {
                    entry.size_bytes = size;
                }
            }
        }

        let now = SystemTime::now();
        let mut state = self.freshness.evaluate(&entry, now);
        let mut cache_status = CacheStatus::Hit;

        if state == Freshness::Revalidate {
            let metadata = self
                .origin
                .head(&request.request_uri)
                .await
                .map_err(|e| match e {
                    OriginError::Redirect(_) => CacheError::InternalServerError(e.to_string()),
                    _ => CacheError::NotFound(e.to_string()),
                })?;
            state = self.freshness.revalidate(&entry, &metadata).await?;
            cache_status = CacheStatus::Revalidated;
        }

        debug!(uri = %request.request_uri, path = ?entry.path, state = ?state, "Freshness decided");

        match state {
            Freshness::Fresh => {
                self.assembler
                    .assemble(
                        &entry.path,
                        &mime,
                        entry.last_modified,
                        cache_status,
                        request.if_modified_since.as_deref(),
                        now,
                    )
                    .await
            }
            Freshness::Stale | Freshness::Revalidate => {
                let outcome = self
                    .executor
                    .refresh(&request.request_uri, &key.path, &key.mime)
                    .await?;
                if outcome.bytes == 0 {
                    warn!(uri = %request.request_uri, "Origin returned an empty body");
                }
                self.assembler
                    .assemble(
                        &outcome.path,
                        &outcome.mime,
                        None,
                        CacheStatus::Miss,
                        request.if_modified_since.as_deref(),
                        SystemTime::now(),
                    )
                    .await
            }
        }
    }

    /// Snapshot of the request counters
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            revalidated: self.revalidated.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}
