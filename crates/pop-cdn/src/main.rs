//! pop-cdn - origin-pull edge cache
//!
//! Serves static files from a local cache directory, pulling them from the
//! configured origin on first request and revalidating them once they age.

mod config;
mod error;
mod server;
mod types;

use crate::config::load_config;
use crate::error::Result;
use crate::server::{start_server, ServerState, SharedState};
use origin_pull_cache::{HttpOrigin, ImageTranscoder, PullCache};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter = EnvFilter::from_default_env().add_directive("pop_cdn=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    info!("Starting pop-cdn...");

    let config = load_config()?;
    info!("Port: {}", config.port);
    info!("Origin: {}", config.origin.base_url);
    if let Some(ip) = config.origin.ip_override {
        info!("Origin pinned to {}", ip);
    }
    info!("Cache dir: {:?}", config.cache.cache_root);
    info!(
        "Revalidate after: {} seconds",
        config.cache.revalidate_after.as_secs()
    );
    info!("Client max-age: {} seconds", config.cache.client_max_age.as_secs());

    let origin = HttpOrigin::new(config.origin.clone())?;
    let mut cache = PullCache::new(&config.cache, Arc::new(origin));
    if config.transcode.enabled {
        info!("Image transcoding enabled (quality {})", config.transcode.quality);
        cache = cache.with_post_processor(Arc::new(ImageTranscoder::new(config.transcode.quality)));
    }
    cache.init().await?;

    let state: SharedState = Arc::new(ServerState::new(cache, config.path_prefix));

    // Start HTTP server (blocking)
    start_server(state, config.port).await?;

    Ok(())
}
