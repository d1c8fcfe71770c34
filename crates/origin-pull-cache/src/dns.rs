//! DNS resolver that remembers answers for a fixed time

use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
struct CachedAddrs {
    addrs: Vec<SocketAddr>,
    resolved_at: Instant,
}

/// System resolver with a per-host answer cache.
///
/// Ports in the returned addresses are 0; reqwest fills in the URL's port.
#[derive(Debug, Clone)]
pub struct CachingResolver {
    ttl: Duration,
    entries: Arc<Mutex<HashMap<String, CachedAddrs>>>,
}

impl CachingResolver {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Unexpired cached answer for `host`
    fn cached(&self, host: &str) -> Option<Vec<SocketAddr>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(host)
            .filter(|entry| entry.resolved_at.elapsed() < self.ttl)
            .map(|entry| entry.addrs.clone())
    }

    /// Resolve `host`, consulting the cache first
    pub async fn lookup(&self, host: &str) -> io::Result<Vec<SocketAddr>> {
        if let Some(addrs) = self.cached(host) {
            return Ok(addrs);
        }

        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, 0)).await?.collect();
        if addrs.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses for {}", host),
            ));
        }
        debug!(host = %host, count = addrs.len(), "Resolved origin host");

        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                host.to_string(),
                CachedAddrs {
                    addrs: addrs.clone(),
                    resolved_at: Instant::now(),
                },
            );
        Ok(addrs)
    }
}

impl Resolve for CachingResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let resolver = self.clone();
        let host = name.as_str().to_string();
        Box::pin(async move {
            let addrs = resolver.lookup(&host).await?;
            let addrs: Addrs = Box::new(addrs.into_iter());
            Ok::<_, Box<dyn std::error::Error + Send + Sync>>(addrs)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_answer_is_cached_within_ttl() {
        let resolver = CachingResolver::new(Duration::from_secs(3600));
        assert!(resolver.cached("localhost").is_none());

        let addrs = resolver.lookup("localhost").await.unwrap();
        assert!(!addrs.is_empty());
        assert_eq!(resolver.cached("localhost"), Some(addrs));
    }

    #[tokio::test]
    async fn test_expired_answer_is_ignored() {
        let resolver = CachingResolver::new(Duration::ZERO);
        resolver.lookup("127.0.0.1").await.unwrap();
        assert!(resolver.cached("127.0.0.1").is_none());
    }

    #[tokio::test]
    async fn test_stale_entry_is_replaced() {
        let resolver = CachingResolver::new(Duration::from_millis(5));
        resolver.entries.lock().unwrap().insert(
            "127.0.0.1".to_string(),
            CachedAddrs {
                addrs: vec!["10.9.9.9:0".parse().unwrap()],
                resolved_at: Instant::now(),
            },
        );
        tokio::time::sleep(Duration::from_millis(20)).await;

        let addrs = resolver.lookup("127.0.0.1").await.unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:0".parse::<SocketAddr>().unwrap()]);
    }
}
