//! Shared cache types

use serde::{Deserialize, Serialize};

/// Request counters, by how each request was satisfied
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub revalidated: u64,
    pub misses: u64,
    pub errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_default() {
        let stats = CacheStats::default();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.revalidated, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.errors, 0);
    }

    #[test]
    fn test_cache_stats_serialization() {
        let stats = CacheStats {
            hits: 500,
            revalidated: 20,
            misses: 50,
            errors: 1,
        };

        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("\"hits\":500"));

        let deserialized: CacheStats = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.misses, 50);
    }
}
