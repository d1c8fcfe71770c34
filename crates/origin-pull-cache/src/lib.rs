//! Origin-pull file cache
//!
//! Serves local copies of files held by a remote origin. Entries live on the
//! local filesystem at a path derived from the request; stale entries are
//! revalidated with a HEAD request (size comparison) and refetched when they
//! changed. Refreshes are exclusive per entry and replace files atomically.

pub mod config;
pub mod dns;
pub mod error;
pub mod freshness;
pub mod mime;
pub mod origin;
pub mod pipeline;
pub mod postprocess;
pub mod refresh;
pub mod request;
pub mod resolver;
pub mod response;
pub mod types;

pub use config::{CacheConfig, OriginConfig, TranscodeConfig};
pub use error::{CacheError, OriginError, Result};
pub use freshness::{CacheEntry, Freshness, FreshnessEvaluator};
pub use origin::{HttpOrigin, OriginClient, OriginMetadata, OriginResponse};
pub use pipeline::PullCache;
pub use postprocess::{ImageTranscoder, PostProcessor};
pub use request::RequestDescriptor;
pub use resolver::{CacheKey, CacheKeyResolver};
pub use response::{CacheStatus, ResponseBody, ServedResponse};
pub use types::CacheStats;
