pub mod cache;

pub use cache::{CacheEntry, CacheKey, CacheStats, CacheStore, CACHE_FILE, RETENTION_DAYS};
