//! Cache layer
//!
//! In-process TTL cache (moka) for read-mostly data such as the mentor
//! directory. Entries are stored as JSON so any serializable value fits.
//!
//! ```rust,ignore
//! use careerhub::cache::create_cache;
//! use careerhub::config::CacheConfig;
//!
//! let cache = create_cache(&CacheConfig::default());
//! cache.set("mentors:accepting", &profiles).await?;
//! ```

pub mod memory;

pub use memory::MemoryCache;

use crate::config::CacheConfig;
use std::sync::Arc;
use std::time::Duration;

/// Build the shared cache from configuration
pub fn create_cache(config: &CacheConfig) -> Arc<MemoryCache> {
    let ttl = Duration::from_secs(config.ttl_seconds.max(1));
    Arc::new(MemoryCache::with_capacity_and_ttl(config.max_entries, ttl))
}
