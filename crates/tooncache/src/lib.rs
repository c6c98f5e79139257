//! # tooncache
//!
//! Block cache layer for ToonStore.
//!
//! ## Architecture
//! - **HandleTable**: AHash index from key to entry slot (O(1))
//! - **Handles**: reference-counted pins; a handle keeps its entry alive
//!   through eviction until it is released
//! - **Eviction orders**: LRU (pinned/evictable lists) or LFU (frequency
//!   tiers), both O(1) per transition
//! - **Filters**: segment readers check a [`BloomFilterPolicy`] before a
//!   lookup to skip keys that cannot be present
//!
//! ## Usage
//! ```
//! use tooncache::LruCache;
//!
//! let cache = LruCache::new(4096);
//! let hash = cache.hash_key(b"block:7");
//!
//! let handle = cache.insert(b"block:7", hash, vec![0u8; 512], 512, None)?;
//! assert_eq!(handle.value().len(), 512);
//! cache.release(handle);
//!
//! let hit = cache.lookup(b"block:7", hash).expect("still cached");
//! cache.release(hit);
//! # Ok::<(), tooncache::CacheError>(())
//! ```

#![warn(missing_docs)]

mod cache;
mod config;
mod error;
mod handle;
mod lfu;
mod list;
mod lru;
mod stats;
mod table;

pub use cache::{Cache, EvictionOrder, HandleCache};
pub use config::{
    CacheConfig, EvictionPolicy, FilterConfig, DEFAULT_BITS_PER_KEY, DEFAULT_CAPACITY,
    MAX_BITS_PER_KEY,
};
pub use error::{CacheError, ConfigError, Result};
pub use handle::{Finalizer, Handle};
pub use lfu::{FrequencyOrder, LfuCache};
pub use list::SlotId;
pub use lru::{LruCache, RecencyOrder};
pub use stats::{CacheStats, StatsSnapshot};
pub use toonfilter::{BloomFilterPolicy, FilterPolicy, KeyHasher, Murmur3};
