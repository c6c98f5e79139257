//! Cache and filter configuration
//!
//! Both configs deserialize with defaults for missing fields, so a storage
//! engine can embed them in its own settings file:
//!
//! ```text
//! { "capacity": 67108864, "policy": "lfu" }
//! { "bits_per_key": 12 }
//! ```

use serde::{Deserialize, Serialize};
use toonfilter::BloomFilterPolicy;

use crate::cache::Cache;
use crate::error::ConfigError;
use crate::{LfuCache, LruCache};

/// Default cache capacity: 8 MiB worth of charge
pub const DEFAULT_CAPACITY: usize = 8 << 20;

/// Default bloom filter density
pub const DEFAULT_BITS_PER_KEY: usize = 10;

/// Largest accepted bits per key; beyond this the probe count is capped anyway
pub const MAX_BITS_PER_KEY: usize = 64;

/// Which eviction policy backs the cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Least recently used
    #[default]
    Lru,
    /// Least frequently used
    Lfu,
}

/// Block cache settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Capacity in charge units (normally bytes)
    pub capacity: usize,
    /// Eviction policy
    pub policy: EvictionPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            policy: EvictionPolicy::default(),
        }
    }
}

impl CacheConfig {
    /// Check the settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(())
    }

    /// Build the configured cache
    pub fn build<V>(&self) -> Result<Box<dyn Cache<V>>, ConfigError>
    where
        V: Send + Sync + 'static,
    {
        self.validate()?;
        let cache: Box<dyn Cache<V>> = match self.policy {
            EvictionPolicy::Lru => Box::new(LruCache::<V>::new(self.capacity)),
            EvictionPolicy::Lfu => Box::new(LfuCache::<V>::new(self.capacity)),
        };
        Ok(cache)
    }
}

/// Membership filter settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Bits spent per key; 10 gives roughly a 1% false positive rate
    pub bits_per_key: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            bits_per_key: DEFAULT_BITS_PER_KEY,
        }
    }
}

impl FilterConfig {
    /// Check the settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_BITS_PER_KEY).contains(&self.bits_per_key) {
            return Err(ConfigError::BitsPerKey {
                got: self.bits_per_key,
                max: MAX_BITS_PER_KEY,
            });
        }
        Ok(())
    }

    /// Build the configured filter policy
    pub fn policy(&self) -> Result<BloomFilterPolicy, ConfigError> {
        self.validate()?;
        Ok(BloomFilterPolicy::new(self.bits_per_key))
    }
}
