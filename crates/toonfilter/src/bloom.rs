//! Bloom membership filter
//!
//! A filter is built once per immutable key batch (one per on-disk segment)
//! and answers "definitely absent" or "possibly present". Probes use double
//! hashing: one real hash `h` plus a stride `delta = h.rotate_right(17)`, so
//! `k` probes cost a single hash computation.
//!
//! Filter layout:
//! ```text
//! [bit array, bit i lives in byte i / 8 at position i % 8]
//! ```
//! The bit count is always a multiple of 8 and at least 64. The probe count is
//! not stored; readers must use a policy with the same `bits_per_key`.

use crate::hash::{KeyHasher, Murmur3};

/// Identifier persisted alongside stored filters
pub const BLOOM_FILTER_NAME: &str = "ToonStore.BloomFilter";

/// Smallest filter, in bits
pub const MIN_FILTER_BITS: usize = 64;

/// Upper bound on probes per key
pub const MAX_PROBES: usize = 30;

/// Builds and queries filters over batches of keys
pub trait FilterPolicy: Send + Sync {
    /// Name recorded next to each filter so a reader can check it matches
    fn name(&self) -> &str;

    /// Append a filter covering `keys` to `dst`
    fn create_filter(&self, keys: &[&[u8]], dst: &mut Vec<u8>);

    /// `false` means `key` was definitely not in the batch `filter` was built
    /// from
    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool;
}

/// Classic bloom filter policy
#[derive(Debug, Clone)]
pub struct BloomFilterPolicy<H = Murmur3> {
    bits_per_key: usize,
    probes: usize,
    seed: u32,
    hasher: H,
}

impl BloomFilterPolicy<Murmur3> {
    /// Create a policy spending `bits_per_key` bits per key, hashing with
    /// Murmur3
    pub fn new(bits_per_key: usize) -> Self {
        Self::with_hasher(bits_per_key, Murmur3, 0)
    }
}

impl<H: KeyHasher> BloomFilterPolicy<H> {
    /// Create a policy with an explicit hasher and seed
    pub fn with_hasher(bits_per_key: usize, hasher: H, seed: u32) -> Self {
        Self {
            bits_per_key,
            probes: probes_for(bits_per_key),
            seed,
            hasher,
        }
    }

    /// Bits spent per key
    pub fn bits_per_key(&self) -> usize {
        self.bits_per_key
    }

    /// Probes per key (`k`)
    pub fn probes(&self) -> usize {
        self.probes
    }

    /// Build a filter over `keys`
    pub fn build<K: AsRef<[u8]>>(&self, keys: &[K]) -> Vec<u8> {
        let bits = filter_bits(keys.len(), self.bits_per_key);
        let mut filter = vec![0u8; bits / 8];

        for key in keys {
            let mut h = self.hasher.hash(key.as_ref(), self.seed);
            let delta = h.rotate_right(17);
            for _ in 0..self.probes {
                let pos = h as usize % bits;
                filter[pos / 8] |= 1 << (pos % 8);
                h = h.wrapping_add(delta);
            }
        }

        filter
    }

    /// Query a filter produced by [`build`](Self::build)
    pub fn may_contain(&self, key: &[u8], filter: &[u8]) -> bool {
        let bits = filter.len() * 8;
        if bits < MIN_FILTER_BITS {
            return false;
        }

        let mut h = self.hasher.hash(key, self.seed);
        let delta = h.rotate_right(17);
        for _ in 0..self.probes {
            let pos = h as usize % bits;
            if filter[pos / 8] & (1 << (pos % 8)) == 0 {
                return false;
            }
            h = h.wrapping_add(delta);
        }
        true
    }
}

impl<H: KeyHasher> FilterPolicy for BloomFilterPolicy<H> {
    fn name(&self) -> &str {
        BLOOM_FILTER_NAME
    }

    fn create_filter(&self, keys: &[&[u8]], dst: &mut Vec<u8>) {
        dst.extend_from_slice(&self.build(keys));
    }

    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool {
        self.may_contain(key, filter)
    }
}

/// `k = clamp(round(bits_per_key * ln 2), 1, 30)`
fn probes_for(bits_per_key: usize) -> usize {
    let k = (bits_per_key as f64 * std::f64::consts::LN_2).round() as usize;
    k.clamp(1, MAX_PROBES)
}

/// Total bits for `n` keys, rounded up to whole bytes, never below the minimum
fn filter_bits(n: usize, bits_per_key: usize) -> usize {
    let bits = n.saturating_mul(bits_per_key).max(MIN_FILTER_BITS);
    bits.div_ceil(8) * 8
}
