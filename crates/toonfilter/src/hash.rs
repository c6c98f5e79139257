//! 32-bit key hashers
//!
//! Both the bloom filter probes and the cache index consume a hasher through
//! [`KeyHasher`], so tests can pin a deterministic function and segments can
//! record which one they were built with.

/// A seeded 32-bit hash over a byte string
pub trait KeyHasher: Send + Sync {
    /// Hash `data` with the given `seed`
    fn hash(&self, data: &[u8], seed: u32) -> u32;
}

impl<H: KeyHasher + ?Sized> KeyHasher for &H {
    fn hash(&self, data: &[u8], seed: u32) -> u32 {
        (**self).hash(data, seed)
    }
}

impl<H: KeyHasher + ?Sized> KeyHasher for std::sync::Arc<H> {
    fn hash(&self, data: &[u8], seed: u32) -> u32 {
        (**self).hash(data, seed)
    }
}

/// MurmurHash3 (x86, 32-bit output)
///
/// The default hasher: fast, and good avalanche behaviour keeps both filter
/// probes and index buckets well spread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Murmur3;

impl KeyHasher for Murmur3 {
    fn hash(&self, data: &[u8], seed: u32) -> u32 {
        const C1: u32 = 0xcc9e_2d51;
        const C2: u32 = 0x1b87_3593;

        let mut h = seed;
        let mut blocks = data.chunks_exact(4);

        for block in &mut blocks {
            let mut k = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
            k = k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);

            h ^= k;
            h = h.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
        }

        let tail = blocks.remainder();
        if !tail.is_empty() {
            let mut k = 0u32;
            for (i, &byte) in tail.iter().enumerate() {
                k ^= u32::from(byte) << (8 * i);
            }
            k = k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
            h ^= k;
        }

        h ^= data.len() as u32;
        fmix32(h)
    }
}

#[inline]
fn fmix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

/// BKDR string hash; the seed is the multiplier (131 is the usual choice)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bkdr;

impl Bkdr {
    /// Conventional multiplier
    pub const DEFAULT_SEED: u32 = 131;
}

impl KeyHasher for Bkdr {
    fn hash(&self, data: &[u8], seed: u32) -> u32 {
        data.iter()
            .fold(0u32, |h, &b| h.wrapping_mul(seed).wrapping_add(u32::from(b)))
    }
}

/// Bernstein's hash (`h * 33 + c`); the seed is the initial value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Djb;

impl Djb {
    /// Conventional starting value
    pub const DEFAULT_SEED: u32 = 5381;
}

impl KeyHasher for Djb {
    fn hash(&self, data: &[u8], seed: u32) -> u32 {
        data.iter().fold(seed, |h, &b| {
            (h << 5).wrapping_add(h).wrapping_add(u32::from(b))
        })
    }
}

/// SDBM hash
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sdbm;

impl KeyHasher for Sdbm {
    fn hash(&self, data: &[u8], seed: u32) -> u32 {
        data.iter().fold(seed, |h, &b| {
            u32::from(b)
                .wrapping_add(h << 6)
                .wrapping_add(h << 16)
                .wrapping_sub(h)
        })
    }
}

/// Arash Partow's hash
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ap;

impl KeyHasher for Ap {
    fn hash(&self, data: &[u8], seed: u32) -> u32 {
        data.iter().enumerate().fold(seed, |h, (i, &b)| {
            let c = u32::from(b);
            if i & 1 == 1 {
                h ^ ((h << 7) ^ c ^ (h >> 3))
            } else {
                h ^ !((h << 11) ^ c ^ (h >> 5))
            }
        })
    }
}
