//! # toonfilter
//!
//! Key hashing and membership filters for ToonStore.
//!
//! ## Architecture
//! - **KeyHasher**: injectable seeded 32-bit hash (Murmur3 by default)
//! - **BloomFilterPolicy**: build-once, query-many bit array per key batch
//!
//! Segment readers consult a filter before touching the block cache, so a
//! definite miss never costs a lookup.

#![warn(missing_docs)]

mod bloom;
mod hash;

pub use bloom::{BloomFilterPolicy, FilterPolicy, BLOOM_FILTER_NAME, MAX_PROBES, MIN_FILTER_BITS};
pub use hash::{Ap, Bkdr, Djb, KeyHasher, Murmur3, Sdbm};
