//! Key hash functions.
//!
//! Both functions are stable across processes and platforms, which matters
//! because the hash of every key is persisted in its slot header and used
//! by recovery to place chains back into buckets.

use crate::ConfigError;

/// Signature of a key hash function.
pub type HashFn = fn(&[u8]) -> u32;

/// Hash algorithm selected for an instance.
#[derive(Debug, Clone, Copy, Default)]
pub enum HashAlgorithm {
    /// Bernstein hash with xor (`h * 33 ^ c`).
    #[default]
    Djb33x,
    /// MurmurHash2, seed 0.
    Murmur2,
    /// Caller-provided function. Mostly useful to force collisions in tests.
    Custom(HashFn),
}

impl HashAlgorithm {
    /// Look up an algorithm by its configuration name.
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        match name {
            "djb33x" => Ok(HashAlgorithm::Djb33x),
            "murmur2" => Ok(HashAlgorithm::Murmur2),
            other => Err(ConfigError::UnknownHash(other.to_string())),
        }
    }

    /// Configuration name of this algorithm.
    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Djb33x => "djb33x",
            HashAlgorithm::Murmur2 => "murmur2",
            HashAlgorithm::Custom(_) => "custom",
        }
    }

    /// The function implementing this algorithm.
    pub fn function(&self) -> HashFn {
        match self {
            HashAlgorithm::Djb33x => djb33x,
            HashAlgorithm::Murmur2 => murmur2,
            HashAlgorithm::Custom(f) => *f,
        }
    }
}

/// Bernstein's hash, xor variant.
pub fn djb33x(key: &[u8]) -> u32 {
    key.iter().fold(5381u32, |hash, &c| {
        (hash << 5).wrapping_add(hash) ^ c as u32
    })
}

/// MurmurHash2 with a zero seed.
pub fn murmur2(key: &[u8]) -> u32 {
    const M: u32 = 0x5bd1e995;

    let mut h = key.len() as u32;
    let mut chunks = key.chunks_exact(4);

    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> 24;
        k = k.wrapping_mul(M);
        h = h.wrapping_mul(M);
        h ^= k;
    }

    let tail = chunks.remainder();
    if tail.len() == 3 {
        h ^= (tail[2] as u32) << 16;
    }
    if tail.len() >= 2 {
        h ^= (tail[1] as u32) << 8;
    }
    if !tail.is_empty() {
        h ^= tail[0] as u32;
        h = h.wrapping_mul(M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;
    h
}
