//! Error types for cache operations.

use std::io;
use std::path::PathBuf;

/// Errors that can occur during cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Key or value length outside the configured bounds, or a malformed
    /// math operand.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Every slot is occupied.
    #[error("cache is full")]
    CacheFull,

    /// Key not found (delete of an absent key).
    #[error("key not found")]
    NotFound,

    /// A bucket chain did not terminate within `max_items` steps.
    ///
    /// This can only happen after arena corruption or a mutation made
    /// without the write lock. The process must not keep serving.
    #[error("cache loop detected at slot {slot} (prev = {prev}, next = {next})")]
    LoopDetected { slot: u64, prev: u64, next: u64 },

    /// No instance is registered under this name.
    #[error("unknown cache: {0}")]
    UnknownCache(String),

    /// Invalid instance configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The backing store exists but has the wrong size or is not a file.
    #[error(
        "invalid cache store {}: expected {expected} bytes, found {actual}; remove it or fix the cache geometry",
        path.display()
    )]
    StoreSizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    /// A dump was produced by an instance with a different geometry.
    #[error("dump {field} mismatch: expected {expected}, received {actual}")]
    DumpMismatch {
        field: &'static str,
        expected: u64,
        actual: u64,
    },

    /// A dump was produced by an instance hashing keys differently.
    #[error("dump hash mismatch: expected {expected}, received {actual}")]
    DumpHashMismatch { expected: String, actual: String },

    /// Stored slots carry hashes the configured algorithm does not produce
    /// for their keys.
    #[error("{mismatched} cache slots do not match hash \"{hash}\"; the arena was built with another hash")]
    ArenaHashMismatch { hash: &'static str, mismatched: u64 },

    /// I/O failure on the backing store or a dump stream.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl CacheError {
    /// Returns true if the process must stop serving after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CacheError::LoopDetected { .. })
    }
}

/// Startup configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("you have to specify a cache name")]
    MissingName,
    #[error("you have to specify the maximum number of cache items for \"{0}\"")]
    ZeroMaxItems(String),
    #[error("invalid cache blocksize for \"{0}\"")]
    ZeroBlocksize(String),
    #[error("invalid cache blocks for \"{0}\"")]
    ZeroBlocks(String),
    #[error("invalid cache hashsize for \"{0}\"")]
    ZeroHashsize(String),
    #[error("invalid cache keysize for \"{0}\"")]
    ZeroKeysize(String),
    #[error("cache keysize for \"{name}\" must not exceed {max}")]
    KeysizeTooLarge { name: String, max: u64 },
    #[error("invalid number of cache blocks for \"{name}\", must be at least max_items ({max_items})")]
    BlocksBelowMaxItems { name: String, max_items: u64 },
    #[error("invalid cache hash \"{0}\"")]
    UnknownHash(String),
    #[error("cache \"{0}\" does not fit in the address space")]
    ArenaTooLarge(String),
    #[error("cache \"{0}\" is defined more than once")]
    DuplicateName(String),
    #[error("cache store for \"{name}\" was not written with hash \"{hash}\"")]
    StoreHashMismatch { name: String, hash: &'static str },
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_loop_is_fatal() {
        let fatal = CacheError::LoopDetected {
            slot: 3,
            prev: 2,
            next: 3,
        };
        assert!(fatal.is_fatal());
        assert!(!CacheError::CacheFull.is_fatal());
        assert!(!CacheError::NotFound.is_fatal());
        assert!(!CacheError::InvalidArgument("key").is_fatal());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(CacheError::CacheFull.to_string(), "cache is full");
        assert_eq!(
            CacheError::LoopDetected {
                slot: 7,
                prev: 1,
                next: 7
            }
            .to_string(),
            "cache loop detected at slot 7 (prev = 1, next = 7)"
        );
        assert_eq!(
            CacheError::from(ConfigError::UnknownHash("crc".into())).to_string(),
            "invalid cache hash \"crc\""
        );
    }

    #[test]
    fn test_store_mismatch_display() {
        let err = CacheError::StoreSizeMismatch {
            path: PathBuf::from("/tmp/cache.store"),
            expected: 10,
            actual: 4,
        };
        assert!(err.to_string().starts_with("invalid cache store /tmp/cache.store"));
    }

    #[test]
    fn test_hash_mismatch_display() {
        let err = CacheError::DumpHashMismatch {
            expected: "murmur2".into(),
            actual: "djb33x".into(),
        };
        assert_eq!(
            err.to_string(),
            "dump hash mismatch: expected murmur2, received djb33x"
        );
        assert!(!err.is_fatal());

        let err = CacheError::from(ConfigError::StoreHashMismatch {
            name: "items".into(),
            hash: "murmur2",
        });
        assert_eq!(
            err.to_string(),
            "cache store for \"items\" was not written with hash \"murmur2\""
        );
    }

    #[test]
    fn test_error_is_error_trait() {
        fn assert_error<E: std::error::Error + Send + Sync + 'static>() {}
        assert_error::<CacheError>();
        assert_error::<ConfigError>();
    }
}
