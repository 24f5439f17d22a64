//! Instance configuration.

use std::path::PathBuf;

use crate::{ConfigError, HashAlgorithm};

/// Default value block size (64KB - 1).
pub const DEFAULT_BLOCKSIZE: u64 = u16::MAX as u64;

/// Default maximum key length.
pub const DEFAULT_KEYSIZE: u64 = 2048;

/// Default number of hash buckets.
pub const DEFAULT_HASHSIZE: u64 = u16::MAX as u64;

/// Keys are carried with 16-bit length prefixes on every wire format.
pub const MAX_KEYSIZE: u64 = u16::MAX as u64;

/// Name used for an instance that was not given one.
pub const DEFAULT_NAME: &str = "default";

/// Geometry and storage settings of one cache instance.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Instance name used by the registry.
    pub name: String,
    /// Number of usable slots.
    pub max_items: u64,
    /// Size of each value block; the largest value that can be stored.
    pub blocksize: u64,
    /// Number of value blocks. Defaults to `max_items`.
    pub blocks: Option<u64>,
    /// Largest key length.
    pub keysize: u64,
    /// Number of hash buckets.
    pub hashsize: u64,
    /// Key hash function.
    pub hash: HashAlgorithm,
    /// Optional backing file. Without one the arena lives in anonymous memory.
    pub store: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            max_items: 0,
            blocksize: DEFAULT_BLOCKSIZE,
            blocks: None,
            keysize: DEFAULT_KEYSIZE,
            hashsize: DEFAULT_HASHSIZE,
            hash: HashAlgorithm::default(),
            store: None,
        }
    }
}

impl CacheConfig {
    /// Number of value blocks after applying the default.
    pub fn blocks(&self) -> u64 {
        self.blocks.unwrap_or(self.max_items)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let name = || self.name.clone();

        if self.name.is_empty() {
            return Err(ConfigError::MissingName);
        }
        if self.max_items == 0 {
            return Err(ConfigError::ZeroMaxItems(name()));
        }
        if self.blocksize == 0 {
            return Err(ConfigError::ZeroBlocksize(name()));
        }
        if self.blocks() == 0 {
            return Err(ConfigError::ZeroBlocks(name()));
        }
        if self.hashsize == 0 {
            return Err(ConfigError::ZeroHashsize(name()));
        }
        if self.keysize == 0 {
            return Err(ConfigError::ZeroKeysize(name()));
        }
        if self.keysize > MAX_KEYSIZE {
            return Err(ConfigError::KeysizeTooLarge {
                name: name(),
                max: MAX_KEYSIZE,
            });
        }
        if self.blocks() < self.max_items {
            return Err(ConfigError::BlocksBelowMaxItems {
                name: name(),
                max_items: self.max_items,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_items: u64) -> CacheConfig {
        CacheConfig {
            name: "test".into(),
            max_items,
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = config(100);
        assert_eq!(config.blocksize, 65535);
        assert_eq!(config.keysize, 2048);
        assert_eq!(config.hashsize, 65535);
        assert_eq!(config.blocks(), 100);
        assert_eq!(config.hash.name(), "djb33x");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_max_items_required() {
        assert_eq!(
            config(0).validate(),
            Err(ConfigError::ZeroMaxItems("test".into()))
        );
    }

    #[test]
    fn test_name_required() {
        let mut config = config(10);
        config.name.clear();
        assert_eq!(config.validate(), Err(ConfigError::MissingName));
    }

    #[test]
    fn test_blocks_below_max_items() {
        let mut config = config(10);
        config.blocks = Some(9);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BlocksBelowMaxItems { max_items: 10, .. })
        ));
    }

    #[test]
    fn test_zero_sizes() {
        let mut c = config(10);
        c.blocksize = 0;
        assert!(matches!(c.validate(), Err(ConfigError::ZeroBlocksize(_))));

        let mut c = config(10);
        c.hashsize = 0;
        assert!(matches!(c.validate(), Err(ConfigError::ZeroHashsize(_))));

        let mut c = config(10);
        c.keysize = 0;
        assert!(matches!(c.validate(), Err(ConfigError::ZeroKeysize(_))));

        let mut c = config(10);
        c.blocks = Some(0);
        assert!(matches!(c.validate(), Err(ConfigError::ZeroBlocks(_))));
    }

    #[test]
    fn test_keysize_limit() {
        let mut c = config(10);
        c.keysize = MAX_KEYSIZE + 1;
        assert!(matches!(
            c.validate(),
            Err(ConfigError::KeysizeTooLarge { .. })
        ));
    }
}
