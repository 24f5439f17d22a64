//! Name-addressed access to the cache instances of a process.

use std::sync::Arc;

use crate::{CacheError, CacheResult, ConfigError, Flags, Keys, ShmCache};

/// The fixed set of cache instances built at startup.
///
/// The first registered instance is the default one, addressed by `None`
/// or an empty name.
#[derive(Debug)]
pub struct CacheRegistry {
    caches: Vec<Arc<ShmCache>>,
}

impl CacheRegistry {
    /// Build a registry. Fails if two instances share a name.
    pub fn new(caches: Vec<Arc<ShmCache>>) -> CacheResult<Self> {
        for (i, cache) in caches.iter().enumerate() {
            if caches[..i].iter().any(|other| other.name() == cache.name()) {
                return Err(ConfigError::DuplicateName(cache.name().to_string()).into());
            }
        }
        Ok(Self { caches })
    }

    /// Look up an instance.
    pub fn cache(&self, name: Option<&str>) -> CacheResult<&Arc<ShmCache>> {
        match name {
            None | Some("") => self
                .caches
                .first()
                .ok_or_else(|| CacheError::UnknownCache(String::new())),
            Some(name) => self
                .caches
                .iter()
                .find(|cache| cache.name() == name)
                .ok_or_else(|| CacheError::UnknownCache(name.to_string())),
        }
    }

    /// The default instance, if any is registered.
    pub fn default_cache(&self) -> Option<&Arc<ShmCache>> {
        self.caches.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ShmCache>> {
        self.caches.iter()
    }

    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }

    pub fn get(&self, cache: Option<&str>, key: &[u8]) -> CacheResult<Option<Vec<u8>>> {
        self.cache(cache)?.get(key)
    }

    pub fn set(
        &self,
        cache: Option<&str>,
        key: &[u8],
        value: &[u8],
        expires: u64,
        flags: Flags,
    ) -> CacheResult<()> {
        self.cache(cache)?.set(key, value, expires, flags)
    }

    pub fn delete(&self, cache: Option<&str>, key: &[u8], flags: Flags) -> CacheResult<()> {
        self.cache(cache)?.delete(key, flags)
    }

    pub fn exists(&self, cache: Option<&str>, key: &[u8]) -> CacheResult<bool> {
        self.cache(cache)?.exists(key)
    }

    pub fn keys(&self, cache: Option<&str>) -> CacheResult<Keys<'_>> {
        Ok(self.cache(cache)?.keys())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(name: &str) -> Arc<ShmCache> {
        Arc::new(
            ShmCache::builder()
                .name(name)
                .max_items(4)
                .blocksize(8)
                .keysize(8)
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_default_is_first() {
        let registry = CacheRegistry::new(vec![cache("first"), cache("second")]).unwrap();
        assert_eq!(registry.cache(None).unwrap().name(), "first");
        assert_eq!(registry.cache(Some("")).unwrap().name(), "first");
        assert_eq!(registry.cache(Some("second")).unwrap().name(), "second");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_unknown_name() {
        let registry = CacheRegistry::new(vec![cache("first")]).unwrap();
        assert!(matches!(
            registry.get(Some("nope"), b"k"),
            Err(CacheError::UnknownCache(name)) if name == "nope"
        ));
    }

    #[test]
    fn test_duplicate_names() {
        assert!(matches!(
            CacheRegistry::new(vec![cache("a"), cache("a")]),
            Err(CacheError::Config(ConfigError::DuplicateName(_)))
        ));
    }

    #[test]
    fn test_name_addressed_operations() {
        let registry = CacheRegistry::new(vec![cache("first"), cache("second")]).unwrap();
        registry
            .set(Some("second"), b"k", b"v", 0, Flags::NONE)
            .unwrap();

        assert!(registry.exists(Some("second"), b"k").unwrap());
        assert!(!registry.exists(None, b"k").unwrap());
        assert_eq!(
            registry.get(Some("second"), b"k").unwrap(),
            Some(b"v".to_vec())
        );
        assert_eq!(registry.keys(Some("second")).unwrap().count(), 1);

        registry.delete(Some("second"), b"k", Flags::NONE).unwrap();
        assert_eq!(registry.get(Some("second"), b"k").unwrap(), None);
    }
}
