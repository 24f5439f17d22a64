//! Engine behavior tests through the public API.

use shm_cache::{CacheError, CacheRegistry, Flags, HashAlgorithm, ShmCache, Sweeper};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

fn small_cache(max_items: u64) -> ShmCache {
    ShmCache::builder()
        .max_items(max_items)
        .blocksize(16)
        .keysize(8)
        .build()
        .expect("Failed to create cache")
}

fn same_bucket(_: &[u8]) -> u32 {
    42
}

// =============================================================================
// Capacity
// =============================================================================

#[test]
fn test_two_slot_scenario() {
    let cache = small_cache(2);

    cache.set(b"a", b"1", 0, Flags::NONE).unwrap();
    cache.set(b"b", b"2", 0, Flags::NONE).unwrap();
    assert!(matches!(
        cache.set(b"c", b"3", 0, Flags::NONE),
        Err(CacheError::CacheFull)
    ));

    cache.delete(b"a", Flags::NONE).unwrap();
    cache.set(b"c", b"3", 0, Flags::NONE).unwrap();

    assert_eq!(cache.get(b"a").unwrap(), None);
    assert_eq!(cache.get(b"b").unwrap(), Some(b"2".to_vec()));
    assert_eq!(cache.get(b"c").unwrap(), Some(b"3".to_vec()));
}

#[test]
fn test_capacity_is_exactly_max_items() {
    let cache = small_cache(100);
    for i in 0..100u32 {
        cache
            .set(&i.to_le_bytes(), b"v", 0, Flags::NONE)
            .expect("insert within capacity");
    }
    assert!(matches!(
        cache.set(b"extra", b"v", 0, Flags::NONE),
        Err(CacheError::CacheFull)
    ));

    // updates of existing keys still succeed on a full cache
    cache
        .set(&7u32.to_le_bytes(), b"w", 0, Flags::UPDATE)
        .unwrap();
    assert_eq!(cache.get(&7u32.to_le_bytes()).unwrap(), Some(b"w".to_vec()));
}

// =============================================================================
// Collision chains
// =============================================================================

#[test]
fn test_collision_chain_survives_middle_delete() {
    let cache = ShmCache::builder()
        .max_items(16)
        .blocksize(16)
        .keysize(8)
        .hashsize(16)
        .hash(HashAlgorithm::Custom(same_bucket))
        .build()
        .unwrap();

    let keys: Vec<Vec<u8>> = (0..10u8).map(|i| vec![b'k', b'0' + i]).collect();
    for key in &keys {
        cache.set(key, key, 0, Flags::NONE).unwrap();
    }

    cache.delete(&keys[5], Flags::NONE).unwrap();
    cache.delete(&keys[0], Flags::NONE).unwrap();
    cache.delete(&keys[9], Flags::NONE).unwrap();

    for (i, key) in keys.iter().enumerate() {
        let expected = if [0, 5, 9].contains(&i) {
            None
        } else {
            Some(key.clone())
        };
        assert_eq!(cache.get(key).unwrap(), expected, "key {i}");
    }

    // freed slots rejoin the same chain
    cache.set(b"new", b"v", 0, Flags::NONE).unwrap();
    assert_eq!(cache.get(b"new").unwrap(), Some(b"v".to_vec()));
    assert_eq!(cache.len(), 8);
}

#[test]
fn test_expire_unlinks_chain_members() {
    let cache = ShmCache::builder()
        .max_items(8)
        .blocksize(16)
        .keysize(8)
        .hash(HashAlgorithm::Custom(same_bucket))
        .build()
        .unwrap();

    cache.set(b"a", b"1", 0, Flags::NONE).unwrap();
    cache.set(b"b", b"2", 10, Flags::ABSEXPIRE).unwrap();
    cache.set(b"c", b"3", 0, Flags::NONE).unwrap();

    assert_eq!(cache.expire(11).unwrap(), 1);
    assert_eq!(cache.get(b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(cache.get(b"b").unwrap(), None);
    assert_eq!(cache.get(b"c").unwrap(), Some(b"3".to_vec()));
}

// =============================================================================
// Expiration
// =============================================================================

#[test]
fn test_relative_expiry_with_sweeper() {
    let cache = Arc::new(small_cache(4));
    cache.set(b"k", b"v", 1, Flags::NONE).unwrap();
    assert!(cache.exists(b"k").unwrap());

    thread::sleep(Duration::from_millis(2500));
    let freed = Sweeper::new(cache.clone()).sweep_once().unwrap();

    assert_eq!(freed, 1);
    assert_eq!(cache.get(b"k").unwrap(), None);
    assert!(!cache.exists(b"k").unwrap());
}

// =============================================================================
// Backing store
// =============================================================================

#[test]
fn test_store_recovers_items_after_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cache.store");

    let build = || {
        ShmCache::builder()
            .name("persistent")
            .max_items(8)
            .blocksize(32)
            .keysize(16)
            .hashsize(4)
            .store(&path)
            .build()
            .unwrap()
    };

    {
        let cache = build();
        for i in 0..6u8 {
            cache.set(&[b'k', i], &[i; 4], 0, Flags::NONE).unwrap();
        }
        cache.delete(&[b'k', 2], Flags::NONE).unwrap();
        cache.get(&[b'k', 1]).unwrap();
        cache.flush().unwrap();
    }

    let cache = build();
    assert_eq!(cache.len(), 5);
    for i in [0u8, 1, 3, 4, 5] {
        assert_eq!(cache.get(&[b'k', i]).unwrap(), Some(vec![i; 4]));
    }
    assert_eq!(cache.get(&[b'k', 2]).unwrap(), None);

    // the freed slot and the untouched ones are all allocatable again
    for i in 10..13u8 {
        cache.set(&[b'k', i], b"v", 0, Flags::NONE).unwrap();
    }
    assert!(matches!(
        cache.set(b"full", b"v", 0, Flags::NONE),
        Err(CacheError::CacheFull)
    ));
}

#[test]
fn test_store_with_other_geometry_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cache.store");

    ShmCache::builder()
        .max_items(8)
        .blocksize(32)
        .store(&path)
        .build()
        .unwrap();

    let err = ShmCache::builder()
        .max_items(9)
        .blocksize(32)
        .store(&path)
        .build()
        .unwrap_err();
    assert!(matches!(err, CacheError::StoreSizeMismatch { .. }));
}

#[test]
fn test_store_with_other_hash_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cache.store");

    let build = |hash| {
        ShmCache::builder()
            .name("hashed")
            .max_items(8)
            .blocksize(32)
            .keysize(16)
            .hashsize(8)
            .hash(hash)
            .store(&path)
            .build()
    };

    {
        let cache = build(HashAlgorithm::Djb33x).unwrap();
        cache.set(b"k", b"1", 0, Flags::NONE).unwrap();
        cache.flush().unwrap();
    }

    let err = build(HashAlgorithm::Murmur2).unwrap_err();
    assert!(matches!(
        err,
        CacheError::Config(shm_cache::ConfigError::StoreHashMismatch { hash: "murmur2", .. })
    ));

    // the store is untouched and still opens with its own hash
    let cache = build(HashAlgorithm::Djb33x).unwrap();
    assert_eq!(cache.get(b"k").unwrap(), Some(b"1".to_vec()));
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn test_concurrent_writers_and_readers() {
    let cache = Arc::new(
        ShmCache::builder()
            .max_items(1024)
            .blocksize(16)
            .keysize(16)
            .hashsize(64)
            .build()
            .unwrap(),
    );

    let handles: Vec<_> = (0..4u32)
        .map(|t| {
            let cache = cache.clone();
            thread::spawn(move || {
                for i in 0..200u32 {
                    let key = format!("{t}:{i}");
                    cache.set(key.as_bytes(), &i.to_le_bytes(), 0, Flags::NONE).unwrap();
                    assert_eq!(
                        cache.get(key.as_bytes()).unwrap(),
                        Some(i.to_le_bytes().to_vec())
                    );
                    if i % 2 == 0 {
                        cache.delete(key.as_bytes(), Flags::NONE).unwrap();
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(cache.len(), 400);
    assert_eq!(cache.keys().count(), 400);
}

// =============================================================================
// Registry
// =============================================================================

#[test]
fn test_registry_routes_by_name() {
    let sessions = Arc::new(
        ShmCache::builder()
            .name("sessions")
            .max_items(4)
            .blocksize(16)
            .keysize(8)
            .build()
            .unwrap(),
    );
    let pages = Arc::new(
        ShmCache::builder()
            .name("pages")
            .max_items(4)
            .blocksize(16)
            .keysize(8)
            .build()
            .unwrap(),
    );
    let registry = CacheRegistry::new(vec![sessions.clone(), pages.clone()]).unwrap();

    registry.set(None, b"k", b"s", 0, Flags::NONE).unwrap();
    registry.set(Some("pages"), b"k", b"p", 0, Flags::NONE).unwrap();

    assert_eq!(sessions.get(b"k").unwrap(), Some(b"s".to_vec()));
    assert_eq!(pages.get(b"k").unwrap(), Some(b"p".to_vec()));
    assert!(matches!(
        registry.exists(Some("missing"), b"k"),
        Err(CacheError::UnknownCache(_))
    ));
}
