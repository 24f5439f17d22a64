//! The cache instance and its builder.

use std::fmt;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use protocol_cache::{DumpMeta, Mutation};
use tracing::{info, warn};

use crate::arena::{Arena, Geometry};
use crate::freelist::FreeList;
use crate::index::{HashIndex, Probe};
use crate::recovery::{self, RecoveryStats};
use crate::replication::Replicator;
use crate::slot::{SlotHeader, SlotIndex};
use crate::{CacheConfig, CacheError, CacheResult, ConfigError, Flags, HashAlgorithm};

/// Current time in epoch seconds.
pub(crate) fn now_secs() -> u64 {
    clocksource::coarse::UnixInstant::now()
        .duration_since(clocksource::coarse::UnixInstant::EPOCH)
        .as_secs() as u64
}

/// Mutable state guarded by the instance lock.
pub(crate) struct Store {
    pub(crate) arena: Arena,
    pub(crate) index: HashIndex,
    pub(crate) free: FreeList,
    pub(crate) items: u64,
}

impl Store {
    #[inline]
    fn probe(&self, hash: u32, key: &[u8]) -> CacheResult<Probe> {
        self.index.probe(&self.arena, hash, key)
    }

    /// Unlink an occupied slot, zero its header and hand it back to the
    /// allocator. Shared by delete, expiration and recovery cleanup.
    pub(crate) fn remove(&mut self, idx: SlotIndex, header: &SlotHeader) -> CacheResult<()> {
        self.index.unlink(&mut self.arena, idx, header)?;
        self.arena.clear_header(idx);
        self.free.release(idx);
        self.items = self.items.saturating_sub(1);
        Ok(())
    }

    /// Forget every item.
    pub(crate) fn reset(&mut self) {
        self.arena.clear_slots();
        self.index.clear();
        self.free.reset();
        self.items = 0;
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    full: AtomicU64,
    expired: AtomicU64,
    replicated: AtomicU64,
}

/// Point-in-time counters of one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Occupied slots.
    pub items: u64,
    /// Usable slots.
    pub max_items: u64,
    pub hits: u64,
    pub misses: u64,
    /// Inserts rejected because every slot was occupied.
    pub full: u64,
    /// Items removed by expiration passes.
    pub expired: u64,
    /// Mutations handed to the replicator.
    pub replicated: u64,
}

/// Resume position for [`ShmCache::next_key`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyCursor(u64);

impl KeyCursor {
    /// Cursor positioned before the first slot.
    pub const START: KeyCursor = KeyCursor(1);
}

impl Default for KeyCursor {
    fn default() -> Self {
        Self::START
    }
}

/// A fixed-capacity key/value cache over a memory-mapped slot arena.
///
/// All slots, the hash index and the free list are guarded by a single
/// reader/writer lock. Lookups take the read lock, mutations take the
/// write lock, and nothing holds the lock across a network operation.
///
/// # Example
///
/// ```
/// use shm_cache::{Flags, ShmCache};
///
/// let cache = ShmCache::builder()
///     .max_items(16)
///     .blocksize(64)
///     .keysize(32)
///     .build()
///     .unwrap();
///
/// cache.set(b"greeting", b"hello", 0, Flags::NONE).unwrap();
/// assert_eq!(cache.get(b"greeting").unwrap(), Some(b"hello".to_vec()));
/// ```
pub struct ShmCache {
    config: CacheConfig,
    store: RwLock<Store>,
    /// Per-slot hit counters, indexed by slot.
    slot_hits: Box<[AtomicU64]>,
    counters: Counters,
    replicator: Option<Arc<dyn Replicator>>,
}

impl ShmCache {
    /// Create a new builder with default settings.
    pub fn builder() -> ShmCacheBuilder {
        ShmCacheBuilder::new()
    }

    /// Instance name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Configuration the instance was built from.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Number of usable slots.
    pub fn capacity(&self) -> u64 {
        self.config.max_items
    }

    /// Number of stored items.
    pub fn len(&self) -> u64 {
        self.store.read().items
    }

    /// Returns true if no item is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the arena in bytes, which is also the size of a dump body.
    pub fn arena_len(&self) -> usize {
        self.store.read().arena.geometry().total_len
    }

    fn key_in_bounds(&self, key: &[u8]) -> bool {
        !key.is_empty() && key.len() as u64 <= self.config.keysize
    }

    /// Copy the value stored under `key`.
    pub fn get(&self, key: &[u8]) -> CacheResult<Option<Vec<u8>>> {
        self.with_value(key, |value| value.to_vec())
    }

    /// Run `f` over the stored value while the read lock is held.
    ///
    /// Items flagged [`Flags::UNGETTABLE`] are reported as absent but do
    /// not count as a miss.
    pub fn with_value<R>(&self, key: &[u8], f: impl FnOnce(&[u8]) -> R) -> CacheResult<Option<R>> {
        if !self.key_in_bounds(key) {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        let store = self.store.read();
        let hash = store.index.hash(key);
        match store.probe(hash, key)? {
            Probe::Found { idx, header } => {
                if header.flags.contains(Flags::UNGETTABLE) {
                    return Ok(None);
                }
                self.slot_hits[idx.as_usize()].fetch_add(1, Ordering::Relaxed);
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(f(store.arena.value(idx, header.valsize))))
            }
            Probe::Vacant { .. } => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    /// Returns true if `key` is stored, gettable or not.
    pub fn exists(&self, key: &[u8]) -> CacheResult<bool> {
        Ok(self.slot_of(key)?.is_some())
    }

    /// Slot currently holding `key`.
    #[doc(hidden)]
    pub fn slot_of(&self, key: &[u8]) -> CacheResult<Option<u64>> {
        if !self.key_in_bounds(key) {
            return Ok(None);
        }
        let store = self.store.read();
        let hash = store.index.hash(key);
        Ok(match store.probe(hash, key)? {
            Probe::Found { idx, .. } => Some(idx.get()),
            Probe::Vacant { .. } => None,
        })
    }

    /// Store `value` under `key`.
    ///
    /// `expires` is relative seconds (0 for never) unless
    /// [`Flags::ABSEXPIRE`] is set. An existing key is only overwritten
    /// with [`Flags::UPDATE`]; without it the call succeeds and changes
    /// nothing. With [`Flags::MATH`] the value is an 8 byte little-endian
    /// operand combined with the stored number by the selected operation.
    pub fn set(&self, key: &[u8], value: &[u8], expires: u64, flags: Flags) -> CacheResult<()> {
        if !self.key_in_bounds(key) {
            return Err(CacheError::InvalidArgument("key length out of bounds"));
        }
        if value.is_empty() || value.len() as u64 > self.config.blocksize {
            return Err(CacheError::InvalidArgument("value length out of bounds"));
        }
        let math = flags.contains(Flags::MATH);
        if math {
            if value.len() != 8 {
                return Err(CacheError::InvalidArgument("math operand must be 8 bytes"));
            }
            if !has_math_op(flags) {
                return Err(CacheError::InvalidArgument("missing math operation"));
            }
        }

        let absolute = absolute_expiry(expires, flags, now_secs());
        let result: [u8; 8];
        let (stored, stored_expires): (&[u8], u64) = {
            let mut guard = self.store.write();
            let store = &mut *guard;
            let hash = store.index.hash(key);

            match store.probe(hash, key)? {
                Probe::Vacant { tail } => {
                    let Some(idx) = store.free.allocate() else {
                        self.counters.full.fetch_add(1, Ordering::Relaxed);
                        warn!(cache = %self.config.name, "cache is full");
                        return Err(CacheError::CacheFull);
                    };

                    let header = SlotHeader {
                        hash,
                        keysize: key.len() as u32,
                        valsize: value.len() as u64,
                        expires: absolute,
                        hits: 0,
                        flags,
                        prev: tail,
                        next: None,
                    };
                    store.arena.write_header(idx, &header);
                    store.arena.write_key(idx, key);
                    store.arena.write_value(idx, value);
                    store.index.link(&mut store.arena, idx, hash, tail);
                    store.items += 1;
                    self.slot_hits[idx.as_usize()].store(0, Ordering::Relaxed);

                    (value, absolute)
                }
                Probe::Found { idx, mut header } if flags.contains(Flags::UPDATE) => {
                    if !flags.contains(Flags::FIXEXPIRE) {
                        header.expires = absolute;
                    }

                    let stored: &[u8] = if math {
                        let current = store.arena.value(idx, header.valsize);
                        let current = if current.len() == 8 {
                            i64::from_le_bytes(as_operand(current))
                        } else {
                            0
                        };
                        let number = apply_math(flags, current, i64::from_le_bytes(as_operand(value)))?;
                        result = number.to_le_bytes();
                        &result
                    } else {
                        value
                    };

                    header.valsize = stored.len() as u64;
                    store.arena.write_value(idx, stored);
                    store.arena.write_header(idx, &header);

                    (stored, header.expires)
                }
                Probe::Found { .. } => return Ok(()),
            }
        };

        if !flags.contains(Flags::LOCAL) {
            self.replicate(&Mutation::Set {
                key,
                value: stored,
                expires: stored_expires,
            });
        }
        Ok(())
    }

    /// Remove `key`. Returns [`CacheError::NotFound`] if it is absent.
    pub fn delete(&self, key: &[u8], flags: Flags) -> CacheResult<()> {
        if !self.key_in_bounds(key) {
            return Err(CacheError::NotFound);
        }

        {
            let mut store = self.store.write();
            let hash = store.index.hash(key);
            let Probe::Found { idx, header } = store.probe(hash, key)? else {
                return Err(CacheError::NotFound);
            };
            store.remove(idx, &header)?;
            self.slot_hits[idx.as_usize()].store(0, Ordering::Relaxed);
        }

        if !flags.contains(Flags::LOCAL) {
            self.replicate(&Mutation::Delete { key });
        }
        Ok(())
    }

    fn replicate(&self, mutation: &Mutation<'_>) {
        if let Some(replicator) = &self.replicator {
            replicator.replicate(&self.config.name, mutation);
            self.counters.replicated.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Remove every item whose expiry lies before `now`.
    ///
    /// The write lock is taken once per slot so foreground operations can
    /// interleave with a long pass. Expiration is never replicated.
    pub fn expire(&self, now: u64) -> CacheResult<u64> {
        let mut freed = 0;
        for raw in 1..=self.config.max_items {
            let Some(idx) = SlotIndex::new(raw) else {
                continue;
            };
            let mut store = self.store.write();
            let header = store.arena.header(idx);
            if header.is_occupied() && header.is_expired(now) {
                store.remove(idx, &header)?;
                self.slot_hits[idx.as_usize()].store(0, Ordering::Relaxed);
                freed += 1;
            }
        }
        self.counters.expired.fetch_add(freed, Ordering::Relaxed);
        Ok(freed)
    }

    /// Remove every item. Local only.
    pub fn clear(&self) {
        let mut store = self.store.write();
        store.reset();
        for hits in self.slot_hits.iter() {
            hits.store(0, Ordering::Relaxed);
        }
    }

    /// Return the first key at or after `cursor` together with the cursor
    /// to resume from.
    pub fn next_key(&self, cursor: KeyCursor) -> Option<(Vec<u8>, KeyCursor)> {
        let store = self.store.read();
        let mut raw = cursor.0.max(1);
        while raw <= self.config.max_items {
            if let Some(idx) = SlotIndex::new(raw) {
                let header = store.arena.header(idx);
                if header.is_occupied() {
                    let key = store.arena.key(idx, header.keysize).to_vec();
                    return Some((key, KeyCursor(raw + 1)));
                }
            }
            raw += 1;
        }
        None
    }

    /// Iterate over the stored keys.
    ///
    /// The lock is only held while each key is fetched, so items mutated
    /// during the scan may be skipped or seen twice.
    pub fn keys(&self) -> Keys<'_> {
        Keys {
            cache: self,
            cursor: Some(KeyCursor::START),
        }
    }

    /// Counter snapshot.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            items: self.len(),
            max_items: self.config.max_items,
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            full: self.counters.full.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
            replicated: self.counters.replicated.load(Ordering::Relaxed),
        }
    }

    fn store_hits(&self, store: &mut Store) {
        for raw in 1..=self.config.max_items {
            let Some(idx) = SlotIndex::new(raw) else {
                continue;
            };
            if store.arena.header(idx).is_occupied() {
                let hits = self.slot_hits[idx.as_usize()].load(Ordering::Relaxed);
                SlotHeader::set_hits(store.arena.header_bytes_mut(idx), hits);
            }
        }
    }

    /// Write hit counters into the slot headers and flush a file-backed
    /// arena to its store.
    pub fn flush(&self) -> CacheResult<()> {
        let mut store = self.store.write();
        self.store_hits(&mut store);
        store.arena.flush()?;
        Ok(())
    }

    /// Geometry announced ahead of a dump.
    pub fn dump_meta(&self) -> DumpMeta {
        DumpMeta {
            items: self.config.max_items,
            blocksize: self.config.blocksize,
            keysize: Some(self.config.keysize),
            hashsize: Some(self.config.hashsize),
            hash: Some(self.config.hash.name().to_string()),
        }
    }

    /// Write the raw arena to `writer` while holding the write lock.
    pub fn write_dump<W: Write>(&self, writer: &mut W) -> CacheResult<()> {
        let mut store = self.store.write();
        self.store_hits(&mut store);
        writer.write_all(store.arena.as_bytes())?;
        writer.flush()?;
        Ok(())
    }

    fn check_meta(&self, meta: &DumpMeta) -> CacheResult<()> {
        let checks = [
            ("items", self.config.max_items, Some(meta.items)),
            ("blocksize", self.config.blocksize, Some(meta.blocksize)),
            ("keysize", self.config.keysize, meta.keysize),
            ("hashsize", self.config.hashsize, meta.hashsize),
        ];
        for (field, expected, actual) in checks {
            if let Some(actual) = actual
                && actual != expected
            {
                return Err(CacheError::DumpMismatch {
                    field,
                    expected,
                    actual,
                });
            }
        }
        if let Some(actual) = &meta.hash
            && actual != self.config.hash.name()
        {
            return Err(CacheError::DumpHashMismatch {
                expected: self.config.hash.name().to_string(),
                actual: actual.clone(),
            });
        }
        Ok(())
    }

    fn wipe(&self, store: &mut Store) {
        store.arena.as_bytes_mut().fill(0);
        store.reset();
        for hits in self.slot_hits.iter() {
            hits.store(0, Ordering::Relaxed);
        }
    }

    /// Replace the arena with a dump read from `reader` and rebuild the
    /// index from it.
    ///
    /// If the dump is truncated, or its slots were hashed with another
    /// algorithm, the instance is left empty.
    pub fn restore_dump<R: Read>(&self, meta: &DumpMeta, reader: &mut R) -> CacheResult<RecoveryStats> {
        self.check_meta(meta)?;

        let mut store = self.store.write();
        if let Err(e) = reader.read_exact(store.arena.as_bytes_mut()) {
            self.wipe(&mut store);
            return Err(e.into());
        }

        let stats = recovery::rebuild(&mut store, &self.slot_hits);
        if stats.mismatched > 0 {
            self.wipe(&mut store);
            return Err(CacheError::ArenaHashMismatch {
                hash: self.config.hash.name(),
                mismatched: stats.mismatched,
            });
        }
        info!(cache = %self.config.name, items = stats.items, "cache restored from dump");
        Ok(stats)
    }
}

impl fmt::Debug for ShmCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShmCache")
            .field("name", &self.config.name)
            .field("max_items", &self.config.max_items)
            .field("items", &self.len())
            .finish()
    }
}

/// Iterator over the keys of a cache. See [`ShmCache::keys`].
pub struct Keys<'a> {
    cache: &'a ShmCache,
    cursor: Option<KeyCursor>,
}

impl Iterator for Keys<'_> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        let (key, next) = self.cache.next_key(self.cursor?)?;
        self.cursor = Some(next);
        Some(key)
    }
}

fn absolute_expiry(expires: u64, flags: Flags, now: u64) -> u64 {
    if expires == 0 || flags.contains(Flags::ABSEXPIRE) {
        expires
    } else {
        now.saturating_add(expires)
    }
}

fn has_math_op(flags: Flags) -> bool {
    [Flags::INC, Flags::DEC, Flags::MUL, Flags::DIV]
        .into_iter()
        .any(|op| flags.contains(op))
}

fn as_operand(bytes: &[u8]) -> [u8; 8] {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    buf
}

fn apply_math(flags: Flags, current: i64, operand: i64) -> CacheResult<i64> {
    if flags.contains(Flags::INC) {
        Ok(current.wrapping_add(operand))
    } else if flags.contains(Flags::DEC) {
        Ok(current.wrapping_sub(operand))
    } else if flags.contains(Flags::MUL) {
        Ok(current.wrapping_mul(operand))
    } else if flags.contains(Flags::DIV) {
        if operand == 0 {
            return Err(CacheError::InvalidArgument("division by zero"));
        }
        Ok(current.wrapping_div(operand))
    } else {
        Err(CacheError::InvalidArgument("missing math operation"))
    }
}

/// Builder for [`ShmCache`].
pub struct ShmCacheBuilder {
    config: CacheConfig,
    replicator: Option<Arc<dyn Replicator>>,
}

impl Default for ShmCacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ShmCacheBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::from_config(CacheConfig::default())
    }

    /// Start from an existing configuration.
    pub fn from_config(config: CacheConfig) -> Self {
        Self {
            config,
            replicator: None,
        }
    }

    /// Set the instance name (default "default").
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set the number of usable slots. Required.
    pub fn max_items(mut self, max_items: u64) -> Self {
        self.config.max_items = max_items;
        self
    }

    /// Set the value block size, the largest value that can be stored.
    pub fn blocksize(mut self, blocksize: u64) -> Self {
        self.config.blocksize = blocksize;
        self
    }

    /// Set the number of value blocks. Must not be below `max_items`.
    pub fn blocks(mut self, blocks: u64) -> Self {
        self.config.blocks = Some(blocks);
        self
    }

    /// Set the largest key length.
    pub fn keysize(mut self, keysize: u64) -> Self {
        self.config.keysize = keysize;
        self
    }

    /// Set the number of hash buckets.
    pub fn hashsize(mut self, hashsize: u64) -> Self {
        self.config.hashsize = hashsize;
        self
    }

    /// Set the key hash function.
    pub fn hash(mut self, hash: HashAlgorithm) -> Self {
        self.config.hash = hash;
        self
    }

    /// Back the arena with a file. An existing file is recovered.
    pub fn store(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.store = Some(path.into());
        self
    }

    /// Broadcast non-local mutations through `replicator`.
    pub fn replicator(mut self, replicator: Arc<dyn Replicator>) -> Self {
        self.replicator = Some(replicator);
        self
    }

    /// Build the cache.
    pub fn build(self) -> CacheResult<ShmCache> {
        let config = self.config;
        config.validate()?;

        let geometry = Geometry::new(&config)?;
        let arena = Arena::open(geometry, config.store.as_deref())?;
        let existing = arena.is_existing();

        let mut store = Store {
            arena,
            index: HashIndex::new(geometry.hashsize, config.hash.function()),
            free: FreeList::new(config.max_items),
            items: 0,
        };

        let slot_hits: Box<[AtomicU64]> = (0..=config.max_items).map(|_| AtomicU64::new(0)).collect();

        info!(
            cache = %config.name,
            max_items = config.max_items,
            blocksize = config.blocksize,
            blocks = config.blocks(),
            keysize = config.keysize,
            hashsize = config.hashsize,
            hash = config.hash.name(),
            bytes = geometry.total_len,
            "cache initialized"
        );

        if let Some(path) = config.store.as_deref() {
            if existing {
                let stats = recovery::rebuild(&mut store, &slot_hits);
                if stats.mismatched > 0 {
                    warn!(
                        cache = %config.name,
                        path = %path.display(),
                        mismatched = stats.mismatched,
                        "cache store slots do not match the configured hash"
                    );
                    return Err(ConfigError::StoreHashMismatch {
                        name: config.name.clone(),
                        hash: config.hash.name(),
                    }
                    .into());
                }
                info!(
                    cache = %config.name,
                    path = %path.display(),
                    items = stats.items,
                    conflicts = stats.conflicts,
                    "cache store recovered"
                );
            } else {
                info!(cache = %config.name, path = %path.display(), "cache store created");
            }
        }

        Ok(ShmCache {
            config,
            store: RwLock::new(store),
            slot_hits,
            counters: Counters::default(),
            replicator: self.replicator,
        })
    }
}
