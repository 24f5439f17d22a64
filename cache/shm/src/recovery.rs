//! Index reconstruction from the arena.
//!
//! The slot headers are the ground truth: every occupied slot without a
//! `prev` link heads the chain of its bucket. Recovery runs when an arena
//! is mapped from an existing store and after a dump is restored. It does
//! not walk the chains, so a damaged chain surfaces later as a detected
//! loop.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::warn;

use crate::cache::Store;
use crate::slot::SlotIndex;

/// Statistics from a recovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Occupied slots found.
    pub items: u64,
    /// Chain heads installed in the index.
    pub heads: u64,
    /// Chain heads that found their bucket already taken.
    pub conflicts: u64,
    /// Slots whose sizes exceed the configured geometry. They are freed.
    pub corrupted: u64,
    /// Free slots handed to the allocator.
    pub free: u64,
    /// Occupied slots whose stored hash differs from the configured hash
    /// of their key.
    pub mismatched: u64,
}

/// Rebuild the index, free list and item count of `store` and load the
/// stored hit counters into `hits`.
pub(crate) fn rebuild(store: &mut Store, hits: &[AtomicU64]) -> RecoveryStats {
    let mut stats = RecoveryStats::default();
    let geometry = *store.arena.geometry();
    let mut free = Vec::new();

    store.index.clear();
    store.items = 0;

    for raw in 1..=geometry.max_items {
        let Some(idx) = SlotIndex::new(raw) else {
            continue;
        };
        let header = store.arena.header(idx);

        if !header.is_occupied() {
            hits[idx.as_usize()].store(0, Ordering::Relaxed);
            free.push(idx);
            continue;
        }

        if header.keysize as usize > geometry.keysize || header.valsize > geometry.blocksize as u64 {
            warn!(
                slot = raw,
                keysize = header.keysize,
                valsize = header.valsize,
                "dropping corrupted cache slot"
            );
            store.arena.clear_header(idx);
            hits[idx.as_usize()].store(0, Ordering::Relaxed);
            stats.corrupted += 1;
            free.push(idx);
            continue;
        }

        stats.items += 1;
        hits[idx.as_usize()].store(header.hits, Ordering::Relaxed);

        if store.index.hash(store.arena.key(idx, header.keysize)) != header.hash {
            stats.mismatched += 1;
        }

        if header.prev.is_none() {
            if store.index.adopt_head(idx, header.hash) {
                stats.heads += 1;
            } else {
                warn!(slot = raw, hash = header.hash, "bucket already has a chain head");
                stats.conflicts += 1;
            }
        }
    }

    stats.free = free.len() as u64;
    store.free.rebuild(free);
    store.items = stats.items;
    stats
}
