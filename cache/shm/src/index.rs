//! Hash index with per-bucket chains threaded through the slot headers.
//!
//! Each bucket holds the head of a doubly linked chain. New items are
//! appended at the tail. Walks are bounded by `max_items` steps so that a
//! corrupted chain is reported instead of spinning forever.

use tracing::error;

use crate::arena::Arena;
use crate::hash::HashFn;
use crate::slot::{SlotHeader, SlotIndex, link_bits};
use crate::{CacheError, CacheResult};

/// Result of walking a bucket chain for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Probe {
    Found { idx: SlotIndex, header: SlotHeader },
    Vacant { tail: Option<SlotIndex> },
}

pub(crate) struct HashIndex {
    buckets: Box<[Option<SlotIndex>]>,
    hash: HashFn,
}

impl HashIndex {
    pub fn new(hashsize: usize, hash: HashFn) -> Self {
        Self {
            buckets: vec![None; hashsize].into_boxed_slice(),
            hash,
        }
    }

    #[inline]
    pub fn hash(&self, key: &[u8]) -> u32 {
        (self.hash)(key)
    }

    #[inline]
    fn bucket(&self, hash: u32) -> usize {
        hash as usize % self.buckets.len()
    }

    /// Walk the chain for `hash` looking for `key`.
    pub fn probe(&self, arena: &Arena, hash: u32, key: &[u8]) -> CacheResult<Probe> {
        let max_items = arena.geometry().max_items;
        let mut cursor = self.buckets[self.bucket(hash)];
        let mut tail = None;
        let mut steps = 0u64;

        while let Some(idx) = cursor {
            if idx.get() > max_items {
                return Err(loop_detected(idx.get(), link_bits(tail), 0));
            }
            let header = arena.header(idx);
            if steps >= max_items {
                return Err(loop_detected(
                    idx.get(),
                    link_bits(header.prev),
                    link_bits(header.next),
                ));
            }
            steps += 1;

            if header.hash == hash
                && header.keysize as usize == key.len()
                && arena.key(idx, header.keysize) == key
            {
                return Ok(Probe::Found { idx, header });
            }
            tail = Some(idx);
            cursor = header.next;
        }

        Ok(Probe::Vacant { tail })
    }

    /// Append `idx` after `tail` in the chain for `hash`.
    pub fn link(&mut self, arena: &mut Arena, idx: SlotIndex, hash: u32, tail: Option<SlotIndex>) {
        let bytes = arena.header_bytes_mut(idx);
        SlotHeader::set_prev(bytes, tail);
        SlotHeader::set_next(bytes, None);

        match tail {
            Some(tail) => SlotHeader::set_next(arena.header_bytes_mut(tail), Some(idx)),
            None => {
                let bucket = self.bucket(hash);
                self.buckets[bucket] = Some(idx);
            }
        }
    }

    /// Remove `idx` from its chain. `header` is the slot's current header.
    pub fn unlink(
        &mut self,
        arena: &mut Arena,
        idx: SlotIndex,
        header: &SlotHeader,
    ) -> CacheResult<()> {
        let max_items = arena.geometry().max_items;
        let out_of_range = |link: Option<SlotIndex>| link.is_some_and(|l| l.get() > max_items);
        if out_of_range(header.prev) || out_of_range(header.next) {
            return Err(loop_detected(
                idx.get(),
                link_bits(header.prev),
                link_bits(header.next),
            ));
        }

        match header.prev {
            Some(prev) => SlotHeader::set_next(arena.header_bytes_mut(prev), header.next),
            None => {
                let bucket = self.bucket(header.hash);
                if self.buckets[bucket] == Some(idx) {
                    self.buckets[bucket] = header.next;
                }
            }
        }
        if let Some(next) = header.next {
            SlotHeader::set_prev(arena.header_bytes_mut(next), header.prev);
        }
        Ok(())
    }

    /// Install `idx` as the head of the bucket for `hash` unless the bucket
    /// already has one. Returns false on conflict.
    pub fn adopt_head(&mut self, idx: SlotIndex, hash: u32) -> bool {
        let bucket = self.bucket(hash);
        match self.buckets[bucket] {
            Some(_) => false,
            None => {
                self.buckets[bucket] = Some(idx);
                true
            }
        }
    }

    pub fn clear(&mut self) {
        self.buckets.fill(None);
    }
}

fn loop_detected(slot: u64, prev: u64, next: u64) -> CacheError {
    error!(slot, prev, next, "cache loop detected");
    CacheError::LoopDetected { slot, prev, next }
}
