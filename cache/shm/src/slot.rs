//! Slot addressing and the on-arena slot header.
//!
//! Each slot occupies `SLOT_HEADER_SIZE + keysize` bytes in the slot region:
//!
//! ```text
//! +--------+---------+---------+---------+--------+--------+--------+--------+-----------+
//! | hash   | keysize | valsize | expires | hits   | flags  | prev   | next   | key bytes |
//! | u32    | u32     | u64     | u64     | u64    | u64    | u64    | u64    | keysize   |
//! +--------+---------+---------+---------+--------+--------+--------+--------+-----------+
//! ```
//!
//! All fields are little-endian. `prev`/`next` hold slot indices, where 0
//! means "no slot". A `keysize` of 0 marks the slot as free.

use std::num::NonZeroU64;

use crate::Flags;

/// Size of the fixed slot header in bytes.
pub const SLOT_HEADER_SIZE: usize = 56;

const HASH: usize = 0;
const KEYSIZE: usize = 4;
const VALSIZE: usize = 8;
const EXPIRES: usize = 16;
const HITS: usize = 24;
const FLAGS: usize = 32;
const PREV: usize = 40;
const NEXT: usize = 48;

/// Index of an occupied or allocatable slot. Slot 0 is the reserved
/// sentinel and can never be represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotIndex(NonZeroU64);

impl SlotIndex {
    /// Wrap a raw index, returning `None` for the sentinel.
    #[inline]
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(SlotIndex)
    }

    /// Raw index.
    #[inline]
    pub fn get(self) -> u64 {
        self.0.get()
    }

    #[inline]
    pub(crate) fn as_usize(self) -> usize {
        self.0.get() as usize
    }
}

/// Raw encoding of an optional slot link.
#[inline]
pub(crate) fn link_bits(link: Option<SlotIndex>) -> u64 {
    link.map_or(0, SlotIndex::get)
}

/// Decoded slot header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotHeader {
    pub hash: u32,
    pub keysize: u32,
    pub valsize: u64,
    /// Absolute expiry in epoch seconds, 0 for never.
    pub expires: u64,
    pub hits: u64,
    pub flags: Flags,
    pub prev: Option<SlotIndex>,
    pub next: Option<SlotIndex>,
}

impl SlotHeader {
    /// Returns true if the slot holds an item.
    #[inline]
    pub fn is_occupied(&self) -> bool {
        self.keysize != 0
    }

    /// Returns true if the item carries an expiry that lies before `now`.
    #[inline]
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires != 0 && self.expires < now
    }

    /// Read a header from the first [`SLOT_HEADER_SIZE`] bytes of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            hash: read_u32(bytes, HASH),
            keysize: read_u32(bytes, KEYSIZE),
            valsize: read_u64(bytes, VALSIZE),
            expires: read_u64(bytes, EXPIRES),
            hits: read_u64(bytes, HITS),
            flags: Flags::from_bits(read_u64(bytes, FLAGS)),
            prev: SlotIndex::new(read_u64(bytes, PREV)),
            next: SlotIndex::new(read_u64(bytes, NEXT)),
        }
    }

    /// Write the header into the first [`SLOT_HEADER_SIZE`] bytes of `bytes`.
    pub fn write_to(&self, bytes: &mut [u8]) {
        write_u32(bytes, HASH, self.hash);
        write_u32(bytes, KEYSIZE, self.keysize);
        write_u64(bytes, VALSIZE, self.valsize);
        write_u64(bytes, EXPIRES, self.expires);
        write_u64(bytes, HITS, self.hits);
        write_u64(bytes, FLAGS, self.flags.bits());
        write_u64(bytes, PREV, link_bits(self.prev));
        write_u64(bytes, NEXT, link_bits(self.next));
    }

    #[inline]
    pub(crate) fn set_prev(bytes: &mut [u8], prev: Option<SlotIndex>) {
        write_u64(bytes, PREV, link_bits(prev));
    }

    #[inline]
    pub(crate) fn set_next(bytes: &mut [u8], next: Option<SlotIndex>) {
        write_u64(bytes, NEXT, link_bits(next));
    }

    #[inline]
    pub(crate) fn set_hits(bytes: &mut [u8], hits: u64) {
        write_u64(bytes, HITS, hits);
    }
}

#[inline]
fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(buf)
}

#[inline]
fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(buf)
}

#[inline]
fn write_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[inline]
fn write_u64(bytes: &mut [u8], offset: usize, value: u64) {
    bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_is_not_an_index() {
        assert!(SlotIndex::new(0).is_none());
        assert_eq!(SlotIndex::new(9).map(SlotIndex::get), Some(9));
        assert_eq!(link_bits(None), 0);
    }

    #[test]
    fn test_header_layout() {
        let header = SlotHeader {
            hash: 0xAABBCCDD,
            keysize: 3,
            valsize: 5,
            expires: 0,
            hits: 0,
            flags: Flags::UNGETTABLE,
            prev: SlotIndex::new(2),
            next: None,
        };
        let mut bytes = [0u8; SLOT_HEADER_SIZE];
        header.write_to(&mut bytes);

        assert_eq!(&bytes[0..4], &[0xDD, 0xCC, 0xBB, 0xAA]);
        assert_eq!(bytes[4], 3);
        assert_eq!(bytes[PREV], 2);
        assert_eq!(SlotHeader::from_bytes(&bytes), header);
    }

    #[test]
    fn test_link_updates_leave_other_fields() {
        let header = SlotHeader {
            hash: 1,
            keysize: 1,
            valsize: 1,
            ..Default::default()
        };
        let mut bytes = [0u8; SLOT_HEADER_SIZE];
        header.write_to(&mut bytes);

        SlotHeader::set_next(&mut bytes, SlotIndex::new(4));
        SlotHeader::set_prev(&mut bytes, SlotIndex::new(3));
        SlotHeader::set_hits(&mut bytes, 11);

        let decoded = SlotHeader::from_bytes(&bytes);
        assert_eq!(decoded.next, SlotIndex::new(4));
        assert_eq!(decoded.prev, SlotIndex::new(3));
        assert_eq!(decoded.hits, 11);
        assert_eq!(decoded.hash, 1);
    }

    #[test]
    fn test_expiry() {
        let mut header = SlotHeader::default();
        assert!(!header.is_expired(100));
        header.expires = 99;
        assert!(header.is_expired(100));
        header.expires = 100;
        assert!(!header.is_expired(100));
    }
}
