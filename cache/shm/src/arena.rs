//! Memory-mapped slot arena.
//!
//! The arena is one contiguous mapping laid out as:
//!
//! ```text
//! +----------------------------+
//! | slot 0 (sentinel)          |  SLOT_HEADER_SIZE + keysize bytes
//! | slot 1                     |
//! | ...                        |
//! | slot max_items             |
//! +----------------------------+
//! | value block 0              |  blocksize bytes
//! | value block 1              |
//! | ...                        |
//! | value block blocks         |
//! +----------------------------+
//! ```
//!
//! Slot `i` always stores its value in block `i`. The mapping is anonymous
//! unless a backing file is configured, in which case the file is created
//! at the exact arena size or must already have it.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};

use crate::slot::{SLOT_HEADER_SIZE, SlotHeader, SlotIndex};
use crate::{CacheConfig, CacheError, CacheResult, ConfigError};

/// Sizes derived from a [`CacheConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Geometry {
    pub max_items: u64,
    pub keysize: usize,
    pub blocksize: usize,
    pub hashsize: usize,
    /// Bytes per slot, header plus key.
    pub stride: usize,
    /// Bytes of the slot region.
    pub slots_len: usize,
    /// Bytes of the whole arena.
    pub total_len: usize,
}

impl Geometry {
    pub fn new(config: &CacheConfig) -> Result<Self, ConfigError> {
        let too_large = || ConfigError::ArenaTooLarge(config.name.clone());

        let keysize = usize::try_from(config.keysize).map_err(|_| too_large())?;
        let hashsize = usize::try_from(config.hashsize).map_err(|_| too_large())?;
        let blocksize = usize::try_from(config.blocksize).map_err(|_| too_large())?;
        let slots = usize::try_from(config.max_items)
            .ok()
            .and_then(|n| n.checked_add(1))
            .ok_or_else(too_large)?;
        let blocks = usize::try_from(config.blocks())
            .ok()
            .and_then(|n| n.checked_add(1))
            .ok_or_else(too_large)?;

        let stride = SLOT_HEADER_SIZE + keysize;
        let slots_len = stride.checked_mul(slots).ok_or_else(too_large)?;
        let total_len = blocksize
            .checked_mul(blocks)
            .and_then(|values| values.checked_add(slots_len))
            .ok_or_else(too_large)?;

        Ok(Self {
            max_items: config.max_items,
            keysize,
            blocksize,
            hashsize,
            stride,
            slots_len,
            total_len,
        })
    }
}

/// The mapped arena and its geometry.
pub(crate) struct Arena {
    geometry: Geometry,
    mmap: MmapMut,
    path: Option<PathBuf>,
    /// True if the backing file already existed and its contents are live.
    existing: bool,
}

impl Arena {
    /// Map an arena for `geometry`, anonymous or backed by `store`.
    pub fn open(geometry: Geometry, store: Option<&Path>) -> CacheResult<Self> {
        match store {
            None => {
                let mmap = MmapOptions::new().len(geometry.total_len).map_anon()?;
                Ok(Self {
                    geometry,
                    mmap,
                    path: None,
                    existing: false,
                })
            }
            Some(path) => Self::open_file(geometry, path),
        }
    }

    fn open_file(geometry: Geometry, path: &Path) -> CacheResult<Self> {
        let expected = geometry.total_len as u64;

        let existing = match fs::metadata(path) {
            Ok(meta) => {
                if !meta.is_file() || meta.len() != expected {
                    return Err(CacheError::StoreSizeMismatch {
                        path: path.to_path_buf(),
                        expected,
                        actual: meta.len(),
                    });
                }
                true
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(!existing)
            .truncate(false)
            .open(path)?;
        if !existing {
            file.set_len(expected)?;
        }

        // Safety: the file is sized to the arena and all access to the
        // mapping goes through the cache's lock.
        let mmap = unsafe { MmapOptions::new().len(geometry.total_len).map_mut(&file)? };

        Ok(Self {
            geometry,
            mmap,
            path: Some(path.to_path_buf()),
            existing,
        })
    }

    #[inline]
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// True if the mapping was opened over a pre-existing store.
    pub fn is_existing(&self) -> bool {
        self.existing
    }

    #[inline]
    fn slot_offset(&self, idx: usize) -> usize {
        idx * self.geometry.stride
    }

    #[inline]
    fn value_offset(&self, idx: usize) -> usize {
        self.geometry.slots_len + idx * self.geometry.blocksize
    }

    #[inline]
    pub fn header_bytes(&self, idx: SlotIndex) -> &[u8] {
        let start = self.slot_offset(idx.as_usize());
        &self.mmap[start..start + SLOT_HEADER_SIZE]
    }

    #[inline]
    pub fn header_bytes_mut(&mut self, idx: SlotIndex) -> &mut [u8] {
        let start = self.slot_offset(idx.as_usize());
        &mut self.mmap[start..start + SLOT_HEADER_SIZE]
    }

    #[inline]
    pub fn header(&self, idx: SlotIndex) -> SlotHeader {
        SlotHeader::from_bytes(self.header_bytes(idx))
    }

    #[inline]
    pub fn write_header(&mut self, idx: SlotIndex, header: &SlotHeader) {
        header.write_to(self.header_bytes_mut(idx));
    }

    /// Stored key of a slot. `len` is clamped to the configured key size.
    #[inline]
    pub fn key(&self, idx: SlotIndex, len: u32) -> &[u8] {
        let start = self.slot_offset(idx.as_usize()) + SLOT_HEADER_SIZE;
        let len = (len as usize).min(self.geometry.keysize);
        &self.mmap[start..start + len]
    }

    /// Stored value of a slot. `len` is clamped to the block size.
    #[inline]
    pub fn value(&self, idx: SlotIndex, len: u64) -> &[u8] {
        let start = self.value_offset(idx.as_usize());
        let len = usize::try_from(len)
            .unwrap_or(usize::MAX)
            .min(self.geometry.blocksize);
        &self.mmap[start..start + len]
    }

    pub fn write_key(&mut self, idx: SlotIndex, key: &[u8]) {
        let start = self.slot_offset(idx.as_usize()) + SLOT_HEADER_SIZE;
        self.mmap[start..start + key.len()].copy_from_slice(key);
    }

    pub fn write_value(&mut self, idx: SlotIndex, value: &[u8]) {
        let start = self.value_offset(idx.as_usize());
        self.mmap[start..start + value.len()].copy_from_slice(value);
    }

    /// Zero the header of a slot, marking it free.
    pub fn clear_header(&mut self, idx: SlotIndex) {
        self.header_bytes_mut(idx).fill(0);
    }

    /// Zero every slot header.
    pub fn clear_slots(&mut self) {
        let len = self.geometry.slots_len;
        self.mmap[..len].fill(0);
    }

    /// The whole arena.
    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.mmap
    }

    /// Synchronously write dirty pages back to the store.
    pub fn flush(&self) -> io::Result<()> {
        if self.path.is_some() {
            self.mmap.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Flags;
    use tempfile::tempdir;

    fn config() -> CacheConfig {
        CacheConfig {
            name: "arena".into(),
            max_items: 4,
            blocksize: 16,
            keysize: 8,
            hashsize: 4,
            ..Default::default()
        }
    }

    #[test]
    fn test_geometry() {
        let geometry = Geometry::new(&config()).unwrap();
        assert_eq!(geometry.stride, 64);
        assert_eq!(geometry.slots_len, 64 * 5);
        assert_eq!(geometry.total_len, 64 * 5 + 16 * 5);
    }

    #[test]
    fn test_geometry_overflow() {
        let mut config = config();
        config.max_items = u64::MAX;
        assert!(matches!(
            Geometry::new(&config),
            Err(ConfigError::ArenaTooLarge(_))
        ));
    }

    #[test]
    fn test_anonymous_slot_access() {
        let geometry = Geometry::new(&config()).unwrap();
        let mut arena = Arena::open(geometry, None).unwrap();
        assert!(!arena.is_existing());
        assert_eq!(arena.as_bytes().len(), geometry.total_len);

        let idx = SlotIndex::new(4).unwrap();
        let header = SlotHeader {
            hash: 7,
            keysize: 3,
            valsize: 5,
            flags: Flags::UNGETTABLE,
            ..Default::default()
        };
        arena.write_header(idx, &header);
        arena.write_key(idx, b"key");
        arena.write_value(idx, b"value");

        assert_eq!(arena.header(idx), header);
        assert_eq!(arena.key(idx, 3), b"key");
        assert_eq!(arena.value(idx, 5), b"value");
        // last value block ends exactly at the end of the mapping
        assert_eq!(&arena.as_bytes()[geometry.total_len - 16..][..5], b"value");

        arena.clear_header(idx);
        assert!(!arena.header(idx).is_occupied());
    }

    #[test]
    fn test_file_is_created_and_reopened() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.store");
        let geometry = Geometry::new(&config()).unwrap();
        let idx = SlotIndex::new(1).unwrap();

        {
            let mut arena = Arena::open(geometry, Some(&path)).unwrap();
            assert!(!arena.is_existing());
            arena.write_value(idx, b"persist");
            arena.flush().unwrap();
        }

        assert_eq!(
            fs::metadata(&path).unwrap().len(),
            geometry.total_len as u64
        );

        let arena = Arena::open(geometry, Some(&path)).unwrap();
        assert!(arena.is_existing());
        assert_eq!(arena.value(idx, 7), b"persist");
    }

    #[test]
    fn test_file_size_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.store");
        fs::write(&path, b"short").unwrap();

        let geometry = Geometry::new(&config()).unwrap();
        match Arena::open(geometry, Some(&path)) {
            Err(CacheError::StoreSizeMismatch { actual, expected, .. }) => {
                assert_eq!(actual, 5);
                assert_eq!(expected, geometry.total_len as u64);
            }
            _ => panic!("expected a size mismatch"),
        }
    }

    #[test]
    fn test_directory_is_rejected() {
        let dir = tempdir().unwrap();
        let geometry = Geometry::new(&config()).unwrap();
        assert!(matches!(
            Arena::open(geometry, Some(dir.path())),
            Err(CacheError::StoreSizeMismatch { .. })
        ));
    }
}
