//! Fixed-capacity key/value cache over a memory-mapped slot arena.
//!
//! A cache instance preallocates `max_items` slots and one value block per
//! slot, either in anonymous memory or in a backing file that survives
//! restarts. Keys are located through a hash index whose collision chains
//! are threaded through the slot headers, so the index can be rebuilt from
//! the arena alone.
//!
//! # Architecture
//!
//! ```text
//! +---------------------------------------------+
//! |                 ShmCache                    |
//! |                                             |
//! |  RwLock<Store>                              |
//! |  +---------------------------------------+  |
//! |  | HashIndex   bucket -> chain head      |  |
//! |  | FreeList    released stack + watermark|  |
//! |  | Arena       slot headers + keys       |  |
//! |  |             value blocks              |  |
//! |  +---------------------------------------+  |
//! |  hit counters (atomic, per slot)            |
//! |  Replicator (optional)                      |
//! +---------------------------------------------+
//!          |                      ^
//!          v  UDP datagrams       |
//!    peer ReplicationReceiver     Sweeper (expiration)
//! ```
//!
//! - The cache never evicts. An insert into a full cache fails with
//!   [`CacheError::CacheFull`] until an item is deleted or expires.
//! - Expired items stay readable until a [`Sweeper`] pass removes them.
//! - Mutations without [`Flags::LOCAL`] are pushed to peers through a
//!   [`Replicator`]; replication is best effort and unordered.
//!
//! # Example
//!
//! ```
//! use shm_cache::{CacheError, Flags, ShmCache};
//!
//! let cache = ShmCache::builder()
//!     .max_items(2)
//!     .blocksize(16)
//!     .keysize(8)
//!     .build()
//!     .unwrap();
//!
//! cache.set(b"a", b"1", 0, Flags::NONE).unwrap();
//! cache.set(b"b", b"2", 0, Flags::NONE).unwrap();
//! assert!(matches!(
//!     cache.set(b"c", b"3", 0, Flags::NONE),
//!     Err(CacheError::CacheFull)
//! ));
//!
//! cache.delete(b"a", Flags::NONE).unwrap();
//! cache.set(b"c", b"3", 0, Flags::NONE).unwrap();
//! assert_eq!(cache.get(b"c").unwrap(), Some(b"3".to_vec()));
//! ```

#![warn(clippy::all)]

mod arena;
mod cache;
mod config;
mod error;
mod flags;
mod freelist;
mod hash;
mod index;
mod recovery;
mod registry;
mod replication;
mod slot;
mod sweeper;

pub use cache::{CacheStats, KeyCursor, Keys, ShmCache, ShmCacheBuilder};
pub use config::{
    CacheConfig, DEFAULT_BLOCKSIZE, DEFAULT_HASHSIZE, DEFAULT_KEYSIZE, DEFAULT_NAME, MAX_KEYSIZE,
};
pub use error::{CacheError, CacheResult, ConfigError};
pub use flags::Flags;
pub use hash::{HashAlgorithm, HashFn, djb33x, murmur2};
pub use recovery::RecoveryStats;
pub use registry::CacheRegistry;
pub use replication::{Outcome, ReplicationReceiver, Replicator, UdpReplicator};
pub use slot::SLOT_HEADER_SIZE;
pub use sweeper::{DEFAULT_SWEEP_INTERVAL, Sweeper};
