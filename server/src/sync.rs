//! Startup synchronization from a peer's remote server.
//!
//! The client sends a dump request (`111, 0, 6`), expects a `111, _, 7`
//! reply carrying the dump geometry, then streams the raw arena into the
//! local instance and rebuilds its index.

use crate::remote::{Endpoint, Stream};
use protocol_cache::{Command, DumpMeta, HEADER_LEN, PacketHeader, ParseError};
use shm_cache::{CacheError, RecoveryStats, ShmCache};
use std::io::{self, BufReader, Read, Write};
use std::time::Duration;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("unable to reach {address}: {source}")]
    Connect { address: String, source: io::Error },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("unexpected dump reply (modifier1 {modifier1}, modifier2 {modifier2})")]
    UnexpectedReply { modifier1: u8, modifier2: u8 },
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Replace the content of `cache` with a dump pulled from `address`.
pub fn sync_from(
    cache: &ShmCache,
    address: &str,
    timeout: Duration,
) -> Result<RecoveryStats, SyncError> {
    let connect = || -> io::Result<Stream> {
        let endpoint = Endpoint::resolve(address)?;
        Stream::connect(&endpoint, timeout)
    };
    let mut stream = connect().map_err(|source| SyncError::Connect {
        address: address.to_string(),
        source,
    })?;

    stream.write_all(&PacketHeader::request(Command::Dump, 0).encode())?;
    stream.flush()?;

    let stats = receive_dump(cache, &mut BufReader::new(stream))?;
    info!(cache = %cache.name(), peer = address, items = stats.items, "cache synchronized");
    Ok(stats)
}

/// Read a dump reply from `reader` into `cache`.
pub fn receive_dump<R: Read>(cache: &ShmCache, reader: &mut R) -> Result<RecoveryStats, SyncError> {
    let mut head = [0u8; HEADER_LEN];
    reader.read_exact(&mut head)?;
    let header = PacketHeader::parse(&head)?;
    if header.command() != Some(Command::DumpReply) {
        return Err(SyncError::UnexpectedReply {
            modifier1: header.modifier1,
            modifier2: header.modifier2,
        });
    }

    let mut body = vec![0u8; header.pktsize as usize];
    reader.read_exact(&mut body)?;
    let meta = DumpMeta::parse(&body)?;

    Ok(cache.restore_dump(&meta, reader)?)
}
