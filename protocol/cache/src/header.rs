use crate::{Command, MODIFIER1, ParseError};

/// Length of the fixed packet header.
pub const HEADER_LEN: usize = 4;

/// Largest body a header can announce.
pub const MAX_BODY_LEN: usize = u16::MAX as usize;

/// The 4 byte header that prefixes every packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Protocol marker, [`MODIFIER1`] for cache packets.
    pub modifier1: u8,
    /// Length of the body that follows the header.
    pub pktsize: u16,
    /// Command or response code.
    pub modifier2: u8,
}

impl PacketHeader {
    /// Create a header with arbitrary modifiers.
    pub const fn new(modifier1: u8, pktsize: u16, modifier2: u8) -> Self {
        Self {
            modifier1,
            pktsize,
            modifier2,
        }
    }

    /// Create a cache request header for `command` with a body of `pktsize` bytes.
    pub const fn request(command: Command, pktsize: u16) -> Self {
        Self::new(MODIFIER1, pktsize, command.as_u8())
    }

    /// Parse a header from the first 4 bytes of `data`.
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < HEADER_LEN {
            return Err(ParseError::Incomplete);
        }
        Ok(Self {
            modifier1: data[0],
            pktsize: u16::from_le_bytes([data[1], data[2]]),
            modifier2: data[3],
        })
    }

    /// Encode the header.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let size = self.pktsize.to_le_bytes();
        [self.modifier1, size[0], size[1], self.modifier2]
    }

    /// Returns true if this header carries the cache marker.
    pub fn is_cache(&self) -> bool {
        self.modifier1 == MODIFIER1
    }

    /// The command selected by `modifier2`, if this is a cache packet.
    pub fn command(&self) -> Option<Command> {
        if self.is_cache() {
            Command::from_u8(self.modifier2)
        } else {
            None
        }
    }
}
