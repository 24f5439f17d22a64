//! Wire codecs for the shared-memory cache.
//!
//! Every message on the wire starts with a 4 byte packet header:
//!
//! ```text
//! +-----------+-----------------+-----------+
//! | modifier1 | pktsize (u16 LE)| modifier2 |
//! +-----------+-----------------+-----------+
//! ```
//!
//! `modifier1` is [`MODIFIER1`] for every cache packet and `modifier2`
//! selects the command. Bodies are built from length-prefixed fields:
//!
//! - [`vars`] - `[u16 len][name][u16 len][value]` pairs
//! - [`array`] - `[u16 len][item]` sequences
//! - [`replication`] - set/delete datagrams pushed to peer nodes
//! - [`magic`] - structured request/response vars (command 17)
//! - [`dump`] - metadata preceding a raw arena dump (command 6)
//!
//! All multi-byte integers are little-endian regardless of platform.
//!
//! # Example
//!
//! ```
//! use protocol_cache::{Command, PacketHeader};
//!
//! let header = PacketHeader::request(Command::Get, 5);
//! let bytes = header.encode();
//! assert_eq!(bytes, [111, 5, 0, 0]);
//!
//! let parsed = PacketHeader::parse(&bytes).unwrap();
//! assert_eq!(parsed.command(), Some(Command::Get));
//! ```

pub mod array;
pub mod dump;
pub mod magic;
pub mod replication;
pub mod vars;

mod command;
mod header;

pub use command::Command;
pub use dump::DumpMeta;
pub use header::{HEADER_LEN, MAX_BODY_LEN, PacketHeader};
pub use magic::{MagicCommand, MagicRequest, MagicResponse, MagicStatus};
pub use replication::{MAX_DATAGRAM_LEN, Mutation};
pub use vars::Vars;

/// Marker carried in `modifier1` by every cache packet.
pub const MODIFIER1: u8 = 111;

/// Errors produced while decoding (or sizing) a cache packet.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Need more data to complete parsing.
    #[error("incomplete")]
    Incomplete,
    /// The data is malformed.
    #[error("invalid packet: {0}")]
    Invalid(&'static str),
    /// A field does not fit its 16-bit length prefix.
    #[error("field too large for a 16-bit length prefix")]
    TooLarge,
}

/// Parse an unsigned decimal number as carried in vars values.
///
/// An empty string parses as zero, matching how absent numeric fields are
/// treated by the receivers.
pub fn parse_decimal(data: &[u8]) -> Result<u64, ParseError> {
    let mut n: u64 = 0;
    for &b in data {
        if !b.is_ascii_digit() {
            return Err(ParseError::Invalid("non-decimal number"));
        }
        n = n
            .checked_mul(10)
            .and_then(|n| n.checked_add((b - b'0') as u64))
            .ok_or(ParseError::Invalid("number overflow"))?;
    }
    Ok(n)
}

/// Append a `[u16 LE len][bytes]` field to `buf`.
pub(crate) fn put_field(buf: &mut Vec<u8>, field: &[u8]) -> Result<(), ParseError> {
    let len = u16::try_from(field.len()).map_err(|_| ParseError::TooLarge)?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(field);
    Ok(())
}

/// Read a `[u16 LE len][bytes]` field starting at `pos`.
///
/// Returns the field and the position just after it.
pub(crate) fn take_field(data: &[u8], pos: usize) -> Result<(&[u8], usize), ParseError> {
    let prefix = data.get(pos..pos + 2).ok_or(ParseError::Incomplete)?;
    let len = u16::from_le_bytes([prefix[0], prefix[1]]) as usize;
    let start = pos + 2;
    let field = data.get(start..start + len).ok_or(ParseError::Incomplete)?;
    Ok((field, start + len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_decimal() {
        assert_eq!(parse_decimal(b"0"), Ok(0));
        assert_eq!(parse_decimal(b""), Ok(0));
        assert_eq!(parse_decimal(b"1700000000"), Ok(1_700_000_000));
        assert_eq!(
            parse_decimal(b"12a"),
            Err(ParseError::Invalid("non-decimal number"))
        );
        assert!(parse_decimal(b"99999999999999999999999").is_err());
    }

    #[test]
    fn test_field_prefix_is_little_endian() {
        let mut buf = Vec::new();
        put_field(&mut buf, &[7u8; 258]).unwrap();
        assert_eq!(&buf[..2], &[2, 1]);
        let (field, next) = take_field(&buf, 0).unwrap();
        assert_eq!(field.len(), 258);
        assert_eq!(next, buf.len());
    }

    #[test]
    fn test_take_field_truncated() {
        assert_eq!(take_field(&[5], 0), Err(ParseError::Incomplete));
        assert_eq!(take_field(&[5, 0, b'a'], 0), Err(ParseError::Incomplete));
    }

    #[test]
    fn test_put_field_too_large() {
        let mut buf = Vec::new();
        let big = vec![0u8; u16::MAX as usize + 1];
        assert_eq!(put_field(&mut buf, &big), Err(ParseError::TooLarge));
        assert!(buf.is_empty());
    }
}
