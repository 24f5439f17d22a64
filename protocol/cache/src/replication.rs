//! Replication datagrams.
//!
//! ```text
//! set:    [111][pktsize][10][klen][key][vlen][value][elen][expires ascii]
//! delete: [111][pktsize][11][klen][key]
//! ```
//!
//! `pktsize` counts every byte after the 4 byte header and must match the
//! datagram length exactly. The expiry is an absolute epoch second count
//! written in decimal; a missing expiry field decodes as 0.

use crate::{
    Command, HEADER_LEN, MODIFIER1, PacketHeader, ParseError, parse_decimal, put_field, take_field,
};

/// Largest UDP payload that can be sent over IPv4.
pub const MAX_DATAGRAM_LEN: usize = 65_507;

/// A mutation pushed to peer nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation<'a> {
    /// Store `value` under `key`, expiring at the absolute time `expires`.
    Set {
        key: &'a [u8],
        value: &'a [u8],
        expires: u64,
    },
    /// Remove `key`.
    Delete { key: &'a [u8] },
}

impl<'a> Mutation<'a> {
    /// The key this mutation applies to.
    pub fn key(&self) -> &'a [u8] {
        match self {
            Mutation::Set { key, .. } | Mutation::Delete { key } => *key,
        }
    }

    /// Encode the mutation as a complete datagram.
    ///
    /// Fails with [`ParseError::TooLarge`] when a field or the whole
    /// datagram does not fit the wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ParseError> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&[0; HEADER_LEN]);

        let command = match self {
            Mutation::Set {
                key,
                value,
                expires,
            } => {
                put_field(&mut buf, key)?;
                put_field(&mut buf, value)?;
                put_field(&mut buf, expires.to_string().as_bytes())?;
                Command::ReplicateSet
            }
            Mutation::Delete { key } => {
                put_field(&mut buf, key)?;
                Command::ReplicateDelete
            }
        };

        if buf.len() > MAX_DATAGRAM_LEN {
            return Err(ParseError::TooLarge);
        }
        let pktsize = u16::try_from(buf.len() - HEADER_LEN).map_err(|_| ParseError::TooLarge)?;
        buf[..HEADER_LEN].copy_from_slice(&PacketHeader::request(command, pktsize).encode());
        Ok(buf)
    }

    fn encoded_len(&self) -> usize {
        match self {
            Mutation::Set { key, value, .. } => {
                HEADER_LEN + 2 + key.len() + 2 + value.len() + 2 + 20
            }
            Mutation::Delete { key } => HEADER_LEN + 2 + key.len(),
        }
    }

    /// Decode a datagram.
    ///
    /// The marker and the declared length are checked against the bytes
    /// actually received before any field is read.
    pub fn parse(data: &'a [u8]) -> Result<Self, ParseError> {
        let header = PacketHeader::parse(data)?;
        if header.modifier1 != MODIFIER1 {
            return Err(ParseError::Invalid("bad marker"));
        }
        if header.pktsize as usize != data.len() - HEADER_LEN {
            return Err(ParseError::Invalid("length mismatch"));
        }

        let (key, next) = take_field(data, HEADER_LEN)?;
        if key.is_empty() {
            return Err(ParseError::Invalid("empty key"));
        }

        match Command::from_u8(header.modifier2) {
            Some(Command::ReplicateSet) => {
                let (value, next) = take_field(data, next)?;
                let expires = if next < data.len() {
                    let (field, _) = take_field(data, next)?;
                    parse_decimal(field)?
                } else {
                    0
                };
                Ok(Mutation::Set {
                    key,
                    value,
                    expires,
                })
            }
            Some(Command::ReplicateDelete) => Ok(Mutation::Delete { key }),
            _ => Err(ParseError::Invalid("unknown replication command")),
        }
    }
}
