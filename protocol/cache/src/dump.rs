//! Metadata sent ahead of a raw arena dump.
//!
//! A dump reply is a header with `modifier2 = 7`, then vars announcing
//! the geometry of the sender's arena, then the arena bytes. The receiver
//! must refuse a dump whose geometry differs from its own.

use crate::vars::{self, Vars};
use crate::{ParseError, parse_decimal};

/// Geometry of a dumped arena.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpMeta {
    pub items: u64,
    pub blocksize: u64,
    /// Absent when the sender only reports `items` and `blocksize`.
    pub keysize: Option<u64>,
    pub hashsize: Option<u64>,
    /// Name of the key hash the chains were built with.
    pub hash: Option<String>,
}

impl DumpMeta {
    pub fn encode(&self) -> Result<Vec<u8>, ParseError> {
        let mut buf = Vec::with_capacity(64);
        vars::push(&mut buf, b"items", self.items.to_string().as_bytes())?;
        vars::push(&mut buf, b"blocksize", self.blocksize.to_string().as_bytes())?;
        if let Some(keysize) = self.keysize {
            vars::push(&mut buf, b"keysize", keysize.to_string().as_bytes())?;
        }
        if let Some(hashsize) = self.hashsize {
            vars::push(&mut buf, b"hashsize", hashsize.to_string().as_bytes())?;
        }
        if let Some(hash) = &self.hash {
            vars::push(&mut buf, b"hash", hash.as_bytes())?;
        }
        Ok(buf)
    }

    pub fn parse(body: &[u8]) -> Result<Self, ParseError> {
        let vars = Vars::parse(body)?;

        Ok(Self {
            items: number(&vars, b"items")?.ok_or(ParseError::Invalid("missing items"))?,
            blocksize: number(&vars, b"blocksize")?
                .ok_or(ParseError::Invalid("missing blocksize"))?,
            keysize: number(&vars, b"keysize")?,
            hashsize: number(&vars, b"hashsize")?,
            hash: vars
                .get(b"hash")
                .map(|name| {
                    std::str::from_utf8(name)
                        .map(str::to_string)
                        .map_err(|_| ParseError::Invalid("hash name is not utf-8"))
                })
                .transpose()?,
        })
    }
}

fn number(vars: &Vars<'_>, name: &[u8]) -> Result<Option<u64>, ParseError> {
    vars.get(name).map(parse_decimal).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_meta() {
        let meta = DumpMeta {
            items: 1000,
            blocksize: 65535,
            keysize: Some(2048),
            hashsize: Some(65535),
            hash: Some("murmur2".into()),
        };
        assert_eq!(DumpMeta::parse(&meta.encode().unwrap()).unwrap(), meta);
    }

    #[test]
    fn test_minimal_meta() {
        let body = vars::encode(&[(&b"items"[..], &b"10"[..]), (&b"blocksize"[..], &b"16"[..])])
            .unwrap();
        let meta = DumpMeta::parse(&body).unwrap();
        assert_eq!(meta.items, 10);
        assert_eq!(meta.blocksize, 16);
        assert_eq!(meta.keysize, None);
        assert_eq!(meta.hash, None);
    }

    #[test]
    fn test_missing_items() {
        let body = vars::encode(&[(&b"blocksize"[..], &b"16"[..])]).unwrap();
        assert_eq!(
            DumpMeta::parse(&body),
            Err(ParseError::Invalid("missing items"))
        );
    }
}
