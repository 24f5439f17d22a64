//! Vars encoding: a flat sequence of `[u16 len][name][u16 len][value]`.

use crate::{ParseError, put_field, take_field};

/// Parsed vars borrowing from the packet body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vars<'a> {
    pairs: Vec<(&'a [u8], &'a [u8])>,
}

impl<'a> Vars<'a> {
    /// Parse a complete vars body. Trailing partial fields are an error.
    pub fn parse(data: &'a [u8]) -> Result<Self, ParseError> {
        let mut pairs = Vec::new();
        let mut pos = 0;
        while pos < data.len() {
            let (name, next) = take_field(data, pos)?;
            let (value, next) = take_field(data, next)?;
            pairs.push((name, value));
            pos = next;
        }
        Ok(Self { pairs })
    }

    /// Value of the first var named `name`.
    pub fn get(&self, name: &[u8]) -> Option<&'a [u8]> {
        self.pairs
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
    }

    /// Iterate over `(name, value)` pairs in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (&'a [u8], &'a [u8])> + '_ {
        self.pairs.iter().copied()
    }

    /// Number of pairs.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Returns true if there are no pairs.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Value of the first pair, ignoring anything after it.
///
/// This is how plain lookup requests carry their key.
pub fn first_value(data: &[u8]) -> Result<&[u8], ParseError> {
    let (_, next) = take_field(data, 0)?;
    let (value, _) = take_field(data, next)?;
    Ok(value)
}

/// Append one pair to `buf`.
pub fn push(buf: &mut Vec<u8>, name: &[u8], value: &[u8]) -> Result<(), ParseError> {
    put_field(buf, name)?;
    put_field(buf, value)
}

/// Encode `pairs` into a fresh body.
pub fn encode(pairs: &[(&[u8], &[u8])]) -> Result<Vec<u8>, ParseError> {
    let mut buf = Vec::with_capacity(pairs.iter().map(|(n, v)| 4 + n.len() + v.len()).sum());
    for (name, value) in pairs {
        push(&mut buf, name, value)?;
    }
    Ok(buf)
}
