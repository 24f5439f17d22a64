//! Array encoding: a flat sequence of `[u16 len][item]`.

use crate::{ParseError, put_field, take_field};

/// Parse every item of an array body.
pub fn parse(data: &[u8]) -> Result<Vec<&[u8]>, ParseError> {
    let mut items = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let (item, next) = take_field(data, pos)?;
        items.push(item);
        pos = next;
    }
    Ok(items)
}

/// Encode `items` into a fresh body.
pub fn encode(items: &[&[u8]]) -> Result<Vec<u8>, ParseError> {
    let mut buf = Vec::with_capacity(items.iter().map(|i| 2 + i.len()).sum());
    for item in items {
        put_field(&mut buf, item)?;
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_value_array() {
        let body = encode(&[&b"key"[..], &b"value"[..]]).unwrap();
        assert_eq!(body, b"\x03\x00key\x05\x00value");
        assert_eq!(parse(&body).unwrap(), vec![&b"key"[..], &b"value"[..]]);
    }

    #[test]
    fn test_truncated_item() {
        assert_eq!(parse(b"\x03\x00ke"), Err(ParseError::Incomplete));
    }
}
