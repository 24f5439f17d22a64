//! Structured requests (command 17).
//!
//! The request body is vars with the fields `cmd`, `key`, `expires`,
//! `size` and `cache`. For `set` and `update` the value follows the vars
//! packet as `size` raw bytes. The response is a header with
//! `modifier2 = 17` and vars `status` and `size`, followed by `size` bytes
//! of body.

use crate::ParseError;
use crate::parse_decimal;
use crate::vars::{self, Vars};

/// Operation requested by a magic packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MagicCommand {
    Get,
    Exists,
    Set,
    Update,
    Delete,
    Clear,
}

impl MagicCommand {
    pub fn parse(name: &[u8]) -> Option<Self> {
        match name {
            b"get" => Some(MagicCommand::Get),
            b"exists" => Some(MagicCommand::Exists),
            b"set" => Some(MagicCommand::Set),
            b"update" => Some(MagicCommand::Update),
            b"del" => Some(MagicCommand::Delete),
            b"clear" => Some(MagicCommand::Clear),
            _ => None,
        }
    }

    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            MagicCommand::Get => b"get",
            MagicCommand::Exists => b"exists",
            MagicCommand::Set => b"set",
            MagicCommand::Update => b"update",
            MagicCommand::Delete => b"del",
            MagicCommand::Clear => b"clear",
        }
    }

    /// Returns true if a value body follows the request vars.
    pub fn has_body(self) -> bool {
        matches!(self, MagicCommand::Set | MagicCommand::Update)
    }
}

/// A decoded magic request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MagicRequest<'a> {
    pub command: MagicCommand,
    /// Empty only for `clear`.
    pub key: &'a [u8],
    /// Relative expiry in seconds, 0 for none.
    pub expires: u64,
    /// Length of the value body that follows the vars.
    pub size: u64,
    /// Target cache; `None` selects the default instance.
    pub cache: Option<&'a [u8]>,
}

impl<'a> MagicRequest<'a> {
    pub fn parse(body: &'a [u8]) -> Result<Self, ParseError> {
        let vars = Vars::parse(body)?;

        let command = vars
            .get(b"cmd")
            .and_then(MagicCommand::parse)
            .ok_or(ParseError::Invalid("missing or unknown cmd"))?;

        let key = vars.get(b"key").unwrap_or_default();
        if key.is_empty() && command != MagicCommand::Clear {
            return Err(ParseError::Invalid("missing key"));
        }

        let expires = vars.get(b"expires").map(parse_decimal).transpose()?.unwrap_or(0);
        let size = vars.get(b"size").map(parse_decimal).transpose()?.unwrap_or(0);
        let cache = vars.get(b"cache").filter(|c| !c.is_empty());

        Ok(Self {
            command,
            key,
            expires,
            size,
            cache,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, ParseError> {
        let expires = self.expires.to_string();
        let size = self.size.to_string();

        let mut buf = Vec::new();
        vars::push(&mut buf, b"cmd", self.command.as_bytes())?;
        vars::push(&mut buf, b"key", self.key)?;
        vars::push(&mut buf, b"expires", expires.as_bytes())?;
        vars::push(&mut buf, b"size", size.as_bytes())?;
        if let Some(cache) = self.cache {
            vars::push(&mut buf, b"cache", cache)?;
        }
        Ok(buf)
    }
}

/// Outcome reported in a magic response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MagicStatus {
    Ok,
    NotFound,
    Error,
}

impl MagicStatus {
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            MagicStatus::Ok => b"ok",
            MagicStatus::NotFound => b"notfound",
            MagicStatus::Error => b"error",
        }
    }

    pub fn parse(value: &[u8]) -> Option<Self> {
        match value {
            b"ok" => Some(MagicStatus::Ok),
            b"notfound" => Some(MagicStatus::NotFound),
            b"error" => Some(MagicStatus::Error),
            _ => None,
        }
    }
}

/// Response vars of a magic request. `size` bytes of body follow them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MagicResponse {
    pub status: MagicStatus,
    pub size: u64,
}

impl MagicResponse {
    pub fn new(status: MagicStatus, size: u64) -> Self {
        Self { status, size }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ParseError> {
        let size = self.size.to_string();
        let mut buf = Vec::with_capacity(32);
        vars::push(&mut buf, b"status", self.status.as_bytes())?;
        vars::push(&mut buf, b"size", size.as_bytes())?;
        Ok(buf)
    }

    pub fn parse(body: &[u8]) -> Result<Self, ParseError> {
        let vars = Vars::parse(body)?;
        let status = vars
            .get(b"status")
            .and_then(MagicStatus::parse)
            .ok_or(ParseError::Invalid("missing or unknown status"))?;
        let size = vars.get(b"size").map(parse_decimal).transpose()?.unwrap_or(0);
        Ok(Self { status, size })
    }
}
