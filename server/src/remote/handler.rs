//! Request handling for one remote connection.
//!
//! Every connection carries a single request: a 4 byte header, `pktsize`
//! bytes of body and, for magic set/update, a value body. The response is
//! written and the connection is closed by the caller.

use crate::config::ResponseMode;
use crate::metrics::{PROTOCOL_ERRORS, REQUESTS_DELETE, REQUESTS_DUMP, REQUESTS_GET, REQUESTS_SET};
use protocol_cache::vars::{self, Vars};
use protocol_cache::{
    Command, HEADER_LEN, MODIFIER1, MagicCommand, MagicRequest, MagicResponse, MagicStatus,
    PacketHeader, ParseError, array,
};
use shm_cache::{CacheError, CacheRegistry, CacheResult, Flags, ShmCache};
use std::io::{self, Read, Write};
use std::sync::Arc;
use tracing::debug;

/// Answer to a dict `get` lookup that missed.
pub const NOT_FOUND: &[u8] = b"HTTP/1.0 404 Not Found\r\n\r\n";

/// Why a connection was aborted.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("unsupported command {0}")]
    UnknownCommand(u8),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl ConnectionError {
    /// Returns true if the process must stop serving.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConnectionError::Cache(e) if e.is_fatal())
    }

    /// Malformed input, as opposed to a transport or engine failure.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            ConnectionError::Parse(_) | ConnectionError::UnknownCommand(_)
        )
    }
}

/// Serves requests against a registry.
pub struct Handler {
    registry: Arc<CacheRegistry>,
    response: ResponseMode,
}

impl Handler {
    pub fn new(registry: Arc<CacheRegistry>, response: ResponseMode) -> Self {
        Self { registry, response }
    }

    /// Read one request from `stream` and answer it.
    pub fn serve<S: Read + Write>(&self, stream: &mut S) -> Result<(), ConnectionError> {
        let result = self.serve_request(stream);
        if let Err(e) = &result
            && e.is_protocol()
        {
            PROTOCOL_ERRORS.increment();
        }
        result
    }

    fn serve_request<S: Read + Write>(&self, stream: &mut S) -> Result<(), ConnectionError> {
        let mut head = [0u8; HEADER_LEN];
        stream.read_exact(&mut head)?;
        let header = PacketHeader::parse(&head)?;

        if !header.is_cache() && header.pktsize == 0 {
            return Ok(());
        }

        let mut body = vec![0u8; header.pktsize as usize];
        stream.read_exact(&mut body)?;

        if !header.is_cache() {
            return self.lookup(&body, stream);
        }

        match header.command() {
            Some(Command::Get) => self.get(&body, stream),
            Some(Command::Set) => self.set(&body),
            Some(Command::Delete) => self.delete(&body),
            Some(Command::Dict | Command::DictAlt) => self.dict(&body, stream),
            Some(Command::Stream) => self.stream_get(&body, stream),
            Some(Command::Dump) => self.dump(stream),
            Some(Command::Magic) => self.magic(&body, stream),
            _ => Err(ConnectionError::UnknownCommand(header.modifier2)),
        }
    }

    fn default_cache(&self) -> CacheResult<&Arc<ShmCache>> {
        self.registry.cache(None)
    }

    /// Hand the value of `key` to `write`, honoring the response mode.
    ///
    /// Returns false on a miss, in which case nothing was written.
    fn write_value<S, F>(
        &self,
        cache: &ShmCache,
        key: &[u8],
        stream: &mut S,
        write: F,
    ) -> Result<bool, ConnectionError>
    where
        S: Write,
        F: FnOnce(&mut S, &[u8]) -> io::Result<()>,
    {
        match self.response {
            ResponseMode::Locked => match cache.with_value(key, |value| write(stream, value))? {
                Some(written) => {
                    written?;
                    Ok(true)
                }
                None => Ok(false),
            },
            ResponseMode::Copy => match cache.get(key)? {
                Some(value) => {
                    write(stream, &value)?;
                    Ok(true)
                }
                None => Ok(false),
            },
        }
    }

    /// Requests without the cache marker: the first var value is the key
    /// and the raw value is the whole answer.
    fn lookup<S: Write>(&self, body: &[u8], stream: &mut S) -> Result<(), ConnectionError> {
        REQUESTS_GET.increment();
        let key = vars::first_value(body)?;
        self.write_value(self.default_cache()?, key, stream, |s, value| {
            s.write_all(value)
        })?;
        Ok(())
    }

    fn get<S: Write>(&self, key: &[u8], stream: &mut S) -> Result<(), ConnectionError> {
        REQUESTS_GET.increment();
        self.write_value(self.default_cache()?, key, stream, |s, value| {
            let len = u16::try_from(value.len()).map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidData, "value too large for a packet")
            })?;
            s.write_all(&PacketHeader::new(MODIFIER1, len, Command::Get.as_u8()).encode())?;
            s.write_all(value)
        })?;
        Ok(())
    }

    fn set(&self, body: &[u8]) -> Result<(), ConnectionError> {
        REQUESTS_SET.increment();
        let items = array::parse(body)?;
        let [key, value, ..] = items.as_slice() else {
            return Err(ParseError::Invalid("set needs a key and a value").into());
        };
        tolerate(self.default_cache()?.set(key, value, 0, Flags::NONE))
    }

    fn delete(&self, key: &[u8]) -> Result<(), ConnectionError> {
        REQUESTS_DELETE.increment();
        tolerate(self.default_cache()?.delete(key, Flags::NONE))
    }

    fn dict<S: Write>(&self, body: &[u8], stream: &mut S) -> Result<(), ConnectionError> {
        REQUESTS_GET.increment();
        let cache = self.default_cache()?;
        let vars = Vars::parse(body)?;

        for (name, key) in vars.iter() {
            match name {
                b"key" => {
                    self.write_value(cache, key, stream, |s, value| s.write_all(value))?;
                }
                b"get" => {
                    if !self.write_value(cache, key, stream, |s, value| s.write_all(value))? {
                        stream.write_all(NOT_FOUND)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn stream_get<S: Write>(&self, key: &[u8], stream: &mut S) -> Result<(), ConnectionError> {
        REQUESTS_GET.increment();
        let found = self.write_value(self.default_cache()?, key, stream, |s, value| {
            s.write_all(&PacketHeader::new(MODIFIER1, 0, 1).encode())?;
            s.write_all(value)
        })?;
        if !found {
            stream.write_all(&PacketHeader::new(MODIFIER1, 0, 0).encode())?;
        }
        Ok(())
    }

    fn dump<S: Write>(&self, stream: &mut S) -> Result<(), ConnectionError> {
        REQUESTS_DUMP.increment();
        let cache = self.default_cache()?;
        let meta = cache.dump_meta().encode()?;
        let len = u16::try_from(meta.len()).map_err(|_| ParseError::TooLarge)?;

        stream.write_all(&PacketHeader::new(MODIFIER1, len, Command::DumpReply.as_u8()).encode())?;
        stream.write_all(&meta)?;
        cache.write_dump(stream)?;
        debug!(cache = %cache.name(), bytes = cache.arena_len(), "dump sent");
        Ok(())
    }

    fn magic<S: Read + Write>(&self, body: &[u8], stream: &mut S) -> Result<(), ConnectionError> {
        let request = MagicRequest::parse(body)?;

        let cache = match request.cache {
            Some(name) => std::str::from_utf8(name)
                .ok()
                .and_then(|name| self.registry.cache(Some(name)).ok()),
            None => self.registry.default_cache(),
        };
        let Some(cache) = cache else {
            return write_magic(stream, MagicStatus::Error, &[]);
        };

        let key = request.key;
        let status = match request.command {
            MagicCommand::Get => {
                REQUESTS_GET.increment();
                let found = self.write_value(cache, key, stream, |s, value| {
                    let head = magic_head(MagicStatus::Ok, value.len() as u64)
                        .map_err(io::Error::other)?;
                    s.write_all(&head)?;
                    s.write_all(value)
                })?;
                if found {
                    return Ok(());
                }
                MagicStatus::NotFound
            }
            MagicCommand::Exists => {
                REQUESTS_GET.increment();
                if cache.exists(key)? {
                    MagicStatus::Ok
                } else {
                    MagicStatus::NotFound
                }
            }
            MagicCommand::Set | MagicCommand::Update => {
                REQUESTS_SET.increment();
                if request.size > cache.config().blocksize {
                    return write_magic(stream, MagicStatus::Error, &[]);
                }
                let mut value = vec![0u8; request.size as usize];
                stream.read_exact(&mut value)?;

                let flags = if request.command == MagicCommand::Update {
                    Flags::UPDATE
                } else {
                    Flags::NONE
                };
                match cache.set(key, &value, request.expires, flags) {
                    Ok(()) => MagicStatus::Ok,
                    Err(e) if e.is_fatal() => return Err(e.into()),
                    Err(e) => {
                        debug!(cache = %cache.name(), "magic set refused: {e}");
                        MagicStatus::Error
                    }
                }
            }
            MagicCommand::Delete => {
                REQUESTS_DELETE.increment();
                match cache.delete(key, Flags::NONE) {
                    Ok(()) => MagicStatus::Ok,
                    Err(CacheError::NotFound) => MagicStatus::NotFound,
                    Err(e) if e.is_fatal() => return Err(e.into()),
                    Err(_) => MagicStatus::Error,
                }
            }
            MagicCommand::Clear => {
                REQUESTS_DELETE.increment();
                cache.clear();
                MagicStatus::Ok
            }
        };

        write_magic(stream, status, &[])
    }
}

/// Engine refusals end the request quietly; fatal errors stop the server.
fn tolerate(result: CacheResult<()>) -> Result<(), ConnectionError> {
    match result {
        Err(e) if e.is_fatal() => Err(e.into()),
        Err(e) => {
            debug!("remote mutation refused: {e}");
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}

fn magic_head(status: MagicStatus, size: u64) -> Result<Vec<u8>, ParseError> {
    let vars = MagicResponse::new(status, size).encode()?;
    let len = u16::try_from(vars.len()).map_err(|_| ParseError::TooLarge)?;

    let mut head = Vec::with_capacity(HEADER_LEN + vars.len());
    head.extend_from_slice(&PacketHeader::new(MODIFIER1, len, Command::Magic.as_u8()).encode());
    head.extend_from_slice(&vars);
    Ok(head)
}

fn write_magic<S: Write>(
    stream: &mut S,
    status: MagicStatus,
    body: &[u8],
) -> Result<(), ConnectionError> {
    stream.write_all(&magic_head(status, body.len() as u64)?)?;
    stream.write_all(body)?;
    Ok(())
}
