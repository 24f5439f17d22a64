/// Commands carried in `modifier2` of a cache packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Raw-key get, answered with a header plus the value.
    Get,
    /// Array-encoded key/value set.
    Set,
    /// Raw-key delete.
    Delete,
    /// Vars-encoded `key`/`get` lookups.
    Dict,
    /// Same as [`Command::Dict`]; kept as a distinct id for older clients.
    DictAlt,
    /// Raw-key get answered with a found/missing header and a bare body.
    Stream,
    /// Request a full arena dump.
    Dump,
    /// Response code announcing dump metadata.
    DumpReply,
    /// Replication set datagram.
    ReplicateSet,
    /// Replication delete datagram.
    ReplicateDelete,
    /// Structured request carrying `cmd`, `key` and friends as vars.
    Magic,
}

impl Command {
    /// Decode a `modifier2` value.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Command::Get),
            1 => Some(Command::Set),
            2 => Some(Command::Delete),
            3 => Some(Command::Dict),
            4 => Some(Command::DictAlt),
            5 => Some(Command::Stream),
            6 => Some(Command::Dump),
            7 => Some(Command::DumpReply),
            10 => Some(Command::ReplicateSet),
            11 => Some(Command::ReplicateDelete),
            17 => Some(Command::Magic),
            _ => None,
        }
    }

    /// The `modifier2` value for this command.
    pub const fn as_u8(self) -> u8 {
        match self {
            Command::Get => 0,
            Command::Set => 1,
            Command::Delete => 2,
            Command::Dict => 3,
            Command::DictAlt => 4,
            Command::Stream => 5,
            Command::Dump => 6,
            Command::DumpReply => 7,
            Command::ReplicateSet => 10,
            Command::ReplicateDelete => 11,
            Command::Magic => 17,
        }
    }
}
