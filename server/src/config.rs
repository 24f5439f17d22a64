//! Server configuration.
//!
//! Loaded from a TOML file. Every `[[cache]]` table describes one cache
//! instance; the remaining tables configure logging, the expiration
//! sweeper and the optional remote read/admin server.

use serde::Deserialize;
use shm_cache::{
    CacheConfig, DEFAULT_BLOCKSIZE, DEFAULT_HASHSIZE, DEFAULT_KEYSIZE, HashAlgorithm,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Annotated configuration printed by `--print-config`.
pub const DEFAULT_CONFIG: &str = r#"# Shared-memory cache server configuration

[logging]
# Log level: "error", "warn", "info", "debug", "trace"
# Can be overridden with RUST_LOG environment variable
level = "info"
# Log format: "pretty" (human-readable), "json", or "compact"
format = "pretty"
timestamps = true
thread_names = false
target = true

# One table per cache instance. The first one is the default instance used
# by requests that do not name a cache.
[[cache]]
name = "default"
# Number of items (slots)
max_items = 1000
# Size of every value block, the largest storable value (e.g., "64KB")
blocksize = 65535
# Number of value blocks (default: max_items)
# blocks = 1000
# Hash algorithm: "djb33x" or "murmur2"
hash = "djb33x"
# Number of hash buckets
hashsize = 65535
# Largest key length (at most 65535)
keysize = 2048
# Backing file; the cache survives restarts when set
# store = "/var/cache/shm-cache/default.cache"
# Do not run the expiration sweeper for this instance
no_expire = false
# Files stored at startup, keyed by path
# preload = ["/etc/motd"]
# Pull a full dump from another server's remote address at startup
# sync = "10.0.0.1:3031"

# [cache.replication]
# UDP peers receiving every local set/delete
# peers = ["10.0.0.2:4000"]
# UDP addresses to receive replicated mutations on
# listen = ["0.0.0.0:4000"]

[sweeper]
enabled = true
# Seconds between expiration passes
interval_secs = 3
# Log how many items every pass freed
report_freed = false

# Remote read/admin server (optional)
# [server]
# "host:port" for TCP, anything else is a Unix socket path
# address = "127.0.0.1:3031"
# threads = 1
# socket_timeout_secs = 4
# backlog = 128
# "copy" (copy, unlock, write) or "locked" (write while holding the lock)
# response = "copy"
"#;

/// Server configuration loaded from TOML.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Cache instances. The first one is the default instance.
    pub cache: Vec<CacheInstanceConfig>,

    #[serde(default)]
    pub sweeper: SweeperConfig,

    /// Remote read/admin server. Disabled when absent.
    #[serde(default)]
    pub server: Option<ServerConfig>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default = "default_true")]
    pub timestamps: bool,

    #[serde(default)]
    pub thread_names: bool,

    #[serde(default = "default_true")]
    pub target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            timestamps: true,
            thread_names: false,
            target: true,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

/// One `[[cache]]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheInstanceConfig {
    pub name: String,

    #[serde(alias = "maxitems")]
    pub max_items: u64,

    /// Value block size (e.g., "64KB").
    #[serde(default = "default_blocksize", deserialize_with = "deserialize_size")]
    pub blocksize: u64,

    /// Number of value blocks, defaults to `max_items`.
    #[serde(default)]
    pub blocks: Option<u64>,

    /// Hash algorithm name: "djb33x" or "murmur2".
    #[serde(default = "default_hash")]
    pub hash: String,

    #[serde(default = "default_hashsize", alias = "hash_size")]
    pub hashsize: u64,

    #[serde(default = "default_keysize", alias = "key_size")]
    pub keysize: u64,

    /// Backing file. Without one the cache lives in anonymous memory.
    #[serde(default)]
    pub store: Option<PathBuf>,

    /// Disable the expiration sweeper for this instance.
    #[serde(default)]
    pub no_expire: bool,

    /// Files stored at startup, keyed by their path.
    #[serde(default)]
    pub preload: Vec<PathBuf>,

    #[serde(default)]
    pub replication: ReplicationConfig,

    /// Remote read server (`host:port`) to pull a full dump from at startup.
    #[serde(default)]
    pub sync: Option<String>,
}

impl CacheInstanceConfig {
    /// Engine configuration for this instance.
    pub fn cache_config(&self) -> Result<CacheConfig, shm_cache::ConfigError> {
        Ok(CacheConfig {
            name: self.name.clone(),
            max_items: self.max_items,
            blocksize: self.blocksize,
            blocks: self.blocks,
            keysize: self.keysize,
            hashsize: self.hashsize,
            hash: HashAlgorithm::from_name(&self.hash)?,
            store: self.store.clone(),
        })
    }
}

/// UDP replication endpoints of a cache instance.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplicationConfig {
    /// Peers that receive every local set/delete.
    #[serde(default)]
    pub peers: Vec<String>,

    /// Addresses the receiver binds to.
    #[serde(default)]
    pub listen: Vec<String>,
}

/// Expiration sweeper settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SweeperConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,

    /// Log the number of items freed by every pass that freed some.
    #[serde(default)]
    pub report_freed: bool,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_sweep_interval(),
            report_freed: false,
        }
    }
}

impl SweeperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Remote read/admin server settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// `host:port` for TCP, anything without a `:` is a Unix socket path.
    pub address: String,

    #[serde(default = "default_threads")]
    pub threads: usize,

    #[serde(default = "default_socket_timeout")]
    pub socket_timeout_secs: u64,

    #[serde(default = "default_backlog")]
    pub backlog: i32,

    #[serde(default)]
    pub response: ResponseMode,
}

impl ServerConfig {
    pub fn socket_timeout(&self) -> Duration {
        Duration::from_secs(self.socket_timeout_secs)
    }
}

/// How values are written back to remote clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// Copy the value, release the lock, then write.
    #[default]
    Copy,
    /// Write while holding the read lock.
    Locked,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_blocksize() -> u64 {
    DEFAULT_BLOCKSIZE
}

fn default_hash() -> String {
    "djb33x".to_string()
}

fn default_hashsize() -> u64 {
    DEFAULT_HASHSIZE
}

fn default_keysize() -> u64 {
    DEFAULT_KEYSIZE
}

fn default_sweep_interval() -> u64 {
    3
}

fn default_threads() -> usize {
    1
}

fn default_socket_timeout() -> u64 {
    4
}

fn default_backlog() -> i32 {
    128
}

/// Deserialize a size that can be either a number or a string like "64KB".
fn deserialize_size<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SizeValue {
        Number(u64),
        String(String),
    }

    match SizeValue::deserialize(deserializer)? {
        SizeValue::Number(n) => Ok(n),
        SizeValue::String(s) => parse_size(&s).map_err(D::Error::custom),
    }
}

/// Parse a size string like "64KB", "1MB" or "65535".
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size string".to_string());
    }

    let (num_str, suffix) = match s.find(|c: char| c.is_alphabetic()) {
        Some(idx) => (&s[..idx], s[idx..].to_uppercase()),
        None => (s, String::new()),
    };

    let num: u64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("invalid number: {}", num_str))?;

    let multiplier: u64 = match suffix.as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => 1024 * 1024,
        "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
        _ => return Err(format!("unknown size suffix: {}", suffix)),
    };

    num.checked_mul(multiplier)
        .ok_or_else(|| "size overflow".to_string())
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.cache.is_empty() {
            return Err("at least one [[cache]] must be configured".into());
        }

        let mut names = HashSet::new();
        for cache in &self.cache {
            cache.cache_config()?.validate()?;
            if !names.insert(cache.name.as_str()) {
                return Err(shm_cache::ConfigError::DuplicateName(cache.name.clone()).into());
            }
        }

        if self.sweeper.enabled && self.sweeper.interval_secs == 0 {
            return Err("sweeper interval_secs must be at least 1".into());
        }

        if let Some(server) = &self.server {
            if server.address.is_empty() {
                return Err("server address must not be empty".into());
            }
            if server.threads == 0 {
                return Err("server threads must be at least 1".into());
            }
            if server.socket_timeout_secs == 0 {
                return Err("server socket_timeout_secs must be at least 1".into());
            }
        }

        Ok(())
    }
}

/// Format a byte size for display.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB && bytes.is_multiple_of(GB) {
        format!("{} GB", bytes / GB)
    } else if bytes >= MB && bytes.is_multiple_of(MB) {
        format!("{} MB", bytes / MB)
    } else if bytes >= KB && bytes.is_multiple_of(KB) {
        format!("{} KB", bytes / KB)
    } else {
        format!("{} bytes", bytes)
    }
}
