//! Startup banner utilities.

use crate::config::{CacheInstanceConfig, ResponseMode, ServerConfig, SweeperConfig, format_size};
use shm_cache::SLOT_HEADER_SIZE;
use std::fmt::{self, Write};

/// Configuration for the startup banner.
pub struct BannerConfig<'a> {
    pub version: &'a str,
    pub caches: &'a [CacheInstanceConfig],
    pub sweeper: &'a SweeperConfig,
    pub server: Option<&'a ServerConfig>,
}

/// Print a startup banner to stdout.
pub fn print_banner(config: &BannerConfig) {
    if let Ok(output) = render(config) {
        print!("{}", output);
    }
}

fn render(config: &BannerConfig) -> Result<String, fmt::Error> {
    let mut output = String::with_capacity(512);

    let name = "shm-cache-server";
    writeln!(output, "{} v{}", name, config.version)?;
    writeln!(output, "{}", "=".repeat(name.len() + config.version.len() + 2))?;
    writeln!(output)?;

    match config.server {
        Some(server) => {
            let response = match server.response {
                ResponseMode::Copy => "copy",
                ResponseMode::Locked => "locked",
            };
            writeln!(output, "Server:      {}", server.address)?;
            writeln!(output, "Workers:     {}", server.threads)?;
            writeln!(output, "Response:    {}", response)?;
        }
        None => writeln!(output, "Server:      disabled")?,
    }

    if config.sweeper.enabled {
        writeln!(output, "Sweeper:     every {}s", config.sweeper.interval_secs)?;
    } else {
        writeln!(output, "Sweeper:     disabled")?;
    }
    writeln!(output)?;

    for cache in config.caches {
        let blocks = cache.blocks.unwrap_or(cache.max_items);
        let slots = (SLOT_HEADER_SIZE as u64 + cache.keysize).saturating_mul(cache.max_items + 1);
        let values = cache.blocksize.saturating_mul(blocks + 1);

        writeln!(output, "Cache \"{}\":", cache.name)?;
        writeln!(output, "  Items:     {}", cache.max_items)?;
        writeln!(output, "  Blocksize: {}", format_size(cache.blocksize))?;
        writeln!(output, "  Keysize:   {}", cache.keysize)?;
        writeln!(output, "  Hash:      {} ({} buckets)", cache.hash, cache.hashsize)?;
        writeln!(output, "  Memory:    {}", format_size(slots.saturating_add(values)))?;
        if let Some(store) = &cache.store {
            writeln!(output, "  Store:     {}", store.display())?;
        }
        for peer in &cache.replication.peers {
            writeln!(output, "  Peer:      {}", peer)?;
        }
        for listen in &cache.replication.listen {
            writeln!(output, "  Listen:    {}", listen)?;
        }
        if let Some(sync) = &cache.sync {
            writeln!(output, "  Sync:      {}", sync)?;
        }
        writeln!(output)?;
    }

    Ok(output)
}
