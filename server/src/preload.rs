//! Store files in a cache at startup.

use shm_cache::{CacheResult, Flags, ShmCache};
use std::path::PathBuf;
use tracing::{info, warn};

/// Store every file under its path. Unreadable or oversized files are
/// logged and skipped; only a fatal engine error is returned.
pub fn preload(cache: &ShmCache, files: &[PathBuf]) -> CacheResult<usize> {
    let mut stored = 0;

    for path in files {
        let contents = match std::fs::read(path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!(cache = %cache.name(), path = %path.display(), "unable to preload file: {e}");
                continue;
            }
        };

        let key = path.as_os_str().as_encoded_bytes();
        match cache.set(key, &contents, 0, Flags::NONE) {
            Ok(()) => {
                info!(cache = %cache.name(), path = %path.display(), bytes = contents.len(), "file preloaded");
                stored += 1;
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(cache = %cache.name(), path = %path.display(), "unable to preload file: {e}");
            }
        }
    }

    Ok(stored)
}
