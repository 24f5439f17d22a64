//! Background expiration.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{error, info};

use crate::cache::now_secs;
use crate::{CacheResult, ShmCache};

/// Default time between expiration passes.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(3);

/// Longest uninterrupted sleep, so shutdown is noticed promptly.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Periodically removes expired items from one cache instance.
pub struct Sweeper {
    cache: Arc<ShmCache>,
    interval: Duration,
    report_freed: bool,
}

impl Sweeper {
    pub fn new(cache: Arc<ShmCache>) -> Self {
        Self {
            cache,
            interval: DEFAULT_SWEEP_INTERVAL,
            report_freed: false,
        }
    }

    pub fn cache(&self) -> &Arc<ShmCache> {
        &self.cache
    }

    /// Set the time between passes.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Log the number of freed items after each pass that freed any.
    pub fn report_freed(mut self, report: bool) -> Self {
        self.report_freed = report;
        self
    }

    /// Run one pass against the current time.
    pub fn sweep_once(&self) -> CacheResult<u64> {
        let freed = self.cache.expire(now_secs())?;
        if self.report_freed && freed > 0 {
            info!(cache = %self.cache.name(), freed, "expired items freed");
        }
        Ok(freed)
    }

    /// Sweep every interval until `shutdown` is raised.
    pub fn run(&self, shutdown: &AtomicBool) -> CacheResult<()> {
        while !shutdown.load(Ordering::Relaxed) {
            let deadline = Instant::now() + self.interval;
            while !shutdown.load(Ordering::Relaxed) {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                thread::sleep((deadline - now).min(SLEEP_SLICE));
            }
            if shutdown.load(Ordering::Relaxed) {
                break;
            }

            if let Err(e) = self.sweep_once() {
                error!(cache = %self.cache.name(), "expiration stopped: {e}");
                return Err(e);
            }
        }
        Ok(())
    }

    /// Run on a dedicated thread named after the cache.
    pub fn spawn(self, shutdown: Arc<AtomicBool>) -> io::Result<JoinHandle<CacheResult<()>>> {
        self.spawn_with(shutdown, |_| {})
    }

    /// Like [`spawn`](Self::spawn), handing the result of [`run`](Self::run)
    /// to `on_exit` on the sweeper thread before it finishes.
    pub fn spawn_with<F>(
        self,
        shutdown: Arc<AtomicBool>,
        on_exit: F,
    ) -> io::Result<JoinHandle<CacheResult<()>>>
    where
        F: FnOnce(&CacheResult<()>) + Send + 'static,
    {
        thread::Builder::new()
            .name(format!("sweeper-{}", self.cache.name()))
            .spawn(move || {
                let result = self.run(&shutdown);
                on_exit(&result);
                result
            })
    }
}
