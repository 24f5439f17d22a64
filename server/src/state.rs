//! Process-wide lifecycle flags.

use shm_cache::CacheError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::error;

/// Shutdown and fatal-error flags shared by every server thread.
#[derive(Debug, Clone, Default)]
pub struct ProcessState {
    shutdown: Arc<AtomicBool>,
    fatal: Arc<AtomicBool>,
}

impl ProcessState {
    /// Wrap the flag raised by the signal handler.
    pub fn new(shutdown: Arc<AtomicBool>) -> Self {
        Self {
            shutdown,
            fatal: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn shutdown_flag(&self) -> &Arc<AtomicBool> {
        &self.shutdown
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Record an error after which the process must not keep serving and
    /// stop every thread. The binary exits non-zero so a supervisor can
    /// restart it.
    pub fn fail(&self, component: &str, err: &CacheError) {
        error!(component, "fatal cache error, shutting down: {err}");
        self.fatal.store(true, Ordering::SeqCst);
        self.request_shutdown();
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fail_requests_shutdown() {
        let state = ProcessState::default();
        assert!(!state.is_shutdown());
        assert!(!state.is_fatal());

        state.fail(
            "test",
            &CacheError::LoopDetected {
                slot: 1,
                prev: 0,
                next: 1,
            },
        );
        assert!(state.is_shutdown());
        assert!(state.is_fatal());
    }

    #[test]
    fn test_clones_share_flags() {
        let state = ProcessState::new(Arc::new(AtomicBool::new(false)));
        let other = state.clone();
        other.request_shutdown();
        assert!(state.is_shutdown());
        assert!(state.shutdown_flag().load(Ordering::Relaxed));
        assert!(!state.is_fatal());
    }
}
