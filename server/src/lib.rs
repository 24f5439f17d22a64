//! Shared-memory cache server.
//!
//! Hosts one or more [`shm_cache`] instances and runs the threads around
//! them: expiration sweepers, UDP replication receivers and the remote
//! read/admin server speaking the 4 byte header protocol over TCP or Unix
//! sockets.

pub mod app;
pub mod banner;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod preload;
pub mod remote;
pub mod signal;
pub mod state;
pub mod sync;
pub mod workers;

pub use app::App;
pub use config::Config;
pub use state::ProcessState;
