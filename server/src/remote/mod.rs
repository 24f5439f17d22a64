//! Remote read/admin server.
//!
//! A fixed pool of worker threads shares one listening socket. Each worker
//! takes the accept lock, accepts a connection, serves its single request
//! and closes it. Workers poll the shutdown flag between accepts.

mod handler;
mod net;

pub use handler::{ConnectionError, Handler, NOT_FOUND};
pub use net::{Endpoint, Listener, Stream};

use crate::config::ServerConfig;
use crate::metrics::ActiveConnection;
use crate::state::ProcessState;
use crate::workers::{WorkerHandle, join_workers, spawn_workers};
use parking_lot::Mutex;
use shm_cache::CacheRegistry;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long an idle worker waits before polling the listener again.
const ACCEPT_POLL: Duration = Duration::from_millis(10);

struct Shared {
    listener: Listener,
    accept_lock: Mutex<()>,
    handler: Handler,
    timeout: Duration,
    state: ProcessState,
}

/// Handle to a running remote server.
pub struct RemoteServer {
    endpoint: Endpoint,
    workers: Vec<WorkerHandle<()>>,
}

impl RemoteServer {
    /// Bind the configured address and start the workers.
    pub fn start(
        config: &ServerConfig,
        registry: Arc<CacheRegistry>,
        state: ProcessState,
    ) -> io::Result<Self> {
        let listener = Listener::bind(&Endpoint::resolve(&config.address)?, config.backlog)?;
        let endpoint = listener.local_endpoint()?;

        let shared = Arc::new(Shared {
            listener,
            accept_lock: Mutex::new(()),
            handler: Handler::new(registry, config.response),
            timeout: config.socket_timeout(),
            state,
        });

        let workers = spawn_workers(config.threads, "remote", move |_| accept_loop(&shared))?;
        info!(address = %endpoint, threads = config.threads, "remote server listening");

        Ok(Self { endpoint, workers })
    }

    /// The bound endpoint. For TCP this carries the real port when the
    /// configured one was 0.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Wait for every worker to observe shutdown.
    pub fn join(self) {
        join_workers(self.workers);
        debug!(address = %self.endpoint, "remote server stopped");
    }
}

fn accept_loop(shared: &Shared) {
    while !shared.state.is_shutdown() {
        let accepted = {
            let _guard = shared.accept_lock.lock();
            shared.listener.accept()
        };

        let mut stream = match accepted {
            Ok(stream) => stream,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
                continue;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("accept failed: {e}");
                std::thread::sleep(ACCEPT_POLL);
                continue;
            }
        };

        let _active = ActiveConnection::open();
        if let Err(e) = stream.set_timeout(shared.timeout) {
            debug!("unable to set socket timeout: {e}");
            continue;
        }

        match shared.handler.serve(&mut stream) {
            Ok(()) => {}
            Err(ConnectionError::Cache(e)) if e.is_fatal() => {
                shared.state.fail("remote server", &e);
            }
            Err(e) if e.is_protocol() => {
                warn!(peer = %stream.peer(), "closing connection: {e}");
            }
            Err(e) => {
                debug!(peer = %stream.peer(), "connection aborted: {e}");
            }
        }
    }
}
