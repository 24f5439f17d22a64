//! Process assembly: caches, background threads and the remote server.

use crate::config::{CacheInstanceConfig, Config};
use crate::metrics::{REPLICATION_APPLIED, REPLICATION_DROPPED};
use crate::preload::preload;
use crate::remote::{Endpoint, RemoteServer};
use crate::state::ProcessState;
use crate::sync::sync_from;
use shm_cache::{
    CacheRegistry, CacheResult, Outcome, ReplicationReceiver, ShmCache, ShmCacheBuilder, Sweeper,
    UdpReplicator,
};
use std::error::Error;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info};

/// How often [`App::wait`] checks the shutdown flag.
const WAIT_POLL: Duration = Duration::from_millis(100);

/// Timeout for the startup dump pull.
const SYNC_TIMEOUT: Duration = Duration::from_secs(30);

/// A running server process.
pub struct App {
    registry: Arc<CacheRegistry>,
    background: Vec<JoinHandle<CacheResult<()>>>,
    remote: Option<RemoteServer>,
    state: ProcessState,
}

impl App {
    /// Build every cache and start the background threads.
    ///
    /// Any failure here, including a failed sync, is a startup error.
    pub fn start(config: &Config, state: ProcessState) -> Result<Self, Box<dyn Error>> {
        let mut caches = Vec::with_capacity(config.cache.len());
        for instance in &config.cache {
            caches.push(Arc::new(build_cache(instance)?));
        }
        let registry = Arc::new(CacheRegistry::new(caches)?);

        let mut app = Self {
            registry: registry.clone(),
            background: Vec::new(),
            remote: None,
            state,
        };

        for (instance, cache) in config.cache.iter().zip(registry.iter()) {
            if !instance.replication.listen.is_empty() {
                let receiver = ReplicationReceiver::bind(cache.clone(), &instance.replication.listen)?;
                for addr in receiver.local_addrs()? {
                    info!(cache = %cache.name(), address = %addr, "replication receiver bound");
                }
                app.spawn_receiver(receiver)?;
            }

            if config.sweeper.enabled && !instance.no_expire {
                let sweeper = Sweeper::new(cache.clone())
                    .interval(config.sweeper.interval())
                    .report_freed(config.sweeper.report_freed);
                info!(cache = %cache.name(), interval = ?config.sweeper.interval(), "sweeper enabled");
                app.spawn_sweeper(sweeper)?;
            }
        }

        if let Some(server) = &config.server {
            app.remote = Some(RemoteServer::start(server, registry, app.state.clone())?);
        }

        Ok(app)
    }

    pub fn registry(&self) -> &Arc<CacheRegistry> {
        &self.registry
    }

    /// Endpoint of the remote server, if one is configured.
    pub fn remote_endpoint(&self) -> Option<&Endpoint> {
        self.remote.as_ref().map(RemoteServer::endpoint)
    }

    pub fn state(&self) -> &ProcessState {
        &self.state
    }

    fn spawn_receiver(&mut self, receiver: ReplicationReceiver) -> std::io::Result<()> {
        let state = self.state.clone();
        let handle = thread::Builder::new()
            .name(format!("replication-{}", receiver.cache().name()))
            .spawn(move || {
                let result = receiver.run_with(state.shutdown_flag(), |outcome| {
                    match outcome {
                        Outcome::Applied => REPLICATION_APPLIED.increment(),
                        Outcome::Dropped | Outcome::Rejected(_) => REPLICATION_DROPPED.increment(),
                    };
                });
                if let Err(e) = &result
                    && e.is_fatal()
                {
                    state.fail("replication", e);
                }
                result
            })?;
        self.background.push(handle);
        Ok(())
    }

    fn spawn_sweeper(&mut self, sweeper: Sweeper) -> std::io::Result<()> {
        let state = self.state.clone();
        let handle = sweeper.spawn_with(self.state.shutdown_flag().clone(), move |result| {
            if let Err(e) = result
                && e.is_fatal()
            {
                state.fail("sweeper", e);
            }
        })?;
        self.background.push(handle);
        Ok(())
    }

    /// Block until shutdown is requested, then stop every thread and flush
    /// file-backed caches.
    ///
    /// Returns an error if a fatal cache error caused the shutdown.
    pub fn wait(self) -> Result<(), Box<dyn Error>> {
        while !self.state.is_shutdown() {
            thread::sleep(WAIT_POLL);
        }
        self.stop()
    }

    /// Request shutdown and stop every thread.
    pub fn shutdown(self) -> Result<(), Box<dyn Error>> {
        self.state.request_shutdown();
        self.stop()
    }

    fn stop(self) -> Result<(), Box<dyn Error>> {
        if let Some(remote) = self.remote {
            remote.join();
        }

        for handle in self.background {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("background thread stopped: {e}"),
                Err(_) => error!("background thread panicked"),
            }
        }

        for cache in self.registry.iter() {
            if let Err(e) = cache.flush() {
                error!(cache = %cache.name(), "unable to flush cache store: {e}");
            }
        }

        if self.state.is_fatal() {
            return Err("stopped after a fatal cache error".into());
        }
        info!("shutdown complete");
        Ok(())
    }
}

fn build_cache(instance: &CacheInstanceConfig) -> Result<ShmCache, Box<dyn Error>> {
    let mut builder = ShmCacheBuilder::from_config(instance.cache_config()?);

    if !instance.replication.peers.is_empty() {
        let replicator = UdpReplicator::new(&instance.replication.peers)?;
        for peer in replicator.peers() {
            info!(cache = %instance.name, peer = %peer, "replicating to peer");
        }
        builder = builder.replicator(Arc::new(replicator));
    }

    let cache = builder.build()?;

    if let Some(address) = &instance.sync {
        sync_from(&cache, address, SYNC_TIMEOUT)?;
    }

    if !instance.preload.is_empty() {
        preload(&cache, &instance.preload)?;
    }

    Ok(cache)
}
