//! Best-effort UDP replication between cache nodes.
//!
//! Every successful `set` or `delete` without [`Flags::LOCAL`] is handed to
//! the instance's [`Replicator`]. [`UdpReplicator`] encodes it as a
//! datagram and sends it to each peer. On the receiving side a
//! [`ReplicationReceiver`] applies datagrams with `LOCAL` set, so applied
//! mutations are never broadcast again.
//!
//! There is no ordering or delivery guarantee. A lost or reordered
//! datagram leaves replicas divergent until the key is written again.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use protocol_cache::{MAX_DATAGRAM_LEN, Mutation};
use tracing::{debug, error, warn};

use crate::{CacheError, CacheResult, Flags, ShmCache};

/// Sink for mutations that must reach peer nodes.
pub trait Replicator: Send + Sync {
    /// Broadcast `mutation` of the cache named `cache`. Must not block on
    /// peers and must not fail the originating operation.
    fn replicate(&self, cache: &str, mutation: &Mutation<'_>);
}

/// Sends mutations as datagrams to a fixed list of peers.
///
/// One unconnected socket is bound per address family present in the peer
/// list, so IPv4 and IPv6 peers can be mixed.
pub struct UdpReplicator {
    v4: Option<UdpSocket>,
    v6: Option<UdpSocket>,
    peers: Vec<SocketAddr>,
    sent: AtomicU64,
    errors: AtomicU64,
}

impl UdpReplicator {
    /// Resolve `peers` and bind the sending sockets they need.
    pub fn new<A: ToSocketAddrs>(peers: &[A]) -> io::Result<Self> {
        let mut resolved = Vec::with_capacity(peers.len());
        for peer in peers {
            resolved.extend(peer.to_socket_addrs()?);
        }

        let v4 = if resolved.iter().any(SocketAddr::is_ipv4) {
            Some(UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?)
        } else {
            None
        };
        let v6 = if resolved.iter().any(SocketAddr::is_ipv6) {
            Some(UdpSocket::bind((Ipv6Addr::UNSPECIFIED, 0))?)
        } else {
            None
        };

        Ok(Self {
            v4,
            v6,
            peers: resolved,
            sent: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        })
    }

    pub fn peers(&self) -> &[SocketAddr] {
        &self.peers
    }

    /// Datagrams delivered to the socket.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Failed sends, counted per peer.
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

impl Replicator for UdpReplicator {
    fn replicate(&self, cache: &str, mutation: &Mutation<'_>) {
        let datagram = match mutation.encode() {
            Ok(datagram) => datagram,
            Err(e) => {
                warn!(cache, "mutation not replicated: {e}");
                self.errors.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        for peer in &self.peers {
            let socket = match peer {
                SocketAddr::V4(_) => self.v4.as_ref(),
                SocketAddr::V6(_) => self.v6.as_ref(),
            };
            let Some(socket) = socket else {
                continue;
            };
            match socket.send_to(&datagram, peer) {
                Ok(_) => {
                    self.sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!(cache, peer = %peer, "replication send failed: {e}");
                    self.errors.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

/// What happened to a received datagram.
#[derive(Debug)]
pub enum Outcome {
    /// The mutation was applied.
    Applied,
    /// The datagram was malformed and ignored.
    Dropped,
    /// The engine refused the mutation.
    Rejected(CacheError),
}

const IDLE_SLEEP: Duration = Duration::from_millis(10);

/// Applies datagrams from peers to one cache instance.
pub struct ReplicationReceiver {
    cache: Arc<ShmCache>,
    sockets: Vec<UdpSocket>,
    applied: AtomicU64,
    dropped: AtomicU64,
}

impl ReplicationReceiver {
    /// Bind every address in `listen`.
    pub fn bind<A: ToSocketAddrs>(cache: Arc<ShmCache>, listen: &[A]) -> io::Result<Self> {
        let mut sockets = Vec::with_capacity(listen.len());
        for addr in listen {
            let socket = UdpSocket::bind(addr)?;
            socket.set_nonblocking(true)?;
            sockets.push(socket);
        }
        Ok(Self::from_sockets(cache, sockets))
    }

    /// Use already bound sockets. They are switched to non-blocking mode
    /// by [`run`](Self::run).
    pub fn from_sockets(cache: Arc<ShmCache>, sockets: Vec<UdpSocket>) -> Self {
        Self {
            cache,
            sockets,
            applied: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Bound addresses, in the order of `listen`.
    pub fn local_addrs(&self) -> io::Result<Vec<SocketAddr>> {
        self.sockets.iter().map(UdpSocket::local_addr).collect()
    }

    pub fn cache(&self) -> &Arc<ShmCache> {
        &self.cache
    }

    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Decode one datagram and apply it.
    ///
    /// A fatal engine error is returned as [`Outcome::Rejected`] like any
    /// other refusal; callers decide whether to stop.
    pub fn apply(&self, datagram: &[u8]) -> Outcome {
        let mutation = match Mutation::parse(datagram) {
            Ok(mutation) => mutation,
            Err(e) => {
                debug!(cache = %self.cache.name(), len = datagram.len(), "dropping datagram: {e}");
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return Outcome::Dropped;
            }
        };

        let result = match mutation {
            Mutation::Set {
                key,
                value,
                expires,
            } => self.cache.set(
                key,
                value,
                expires,
                Flags::UPDATE | Flags::LOCAL | Flags::ABSEXPIRE,
            ),
            Mutation::Delete { key } => self.cache.delete(key, Flags::LOCAL),
        };

        match result {
            Ok(()) => {
                self.applied.fetch_add(1, Ordering::Relaxed);
                Outcome::Applied
            }
            Err(e) => Outcome::Rejected(e),
        }
    }

    /// Receive and apply datagrams until `shutdown` is raised.
    ///
    /// Returns an error only when the engine reports a fatal condition or a
    /// socket fails.
    pub fn run(&self, shutdown: &AtomicBool) -> CacheResult<()> {
        self.run_with(shutdown, |_| {})
    }

    /// Like [`run`](Self::run), calling `observe` with the outcome of every
    /// received datagram.
    pub fn run_with<F>(&self, shutdown: &AtomicBool, mut observe: F) -> CacheResult<()>
    where
        F: FnMut(&Outcome),
    {
        for socket in &self.sockets {
            socket.set_nonblocking(true)?;
        }

        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
        while !shutdown.load(Ordering::Relaxed) {
            let mut idle = true;

            for socket in &self.sockets {
                let len = match socket.recv_from(&mut buf) {
                    Ok((len, _)) => len,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e.into()),
                };
                idle = false;

                let outcome = self.apply(&buf[..len]);
                observe(&outcome);
                match outcome {
                    Outcome::Rejected(e) if e.is_fatal() => {
                        error!(cache = %self.cache.name(), "replication stopped: {e}");
                        return Err(e);
                    }
                    Outcome::Rejected(e) if diverges(&e) => {
                        warn!(cache = %self.cache.name(), "unable to update cache: {e}");
                    }
                    Outcome::Rejected(e) => {
                        debug!(cache = %self.cache.name(), "replicated delete missed: {e}");
                    }
                    Outcome::Applied | Outcome::Dropped => {}
                }
            }

            if idle {
                std::thread::sleep(IDLE_SLEEP);
            }
        }
        Ok(())
    }
}

/// A refused replicated mutation leaves this node out of step with its
/// peer, except a delete of a key that is already gone.
fn diverges(err: &CacheError) -> bool {
    !matches!(err, CacheError::NotFound)
}
