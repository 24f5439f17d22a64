//! Cache server metrics.

use metriken::{Counter, Gauge, metric};

#[metric(
    name = "connections_accepted",
    description = "Total number of remote connections accepted"
)]
pub static CONNECTIONS_ACCEPTED: Counter = Counter::new();

#[metric(
    name = "connections_active",
    description = "Number of remote connections being served"
)]
pub static CONNECTIONS_ACTIVE: Gauge = Gauge::new();

#[metric(name = "requests_get", description = "Get style requests (raw, dict, stream, magic get/exists)")]
pub static REQUESTS_GET: Counter = Counter::new();

#[metric(name = "requests_set", description = "Set requests (array set, magic set/update)")]
pub static REQUESTS_SET: Counter = Counter::new();

#[metric(name = "requests_delete", description = "Delete requests (raw, magic del/clear)")]
pub static REQUESTS_DELETE: Counter = Counter::new();

#[metric(name = "requests_dump", description = "Full arena dumps served")]
pub static REQUESTS_DUMP: Counter = Counter::new();

#[metric(name = "protocol_errors", description = "Connections aborted on malformed input")]
pub static PROTOCOL_ERRORS: Counter = Counter::new();

#[metric(name = "replication_applied", description = "Replication datagrams applied")]
pub static REPLICATION_APPLIED: Counter = Counter::new();

#[metric(name = "replication_dropped", description = "Replication datagrams dropped")]
pub static REPLICATION_DROPPED: Counter = Counter::new();

/// Decrements [`CONNECTIONS_ACTIVE`] when dropped.
pub(crate) struct ActiveConnection;

impl ActiveConnection {
    pub(crate) fn open() -> Self {
        CONNECTIONS_ACCEPTED.increment();
        CONNECTIONS_ACTIVE.increment();
        Self
    }
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        CONNECTIONS_ACTIVE.decrement();
    }
}
