//! Count of connections currently being served.

use std::sync::atomic::{AtomicU64, Ordering};

use log::debug;

use super::ConnectionId;

static ACTIVE_CONNECTIONS: AtomicU64 = AtomicU64::new(0);

/// Guard held for the lifetime of a served connection. Updates the process
/// count and the `wiregate_connections_active` gauge.
pub(super) struct ActiveConnection {
    id: ConnectionId,
}

impl ActiveConnection {
    pub(super) fn new(id: ConnectionId) -> Self {
        let active = ACTIVE_CONNECTIONS.fetch_add(1, Ordering::Relaxed) + 1;
        crate::metrics::inc_connections();
        debug!("connection opened: id={id}, active={active}");
        Self { id }
    }
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        let active = ACTIVE_CONNECTIONS.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        crate::metrics::dec_connections();
        debug!("connection released: id={}, active={active}", self.id);
    }
}

/// Number of connections currently being served in this process.
#[must_use]
pub fn active_connection_count() -> u64 { ACTIVE_CONNECTIONS.load(Ordering::Relaxed) }
