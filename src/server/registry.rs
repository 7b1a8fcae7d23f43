//! Registry of live connections.
//!
//! Each served connection registers its close token under its
//! [`ConnectionId`]. The listener uses the registry to close every connection
//! through its normal closing path on shutdown. Entries are removed when the
//! returned [`Registration`] is dropped, including after a panic.

use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::connection::ConnectionId;

/// Process-scoped map from connection id to close token.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, CancellationToken>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Register `id` with a close token derived from `parent`.
    ///
    /// If `parent` is already cancelled the token starts cancelled, so a
    /// connection accepted during shutdown closes straight away.
    #[must_use]
    pub fn register(self: &Arc<Self>, id: ConnectionId, parent: &CancellationToken) -> Registration {
        let token = parent.child_token();
        self.connections.insert(id, token.clone());
        Registration {
            registry: Arc::clone(self),
            id,
            token,
        }
    }

    /// Ask connection `id` to close. Returns `false` if it is not registered.
    pub fn close(&self, id: ConnectionId) -> bool {
        let Some(token) = self.connections.get(&id) else {
            return false;
        };
        token.cancel();
        true
    }

    /// Ask every registered connection to close and return how many were
    /// signalled.
    pub fn close_all(&self) -> usize {
        let mut count = 0;
        for entry in &self.connections {
            entry.value().cancel();
            count += 1;
        }
        count
    }

    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool { self.connections.contains_key(&id) }

    #[must_use]
    pub fn len(&self) -> usize { self.connections.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.connections.is_empty() }

    /// Registered ids in ascending order.
    #[must_use]
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.connections.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }
}

/// Registry entry for one connection; deregisters on drop.
#[derive(Debug)]
pub struct Registration {
    registry: Arc<ConnectionRegistry>,
    id: ConnectionId,
    token: CancellationToken,
}

impl Registration {
    #[must_use]
    pub fn id(&self) -> ConnectionId { self.id }

    /// Token cancelled when the connection should close.
    #[must_use]
    pub fn token(&self) -> CancellationToken { self.token.clone() }
}

impl Drop for Registration {
    fn drop(&mut self) { self.registry.connections.remove(&self.id); }
}
