use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::identity::Identity;
use crate::peer::PeerHandle;

/// Which identity is reachable on which live connection.
///
/// The registry is the only shared peer-connection state in the server;
///  every session talks to it through these methods. The lock is only
///  ever held for map operations, never across I/O.
///
/// Bindings are keyed by username, so snapshots come back sorted by
///  username.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<BTreeMap<String, (Identity, PeerHandle)>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `identity` to `connection`. A previous binding for the same
    ///  username is replaced.
    pub fn register(&self, identity: Identity, connection: PeerHandle) {
        let username = identity.username().to_string();
        let previous = self
            .inner
            .write()
            .insert(username.clone(), (identity, connection.clone()));

        match previous {
            Some((_, old)) if old != connection => tracing::info!(
                "registry: {} moved from connection {} to {}",
                username,
                old.id(),
                connection.id()
            ),
            _ => tracing::info!("registry: {} bound to connection {}", username, connection.id()),
        }
    }

    /// Live connection for a peer, matched on username only
    pub fn resolve(&self, identity: &Identity) -> Option<PeerHandle> {
        self.resolve_username(identity.username())
    }

    pub fn resolve_username(&self, username: &str) -> Option<PeerHandle> {
        self.inner
            .read()
            .get(username)
            .map(|(_, connection)| connection.clone())
    }

    /// Drop whatever binding points at `connection`. A username that has
    ///  since been re-registered on another connection is left alone.
    pub fn unregister(&self, connection: &PeerHandle) -> Option<Identity> {
        let mut inner = self.inner.write();
        let username = inner
            .iter()
            .find(|(_, (_, bound))| bound == connection)
            .map(|(username, _)| username.clone())?;

        let (identity, _) = inner.remove(&username)?;
        tracing::info!(
            "registry: {} unbound from connection {}",
            identity,
            connection.id()
        );
        Some(identity)
    }

    /// Snapshot of every binding
    pub fn list_connections(&self) -> Vec<(Identity, PeerHandle)> {
        self.inner.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
