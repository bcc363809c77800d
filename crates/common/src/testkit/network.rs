use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Result};

use super::peer::{HolderMode, TestPeer};
use crate::peer::{PeerService, PeerServiceConfig};
use crate::store::MemoryContentStore;

/// A server plus the peers connected to it
///
/// TestNetwork owns one [`PeerService`] backed by an in-memory store and
/// manages the lifecycle of the peers talking to it.
pub struct TestNetwork {
    service: PeerService<MemoryContentStore>,
    /// All connected peers, indexed by name
    peers: HashMap<String, TestPeer>,
}

impl TestNetwork {
    pub fn new() -> Self {
        Self::with_config(PeerServiceConfig::default())
    }

    pub fn with_config(config: PeerServiceConfig) -> Self {
        Self {
            service: PeerService::new(MemoryContentStore::new(), config),
            peers: HashMap::new(),
        }
    }

    pub fn service(&self) -> &PeerService<MemoryContentStore> {
        &self.service
    }

    /// Connect and register a new peer answering requests like the web client
    pub async fn add_peer(&mut self, name: impl Into<String>) -> Result<()> {
        self.add_peer_with(name, HolderMode::Legacy).await
    }

    pub async fn add_peer_with(&mut self, name: impl Into<String>, mode: HolderMode) -> Result<()> {
        let name = name.into();

        if self.peers.contains_key(&name) {
            return Err(anyhow!("Peer '{}' already exists", name));
        }

        let peer = TestPeer::connect(&self.service, name.clone(), "password", mode).await?;
        self.peers.insert(name, peer);

        Ok(())
    }

    /// Get a peer by name
    pub fn peer(&self, name: &str) -> Option<&TestPeer> {
        self.peers.get(name)
    }

    pub fn peer_mut(&mut self, name: &str) -> Option<&mut TestPeer> {
        self.peers.get_mut(name)
    }

    pub fn peer_names(&self) -> Vec<String> {
        self.peers.keys().cloned().collect()
    }

    /// Disconnect a peer and forget it
    pub async fn remove_peer(&mut self, name: &str) -> Result<()> {
        if let Some(mut peer) = self.peers.remove(name) {
            peer.disconnect().await?;
        }
        Ok(())
    }

    /// Disconnect every peer
    pub async fn shutdown(&mut self) -> Result<()> {
        tracing::info!("Shutting down test network with {} peers", self.peers.len());

        for (name, peer) in self.peers.iter_mut() {
            if let Err(e) = peer.disconnect().await {
                tracing::error!("Error disconnecting peer {}: {}", name, e);
            }
        }

        self.peers.clear();
        Ok(())
    }

    /// Poll a condition until it succeeds or times out
    ///
    /// # Example
    /// ```rust,ignore
    /// net.eventually(Duration::from_secs(5), || async {
    ///     Ok(net.peer("bob").unwrap().held_parts().len() == 1)
    /// }).await?;
    /// ```
    pub async fn eventually<F, Fut>(&self, timeout: Duration, condition: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<bool>>,
    {
        let start = std::time::Instant::now();
        let poll_interval = Duration::from_millis(10);

        loop {
            match condition().await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) => tracing::debug!("Eventual condition check error: {}", e),
            }

            if start.elapsed() > timeout {
                return Err(anyhow!("Condition not met within timeout ({:?})", timeout));
            }

            tokio::time::sleep(poll_interval).await;
        }
    }
}

impl Default for TestNetwork {
    fn default() -> Self {
        Self::new()
    }
}
