use std::sync::Arc;

use crate::file::{File, FileMeta, FileRef, ShardMeta};
use crate::identity::Identity;
use crate::ledger::{LedgerError, PartLedger};
use crate::registry::ConnectionRegistry;
use crate::retrieval::{RetrievalConfig, RetrievalError, Retriever};
use crate::sharder::{self, ShardError};
use crate::store::ContentStore;

use super::handle::PeerHandle;
use super::protocol::ErrorKind;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerServiceConfig {
    pub retrieval: RetrievalConfig,
    /// Refuse registrations whose password digest differs from the one
    ///  persisted for the username
    pub verify_passwords: bool,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RegisterError {
    #[error("credentials for {0} do not match the registered identity")]
    AuthConflict(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl RegisterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegisterError::AuthConflict(_) => ErrorKind::AuthConflict,
            RegisterError::Ledger(e) => e.kind(),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("file already exists: {0}")]
    DuplicateFile(FileRef),
    #[error(transparent)]
    Shard(#[from] ShardError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl UploadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UploadError::DuplicateFile(_) => ErrorKind::DuplicateFile,
            UploadError::Shard(ShardError::NoPeersAvailable) => ErrorKind::NoPeersAvailable,
            UploadError::Ledger(e) => e.kind(),
        }
    }
}

struct PeerServiceInner<S: ContentStore> {
    registry: ConnectionRegistry,
    ledger: PartLedger<S>,
    retriever: Retriever<S>,
    config: PeerServiceConfig,
}

/// The operations a connected peer can trigger: registering, uploading
///  and retrieving. Shared by every session on the server.
pub struct PeerService<S: ContentStore> {
    inner: Arc<PeerServiceInner<S>>,
}

impl<S: ContentStore> Clone for PeerService<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: ContentStore> std::fmt::Debug for PeerService<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerService")
            .field("connections", &self.inner.registry.len())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl<S: ContentStore> PeerService<S> {
    pub fn new(store: S, config: PeerServiceConfig) -> Self {
        Self::with_registry(store, ConnectionRegistry::new(), config)
    }

    pub fn with_registry(store: S, registry: ConnectionRegistry, config: PeerServiceConfig) -> Self {
        let ledger = PartLedger::new(store);
        let retriever = Retriever::new(ledger.clone(), registry.clone(), config.retrieval);
        Self {
            inner: Arc::new(PeerServiceInner {
                registry,
                ledger,
                retriever,
                config,
            }),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.inner.registry
    }

    pub fn ledger(&self) -> &PartLedger<S> {
        &self.inner.ledger
    }

    pub fn config(&self) -> &PeerServiceConfig {
        &self.inner.config
    }

    /// Bind `identity` to `connection` and return the files it owns.
    ///
    /// Registering again under the same username is idempotent in the
    ///  store and moves the live binding to the newest connection.
    pub async fn register(
        &self,
        identity: &Identity,
        connection: &PeerHandle,
    ) -> Result<Vec<FileMeta>, RegisterError> {
        if self.inner.config.verify_passwords {
            if let Some(stored) = self.inner.ledger.identity(identity.username()).await? {
                if stored.password_digest() != identity.password_digest() {
                    tracing::warn!("register: rejected {} on connection {}", identity, connection.id());
                    return Err(RegisterError::AuthConflict(identity.username().to_string()));
                }
            }
        }

        self.inner.ledger.record_identity(identity).await?;
        self.inner
            .registry
            .register(identity.clone(), connection.clone());

        Ok(self.inner.ledger.files_for(identity).await?)
    }

    /// Shard `file` across every other connected peer, record the shards
    ///  and push each one to its holder.
    ///
    /// The file and all of its shards are recorded in one store write
    ///  before any part leaves the server, so a failed upload leaves
    ///  nothing behind. A holder that drops before its part is queued keeps
    ///  its ledger entry; retrieval reports that shard as unavailable.
    pub async fn upload(&self, file: File) -> Result<Vec<ShardMeta>, UploadError> {
        let ledger = &self.inner.ledger;
        if ledger.file_exists(&file.owner, file.name()).await? {
            return Err(UploadError::DuplicateFile(file.file_ref()));
        }

        let destinations = self.inner.registry.list_connections();
        let assignments = sharder::shard(&file, &destinations, &file.owner)?;

        let holdings: Vec<(ShardMeta, Identity)> = assignments
            .iter()
            .map(|a| (a.shard.meta.clone(), a.holder.clone()))
            .collect();
        ledger.record_upload(&file, &holdings).await?;

        for assignment in &assignments {
            if let Err(e) = assignment
                .destination
                .send_part(&assignment.shard, &file.meta)
            {
                tracing::warn!(
                    "upload: shard {} of {} not delivered to {}: {}",
                    assignment.shard.sequence_index(),
                    file.file_ref(),
                    assignment.holder,
                    e
                );
            }
        }

        tracing::info!(
            "upload: {} ({} bytes) split into {} shards",
            file.file_ref(),
            file.data.len(),
            holdings.len()
        );
        Ok(holdings.into_iter().map(|(meta, _)| meta).collect())
    }

    pub async fn retrieve(&self, owner: &Identity, name: &str) -> Result<File, RetrievalError> {
        self.inner.retriever.retrieve(owner, name).await
    }
}
