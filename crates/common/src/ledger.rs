use crate::file::{File, FileMeta, FileRef, ShardLocation, ShardMeta};
use crate::identity::Identity;
use crate::peer::protocol::ErrorKind;
use crate::store::{ContentStore, ContentStoreError};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("file already exists: {0}")]
    DuplicateFile(FileRef),
    #[error("unknown identity: {0}")]
    UnknownIdentity(String),
    #[error("content store unavailable: {0}")]
    StoreUnavailable(String),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::DuplicateFile(_) => ErrorKind::DuplicateFile,
            LedgerError::UnknownIdentity(_) | LedgerError::StoreUnavailable(_) => {
                ErrorKind::StoreUnavailable
            }
        }
    }
}

impl<T: std::fmt::Display> From<ContentStoreError<T>> for LedgerError {
    fn from(err: ContentStoreError<T>) -> Self {
        match err {
            ContentStoreError::DuplicateFile(file) => LedgerError::DuplicateFile(file),
            ContentStoreError::UnknownIdentity(username) => LedgerError::UnknownIdentity(username),
            other => LedgerError::StoreUnavailable(other.to_string()),
        }
    }
}

/// Bookkeeping of who owns what and who holds which shard.
///
/// A thin layer over a [`ContentStore`] that speaks in files and shards
///  and folds backend failures into [`LedgerError`].
#[derive(Debug, Clone)]
pub struct PartLedger<S: ContentStore> {
    store: S,
}

impl<S: ContentStore> PartLedger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn record_identity(&self, identity: &Identity) -> Result<(), LedgerError> {
        self.store.upsert_identity(identity).await?;
        Ok(())
    }

    pub async fn identity(&self, username: &str) -> Result<Option<Identity>, LedgerError> {
        Ok(self.store.identity(username).await?)
    }

    /// Record a new upload with every shard and the peer holding it.
    ///
    /// Nothing is recorded unless all of it is. Fails with `DuplicateFile`
    ///  when the owner already has a file with this name.
    pub async fn record_upload(
        &self,
        file: &File,
        shards: &[(ShardMeta, Identity)],
    ) -> Result<(), LedgerError> {
        if self.store.file_exists(&file.owner, file.name()).await? {
            return Err(LedgerError::DuplicateFile(file.file_ref()));
        }
        self.store
            .insert_file_with_shards(&file.owner, &file.meta, shards)
            .await?;
        tracing::debug!("ledger: recorded {} with {} shards", file.file_ref(), shards.len());
        Ok(())
    }

    pub async fn file_exists(&self, owner: &Identity, name: &str) -> Result<bool, LedgerError> {
        Ok(self.store.file_exists(owner, name).await?)
    }

    pub async fn file(&self, owner: &Identity, name: &str) -> Result<Option<FileMeta>, LedgerError> {
        Ok(self.store.file_metadata(owner, name).await?)
    }

    pub async fn files_for(&self, owner: &Identity) -> Result<Vec<FileMeta>, LedgerError> {
        Ok(self.store.files_for_owner(owner).await?)
    }

    /// Shards of a file with their holders, ascending by sequence index
    pub async fn shard_locations(
        &self,
        owner: &Identity,
        name: &str,
    ) -> Result<Vec<ShardLocation>, LedgerError> {
        Ok(self.store.holders_and_shards_for_file(owner, name).await?)
    }

    pub async fn ping(&self) -> Result<(), LedgerError> {
        Ok(self.store.ping().await?)
    }
}
