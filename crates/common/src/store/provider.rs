use std::fmt::{Debug, Display};

use async_trait::async_trait;

use crate::file::{FileMeta, FileRef, ShardLocation, ShardMeta};
use crate::identity::Identity;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ContentStoreError<T> {
    /// Whatever went wrong inside the backing store
    #[error("unhandled content store error: {0}")]
    Provider(#[from] T),
    /// The (owner, name) pair is already taken
    #[error("file already exists: {0}")]
    DuplicateFile(FileRef),
    /// A write referenced an identity that was never upserted
    #[error("unknown identity: {0}")]
    UnknownIdentity(String),
    /// A shard write referenced a file that was never inserted
    #[error("unknown file: {0}")]
    UnknownFile(FileRef),
    /// A shard with the same sequence index already exists for the file
    #[error("shard {1} already recorded for {0}")]
    DuplicateShard(FileRef, u32),
}

/// Durable relational store holding identities, file metadata,
///  shards and the shard holding relation.
///
/// Implementations must make `insert_shard_and_holder` atomic: a shard
///  never exists without a holder and a holder row never points at
///  a missing shard. Uploads go through `insert_file_with_shards`, so a
///  failed upload never leaves a file with only some of its shards.
#[async_trait]
pub trait ContentStore: Send + Sync + Debug + Clone + 'static {
    type Error: Display + Debug + Send + Sync + 'static;

    /// Insert an identity, doing nothing if the username already exists
    async fn upsert_identity(&self, identity: &Identity) -> Result<(), ContentStoreError<Self::Error>>;

    /// Fetch the persisted identity for a username
    async fn identity(
        &self,
        username: &str,
    ) -> Result<Option<Identity>, ContentStoreError<Self::Error>>;

    async fn file_exists(
        &self,
        owner: &Identity,
        name: &str,
    ) -> Result<bool, ContentStoreError<Self::Error>>;

    /// Insert metadata for a new file.
    ///
    /// Should fail with `ContentStoreError::DuplicateFile` if the owner
    ///  already has a file by that name.
    async fn insert_file_metadata(
        &self,
        owner: &Identity,
        meta: &FileMeta,
    ) -> Result<(), ContentStoreError<Self::Error>>;

    async fn file_metadata(
        &self,
        owner: &Identity,
        name: &str,
    ) -> Result<Option<FileMeta>, ContentStoreError<Self::Error>>;

    /// Every file the owner has stored, in insertion order
    async fn files_for_owner(
        &self,
        owner: &Identity,
    ) -> Result<Vec<FileMeta>, ContentStoreError<Self::Error>>;

    /// Persist a shard and the peer holding it as one unit
    async fn insert_shard_and_holder(
        &self,
        shard: &ShardMeta,
        holder: &Identity,
    ) -> Result<(), ContentStoreError<Self::Error>>;

    /// Remove a file along with its shards and their holders. Removing a
    ///  file that does not exist is not an error.
    async fn delete_file(
        &self,
        owner: &Identity,
        name: &str,
    ) -> Result<(), ContentStoreError<Self::Error>>;

    /// Persist a new file together with every shard and its holder.
    ///
    /// Either all of it is written or none of it is. This default writes
    ///  piece by piece and deletes the file again if a shard write fails;
    ///  stores with real transactions should override it.
    async fn insert_file_with_shards(
        &self,
        owner: &Identity,
        meta: &FileMeta,
        shards: &[(ShardMeta, Identity)],
    ) -> Result<(), ContentStoreError<Self::Error>> {
        self.insert_file_metadata(owner, meta).await?;

        for (shard, holder) in shards {
            if let Err(e) = self.insert_shard_and_holder(shard, holder).await {
                if let Err(undo) = self.delete_file(owner, &meta.name).await {
                    tracing::error!(
                        "content store: could not remove partial file {}/{}: {}",
                        owner.username(),
                        meta.name,
                        undo
                    );
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Shards of a file with their holders, ascending by sequence index
    async fn holders_and_shards_for_file(
        &self,
        owner: &Identity,
        name: &str,
    ) -> Result<Vec<ShardLocation>, ContentStoreError<Self::Error>>;

    /// Cheap round trip used by readiness checks
    async fn ping(&self) -> Result<(), ContentStoreError<Self::Error>> {
        Ok(())
    }
}
