use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::provider::{ContentStore, ContentStoreError};
use crate::file::{FileMeta, FileRef, ShardLocation, ShardMeta};
use crate::identity::Identity;

/// In-memory content store using HashMaps
#[derive(Debug, Clone)]
pub struct MemoryContentStore {
    inner: Arc<RwLock<MemoryContentStoreInner>>,
}

#[derive(Debug, Default)]
struct MemoryContentStoreInner {
    /// username -> identity
    identities: HashMap<String, Identity>,
    /// owner username -> files in insertion order
    files: HashMap<String, Vec<FileMeta>>,
    /// parent file -> sequence index -> (shard, holder usernames)
    shards: HashMap<FileRef, BTreeMap<u32, (ShardMeta, Vec<String>)>>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryContentStoreError {
    #[error("memory store error: {0}")]
    Internal(String),
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(MemoryContentStoreInner::default())),
        }
    }

    fn read(
        &self,
    ) -> Result<RwLockReadGuard<'_, MemoryContentStoreInner>, ContentStoreError<MemoryContentStoreError>>
    {
        self.inner.read().map_err(|e| {
            ContentStoreError::Provider(MemoryContentStoreError::Internal(format!(
                "failed to acquire read lock: {}",
                e
            )))
        })
    }

    fn write(
        &self,
    ) -> Result<RwLockWriteGuard<'_, MemoryContentStoreInner>, ContentStoreError<MemoryContentStoreError>>
    {
        self.inner.write().map_err(|e| {
            ContentStoreError::Provider(MemoryContentStoreError::Internal(format!(
                "failed to acquire write lock: {}",
                e
            )))
        })
    }
}

impl Default for MemoryContentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryContentStoreInner {
    fn require_identity(
        &self,
        username: &str,
    ) -> Result<(), ContentStoreError<MemoryContentStoreError>> {
        if self.identities.contains_key(username) {
            Ok(())
        } else {
            Err(ContentStoreError::UnknownIdentity(username.to_string()))
        }
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    type Error = MemoryContentStoreError;

    async fn upsert_identity(&self, identity: &Identity) -> Result<(), ContentStoreError<Self::Error>> {
        let mut inner = self.write()?;
        inner
            .identities
            .entry(identity.username().to_string())
            .or_insert_with(|| identity.clone());
        Ok(())
    }

    async fn identity(
        &self,
        username: &str,
    ) -> Result<Option<Identity>, ContentStoreError<Self::Error>> {
        Ok(self.read()?.identities.get(username).cloned())
    }

    async fn file_exists(
        &self,
        owner: &Identity,
        name: &str,
    ) -> Result<bool, ContentStoreError<Self::Error>> {
        let inner = self.read()?;
        Ok(inner
            .files
            .get(owner.username())
            .map(|files| files.iter().any(|f| f.name == name))
            .unwrap_or(false))
    }

    async fn insert_file_metadata(
        &self,
        owner: &Identity,
        meta: &FileMeta,
    ) -> Result<(), ContentStoreError<Self::Error>> {
        let mut inner = self.write()?;
        inner.require_identity(owner.username())?;

        let files = inner.files.entry(owner.username().to_string()).or_default();
        if files.iter().any(|f| f.name == meta.name) {
            return Err(ContentStoreError::DuplicateFile(FileRef::new(
                owner,
                meta.name.clone(),
            )));
        }
        files.push(meta.clone());
        Ok(())
    }

    async fn file_metadata(
        &self,
        owner: &Identity,
        name: &str,
    ) -> Result<Option<FileMeta>, ContentStoreError<Self::Error>> {
        let inner = self.read()?;
        Ok(inner
            .files
            .get(owner.username())
            .and_then(|files| files.iter().find(|f| f.name == name))
            .cloned())
    }

    async fn files_for_owner(
        &self,
        owner: &Identity,
    ) -> Result<Vec<FileMeta>, ContentStoreError<Self::Error>> {
        let inner = self.read()?;
        Ok(inner
            .files
            .get(owner.username())
            .cloned()
            .unwrap_or_default())
    }

    async fn insert_shard_and_holder(
        &self,
        shard: &ShardMeta,
        holder: &Identity,
    ) -> Result<(), ContentStoreError<Self::Error>> {
        // Both checks happen under the same write lock as the insert, which
        //  is what makes the pair atomic here
        let mut inner = self.write()?;
        inner.require_identity(holder.username())?;

        let parent_known = inner
            .files
            .get(&shard.parent.owner)
            .map(|files| files.iter().any(|f| f.name == shard.parent.name))
            .unwrap_or(false);
        if !parent_known {
            return Err(ContentStoreError::UnknownFile(shard.parent.clone()));
        }

        let shards = inner.shards.entry(shard.parent.clone()).or_default();
        if shards.contains_key(&shard.sequence_index) {
            return Err(ContentStoreError::DuplicateShard(
                shard.parent.clone(),
                shard.sequence_index,
            ));
        }
        shards.insert(
            shard.sequence_index,
            (shard.clone(), vec![holder.username().to_string()]),
        );
        Ok(())
    }

    async fn delete_file(
        &self,
        owner: &Identity,
        name: &str,
    ) -> Result<(), ContentStoreError<Self::Error>> {
        let mut inner = self.write()?;
        if let Some(files) = inner.files.get_mut(owner.username()) {
            files.retain(|f| f.name != name);
        }
        inner.shards.remove(&FileRef::new(owner, name));
        Ok(())
    }

    async fn insert_file_with_shards(
        &self,
        owner: &Identity,
        meta: &FileMeta,
        shards: &[(ShardMeta, Identity)],
    ) -> Result<(), ContentStoreError<Self::Error>> {
        let mut inner = self.write()?;
        inner.require_identity(owner.username())?;

        let parent = FileRef::new(owner, meta.name.clone());
        let taken = inner
            .files
            .get(owner.username())
            .map(|files| files.iter().any(|f| f.name == meta.name))
            .unwrap_or(false);
        if taken {
            return Err(ContentStoreError::DuplicateFile(parent));
        }

        // validate everything before touching the maps
        let mut staged = BTreeMap::new();
        for (shard, holder) in shards {
            inner.require_identity(holder.username())?;
            if shard.parent != parent {
                return Err(ContentStoreError::UnknownFile(shard.parent.clone()));
            }
            let entry = (shard.clone(), vec![holder.username().to_string()]);
            if staged.insert(shard.sequence_index, entry).is_some() {
                return Err(ContentStoreError::DuplicateShard(
                    parent.clone(),
                    shard.sequence_index,
                ));
            }
        }

        inner
            .files
            .entry(owner.username().to_string())
            .or_default()
            .push(meta.clone());
        inner.shards.insert(parent, staged);
        Ok(())
    }

    async fn holders_and_shards_for_file(
        &self,
        owner: &Identity,
        name: &str,
    ) -> Result<Vec<ShardLocation>, ContentStoreError<Self::Error>> {
        let inner = self.read()?;
        let key = FileRef::new(owner, name);

        let Some(shards) = inner.shards.get(&key) else {
            return Ok(Vec::new());
        };

        // BTreeMap iteration is already ascending by sequence index
        Ok(shards
            .values()
            .map(|(meta, holders)| ShardLocation {
                shard: meta.clone(),
                holders: holders
                    .iter()
                    .filter_map(|username| inner.identities.get(username).cloned())
                    .collect(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::ContentAddress;

    fn shard_for(owner: &Identity, name: &str, index: u32, holder: &Identity) -> ShardMeta {
        ShardMeta {
            parent: FileRef::new(owner, name),
            sequence_index: index,
            content_address: ContentAddress::derive(name, holder),
        }
    }

    #[tokio::test]
    async fn test_upsert_identity_is_idempotent() {
        let store = MemoryContentStore::new();
        let alice = Identity::from_credentials("alice", "pw");

        store.upsert_identity(&alice).await.unwrap();
        store
            .upsert_identity(&Identity::from_credentials("alice", "other"))
            .await
            .unwrap();

        let stored = store.identity("alice").await.unwrap().unwrap();
        assert_eq!(stored, alice);
    }

    #[tokio::test]
    async fn test_duplicate_file_rejected() {
        let store = MemoryContentStore::new();
        let alice = Identity::from_credentials("alice", "pw");
        store.upsert_identity(&alice).await.unwrap();

        let first = FileMeta::from_unix_seconds("a.txt", 10);
        store.insert_file_metadata(&alice, &first).await.unwrap();

        let second = FileMeta::from_unix_seconds("a.txt", 20);
        let err = store.insert_file_metadata(&alice, &second).await.unwrap_err();
        assert!(matches!(err, ContentStoreError::DuplicateFile(_)));

        let stored = store.file_metadata(&alice, "a.txt").await.unwrap().unwrap();
        assert_eq!(stored.unix_seconds(), 10);
    }

    #[tokio::test]
    async fn test_shards_come_back_in_index_order() {
        let store = MemoryContentStore::new();
        let alice = Identity::from_credentials("alice", "pw");
        let bob = Identity::from_credentials("bob", "pw");
        let carol = Identity::from_credentials("carol", "pw");
        for id in [&alice, &bob, &carol] {
            store.upsert_identity(id).await.unwrap();
        }
        store
            .insert_file_metadata(&alice, &FileMeta::from_unix_seconds("a.txt", 0))
            .await
            .unwrap();

        store
            .insert_shard_and_holder(&shard_for(&alice, "a.txt", 1, &carol), &carol)
            .await
            .unwrap();
        store
            .insert_shard_and_holder(&shard_for(&alice, "a.txt", 0, &bob), &bob)
            .await
            .unwrap();

        let locations = store
            .holders_and_shards_for_file(&alice, "a.txt")
            .await
            .unwrap();
        assert_eq!(locations.len(), 2);
        assert_eq!(locations[0].shard.sequence_index, 0);
        assert_eq!(locations[0].holders, vec![bob]);
        assert_eq!(locations[1].shard.sequence_index, 1);
        assert_eq!(locations[1].holders, vec![carol]);
    }

    #[tokio::test]
    async fn test_file_with_shards_is_all_or_nothing() {
        let store = MemoryContentStore::new();
        let alice = Identity::from_credentials("alice", "pw");
        let bob = Identity::from_credentials("bob", "pw");
        let ghost = Identity::from_credentials("ghost", "pw");
        store.upsert_identity(&alice).await.unwrap();
        store.upsert_identity(&bob).await.unwrap();
        let meta = FileMeta::from_unix_seconds("a.txt", 0);

        let err = store
            .insert_file_with_shards(
                &alice,
                &meta,
                &[
                    (shard_for(&alice, "a.txt", 0, &bob), bob.clone()),
                    (shard_for(&alice, "a.txt", 1, &ghost), ghost.clone()),
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ContentStoreError::UnknownIdentity(_)));
        assert!(!store.file_exists(&alice, "a.txt").await.unwrap());

        store
            .insert_file_with_shards(
                &alice,
                &meta,
                &[(shard_for(&alice, "a.txt", 0, &bob), bob.clone())],
            )
            .await
            .unwrap();
        let locations = store
            .holders_and_shards_for_file(&alice, "a.txt")
            .await
            .unwrap();
        assert_eq!(locations.len(), 1);

        store.delete_file(&alice, "a.txt").await.unwrap();
        assert!(!store.file_exists(&alice, "a.txt").await.unwrap());
        assert!(store
            .holders_and_shards_for_file(&alice, "a.txt")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_shard_requires_known_parent_and_holder() {
        let store = MemoryContentStore::new();
        let alice = Identity::from_credentials("alice", "pw");
        let bob = Identity::from_credentials("bob", "pw");
        store.upsert_identity(&alice).await.unwrap();

        let err = store
            .insert_shard_and_holder(&shard_for(&alice, "a.txt", 0, &bob), &bob)
            .await
            .unwrap_err();
        assert!(matches!(err, ContentStoreError::UnknownIdentity(_)));

        store.upsert_identity(&bob).await.unwrap();
        let err = store
            .insert_shard_and_holder(&shard_for(&alice, "a.txt", 0, &bob), &bob)
            .await
            .unwrap_err();
        assert!(matches!(err, ContentStoreError::UnknownFile(_)));
    }
}
