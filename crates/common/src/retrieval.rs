//! Reassembling a stored file from the peers holding its shards.

use std::time::Duration;

use bytes::{Bytes, BytesMut};

use crate::file::{ContentAddress, File, FileRef};
use crate::identity::Identity;
use crate::ledger::{LedgerError, PartLedger};
use crate::peer::protocol::ErrorKind;
use crate::peer::{FetchError, PeerHandle};
use crate::registry::ConnectionRegistry;
use crate::store::ContentStore;

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_FETCH_ATTEMPTS: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalConfig {
    /// How long to wait on a single holder for a shard
    pub fetch_timeout: Duration,
    /// Fetches tried per shard before giving up, cycling over the
    ///  reachable holders
    pub fetch_attempts: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            fetch_attempts: DEFAULT_FETCH_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RetrievalError {
    #[error("file not found: {0}")]
    FileNotFound(FileRef),
    #[error("shards recorded for {0} are missing or incomplete")]
    FileUnavailable(FileRef),
    #[error("no holder of shard {0} is connected")]
    ShardUnavailable(u32),
    #[error("fetching shard {index} failed: {source}")]
    Fetch { index: u32, source: FetchError },
    #[error(transparent)]
    Store(#[from] LedgerError),
}

impl RetrievalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RetrievalError::FileNotFound(_) => ErrorKind::FileNotFound,
            RetrievalError::FileUnavailable(_) => ErrorKind::FileUnavailable,
            RetrievalError::ShardUnavailable(_) => ErrorKind::ShardUnavailable,
            RetrievalError::Fetch { source, .. } => source.kind(),
            RetrievalError::Store(_) => ErrorKind::StoreUnavailable,
        }
    }
}

/// Looks up where a file's shards live, pulls them from their holders
///  one at a time and concatenates them in sequence order.
#[derive(Debug, Clone)]
pub struct Retriever<S: ContentStore> {
    ledger: PartLedger<S>,
    registry: ConnectionRegistry,
    config: RetrievalConfig,
}

impl<S: ContentStore> Retriever<S> {
    pub fn new(ledger: PartLedger<S>, registry: ConnectionRegistry, config: RetrievalConfig) -> Self {
        Self {
            ledger,
            registry,
            config,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Fetch every shard of `owner`'s file `name` and return it whole.
    ///  Either all shards arrive or the call fails; partial data is never
    ///  returned.
    pub async fn retrieve(&self, owner: &Identity, name: &str) -> Result<File, RetrievalError> {
        let file_ref = FileRef::new(owner, name);
        let meta = self
            .ledger
            .file(owner, name)
            .await?
            .ok_or_else(|| RetrievalError::FileNotFound(file_ref.clone()))?;

        let locations = self.ledger.shard_locations(owner, name).await?;
        if locations.is_empty() {
            tracing::warn!("retrieve: {} has metadata but no shards", file_ref);
            return Err(RetrievalError::FileUnavailable(file_ref));
        }
        // sequence indices must run 0..n with no gaps
        let contiguous = locations
            .iter()
            .enumerate()
            .all(|(position, l)| u32::try_from(position) == Ok(l.shard.sequence_index));
        if !contiguous {
            tracing::warn!("retrieve: {} has a gap in its shard sequence", file_ref);
            return Err(RetrievalError::FileUnavailable(file_ref));
        }

        let mut data = BytesMut::new();
        for location in &locations {
            let index = location.shard.sequence_index;
            let reachable: Vec<(&Identity, PeerHandle)> = location
                .holders
                .iter()
                .filter_map(|holder| self.registry.resolve(holder).map(|conn| (holder, conn)))
                .collect();

            if reachable.is_empty() {
                tracing::info!("retrieve: shard {} of {} has no connected holder", index, file_ref);
                return Err(RetrievalError::ShardUnavailable(index));
            }

            let bytes = self
                .fetch_shard(index, &location.shard.content_address, &reachable)
                .await?;
            data.extend_from_slice(&bytes);
        }

        tracing::info!(
            "retrieve: reassembled {} from {} shards ({} bytes)",
            file_ref,
            locations.len(),
            data.len()
        );
        Ok(File::new(owner.clone(), meta, data.freeze()))
    }

    async fn fetch_shard(
        &self,
        index: u32,
        address: &ContentAddress,
        reachable: &[(&Identity, PeerHandle)],
    ) -> Result<Bytes, RetrievalError> {
        let attempts = self.config.fetch_attempts.max(1);
        let mut last_error = FetchError::PeerDisconnected;

        for attempt in 0..attempts {
            let (holder, conn) = &reachable[attempt % reachable.len()];
            match conn.fetch(address, self.config.fetch_timeout).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    tracing::warn!(
                        "retrieve: shard {} from {} failed (attempt {}/{}): {}",
                        index,
                        holder,
                        attempt + 1,
                        attempts,
                        e
                    );
                    last_error = e;
                }
            }
        }

        Err(RetrievalError::Fetch {
            index,
            source: last_error,
        })
    }
}
