/**
 * Files, shards and the addresses holders
 *  store shards under.
 */
pub mod file;
/**
 * Peer credentials and the digest helper
 *  used for passwords and content addresses.
 */
pub mod identity;
/**
 * Bookkeeping of file ownership and shard
 *  holders on top of a content store.
 */
pub mod ledger;
/**
 * Everything that happens on a live peer
 *  connection.
 *  - wire protocol
 *  - outbound handle and blocking shard fetches
 *  - the per-connection session loop
 *  - register / upload / retrieve service
 */
pub mod peer;
/**
 * Which identity is reachable on which
 *  live connection.
 */
pub mod registry;
/**
 * Reassembling a file from its holders.
 */
pub mod retrieval;
/**
 * Pure splitting of an upload into one
 *  shard per destination.
 */
pub mod sharder;
/**
 * Durable storage contract plus an
 *  in-memory implementation.
 */
pub mod store;
/**
 * In-process peers for exercising whole
 *  upload and retrieval flows in tests.
 */
pub mod testkit;
/**
 * Helper for setting build version information
 *  at compile time.
 */
pub mod version;

pub mod prelude {
    pub use crate::file::{ContentAddress, File, FileMeta, FileRef, Shard, ShardMeta};
    pub use crate::identity::Identity;
    pub use crate::ledger::{LedgerError, PartLedger};
    pub use crate::peer::{PeerHandle, PeerService, PeerServiceConfig, Session};
    pub use crate::registry::ConnectionRegistry;
    pub use crate::retrieval::{RetrievalConfig, RetrievalError};
    pub use crate::store::{ContentStore, ContentStoreError, MemoryContentStore};
    pub use crate::version::build_info;
}
