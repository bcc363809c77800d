//! Splitting an upload across the peers currently online.
//!
//! Sharding is pure: it decides slice boundaries and which destination
//!  receives which slice, and leaves persisting and sending to the caller.

use std::ops::Range;

use crate::file::{ContentAddress, File, Shard, ShardMeta};
use crate::identity::Identity;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ShardError {
    #[error("no other peers are connected to hold shards")]
    NoPeersAvailable,
}

/// One shard and the destination it was cut for. The holder recorded in
///  the ledger and the destination the bytes go to are always taken from
///  the same assignment.
#[derive(Debug, Clone)]
pub struct ShardAssignment<D> {
    pub shard: Shard,
    pub holder: Identity,
    pub destination: D,
}

/// Boundaries of `n` contiguous slices covering `0..len`.
///
/// The first `len % n` slices are one byte longer than the rest, so the
///  layout only depends on `(len, n)`.
pub fn slice_bounds(len: usize, n: usize) -> Vec<Range<usize>> {
    if n == 0 {
        return Vec::new();
    }
    let base = len / n;
    let extra = len % n;

    let mut start = 0;
    (0..n)
        .map(|i| {
            let size = base + usize::from(i < extra);
            let range = start..start + size;
            start += size;
            range
        })
        .collect()
}

/// Cut `file` into one shard per destination, skipping `excluding`.
///
/// Sequence indices follow the order of `destinations`.
pub fn shard<D: Clone>(
    file: &File,
    destinations: &[(Identity, D)],
    excluding: &Identity,
) -> Result<Vec<ShardAssignment<D>>, ShardError> {
    let targets: Vec<&(Identity, D)> = destinations
        .iter()
        .filter(|(identity, _)| !identity.same_peer(excluding))
        .collect();

    if targets.is_empty() {
        return Err(ShardError::NoPeersAvailable);
    }

    let parent = file.file_ref();
    let assignments = slice_bounds(file.data.len(), targets.len())
        .into_iter()
        .zip(targets)
        .enumerate()
        .map(|(index, (range, (holder, destination)))| ShardAssignment {
            shard: Shard {
                meta: ShardMeta {
                    parent: parent.clone(),
                    // one shard per live connection
                    sequence_index: index as u32,
                    content_address: ContentAddress::derive(file.name(), holder),
                },
                data: file.data.slice(range),
            },
            holder: holder.clone(),
            destination: destination.clone(),
        })
        .collect();

    Ok(assignments)
}
