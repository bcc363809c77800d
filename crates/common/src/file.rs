use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::identity::{sha256_hex, Identity};

/// User facing metadata for a stored file.
///
/// Timestamps are kept at second precision, which is what the
///  content store persists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileMeta {
    pub name: String,
    #[serde(with = "time::serde::timestamp")]
    pub last_modified: OffsetDateTime,
}

impl FileMeta {
    pub fn new(name: impl Into<String>, last_modified: OffsetDateTime) -> Self {
        Self {
            name: name.into(),
            last_modified: truncate_to_seconds(last_modified),
        }
    }

    /// Build metadata from what a client announces with an upload.
    ///  Clients send `dateModified` as a millisecond unix timestamp string;
    ///  anything missing or unparseable falls back to now.
    pub fn from_client(name: impl Into<String>, date_modified: Option<&str>) -> Self {
        let last_modified = date_modified
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .and_then(|millis| OffsetDateTime::from_unix_timestamp(millis.div_euclid(1000)).ok())
            .unwrap_or_else(OffsetDateTime::now_utc);
        Self::new(name, last_modified)
    }

    pub fn from_unix_seconds(name: impl Into<String>, seconds: i64) -> Self {
        let last_modified = OffsetDateTime::from_unix_timestamp(seconds)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH);
        Self::new(name, last_modified)
    }

    pub fn unix_seconds(&self) -> i64 {
        self.last_modified.unix_timestamp()
    }
}

fn truncate_to_seconds(ts: OffsetDateTime) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(ts.unix_timestamp()).unwrap_or(ts)
}

/// Reference to a file by its owner's username and its name
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct FileRef {
    pub owner: String,
    pub name: String,
}

impl FileRef {
    pub fn new(owner: &Identity, name: impl Into<String>) -> Self {
        Self {
            owner: owner.username().to_string(),
            name: name.into(),
        }
    }
}

impl fmt::Display for FileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// A file with its bytes in memory. Only exists while an upload is
///  being sharded or a retrieval is being reassembled.
#[derive(Debug, Clone)]
pub struct File {
    pub owner: Identity,
    pub meta: FileMeta,
    pub data: Bytes,
}

impl File {
    pub fn new(owner: Identity, meta: FileMeta, data: impl Into<Bytes>) -> Self {
        Self {
            owner,
            meta,
            data: data.into(),
        }
    }

    pub fn file_ref(&self) -> FileRef {
        FileRef::new(&self.owner, self.meta.name.clone())
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }
}

/// Name under which a holder stores a shard.
///
/// Derived from the parent file name and the holder's username, so two
///  shards of the same file sent to different holders get different
///  addresses. It is not globally unique on its own.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ContentAddress(String);

impl ContentAddress {
    pub fn derive(file_name: &str, holder: &Identity) -> Self {
        // NUL between the parts so ("ab", "c") and ("a", "bc") differ
        Self(sha256_hex(format!("{}\0{}", file_name, holder.username())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ContentAddress {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ContentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persisted description of a shard, without its bytes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShardMeta {
    pub parent: FileRef,
    pub sequence_index: u32,
    pub content_address: ContentAddress,
}

/// A contiguous slice of a file on its way to a holder
#[derive(Debug, Clone)]
pub struct Shard {
    pub meta: ShardMeta,
    pub data: Bytes,
}

impl Shard {
    pub fn sequence_index(&self) -> u32 {
        self.meta.sequence_index
    }

    pub fn content_address(&self) -> &ContentAddress {
        &self.meta.content_address
    }
}

/// A shard together with every peer recorded as holding it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardLocation {
    pub shard: ShardMeta,
    pub holders: Vec<Identity>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_timestamp_is_milliseconds() {
        let meta = FileMeta::from_client("photo.png", Some("1500000000123"));
        assert_eq!(meta.unix_seconds(), 1_500_000_000);
    }

    #[test]
    fn test_client_timestamp_falls_back_to_now() {
        let before = OffsetDateTime::now_utc().unix_timestamp();
        let meta = FileMeta::from_client("photo.png", Some("yesterday"));
        assert!(meta.unix_seconds() >= before);

        let meta = FileMeta::from_client("photo.png", None);
        assert!(meta.unix_seconds() >= before);
    }

    #[test]
    fn test_content_address_depends_on_holder() {
        let bob = Identity::from_credentials("bob", "pw");
        let carol = Identity::from_credentials("carol", "pw");

        let for_bob = ContentAddress::derive("photo.png", &bob);
        let for_carol = ContentAddress::derive("photo.png", &carol);

        assert_ne!(for_bob, for_carol);
        assert_eq!(for_bob, ContentAddress::derive("photo.png", &bob));
        assert_eq!(for_bob.as_str().len(), 64);
    }

    #[test]
    fn test_content_address_keeps_name_and_holder_apart() {
        let c = Identity::from_credentials("c", "pw");
        let bc = Identity::from_credentials("bc", "pw");

        assert_ne!(
            ContentAddress::derive("ab", &c),
            ContentAddress::derive("a", &bc)
        );
    }
}
