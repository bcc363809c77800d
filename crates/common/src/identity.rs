use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hex encoded SHA-256 of an arbitrary string.
pub fn sha256_hex(input: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(input.as_ref()))
}

/// A peer's credentials.
///
/// Two identities refer to the same peer when their usernames match;
///  the digest is only consulted when a registration is verified.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Identity {
    username: String,
    password_digest: String,
}

impl Identity {
    /// Build an identity from the plaintext credentials a peer registers with
    pub fn from_credentials(username: impl Into<String>, password: &str) -> Self {
        Self {
            username: username.into(),
            password_digest: sha256_hex(password),
        }
    }

    /// Rebuild an identity from its persisted form
    pub fn from_parts(username: impl Into<String>, password_digest: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password_digest: password_digest.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password_digest(&self) -> &str {
        &self.password_digest
    }

    pub fn same_peer(&self, other: &Identity) -> bool {
        self.username == other.username
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.username)
    }
}
