use std::fmt;

use sha2::Digest as _;

/// Storage and dedup key of a member: hex SHA-256 of its logical id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentKey(String);

impl ContentKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContentKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derives the content address of a member from its declared logical id.
///
/// The payload is deliberately not hashed: two fetches of the same logical id
/// map to the same key even when the payload drifted.
#[must_use]
pub fn address(logical_id: &str) -> ContentKey {
    let digest = sha2::Sha256::digest(logical_id.as_bytes());
    ContentKey(hex::encode(digest))
}
