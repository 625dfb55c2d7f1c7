use crate::error::ShuttleError;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// A validated BitTorrent infohash.
///
/// Accepts hex strings of length 32 (base32-decoded v1 truncation seen in
/// some clients), 40 (SHA-1) or 64 (SHA-256); every other shape is rejected
/// at construction. The original case is preserved because downstream
/// consumers receive the hash verbatim as `downloadClientId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Infohash(String);

impl Infohash {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive comparison against a raw hash string.
    pub fn matches(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl FromStr for Infohash {
    type Err = ShuttleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid_len = matches!(s.len(), 32 | 40 | 64);
        if valid_len && s.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(Infohash(s.to_string()))
        } else {
            Err(ShuttleError::InvalidHash(s.to_string()))
        }
    }
}

impl TryFrom<&str> for Infohash {
    type Error = ShuttleError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for Infohash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Infohash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
