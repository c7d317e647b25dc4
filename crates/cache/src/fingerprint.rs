//! Fingerprints: the cache key of a task.
//!
//! A fingerprint is a SHA-256 digest fed with length-prefixed segments in
//! the order they are added. Each segment carries a short tag so that
//! moving bytes from one segment to the next always changes the digest.

use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Version of the fingerprint scheme. Bumping it invalidates every key.
pub const FINGERPRINT_VERSION: &str = "taskmemo-fp-v1";

/// A 32-byte SHA-256 digest identifying one task instance's inputs.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Wrap raw digest bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse 64 hex characters.
    ///
    /// # Errors
    ///
    /// Returns a validation error on wrong length or non-hex input.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        if hex_str.len() != 64 {
            return Err(Error::validation(format!(
                "fingerprint must be 64 hex characters, got {}",
                hex_str.len()
            )));
        }
        let mut bytes = [0_u8; 32];
        hex::decode_to_slice(hex_str, &mut bytes)
            .map_err(|e| Error::validation(format!("fingerprint is not hex: {e}")))?;
        Ok(Self(bytes))
    }

    /// Lowercase hex rendering.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First twelve hex characters, for log lines.
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }

    /// Raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

impl FromStr for Fingerprint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Incremental builder for a [`Fingerprint`].
///
/// The version token is always the first segment.
#[derive(Clone)]
pub struct FingerprintBuilder {
    hasher: Sha256,
}

impl FingerprintBuilder {
    /// Start a fingerprint under the current scheme version.
    #[must_use]
    pub fn new() -> Self {
        let mut builder = Self {
            hasher: Sha256::new(),
        };
        builder.segment("version", FINGERPRINT_VERSION.as_bytes());
        builder
    }

    /// Add one tagged segment.
    pub fn segment(&mut self, tag: &str, bytes: &[u8]) -> &mut Self {
        self.write_len_prefixed(tag.as_bytes());
        self.write_len_prefixed(bytes);
        self
    }

    /// Add a tagged string segment.
    pub fn text(&mut self, tag: &str, value: &str) -> &mut Self {
        self.segment(tag, value.as_bytes())
    }

    fn write_len_prefixed(&mut self, bytes: &[u8]) {
        self.hasher.update((bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
    }

    /// Finish and return the digest.
    #[must_use]
    pub fn finish(self) -> Fingerprint {
        Fingerprint(self.hasher.finalize().into())
    }
}

impl Default for FingerprintBuilder {
    fn default() -> Self {
        Self::new()
    }
}
