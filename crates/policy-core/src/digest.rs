//! Content digests.
//!
//! A [`Digest`] is the only valid storage key for a blob: two blobs with the
//! same digest are byte-identical.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::error::{Error, Result};

/// The only algorithm this crate produces.
pub const SHA256: &str = "sha256";

/// An algorithm-prefixed content hash, e.g. `sha256:9f86d0...`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    algorithm: String,
    hex: String,
}

impl Digest {
    /// Parses a digest of the form `<algorithm>:<hex>`.
    ///
    /// # Examples
    ///
    /// ```
    /// use policy_core::Digest;
    ///
    /// let digest = Digest::parse(
    ///     "sha256:2c26b46b68ffc68ff99b453c1d30413413422d706483bfa0f98a5e886266e7ae",
    /// ).unwrap();
    /// assert_eq!(digest.algorithm(), "sha256");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDigest`] if the algorithm or encoded part is malformed.
    pub fn parse(input: &str) -> Result<Self> {
        let (algorithm, hex) = input
            .split_once(':')
            .ok_or_else(|| Error::invalid_digest(input, "missing algorithm prefix"))?;

        if !is_valid_algorithm(algorithm) {
            return Err(Error::invalid_digest(input, "invalid algorithm"));
        }
        if hex.len() < 32 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::invalid_digest(input, "invalid hex encoding"));
        }
        if algorithm == SHA256 && hex.len() != 64 {
            return Err(Error::invalid_digest(
                input,
                "sha256 digests must be 64 hex characters",
            ));
        }

        Ok(Self {
            algorithm: algorithm.to_string(),
            hex: hex.to_ascii_lowercase(),
        })
    }

    /// Computes the SHA-256 digest of `data`.
    #[must_use]
    pub fn sha256(data: &[u8]) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(data);
        hasher.finalize()
    }

    /// Returns the algorithm (e.g. `sha256`).
    #[must_use]
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// Returns the hex-encoded hash without the algorithm prefix.
    #[must_use]
    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Returns a shortened form of the hex part, as shown in listings.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.hex[..self.hex.len().min(12)]
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl FromStr for Digest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Digest {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Incremental SHA-256 hasher used while streaming blobs to disk.
#[derive(Debug, Clone, Default)]
pub struct Hasher {
    inner: Sha256,
    written: u64,
}

impl Hasher {
    /// Creates an empty hasher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds `data` into the hash.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
        self.written += data.len() as u64;
    }

    /// Number of bytes hashed so far.
    #[must_use]
    pub const fn written(&self) -> u64 {
        self.written
    }

    /// Consumes the hasher and returns the digest.
    #[must_use]
    pub fn finalize(self) -> Digest {
        Digest {
            algorithm: SHA256.to_string(),
            hex: hex::encode(self.inner.finalize()),
        }
    }
}

/// `[a-z0-9]+([+._-][a-z0-9]+)*`
fn is_valid_algorithm(algorithm: &str) -> bool {
    !algorithm.is_empty()
        && algorithm
            .split(['+', '.', '_', '-'])
            .all(|part| {
                !part.is_empty()
                    && part
                        .bytes()
                        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
            })
}
