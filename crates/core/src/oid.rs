// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Object ids: a fixed-width digest plus the algorithm that produced it.

use thiserror::Error;

use crate::hash::HashAlgo;

/// Largest raw digest we carry (SHA-256).
pub const MAX_RAW_LEN: usize = 32;

/// Errors from constructing an [`ObjectId`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OidError {
    #[error("digest length {0} does not match any known hash algorithm")]
    UnknownLength(usize),

    #[error("digest length {got} does not match {algo} (expected {expected})")]
    LengthMismatch { algo: &'static str, expected: usize, got: usize },

    #[error("invalid hex digit in object id {0:?}")]
    BadHex(String),
}

/// A content-addressed object id.
///
/// Stored inline as a zero-padded 32-byte buffer so ids are `Copy` and can
/// key hash maps without heap traffic. The padding bytes past
/// `algo.raw_len()` are always zero, which lets the derived `Eq`/`Hash`/`Ord`
/// compare whole buffers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId {
    algo: HashAlgo,
    raw: [u8; MAX_RAW_LEN],
}

impl ObjectId {
    /// Build an id from raw digest bytes. The length must match the algorithm.
    pub fn from_raw(algo: HashAlgo, bytes: &[u8]) -> Result<Self, OidError> {
        if bytes.len() != algo.raw_len() {
            return Err(OidError::LengthMismatch {
                algo: algo.name(),
                expected: algo.raw_len(),
                got: bytes.len(),
            });
        }
        let mut raw = [0u8; MAX_RAW_LEN];
        raw[..bytes.len()].copy_from_slice(bytes);
        Ok(Self { algo, raw })
    }

    /// Parse a hex id, inferring the algorithm from the digit count.
    pub fn from_hex(s: &str) -> Result<Self, OidError> {
        let algo =
            HashAlgo::by_hex_len(s.len()).ok_or(OidError::UnknownLength(s.len()))?;
        let bytes = hex::decode(s).map_err(|_| OidError::BadHex(s.to_string()))?;
        Self::from_raw(algo, &bytes)
    }

    /// The all-zero id for `algo`.
    pub fn null(algo: HashAlgo) -> Self {
        Self { algo, raw: [0u8; MAX_RAW_LEN] }
    }

    pub fn algo(&self) -> HashAlgo {
        self.algo
    }

    /// The active digest bytes (20 for SHA-1, 32 for SHA-256).
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw[..self.algo.raw_len()]
    }

    pub fn is_null(&self) -> bool {
        self.raw == [0u8; MAX_RAW_LEN]
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }

    /// First byte of the digest, used for the loose fan-out directory.
    pub fn first_byte(&self) -> u8 {
        self.raw[0]
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjectId({} {})", self.algo.name(), self.to_hex())
    }
}

#[cfg(test)]
#[path = "oid_tests.rs"]
mod tests;
