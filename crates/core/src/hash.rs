// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The hash-algorithm registry.
//!
//! Higher layers manipulate object ids without knowing the digest behind
//! them. Each [`HashAlgo`] is a value-typed descriptor: streaming hasher
//! construction, digest widths, printable name, on-disk format id, and the
//! three canonical ids (empty blob, empty tree, null) every repository
//! format guarantees without any prior write.

use sha1::{Digest as _, Sha1};
use sha2::Sha256;

use crate::oid::ObjectId;

/// On-disk format id for SHA-1 ("sha1" in big-endian ASCII).
const SHA1_FORMAT_ID: u32 = 0x7368_6131;
/// On-disk format id for SHA-256 ("s256" in big-endian ASCII).
const SHA256_FORMAT_ID: u32 = 0x7332_3536;

const SHA1_EMPTY_BLOB: &str = "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391";
const SHA1_EMPTY_TREE: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";
const SHA256_EMPTY_BLOB: &str =
    "473a0f4c3be8a93681a267e3b1e9a7dcda1185436fe141f7749120a303721813";
const SHA256_EMPTY_TREE: &str =
    "6ef19b41225c5369f1c104d45d8d85efa9b057b53b14b4b9b939dd74decc5321";

/// A supported content-hash algorithm.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub enum HashAlgo {
    Sha1,
    Sha256,
}

impl HashAlgo {
    pub const ALL: [HashAlgo; 2] = [HashAlgo::Sha1, HashAlgo::Sha256];

    pub fn name(self) -> &'static str {
        match self {
            HashAlgo::Sha1 => "sha1",
            HashAlgo::Sha256 => "sha256",
        }
    }

    pub fn format_id(self) -> u32 {
        match self {
            HashAlgo::Sha1 => SHA1_FORMAT_ID,
            HashAlgo::Sha256 => SHA256_FORMAT_ID,
        }
    }

    /// Raw digest width in bytes.
    pub fn raw_len(self) -> usize {
        match self {
            HashAlgo::Sha1 => 20,
            HashAlgo::Sha256 => 32,
        }
    }

    /// Hex digest width in characters.
    pub fn hex_len(self) -> usize {
        self.raw_len() * 2
    }

    /// Start a streaming hash.
    pub fn hasher(self) -> Hasher {
        match self {
            HashAlgo::Sha1 => Hasher::Sha1(Sha1::new()),
            HashAlgo::Sha256 => Hasher::Sha256(Sha256::new()),
        }
    }

    /// Canonical id of the zero-length blob.
    pub fn empty_blob(self) -> ObjectId {
        let hex = match self {
            HashAlgo::Sha1 => SHA1_EMPTY_BLOB,
            HashAlgo::Sha256 => SHA256_EMPTY_BLOB,
        };
        known_id(hex)
    }

    /// Canonical id of the empty tree.
    pub fn empty_tree(self) -> ObjectId {
        let hex = match self {
            HashAlgo::Sha1 => SHA1_EMPTY_TREE,
            HashAlgo::Sha256 => SHA256_EMPTY_TREE,
        };
        known_id(hex)
    }

    /// The all-zero id.
    pub fn null(self) -> ObjectId {
        ObjectId::null(self)
    }

    pub fn by_name(name: &str) -> Option<HashAlgo> {
        Self::ALL.into_iter().find(|a| a.name() == name)
    }

    pub fn by_format_id(id: u32) -> Option<HashAlgo> {
        Self::ALL.into_iter().find(|a| a.format_id() == id)
    }

    pub fn by_raw_len(len: usize) -> Option<HashAlgo> {
        Self::ALL.into_iter().find(|a| a.raw_len() == len)
    }

    pub fn by_hex_len(len: usize) -> Option<HashAlgo> {
        Self::ALL.into_iter().find(|a| a.hex_len() == len)
    }
}

impl std::fmt::Display for HashAlgo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// The registry constants above are vetted by tests; a malformed literal
// would already fail there, so decoding cannot fail at runtime.
fn known_id(hex: &str) -> ObjectId {
    match ObjectId::from_hex(hex) {
        Ok(id) => id,
        Err(_) => unreachable!("registry constant is valid hex"),
    }
}

/// An in-progress streaming digest.
pub enum Hasher {
    Sha1(Sha1),
    Sha256(Sha256),
}

impl Hasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha1(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
        }
    }

    pub fn finalize(self) -> ObjectId {
        let (algo, raw): (HashAlgo, Vec<u8>) = match self {
            Hasher::Sha1(h) => (HashAlgo::Sha1, h.finalize().to_vec()),
            Hasher::Sha256(h) => (HashAlgo::Sha256, h.finalize().to_vec()),
        };
        match ObjectId::from_raw(algo, &raw) {
            Ok(id) => id,
            Err(_) => unreachable!("digest width matches its own algorithm"),
        }
    }
}

#[cfg(test)]
#[path = "hash_tests.rs"]
mod tests;
