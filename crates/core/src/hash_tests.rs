// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::object::{hash_object, ObjectType};

#[test]
fn registry_lookups() {
    assert_eq!(HashAlgo::by_name("sha1"), Some(HashAlgo::Sha1));
    assert_eq!(HashAlgo::by_name("sha256"), Some(HashAlgo::Sha256));
    assert_eq!(HashAlgo::by_name("md5"), None);

    assert_eq!(HashAlgo::by_format_id(0x7368_6131), Some(HashAlgo::Sha1));
    assert_eq!(HashAlgo::by_format_id(0x7332_3536), Some(HashAlgo::Sha256));
    assert_eq!(HashAlgo::by_format_id(0), None);

    assert_eq!(HashAlgo::by_raw_len(20), Some(HashAlgo::Sha1));
    assert_eq!(HashAlgo::by_raw_len(32), Some(HashAlgo::Sha256));
    assert_eq!(HashAlgo::by_raw_len(16), None);
}

#[yare::parameterized(
    sha1 = { HashAlgo::Sha1, 20, 40 },
    sha256 = { HashAlgo::Sha256, 32, 64 },
)]
fn digest_widths(algo: HashAlgo, raw: usize, hex: usize) {
    assert_eq!(algo.raw_len(), raw);
    assert_eq!(algo.hex_len(), hex);
}

#[test]
fn empty_object_ids_need_no_write() {
    // The canonical constants must equal a live hash of the canonical
    // encodings.
    for algo in HashAlgo::ALL {
        assert_eq!(hash_object(algo, ObjectType::Blob, b""), algo.empty_blob());
        assert_eq!(hash_object(algo, ObjectType::Tree, b""), algo.empty_tree());
        assert!(algo.null().is_null());
    }
}

#[test]
fn streaming_hash_matches_one_shot() {
    let mut h = HashAlgo::Sha1.hasher();
    h.update(b"blob 11\0");
    h.update(b"hello");
    h.update(b" world");
    let streamed = h.finalize();

    assert_eq!(streamed, hash_object(HashAlgo::Sha1, ObjectType::Blob, b"hello world"));
}

#[test]
fn known_sha1_vector() {
    // "blob 0\0" hashed with SHA-1.
    let id = hash_object(HashAlgo::Sha1, ObjectType::Blob, b"");
    assert_eq!(id.to_hex(), "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391");
}
