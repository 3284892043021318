// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::hash::HashAlgo;

#[test]
fn from_hex_infers_algorithm_from_width() {
    let sha1 = ObjectId::from_hex("e69de29bb2d1d6434b8b29ae775ad8c2e48c5391").unwrap();
    assert_eq!(sha1.algo(), HashAlgo::Sha1);
    assert_eq!(sha1.as_bytes().len(), 20);

    let sha256 = ObjectId::from_hex(
        "473a0f4c3be8a93681a267e3b1e9a7dcda1185436fe141f7749120a303721813",
    )
    .unwrap();
    assert_eq!(sha256.algo(), HashAlgo::Sha256);
    assert_eq!(sha256.as_bytes().len(), 32);
}

#[test]
fn from_hex_rejects_unknown_width_and_bad_digits() {
    assert_eq!(ObjectId::from_hex("abcd"), Err(OidError::UnknownLength(4)));
    let bad = "zz".repeat(20);
    assert!(matches!(ObjectId::from_hex(&bad), Err(OidError::BadHex(_))));
}

#[test]
fn hex_round_trips() {
    let hex = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";
    let id = ObjectId::from_hex(hex).unwrap();
    assert_eq!(id.to_hex(), hex);
    assert_eq!(id.to_string(), hex);
}

#[test]
fn from_raw_enforces_width() {
    let err = ObjectId::from_raw(HashAlgo::Sha1, &[0u8; 19]).unwrap_err();
    assert!(matches!(err, OidError::LengthMismatch { expected: 20, got: 19, .. }));
}

#[test]
fn null_id_is_null_and_distinct_per_algo() {
    let n1 = ObjectId::null(HashAlgo::Sha1);
    let n256 = ObjectId::null(HashAlgo::Sha256);
    assert!(n1.is_null());
    assert!(n256.is_null());
    // Same zero bytes, different algorithms: different ids.
    assert_ne!(n1, n256);
}

#[test]
fn ids_key_hash_maps() {
    let mut map = std::collections::HashMap::new();
    let id = ObjectId::from_hex("e69de29bb2d1d6434b8b29ae775ad8c2e48c5391").unwrap();
    map.insert(id, 7u32);
    let again = ObjectId::from_hex("e69de29bb2d1d6434b8b29ae775ad8c2e48c5391").unwrap();
    assert_eq!(map.get(&again), Some(&7));
}

#[test]
fn first_byte_matches_leading_hex_pair() {
    let id = ObjectId::from_hex("e69de29bb2d1d6434b8b29ae775ad8c2e48c5391").unwrap();
    assert_eq!(id.first_byte(), 0xe6);
}
