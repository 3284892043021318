// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use quarry_core::{hash_object, HashAlgo, ObjectType};
use std::io::Write as _;
use tempfile::tempdir;

fn write_raw_loose(objdir: &Path, id: &ObjectId, raw: &[u8]) {
    let path = loose_object_path(objdir, id);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(raw).unwrap();
    std::fs::write(&path, enc.finish().unwrap()).unwrap();
}

#[test]
fn write_then_read_round_trips() {
    let dir = tempdir().unwrap();
    let id = hash_object(HashAlgo::Sha1, ObjectType::Blob, b"hello world");
    write_loose(dir.path(), ObjectType::Blob, b"hello world", &id, false).unwrap();

    let path = loose_object_path(dir.path(), &id);
    let (header, body) = read_loose(&path, &id).unwrap();
    assert_eq!(header.type_name, "blob");
    assert_eq!(header.size, 11);
    assert_eq!(body, b"hello world");
}

#[test]
fn empty_blob_lands_at_its_canonical_path() {
    let dir = tempdir().unwrap();
    let id = hash_object(HashAlgo::Sha1, ObjectType::Blob, b"");
    write_loose(dir.path(), ObjectType::Blob, b"", &id, false).unwrap();

    let path = dir
        .path()
        .join("e6")
        .join("9de29bb2d1d6434b8b29ae775ad8c2e48c5391");
    assert!(path.is_file());

    // The stored bytes inflate to exactly the canonical encoding.
    let deflated = std::fs::read(&path).unwrap();
    let mut dec = flate2::read::ZlibDecoder::new(&deflated[..]);
    let mut raw = Vec::new();
    std::io::Read::read_to_end(&mut dec, &mut raw).unwrap();
    assert_eq!(raw, b"blob 0\0");
}

#[test]
fn double_write_is_idempotent() {
    let dir = tempdir().unwrap();
    let id = hash_object(HashAlgo::Sha1, ObjectType::Blob, b"same");
    write_loose(dir.path(), ObjectType::Blob, b"same", &id, false).unwrap();
    let path = loose_object_path(dir.path(), &id);
    let mtime = std::fs::metadata(&path).unwrap().modified().unwrap();

    write_loose(dir.path(), ObjectType::Blob, b"same", &id, false).unwrap();
    assert_eq!(std::fs::metadata(&path).unwrap().modified().unwrap(), mtime);
}

#[test]
fn write_rejects_mismatched_expected_id() {
    let dir = tempdir().unwrap();
    let wrong = hash_object(HashAlgo::Sha1, ObjectType::Blob, b"other content");
    let err = write_loose(dir.path(), ObjectType::Blob, b"payload", &wrong, false).unwrap_err();
    assert!(matches!(err, ObjectError::Corrupt { .. }));
    // Nothing must reach the final name.
    assert!(!loose_object_path(dir.path(), &wrong).exists());
}

#[test]
fn zero_length_file_is_rejected() {
    let dir = tempdir().unwrap();
    let id = hash_object(HashAlgo::Sha1, ObjectType::Blob, b"x");
    let path = loose_object_path(dir.path(), &id);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"").unwrap();

    let err = read_loose(&path, &id).unwrap_err();
    assert!(matches!(err, ObjectError::Corrupt { .. }));
    assert!(err.to_string().contains("empty"));
}

#[test]
fn header_without_nul_in_scratch_is_too_long() {
    let dir = tempdir().unwrap();
    let id = hash_object(HashAlgo::Sha1, ObjectType::Blob, b"x");
    // 40 bytes of type name, NUL far past the 32-byte scratch.
    let raw = format!("{} 1\0y", "t".repeat(40));
    write_raw_loose(dir.path(), &id, raw.as_bytes());

    let path = loose_object_path(dir.path(), &id);
    let err = read_loose(&path, &id).unwrap_err();
    assert!(err.to_string().contains("header too long"));

    // The permissive reader keeps going and hands the type through.
    let (header, body) = read_loose_any_type(&path, &id).unwrap();
    assert_eq!(header.type_name, "t".repeat(40));
    assert_eq!(body, b"y");
}

#[test]
fn truncated_stream_is_corrupt() {
    let dir = tempdir().unwrap();
    let id = hash_object(HashAlgo::Sha1, ObjectType::Blob, b"hello world hello world");
    write_loose(dir.path(), ObjectType::Blob, b"hello world hello world", &id, false).unwrap();
    let path = loose_object_path(dir.path(), &id);
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() - 4]).unwrap();

    let err = read_loose(&path, &id).unwrap_err();
    assert!(matches!(err, ObjectError::Corrupt { .. }));
}

#[test]
fn trailing_garbage_is_corrupt() {
    let dir = tempdir().unwrap();
    let id = hash_object(HashAlgo::Sha1, ObjectType::Blob, b"payload");
    write_loose(dir.path(), ObjectType::Blob, b"payload", &id, false).unwrap();
    let path = loose_object_path(dir.path(), &id);
    let mut bytes = std::fs::read(&path).unwrap();
    bytes.extend_from_slice(b"junk");
    std::fs::write(&path, &bytes).unwrap();

    let err = read_loose(&path, &id).unwrap_err();
    assert!(err.to_string().contains("garbage"));
}

#[test]
fn declared_size_shorter_than_body_is_corrupt() {
    let dir = tempdir().unwrap();
    let id = hash_object(HashAlgo::Sha1, ObjectType::Blob, b"x");
    write_raw_loose(dir.path(), &id, b"blob 2\0waytoolong");

    let path = loose_object_path(dir.path(), &id);
    let err = read_loose(&path, &id).unwrap_err();
    assert!(matches!(err, ObjectError::Corrupt { .. }));
}

#[yare::parameterized(
    missing_space = { b"blob7\0x".as_slice() },
    empty_type = { b" 7\0x".as_slice() },
    leading_zero = { b"blob 07\0x".as_slice() },
    non_decimal = { b"blob 7a\0x".as_slice() },
)]
fn malformed_headers_are_corrupt(raw: &[u8]) {
    let dir = tempdir().unwrap();
    let id = hash_object(HashAlgo::Sha1, ObjectType::Blob, b"x");
    write_raw_loose(dir.path(), &id, raw);

    let path = loose_object_path(dir.path(), &id);
    let err = read_loose(&path, &id).unwrap_err();
    assert!(matches!(err, ObjectError::Corrupt { .. }));
}

#[test]
fn streaming_verify_accepts_good_and_rejects_flipped_payload() {
    let dir = tempdir().unwrap();
    let payload = b"some sizeable payload for the streaming verifier".repeat(100);
    let id = hash_object(HashAlgo::Sha1, ObjectType::Blob, &payload);
    write_loose(dir.path(), ObjectType::Blob, &payload, &id, false).unwrap();
    let path = loose_object_path(dir.path(), &id);

    verify_loose_streaming(&path, &id).unwrap();

    // Re-deflate a payload with one flipped byte under the same name.
    let mut evil = payload.clone();
    evil[100] ^= 0x01;
    let mut raw = format!("blob {}\0", evil.len()).into_bytes();
    raw.extend_from_slice(&evil);
    std::fs::remove_file(&path).unwrap();
    write_raw_loose(dir.path(), &id, &raw);

    let err = verify_loose_streaming(&path, &id).unwrap_err();
    assert!(matches!(err, ObjectError::Corrupt { .. }));
}

#[test]
fn scan_finds_written_objects_and_skips_noise() {
    let dir = tempdir().unwrap();
    let a = hash_object(HashAlgo::Sha1, ObjectType::Blob, b"a");
    let b = hash_object(HashAlgo::Sha1, ObjectType::Blob, b"b");
    write_loose(dir.path(), ObjectType::Blob, b"a", &a, false).unwrap();
    write_loose(dir.path(), ObjectType::Blob, b"b", &b, false).unwrap();
    std::fs::create_dir_all(dir.path().join("pack")).unwrap();
    std::fs::create_dir_all(dir.path().join("info")).unwrap();
    std::fs::create_dir_all(dir.path().join("e6")).unwrap();
    std::fs::write(dir.path().join("e6").join("not-an-id"), b"?").unwrap();

    let mut found = scan_loose(dir.path(), HashAlgo::Sha1).unwrap();
    found.sort();
    let mut want = vec![a, b];
    want.sort();
    assert_eq!(found, want);
}
