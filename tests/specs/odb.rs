// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Object-database specs: canonical encodings on disk, concurrent
//! writers, corruption detection, alternate chains.

use quarry_core::{hash_object, HashAlgo, ObjectType};
use quarry_odb::{
    loose_object_path, scan_loose, stream_blob_to_writer, LookupFlags, ObjectError, ObjectStore,
};
use std::io::Write as _;

fn store_in(dir: &std::path::Path) -> ObjectStore {
    let objects = dir.join("objects");
    std::fs::create_dir_all(&objects).expect("objects dir");
    ObjectStore::open(&objects, HashAlgo::Sha1).expect("open store")
}

#[test]
fn zero_byte_blob_lands_at_its_known_sha1_path() {
    let tmp = tempfile::tempdir().unwrap();
    let store = store_in(tmp.path());

    let id = store.write_object(ObjectType::Blob, b"").unwrap();
    assert_eq!(id.to_hex(), "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391");

    let expected = tmp
        .path()
        .join("objects")
        .join("e6")
        .join("9de29bb2d1d6434b8b29ae775ad8c2e48c5391");
    assert!(expected.is_file());

    // The file inflates to exactly the canonical encoding.
    let deflated = std::fs::read(&expected).unwrap();
    let mut dec = flate2::read::ZlibDecoder::new(&deflated[..]);
    let mut raw = Vec::new();
    std::io::Read::read_to_end(&mut dec, &mut raw).unwrap();
    assert_eq!(raw, b"blob 0\0");
}

#[test]
fn empty_object_ids_exist_without_any_write() {
    for algo in HashAlgo::ALL {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        let _ = store; // nothing written
        assert_eq!(hash_object(algo, ObjectType::Blob, b""), algo.empty_blob());
        assert_eq!(hash_object(algo, ObjectType::Tree, b""), algo.empty_tree());
    }
}

#[test]
fn twelve_concurrent_writes_of_three_blobs_leave_three_files() {
    let tmp = tempfile::tempdir().unwrap();
    let store = std::sync::Arc::new(store_in(tmp.path()));
    let objects = tmp.path().join("objects");

    let payloads: [&[u8]; 3] = [b"alpha", b"beta", b"gamma"];
    let mut joins = Vec::new();
    for _ in 0..4 {
        let store = std::sync::Arc::clone(&store);
        joins.push(std::thread::spawn(move || {
            for p in payloads {
                store.write_object(ObjectType::Blob, p).unwrap();
            }
        }));
    }
    for j in joins {
        j.join().unwrap();
    }

    let found = scan_loose(&objects, HashAlgo::Sha1).unwrap();
    assert_eq!(found.len(), 3);
    for id in found {
        let (otype, data) = store.read_object(&id, LookupFlags::default()).unwrap();
        assert_eq!(hash_object(HashAlgo::Sha1, otype, &data), id, "file content matches its name");
    }
}

#[test]
fn double_write_succeeds_and_touches_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let store = store_in(tmp.path());

    let id = store.write_object(ObjectType::Blob, b"stable").unwrap();
    let path = loose_object_path(&tmp.path().join("objects"), &id);
    let before = std::fs::metadata(&path).unwrap().modified().unwrap();

    let again = store.write_object(ObjectType::Blob, b"stable").unwrap();
    assert_eq!(again, id);
    assert_eq!(std::fs::metadata(&path).unwrap().modified().unwrap(), before);
}

#[test]
fn corrupting_a_payload_byte_fails_read_and_stream() {
    let tmp = tempfile::tempdir().unwrap();
    let store = store_in(tmp.path());
    let payload = b"payload that will get corrupted".to_vec();
    let id = store.write_object(ObjectType::Blob, &payload).unwrap();

    // Re-deflate with one byte flipped, same declared size, same name.
    let mut evil = payload.clone();
    evil[5] ^= 0x01;
    let mut raw = format!("blob {}\0", evil.len()).into_bytes();
    raw.extend_from_slice(&evil);
    let path = loose_object_path(&tmp.path().join("objects"), &id);
    let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(&raw).unwrap();
    std::fs::write(&path, enc.finish().unwrap()).unwrap();

    let read_err = store.read_object(&id, LookupFlags::default()).unwrap_err();
    assert!(matches!(read_err, ObjectError::Corrupt { .. }));

    let mut sink = Vec::new();
    let stream_err = stream_blob_to_writer(&store, &id, &mut sink).unwrap_err();
    assert!(matches!(stream_err, ObjectError::Corrupt { .. }));
}

#[test]
fn missing_alternate_does_not_break_the_primary() {
    let tmp = tempfile::tempdir().unwrap();
    let objects = tmp.path().join("objects");
    std::fs::create_dir_all(objects.join("info")).unwrap();
    std::fs::write(
        objects.join("info").join("alternates"),
        format!("{}\n", tmp.path().join("vanished").display()),
    )
    .unwrap();

    let store = ObjectStore::open(&objects, HashAlgo::Sha1).unwrap();
    let id = store.write_object(ObjectType::Blob, b"primary still works").unwrap();
    let (_, data) = store.read_object(&id, LookupFlags::default()).unwrap();
    assert_eq!(data, b"primary still works");
}

#[test]
fn alternate_cycle_adds_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let objects = tmp.path().join("objects");
    std::fs::create_dir_all(objects.join("info")).unwrap();
    // The alternates file points straight back at its own directory.
    std::fs::write(
        objects.join("info").join("alternates"),
        format!("{}\n", objects.display()),
    )
    .unwrap();

    let store = ObjectStore::open(&objects, HashAlgo::Sha1).unwrap();
    assert_eq!(store.object_dirs().len(), 1);
}

#[test]
fn reads_fall_through_the_alternate_chain() {
    let tmp = tempfile::tempdir().unwrap();
    let upstream_objects = tmp.path().join("upstream").join("objects");
    std::fs::create_dir_all(&upstream_objects).unwrap();
    let upstream = ObjectStore::open(&upstream_objects, HashAlgo::Sha1).unwrap();
    let shared = upstream.write_object(ObjectType::Blob, b"shared history").unwrap();

    let objects = tmp.path().join("clone").join("objects");
    std::fs::create_dir_all(objects.join("info")).unwrap();
    std::fs::write(
        objects.join("info").join("alternates"),
        format!("{}\n", upstream_objects.display()),
    )
    .unwrap();

    let store = ObjectStore::open(&objects, HashAlgo::Sha1).unwrap();
    assert!(store.has_object(&shared));
    let (_, data) = store.read_object(&shared, LookupFlags::default()).unwrap();
    assert_eq!(data, b"shared history");
}
