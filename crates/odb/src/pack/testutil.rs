// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tiny pack/idx fixture builder for tests.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use quarry_core::{HashAlgo, ObjectId, ObjectType};
use sha1::{Digest as _, Sha1};

pub(crate) const KIND_COMMIT: u8 = 1;
pub(crate) const KIND_TREE: u8 = 2;
pub(crate) const KIND_BLOB: u8 = 3;
pub(crate) const KIND_OFS_DELTA: u8 = 6;
pub(crate) const KIND_REF_DELTA: u8 = 7;

pub(crate) fn compress(data: &[u8]) -> Vec<u8> {
    let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

pub(crate) fn varint7(mut v: u64) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let mut b = (v & 0x7f) as u8;
        v >>= 7;
        if v != 0 {
            b |= 0x80;
        }
        out.push(b);
        if v == 0 {
            return out;
        }
    }
}

/// Pure-insert delta producing `result` over a base of `base_len` bytes.
pub(crate) fn insert_delta(base_len: u64, result: &[u8]) -> Vec<u8> {
    let mut out = varint7(base_len);
    out.extend(varint7(result.len() as u64));
    for chunk in result.chunks(127) {
        out.push(chunk.len() as u8);
        out.extend_from_slice(chunk);
    }
    out
}

/// Entry type/size header: kind in bits 6-4 of the first byte, size in
/// 4-then-7-bit groups.
pub(crate) fn entry_header(kind: u8, mut size: u64) -> Vec<u8> {
    let mut b0 = (kind << 4) | ((size & 0x0f) as u8);
    size >>= 4;
    let mut out = Vec::new();
    if size > 0 {
        b0 |= 0x80;
    }
    out.push(b0);
    while size > 0 {
        let mut b = (size & 0x7f) as u8;
        size >>= 7;
        if size > 0 {
            b |= 0x80;
        }
        out.push(b);
    }
    out
}

/// Backward-distance encoding for `OFS_DELTA` bases.
pub(crate) fn ofs_encoding(mut distance: u64) -> Vec<u8> {
    let mut out = vec![(distance & 0x7f) as u8];
    distance >>= 7;
    while distance > 0 {
        distance -= 1;
        out.insert(0, 0x80 | ((distance & 0x7f) as u8));
        distance >>= 7;
    }
    out
}

/// One pre-encoded pack entry plus the id the index should file it under.
pub(crate) struct RawEntry {
    pub id: ObjectId,
    pub bytes: Vec<u8>,
}

impl RawEntry {
    pub fn whole(id: ObjectId, kind: u8, payload: &[u8]) -> RawEntry {
        let mut bytes = entry_header(kind, payload.len() as u64);
        bytes.extend(compress(payload));
        RawEntry { id, bytes }
    }

    /// Delta addressed by backward distance; the caller computes the
    /// distance from the planned layout.
    pub fn ofs_delta(id: ObjectId, delta: &[u8], distance: u64) -> RawEntry {
        let mut bytes = entry_header(KIND_OFS_DELTA, delta.len() as u64);
        bytes.extend(ofs_encoding(distance));
        bytes.extend(compress(delta));
        RawEntry { id, bytes }
    }

    pub fn ref_delta(id: ObjectId, delta: &[u8], base: &ObjectId) -> RawEntry {
        let mut bytes = entry_header(KIND_REF_DELTA, delta.len() as u64);
        bytes.extend_from_slice(base.as_bytes());
        bytes.extend(compress(delta));
        RawEntry { id, bytes }
    }
}

/// Write `name.pack` + `name.idx` under `dir`; returns the pack path and
/// each entry's byte offset in entry order.
pub(crate) fn write_pack(dir: &Path, name: &str, entries: &[RawEntry]) -> (PathBuf, Vec<u64>) {
    let mut pack = Vec::new();
    pack.extend_from_slice(b"PACK");
    pack.extend_from_slice(&2u32.to_be_bytes());
    pack.extend_from_slice(&(entries.len() as u32).to_be_bytes());

    let mut offsets = Vec::new();
    for entry in entries {
        offsets.push(pack.len() as u64);
        pack.extend_from_slice(&entry.bytes);
    }
    let pack_checksum: [u8; 20] = Sha1::digest(&pack).into();
    pack.extend_from_slice(&pack_checksum);

    // Index: ids sorted, offsets matched up.
    let mut order: Vec<usize> = (0..entries.len()).collect();
    order.sort_by_key(|&i| entries[i].id);

    let mut idx = Vec::new();
    idx.extend_from_slice(&[0xff, b't', b'O', b'c']);
    idx.extend_from_slice(&2u32.to_be_bytes());
    let mut fanout = [0u32; 256];
    for entry in entries {
        fanout[entry.id.first_byte() as usize] += 1;
    }
    let mut running = 0u32;
    for slot in fanout.iter_mut() {
        running += *slot;
        *slot = running;
    }
    for value in fanout {
        idx.extend_from_slice(&value.to_be_bytes());
    }
    for &i in &order {
        idx.extend_from_slice(entries[i].id.as_bytes());
    }
    for _ in &order {
        idx.extend_from_slice(&0u32.to_be_bytes()); // crc32, unchecked
    }
    for &i in &order {
        idx.extend_from_slice(&(offsets[i] as u32).to_be_bytes());
    }
    idx.extend_from_slice(&pack_checksum);
    let idx_checksum: [u8; 20] = Sha1::digest(&idx).into();
    idx.extend_from_slice(&idx_checksum);

    std::fs::create_dir_all(dir).unwrap();
    let pack_path = dir.join(format!("{name}.pack"));
    std::fs::write(&pack_path, &pack).unwrap();
    std::fs::write(dir.join(format!("{name}.idx")), &idx).unwrap();
    (pack_path, offsets)
}

/// Convenience: id of `payload` as a `kind`-typed object under SHA-1.
pub(crate) fn oid_of(kind: u8, payload: &[u8]) -> ObjectId {
    let otype = match kind {
        KIND_COMMIT => ObjectType::Commit,
        KIND_TREE => ObjectType::Tree,
        KIND_BLOB => ObjectType::Blob,
        _ => ObjectType::Tag,
    };
    quarry_core::hash_object(HashAlgo::Sha1, otype, payload)
}
