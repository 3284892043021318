// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Loose objects: one zlib-deflated file per object.
//!
//! A loose object at `<odb>/xx/yyyy…` holds the deflated canonical
//! encoding `"<type> <size>\0<payload>"`. Reads mmap the file and inflate
//! incrementally; writes stage in a unique temp file, hash as they go, and
//! publish by hard link so concurrent writers of the same content cannot
//! collide.

use std::fs::File;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use quarry_core::{
    format_header, telemetry, CounterId, HashAlgo, Hasher, ObjectHeader, ObjectId, ObjectType,
    TimerId,
};

use crate::errors::ObjectError;
use crate::zlib::{Inflater, Step};

/// Fixed scratch for the common-case header parse.
const HEADER_SCRATCH: usize = 32;

/// Hard cap when a caller permits oversized (unknown-type) headers.
const MAX_HEADER_LEN: usize = 4096;

/// Outcome of the bounded header unpack.
#[derive(Debug, PartialEq, Eq)]
pub enum HeaderStatus {
    /// Parsed within the fixed scratch.
    Ok(ObjectHeader),
    /// The deflate stream is broken.
    Bad,
    /// No NUL within the scratch; genuinely oversized or malformed.
    TooLong,
}

/// Path of `id` under one object directory.
pub fn loose_object_path(objdir: &Path, id: &ObjectId) -> PathBuf {
    let hex = id.to_hex();
    objdir.join(&hex[..2]).join(&hex[2..])
}

/// mmap a loose file. Zero-length files are corrupt by definition (and a
/// zero-length map is forbidden anyway).
fn map_loose(path: &Path, id: &ObjectId) -> Result<Mmap, ObjectError> {
    let file = File::open(path).map_err(|e| ObjectError::io(path, e))?;
    let len = file.metadata().map_err(|e| ObjectError::io(path, e))?.len();
    if len == 0 {
        return Err(ObjectError::corrupt(id, "empty loose object file"));
    }
    // SAFETY: the mapping is read-only and object files are immutable once
    // published; a concurrent prune at worst unlinks the name, which keeps
    // the mapping valid.
    let map = unsafe { Mmap::map(&file) }.map_err(|e| ObjectError::io(path, e))?;
    Ok(map)
}

/// Inflate into a fixed 32-byte scratch and parse `"<type> <size>"` up to
/// the NUL.
///
/// The second tuple element carries inflated-but-unconsumed bytes: body
/// spill past the NUL on `Ok`, or the full scratch on `TooLong` so the
/// permissive continuation can keep scanning from where this left off.
fn unpack_header(
    inf: &mut Inflater,
    data: &[u8],
) -> Result<(HeaderStatus, Vec<u8>), ObjectError> {
    let mut scratch = [0u8; HEADER_SCRATCH];
    let mut filled = 0usize;
    loop {
        let step = match inf.step(data, &mut scratch[filled..]) {
            Ok(s) => s,
            Err(()) => return Ok((HeaderStatus::Bad, Vec::new())),
        };
        let produced = match step {
            Step::Produced(n) | Step::End(n) => n,
        };
        let scan_from = filled;
        filled += produced;
        if let Some(nul) = scratch[scan_from..filled].iter().position(|b| *b == 0) {
            let nul = scan_from + nul;
            let Some(header) = parse_header(&scratch[..nul]) else {
                return Ok((HeaderStatus::Bad, Vec::new()));
            };
            return Ok((HeaderStatus::Ok(header), scratch[nul + 1..filled].to_vec()));
        }
        if filled == HEADER_SCRATCH {
            return Ok((HeaderStatus::TooLong, scratch.to_vec()));
        }
        if matches!(step, Step::End(_)) {
            // Stream ended before any NUL.
            return Ok((HeaderStatus::Bad, Vec::new()));
        }
    }
}

/// Continuation for callers that explicitly permit unknown types: keep
/// inflating the header into a growable buffer until the NUL shows up.
/// `prefix` is whatever the fixed scratch already holds.
fn unpack_header_long(
    inf: &mut Inflater,
    data: &[u8],
    prefix: &[u8],
    id: &ObjectId,
) -> Result<(ObjectHeader, Vec<u8>), ObjectError> {
    let mut buf: Vec<u8> = prefix.to_vec();
    let mut chunk = [0u8; 256];
    if let Some(nul) = buf.iter().position(|b| *b == 0) {
        let header = parse_header(&buf[..nul])
            .ok_or_else(|| ObjectError::corrupt(id, "malformed loose object header"))?;
        return Ok((header, buf[nul + 1..].to_vec()));
    }
    loop {
        let step = inf
            .step(data, &mut chunk)
            .map_err(|()| ObjectError::corrupt(id, "inflate error in object header"))?;
        let produced = match step {
            Step::Produced(n) | Step::End(n) => n,
        };
        let scan_from = buf.len();
        buf.extend_from_slice(&chunk[..produced]);
        if let Some(nul) = buf[scan_from..].iter().position(|b| *b == 0) {
            let nul = scan_from + nul;
            let header = parse_header(&buf[..nul])
                .ok_or_else(|| ObjectError::corrupt(id, "malformed loose object header"))?;
            let spill = buf[nul + 1..].to_vec();
            return Ok((header, spill));
        }
        if buf.len() > MAX_HEADER_LEN {
            return Err(ObjectError::corrupt(id, "loose object header too long"));
        }
        if matches!(step, Step::End(_)) {
            return Err(ObjectError::corrupt(id, "loose object ends before header"));
        }
    }
}

/// Parse `"<type-name> SP <decimal-size>"`.
fn parse_header(buf: &[u8]) -> Option<ObjectHeader> {
    let text = std::str::from_utf8(buf).ok()?;
    let (type_name, size) = text.split_once(' ')?;
    if type_name.is_empty() {
        return None;
    }
    // Decimal without leading zeros, except the literal "0".
    if size.is_empty() || (size.len() > 1 && size.starts_with('0')) {
        return None;
    }
    let size: u64 = size.parse().ok()?;
    Some(ObjectHeader { type_name: type_name.to_string(), size })
}

/// Inflate the body into an exact-size buffer; the stream must end at
/// `size` bytes with no input left over.
fn unpack_body(
    inf: &mut Inflater,
    data: &[u8],
    size: u64,
    spill: Vec<u8>,
    id: &ObjectId,
) -> Result<Vec<u8>, ObjectError> {
    let size = usize::try_from(size)
        .map_err(|_| ObjectError::corrupt(id, "object too large for this platform"))?;
    if spill.len() > size {
        return Err(ObjectError::corrupt(id, "object body longer than declared size"));
    }
    // One extra byte so a too-long stream is observable.
    let mut buf = vec![0u8; size + 1];
    buf[..spill.len()].copy_from_slice(&spill);
    let mut filled = spill.len();
    loop {
        if inf.is_done() {
            break;
        }
        let step = inf
            .step(data, &mut buf[filled..])
            .map_err(|()| ObjectError::corrupt(id, "inflate error in object body"))?;
        match step {
            Step::End(n) => {
                filled += n;
                break;
            }
            Step::Produced(n) => filled += n,
        }
        if filled > size {
            return Err(ObjectError::corrupt(id, "object body longer than declared size"));
        }
    }
    if filled != size {
        return Err(ObjectError::corrupt(id, "object body shorter than declared size"));
    }
    if inf.consumed() != data.len() {
        return Err(ObjectError::corrupt(id, "garbage at end of loose object"));
    }
    buf.truncate(size);
    Ok(buf)
}

/// Read a whole loose object, strict headers only.
pub fn read_loose(path: &Path, id: &ObjectId) -> Result<(ObjectHeader, Vec<u8>), ObjectError> {
    read_loose_impl(path, id, false)
}

/// Read a whole loose object, tolerating oversized unknown-type headers.
pub fn read_loose_any_type(
    path: &Path,
    id: &ObjectId,
) -> Result<(ObjectHeader, Vec<u8>), ObjectError> {
    read_loose_impl(path, id, true)
}

fn read_loose_impl(
    path: &Path,
    id: &ObjectId,
    allow_long: bool,
) -> Result<(ObjectHeader, Vec<u8>), ObjectError> {
    let map = map_loose(path, id)?;
    let _t = telemetry::timer(TimerId::LooseInflate);
    let mut inf = Inflater::new();
    let (status, scratch_out) = unpack_header(&mut inf, &map)?;
    let (header, spill) = match status {
        HeaderStatus::Ok(h) => (h, scratch_out),
        HeaderStatus::Bad => {
            return Err(ObjectError::corrupt(id, "malformed loose object header"))
        }
        HeaderStatus::TooLong if allow_long => {
            unpack_header_long(&mut inf, &map, &scratch_out, id)?
        }
        HeaderStatus::TooLong => {
            return Err(ObjectError::corrupt(id, "loose object header too long"))
        }
    };
    let body = unpack_body(&mut inf, &map, header.size, spill, id)?;
    telemetry::counter_add(CounterId::LooseReads, 1);
    Ok((header, body))
}

/// Read just the header (for `object_info` on loose objects).
pub(crate) fn loose_object_info(path: &Path, id: &ObjectId) -> Result<ObjectHeader, ObjectError> {
    let map = map_loose(path, id)?;
    let mut inf = Inflater::new();
    match unpack_header(&mut inf, &map)? {
        (HeaderStatus::Ok(h), _) => Ok(h),
        (HeaderStatus::Bad, _) => Err(ObjectError::corrupt(id, "malformed loose object header")),
        (HeaderStatus::TooLong, _) => {
            Err(ObjectError::corrupt(id, "loose object header too long"))
        }
    }
}

/// Write `payload` as a loose object under `objdir`, verifying it hashes to
/// `expected`. Publishing is atomic and idempotent: the temp file is linked
/// into place, and an existing target means identical content is already
/// present.
pub(crate) fn write_loose(
    objdir: &Path,
    otype: ObjectType,
    payload: &[u8],
    expected: &ObjectId,
    fsync: bool,
) -> Result<(), ObjectError> {
    let header = format_header(otype, payload.len() as u64);

    // Hash the uncompressed input as it goes out; a source that hands us
    // different bytes than it hashed must not reach the final name.
    let mut h: Hasher = expected.algo().hasher();
    h.update(&header);
    h.update(payload);
    let actual = h.finalize();
    if actual != *expected {
        return Err(ObjectError::corrupt(
            expected,
            format!("content hashes to {actual} on write"),
        ));
    }

    let final_path = loose_object_path(objdir, expected);
    if final_path.exists() {
        // Content-addressed idempotence.
        return Ok(());
    }
    let Some(fan_dir) = final_path.parent() else {
        return Err(ObjectError::io(
            &final_path,
            io::Error::other("loose path has no parent"),
        ));
    };
    // create_dir_all follows a symlinked object directory, which is how
    // shared-worktree layouts come in.
    std::fs::create_dir_all(fan_dir).map_err(|e| ObjectError::io(fan_dir, e))?;

    let mut tmp = tempfile::Builder::new()
        .prefix("tmp_obj_")
        .tempfile_in(objdir)
        .map_err(|e| ObjectError::io(objdir, e))?;

    {
        let mut enc =
            flate2::write::ZlibEncoder::new(tmp.as_file_mut(), flate2::Compression::default());
        enc.write_all(&header).map_err(|e| ObjectError::io(&final_path, e))?;
        enc.write_all(payload).map_err(|e| ObjectError::io(&final_path, e))?;
        enc.finish().map_err(|e| ObjectError::io(&final_path, e))?;
    }
    if fsync {
        tmp.as_file().sync_all().map_err(|e| ObjectError::io(&final_path, e))?;
    }

    match std::fs::hard_link(tmp.path(), &final_path) {
        Ok(()) => Ok(()), // temp unlinks on drop
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(_) => {
            // Filesystem without link support: fall back to rename.
            tmp.persist(&final_path)
                .map(|_| ())
                .map_err(|e| ObjectError::io(&final_path, e.error))
        }
    }
}

/// Re-inflate chunk-by-chunk and compare the recomputed id, without ever
/// materializing the body. This is the verification path for large blobs.
pub(crate) fn verify_loose_streaming(path: &Path, expected: &ObjectId) -> Result<(), ObjectError> {
    let map = map_loose(path, expected)?;
    let mut inf = Inflater::new();
    let (header, spill) = match unpack_header(&mut inf, &map)? {
        (HeaderStatus::Ok(h), spill) => (h, spill),
        _ => return Err(ObjectError::corrupt(expected, "malformed loose object header")),
    };
    let mut h = expected.algo().hasher();
    h.update(format!("{} {}\0", header.type_name, header.size).as_bytes());
    h.update(&spill);

    let mut total = spill.len() as u64;
    let mut chunk = [0u8; 8192];
    loop {
        if inf.is_done() {
            break;
        }
        let step = inf
            .step(&map, &mut chunk)
            .map_err(|()| ObjectError::corrupt(expected, "inflate error in object body"))?;
        let produced = match step {
            Step::Produced(n) | Step::End(n) => n,
        };
        h.update(&chunk[..produced]);
        total += produced as u64;
        if total > header.size {
            return Err(ObjectError::corrupt(expected, "object body longer than declared size"));
        }
        if matches!(step, Step::End(_)) {
            break;
        }
    }
    if total != header.size {
        return Err(ObjectError::corrupt(expected, "object body shorter than declared size"));
    }
    if inf.consumed() != map.len() {
        return Err(ObjectError::corrupt(expected, "garbage at end of loose object"));
    }
    let actual = h.finalize();
    if actual != *expected {
        return Err(ObjectError::corrupt(
            expected,
            format!("content hashes to {actual}"),
        ));
    }
    Ok(())
}

/// Open an incremental stream over a loose object: map it, consume the
/// header, and hand the live inflate state to the streaming layer.
pub(crate) fn open_loose_stream(
    path: &Path,
    id: &ObjectId,
) -> Result<crate::stream::ObjectStream, ObjectError> {
    let map = map_loose(path, id)?;
    let mut inf = Inflater::new();
    let (header, spill) = match unpack_header(&mut inf, &map)? {
        (HeaderStatus::Ok(h), spill) => (h, spill),
        (HeaderStatus::Bad, _) => {
            return Err(ObjectError::corrupt(id, "malformed loose object header"))
        }
        (HeaderStatus::TooLong, _) => {
            return Err(ObjectError::corrupt(id, "loose object header too long"))
        }
    };
    let Some(otype) = header.object_type() else {
        return Err(ObjectError::corrupt(
            id,
            format!("unknown object type {:?}", header.type_name),
        ));
    };
    Ok(crate::stream::ObjectStream::loose_parts(
        *id,
        otype,
        header.size,
        map,
        inf,
        spill,
    ))
}

/// Enumerate every loose id under one object directory. A fan-out
/// subdirectory or file may vanish mid-scan (concurrent prune); ENOENT is
/// "deleted, skip".
pub fn scan_loose(objdir: &Path, algo: HashAlgo) -> Result<Vec<ObjectId>, ObjectError> {
    let mut out = Vec::new();
    let entries = match std::fs::read_dir(objdir) {
        Ok(e) => e,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(ObjectError::io(objdir, e)),
    };
    for entry in entries {
        let entry = entry.map_err(|e| ObjectError::io(objdir, e))?;
        let fan = entry.file_name();
        let Some(fan) = fan.to_str() else { continue };
        if fan.len() != 2 || !fan.bytes().all(|b| b.is_ascii_hexdigit()) {
            continue;
        }
        let sub = objdir.join(fan);
        let files = match std::fs::read_dir(&sub) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(ObjectError::io(&sub, e)),
        };
        for file in files {
            let file = match file {
                Ok(f) => f,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(ObjectError::io(&sub, e)),
            };
            let name = file.file_name();
            let Some(name) = name.to_str() else { continue };
            let hex = format!("{fan}{name}");
            if hex.len() != algo.hex_len() {
                continue;
            }
            if let Ok(id) = ObjectId::from_hex(&hex) {
                out.push(id);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
#[path = "loose_tests.rs"]
mod tests;
