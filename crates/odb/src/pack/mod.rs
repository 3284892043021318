// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Read-only packfile access.
//!
//! A pack is `"PACK" <version> <count>` followed by deflated entries and a
//! trailer hash; the companion index maps ids to byte offsets. Entries may
//! be stored whole or as deltas: `OFS_DELTA` points backward in the same
//! pack, `REF_DELTA` names a base id that may live anywhere in the chain.
//! Reconstruction goes through the shared [`DeltaBaseCache`], and entries
//! that fail to decode land in a per-pack bad-object set so the facade can
//! retry the loose path.

mod cache;
mod delta;
mod idx;
#[cfg(test)]
pub(crate) mod testutil;

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use memmap2::Mmap;
use parking_lot::Mutex;
use quarry_core::{telemetry, CounterId, HashAlgo, ObjectId, ObjectType, TimerId};

pub use cache::DeltaBaseCache;
use delta::parse_delta_sizes;

use crate::errors::ObjectError;
use crate::zlib::{Inflater, Step};
use idx::PackIndex;

const PACK_SIGNATURE: &[u8; 4] = b"PACK";
const HEADER_BYTES: usize = 12;

/// Deepest delta chain we will follow before declaring the pack broken.
const MAX_DELTA_DEPTH: usize = 64;

const KIND_COMMIT: u8 = 1;
const KIND_TREE: u8 = 2;
const KIND_BLOB: u8 = 3;
const KIND_TAG: u8 = 4;
const KIND_OFS_DELTA: u8 = 6;
const KIND_REF_DELTA: u8 = 7;

static NEXT_PACK_ID: AtomicU64 = AtomicU64::new(1);

/// What a pack can say about an entry without expanding it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedInfo {
    /// Resolved type; `None` when the delta chain leaves this pack.
    pub otype: Option<ObjectType>,
    /// Size of the fully reconstructed object.
    pub size: u64,
    /// Delta base id, when the entry is stored as a delta.
    pub delta_base: Option<ObjectId>,
    /// Byte offset of the entry within the pack.
    pub offset: u64,
}

/// Outcome of expanding an entry within one pack.
pub(crate) enum PackRead {
    Done(ObjectType, Vec<u8>),
    /// A `REF_DELTA` whose base is not in this pack; the facade resolves
    /// the base and calls [`PackFile::finish_with_base`].
    BaseMissing { base: ObjectId, offset: u64 },
}

#[derive(Debug)]
pub struct PackFile {
    id: u64,
    pack_path: PathBuf,
    idx: PackIndex,
    data: Mmap,
    bad: Mutex<HashSet<ObjectId>>,
    by_offset: OnceLock<HashMap<u64, usize>>,
}

struct EntryHeader {
    kind: u8,
    size: u64,
    /// Offset of the first byte past the type/size varint.
    after: u64,
}

impl PackFile {
    /// Open `<something>.pack` plus its `.idx` sibling.
    pub fn open(pack_path: &Path, algo: HashAlgo) -> Result<PackFile, ObjectError> {
        let idx_path = pack_path.with_extension("idx");
        let idx = PackIndex::open(&idx_path, algo)?;

        let file = File::open(pack_path).map_err(|e| ObjectError::io(pack_path, e))?;
        // SAFETY: read-only mapping; packs are immutable once published
        // and repacks write replacements under new names.
        let data = unsafe { Mmap::map(&file) }.map_err(|e| ObjectError::io(pack_path, e))?;

        if data.len() < HEADER_BYTES + algo.raw_len() {
            return Err(ObjectError::bad_pack(pack_path, "pack shorter than its framing"));
        }
        if &data[..4] != PACK_SIGNATURE {
            return Err(ObjectError::bad_pack(pack_path, "bad pack signature"));
        }
        let version = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        if version != 2 && version != 3 {
            return Err(ObjectError::bad_pack(
                pack_path,
                format!("unsupported pack version {version}"),
            ));
        }
        let count = u32::from_be_bytes([data[8], data[9], data[10], data[11]]) as usize;
        if count != idx.count() {
            return Err(ObjectError::bad_pack(
                pack_path,
                format!("pack holds {count} objects but index says {}", idx.count()),
            ));
        }

        Ok(PackFile {
            id: NEXT_PACK_ID.fetch_add(1, Ordering::Relaxed),
            pack_path: pack_path.to_path_buf(),
            idx,
            data,
            bad: Mutex::new(HashSet::new()),
            by_offset: OnceLock::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.pack_path
    }

    pub fn count(&self) -> usize {
        self.idx.count()
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.idx.lookup(id).is_some()
    }

    pub(crate) fn mark_bad(&self, id: &ObjectId) {
        self.bad.lock().insert(*id);
    }

    pub(crate) fn is_bad(&self, id: &ObjectId) -> bool {
        self.bad.lock().contains(id)
    }

    /// Type, size and delta base for `id`, without reconstructing it.
    pub fn object_info(&self, id: &ObjectId) -> Result<Option<PackedInfo>, ObjectError> {
        let Some(pos) = self.idx.lookup(id) else {
            return Ok(None);
        };
        let offset = self.idx.offset_at(pos)?;
        let hdr = self.entry_header(offset)?;
        let info = match hdr.kind {
            KIND_OFS_DELTA => {
                let (base_offset, data_start) = self.ofs_delta_base(&hdr, offset)?;
                PackedInfo {
                    otype: self.type_at(base_offset, 1)?,
                    size: self.delta_result_size(data_start, hdr.size)?,
                    delta_base: self.oid_by_offset(base_offset)?,
                    offset,
                }
            }
            KIND_REF_DELTA => {
                let (base, data_start) = self.ref_delta_base(&hdr)?;
                let otype = match self.idx.lookup(&base) {
                    Some(bpos) => {
                        let boff = self.idx.offset_at(bpos)?;
                        self.type_at(boff, 1)?
                    }
                    None => None,
                };
                PackedInfo {
                    otype,
                    size: self.delta_result_size(data_start, hdr.size)?,
                    delta_base: Some(base),
                    offset,
                }
            }
            kind => PackedInfo {
                otype: Some(self.kind_type(kind, offset)?),
                size: hdr.size,
                delta_base: None,
                offset,
            },
        };
        Ok(Some(info))
    }

    /// Expand the entry for `id`. `Ok(None)` when the id is not here.
    pub(crate) fn read_object(
        &self,
        id: &ObjectId,
        cache: &DeltaBaseCache,
    ) -> Result<Option<PackRead>, ObjectError> {
        let Some(pos) = self.idx.lookup(id) else {
            return Ok(None);
        };
        let offset = self.idx.offset_at(pos)?;
        let _t = telemetry::timer(TimerId::PackExpand);
        let read = self.unpack_at(offset, cache, 0)?;
        if matches!(read, PackRead::Done(..)) {
            telemetry::counter_add(CounterId::PackReads, 1);
        }
        Ok(Some(read))
    }

    /// Finish a `REF_DELTA` whose base the facade fetched from elsewhere.
    pub(crate) fn finish_with_base(
        &self,
        offset: u64,
        base_type: ObjectType,
        base_data: &[u8],
    ) -> Result<(ObjectType, Vec<u8>), ObjectError> {
        let hdr = self.entry_header(offset)?;
        if hdr.kind != KIND_REF_DELTA {
            return Err(ObjectError::bad_pack(&self.pack_path, "entry is not a ref delta"));
        }
        let (_base, data_start) = self.ref_delta_base(&hdr)?;
        let delta_data = self.inflate_at(data_start, hdr.size)?;
        let result = delta::apply_delta(base_data, &delta_data)
            .map_err(|e| ObjectError::bad_pack(&self.pack_path, e))?;
        Ok((base_type, result))
    }

    /// Start of the deflated data for a whole (non-delta) entry; the
    /// streaming layer inflates from there itself.
    pub(crate) fn whole_entry_data_start(&self, offset: u64) -> Result<u64, ObjectError> {
        let hdr = self.entry_header(offset)?;
        if hdr.kind == KIND_OFS_DELTA || hdr.kind == KIND_REF_DELTA {
            return Err(ObjectError::bad_pack(&self.pack_path, "entry is a delta"));
        }
        self.kind_type(hdr.kind, offset)?;
        Ok(hdr.after)
    }

    /// Read-only window from `start` to the end of the pack.
    pub(crate) fn data_window(&self, start: u64) -> Result<&[u8], ObjectError> {
        self.data
            .get(start as usize..)
            .ok_or_else(|| ObjectError::bad_pack(&self.pack_path, "entry data outside pack"))
    }

    // ---- entry decoding ----

    fn byte_at(&self, pos: u64) -> Result<u8, ObjectError> {
        self.data
            .get(pos as usize)
            .copied()
            .ok_or_else(|| ObjectError::bad_pack(&self.pack_path, "entry runs past end of pack"))
    }

    fn entry_header(&self, offset: u64) -> Result<EntryHeader, ObjectError> {
        let mut pos = offset;
        let b0 = self.byte_at(pos)?;
        pos += 1;
        let kind = (b0 >> 4) & 0x07;
        let mut size = u64::from(b0 & 0x0f);
        let mut shift = 4u32;
        let mut b = b0;
        while b & 0x80 != 0 {
            b = self.byte_at(pos)?;
            pos += 1;
            if shift >= 64 {
                return Err(ObjectError::bad_pack(&self.pack_path, "entry size overflows"));
            }
            size |= u64::from(b & 0x7f) << shift;
            shift += 7;
        }
        Ok(EntryHeader { kind, size, after: pos })
    }

    /// Decode the backward distance of an `OFS_DELTA`; returns the base
    /// offset and the start of the deflated delta data.
    fn ofs_delta_base(&self, hdr: &EntryHeader, offset: u64) -> Result<(u64, u64), ObjectError> {
        let mut pos = hdr.after;
        let mut b = self.byte_at(pos)?;
        pos += 1;
        let mut distance = u64::from(b & 0x7f);
        while b & 0x80 != 0 {
            b = self.byte_at(pos)?;
            pos += 1;
            distance = ((distance + 1) << 7) | u64::from(b & 0x7f);
        }
        if distance == 0 || distance > offset {
            return Err(ObjectError::bad_pack(&self.pack_path, "ofs-delta base outside pack"));
        }
        Ok((offset - distance, pos))
    }

    /// Read the raw base id of a `REF_DELTA`; returns it and the start of
    /// the deflated delta data.
    fn ref_delta_base(&self, hdr: &EntryHeader) -> Result<(ObjectId, u64), ObjectError> {
        let raw = self.idx_algo().raw_len();
        let start = hdr.after as usize;
        let bytes = self
            .data
            .get(start..start + raw)
            .ok_or_else(|| ObjectError::bad_pack(&self.pack_path, "ref-delta base truncated"))?;
        let base = ObjectId::from_raw(self.idx_algo(), bytes)
            .map_err(|_| ObjectError::bad_pack(&self.pack_path, "malformed ref-delta base"))?;
        Ok((base, (start + raw) as u64))
    }

    fn kind_type(&self, kind: u8, offset: u64) -> Result<ObjectType, ObjectError> {
        match kind {
            KIND_COMMIT => Ok(ObjectType::Commit),
            KIND_TREE => Ok(ObjectType::Tree),
            KIND_BLOB => Ok(ObjectType::Blob),
            KIND_TAG => Ok(ObjectType::Tag),
            _ => Err(ObjectError::bad_pack(
                &self.pack_path,
                format!("unknown entry kind {kind} at offset {offset}"),
            )),
        }
    }

    /// Resolve an entry's type by walking its delta chain within this pack.
    /// `None` when a `REF_DELTA` base lives elsewhere.
    fn type_at(&self, offset: u64, depth: usize) -> Result<Option<ObjectType>, ObjectError> {
        if depth > MAX_DELTA_DEPTH {
            return Err(ObjectError::bad_pack(&self.pack_path, "delta chain too deep"));
        }
        let hdr = self.entry_header(offset)?;
        match hdr.kind {
            KIND_OFS_DELTA => {
                let (base_offset, _) = self.ofs_delta_base(&hdr, offset)?;
                self.type_at(base_offset, depth + 1)
            }
            KIND_REF_DELTA => {
                let (base, _) = self.ref_delta_base(&hdr)?;
                match self.idx.lookup(&base) {
                    Some(pos) => self.type_at(self.idx.offset_at(pos)?, depth + 1),
                    None => Ok(None),
                }
            }
            kind => self.kind_type(kind, offset).map(Some),
        }
    }

    /// Result size of a delta entry, read from the delta's own header.
    fn delta_result_size(&self, data_start: u64, delta_size: u64) -> Result<u64, ObjectError> {
        // Both size varints fit well inside 32 bytes.
        let peek = delta_size.min(32);
        let head = self.inflate_at_partial(data_start, peek)?;
        let (_base, result, _) = parse_delta_sizes(&head)
            .map_err(|e| ObjectError::bad_pack(&self.pack_path, e))?;
        Ok(result)
    }

    fn unpack_at(
        &self,
        offset: u64,
        cache: &DeltaBaseCache,
        depth: usize,
    ) -> Result<PackRead, ObjectError> {
        if depth > MAX_DELTA_DEPTH {
            return Err(ObjectError::bad_pack(&self.pack_path, "delta chain too deep"));
        }
        if let Some((otype, data)) = cache.get(self.id, offset) {
            return Ok(PackRead::Done(otype, data.as_ref().clone()));
        }
        let hdr = self.entry_header(offset)?;
        match hdr.kind {
            KIND_OFS_DELTA => {
                let (base_offset, data_start) = self.ofs_delta_base(&hdr, offset)?;
                let (base_type, base_data) = match self.unpack_at(base_offset, cache, depth + 1)? {
                    PackRead::Done(t, d) => (t, d),
                    missing @ PackRead::BaseMissing { .. } => return Ok(missing),
                };
                let base_data = Arc::new(base_data);
                cache.put(self.id, base_offset, base_type, Arc::clone(&base_data));
                let delta_data = self.inflate_at(data_start, hdr.size)?;
                let result = delta::apply_delta(&base_data, &delta_data)
                    .map_err(|e| ObjectError::bad_pack(&self.pack_path, e))?;
                Ok(PackRead::Done(base_type, result))
            }
            KIND_REF_DELTA => {
                let (base, data_start) = self.ref_delta_base(&hdr)?;
                let Some(pos) = self.idx.lookup(&base) else {
                    return Ok(PackRead::BaseMissing { base, offset });
                };
                let base_offset = self.idx.offset_at(pos)?;
                let (base_type, base_data) = match self.unpack_at(base_offset, cache, depth + 1)? {
                    PackRead::Done(t, d) => (t, d),
                    missing @ PackRead::BaseMissing { .. } => return Ok(missing),
                };
                let base_data = Arc::new(base_data);
                cache.put(self.id, base_offset, base_type, Arc::clone(&base_data));
                let delta_data = self.inflate_at(data_start, hdr.size)?;
                let result = delta::apply_delta(&base_data, &delta_data)
                    .map_err(|e| ObjectError::bad_pack(&self.pack_path, e))?;
                Ok(PackRead::Done(base_type, result))
            }
            kind => {
                let otype = self.kind_type(kind, offset)?;
                let data = self.inflate_at(hdr.after, hdr.size)?;
                Ok(PackRead::Done(otype, data))
            }
        }
    }

    /// Inflate exactly `size` bytes of entry data starting at `start`.
    fn inflate_at(&self, start: u64, size: u64) -> Result<Vec<u8>, ObjectError> {
        let out = self.inflate_at_partial(start, size)?;
        if out.len() as u64 != size {
            return Err(ObjectError::bad_pack(&self.pack_path, "entry data shorter than declared"));
        }
        Ok(out)
    }

    /// Inflate up to `limit` bytes; stops early at the output limit.
    fn inflate_at_partial(&self, start: u64, limit: u64) -> Result<Vec<u8>, ObjectError> {
        let window = self
            .data
            .get(start as usize..)
            .ok_or_else(|| ObjectError::bad_pack(&self.pack_path, "entry data outside pack"))?;
        let limit = usize::try_from(limit)
            .map_err(|_| ObjectError::bad_pack(&self.pack_path, "entry too large"))?;
        let mut out = vec![0u8; limit];
        let mut filled = 0usize;
        let mut inf = Inflater::new();
        while filled < limit {
            let step = inf.step(window, &mut out[filled..]).map_err(|()| {
                ObjectError::bad_pack(&self.pack_path, "inflate error in entry data")
            })?;
            match step {
                Step::End(n) => {
                    filled += n;
                    break;
                }
                Step::Produced(0) => break, // output full
                Step::Produced(n) => filled += n,
            }
        }
        out.truncate(filled);
        Ok(out)
    }

    fn idx_algo(&self) -> HashAlgo {
        self.idx.algo()
    }

    /// Reverse offset→id lookup, built lazily on first use.
    fn oid_by_offset(&self, offset: u64) -> Result<Option<ObjectId>, ObjectError> {
        let map = match self.by_offset.get() {
            Some(m) => m,
            None => {
                let mut m = HashMap::with_capacity(self.idx.count());
                for pos in 0..self.idx.count() {
                    m.insert(self.idx.offset_at(pos)?, pos);
                }
                self.by_offset.get_or_init(|| m)
            }
        };
        match map.get(&offset) {
            Some(&pos) => self.idx.oid_at(pos).map(Some),
            None => Ok(None),
        }
    }
}

/// Discover `<dir>/pack/*.pack` pairs.
pub(crate) fn scan_pack_dir(objdir: &Path, algo: HashAlgo) -> Vec<Arc<PackFile>> {
    let pack_dir = objdir.join("pack");
    let mut out = Vec::new();
    let Ok(entries) = std::fs::read_dir(&pack_dir) else {
        return out;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("pack") {
            continue;
        }
        match PackFile::open(&path, algo) {
            Ok(pack) => out.push(Arc::new(pack)),
            Err(e) => {
                tracing::warn!("skipping unreadable pack {path:?}: {e}");
            }
        }
    }
    // Stable order so repeated scans agree.
    out.sort_by(|a, b| a.pack_path.cmp(&b.pack_path));
    out
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
