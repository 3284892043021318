// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Version-2 pack indices: fanout table, sorted id names, offsets, and the
//! 64-bit large-offset extension.

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use quarry_core::{HashAlgo, ObjectId};

use crate::errors::ObjectError;

const IDX_MAGIC: [u8; 4] = [0xff, b't', b'O', b'c'];
const IDX_VERSION: u32 = 2;
const FANOUT_BYTES: usize = 256 * 4;
const HEADER_BYTES: usize = 8;

#[derive(Debug)]
pub(crate) struct PackIndex {
    path: PathBuf,
    map: Mmap,
    algo: HashAlgo,
    count: usize,
    names_off: usize,
    ofs_off: usize,
    large_off: usize,
    large_count: usize,
}

impl PackIndex {
    pub fn open(path: &Path, algo: HashAlgo) -> Result<PackIndex, ObjectError> {
        let file = File::open(path).map_err(|e| ObjectError::io(path, e))?;
        // SAFETY: read-only mapping of an index that is immutable once
        // written; repacks replace the file under a new name.
        let map = unsafe { Mmap::map(&file) }.map_err(|e| ObjectError::io(path, e))?;

        if map.len() < HEADER_BYTES + FANOUT_BYTES {
            return Err(ObjectError::bad_pack(path, "index shorter than its header"));
        }
        if map[..4] != IDX_MAGIC {
            return Err(ObjectError::bad_pack(path, "bad index magic"));
        }
        let version = be32(&map[4..8]);
        if version != IDX_VERSION {
            return Err(ObjectError::bad_pack(
                path,
                format!("unsupported index version {version}"),
            ));
        }

        // Fanout must be monotonic; the last entry is the object count.
        let mut prev = 0u32;
        for i in 0..256 {
            let v = be32(&map[HEADER_BYTES + i * 4..]);
            if v < prev {
                return Err(ObjectError::bad_pack(path, "non-monotonic fanout table"));
            }
            prev = v;
        }
        let count = prev as usize;

        let raw = algo.raw_len();
        let names_off = HEADER_BYTES + FANOUT_BYTES;
        let crc_off = names_off + count * raw;
        let ofs_off = crc_off + count * 4;
        let large_off = ofs_off + count * 4;
        let trailer = 2 * raw;
        if map.len() < large_off + trailer {
            return Err(ObjectError::bad_pack(path, "index truncated"));
        }
        let large_count = (map.len() - large_off - trailer) / 8;

        Ok(PackIndex {
            path: path.to_path_buf(),
            map,
            algo,
            count,
            names_off,
            ofs_off,
            large_off,
            large_count,
        })
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn algo(&self) -> HashAlgo {
        self.algo
    }

    /// Binary-search `id` within its fanout window; returns its position.
    pub fn lookup(&self, id: &ObjectId) -> Option<usize> {
        let want = id.as_bytes();
        let first = id.first_byte() as usize;
        let lo = if first == 0 { 0 } else { self.fanout(first - 1) };
        let hi = self.fanout(first);
        let raw = self.algo.raw_len();

        let (mut lo, mut hi) = (lo, hi);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let name = &self.map[self.names_off + mid * raw..self.names_off + (mid + 1) * raw];
            match name.cmp(want) {
                std::cmp::Ordering::Equal => return Some(mid),
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
            }
        }
        None
    }

    pub fn oid_at(&self, pos: usize) -> Result<ObjectId, ObjectError> {
        let raw = self.algo.raw_len();
        let start = self.names_off + pos * raw;
        let bytes = self
            .map
            .get(start..start + raw)
            .ok_or_else(|| ObjectError::bad_pack(&self.path, "name position out of range"))?;
        ObjectId::from_raw(self.algo, bytes)
            .map_err(|_| ObjectError::bad_pack(&self.path, "malformed name entry"))
    }

    /// Pack-file byte offset for the entry at `pos`.
    pub fn offset_at(&self, pos: usize) -> Result<u64, ObjectError> {
        if pos >= self.count {
            return Err(ObjectError::bad_pack(&self.path, "offset position out of range"));
        }
        let v = be32(&self.map[self.ofs_off + pos * 4..]);
        if v & 0x8000_0000 == 0 {
            return Ok(u64::from(v));
        }
        let large_pos = (v & 0x7fff_ffff) as usize;
        if large_pos >= self.large_count {
            return Err(ObjectError::bad_pack(&self.path, "large offset out of range"));
        }
        Ok(be64(&self.map[self.large_off + large_pos * 8..]))
    }

    fn fanout(&self, byte: usize) -> usize {
        be32(&self.map[HEADER_BYTES + byte * 4..]) as usize
    }
}

fn be32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

fn be64(b: &[u8]) -> u64 {
    u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}
