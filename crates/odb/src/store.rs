// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The ODB facade: one lookup surface over loose + packs + alternates.
//!
//! Lookup order is fixed: replace-map substitution (opt-in), pretend
//! cache, packs, loose across the alternate chain, a one-shot pack-list
//! refresh (another process may have repacked), then an optional single
//! promisor-remote fetch. Shared caches sit behind one store mutex;
//! inflate always runs with the mutex released.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use quarry_core::{
    hash_object, telemetry, CounterId, HashAlgo, Lockfile, ObjectId, ObjectType, TimerId,
    DEFAULT_LOCK_TIMEOUT,
};

use crate::alternates::{read_alternates, MAX_ALTERNATE_DEPTH};
use crate::errors::ObjectError;
use crate::loose;
use crate::pack::{scan_pack_dir, DeltaBaseCache, PackFile, PackRead, PackedInfo};
use crate::{DEFAULT_BIG_FILE_THRESHOLD, DEFAULT_DELTA_CACHE_BYTES};

/// Tunables fixed at store construction.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// fsync loose objects before publishing them.
    pub fsync_object_files: bool,
    /// Byte budget for the delta-base cache.
    pub delta_cache_bytes: usize,
    /// Blobs at or above this stream instead of materializing.
    pub big_file_threshold: u64,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            fsync_object_files: false,
            delta_cache_bytes: DEFAULT_DELTA_CACHE_BYTES,
            big_file_threshold: DEFAULT_BIG_FILE_THRESHOLD,
        }
    }
}

impl StoreOptions {
    /// Defaults with the environment overrides applied
    /// (`QUARRY_DELTA_CACHE_BYTES`, `QUARRY_BIG_FILE_THRESHOLD`,
    /// `QUARRY_FSYNC_OBJECT_FILES`). Malformed values fall back silently.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Some(bytes) = env_usize("QUARRY_DELTA_CACHE_BYTES") {
            options.delta_cache_bytes = bytes;
        }
        if let Some(bytes) = env_usize("QUARRY_BIG_FILE_THRESHOLD") {
            options.big_file_threshold = bytes as u64;
        }
        if let Ok(v) = std::env::var("QUARRY_FSYNC_OBJECT_FILES") {
            options.fsync_object_files = v == "1" || v.eq_ignore_ascii_case("true");
        }
        options
    }
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

/// One object directory in the chain.
#[derive(Debug, Clone)]
pub struct ObjectDir {
    pub path: PathBuf,
    /// True for temporary overlays; nothing may move refs at them.
    pub disable_ref_updates: bool,
    /// True for scratch directories that will be removed wholesale.
    pub will_destroy: bool,
}

/// Where a lookup was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Cached,
    Loose,
    Packed,
}

/// Result of an `object_info` lookup.
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    /// Type name as stored; unknown names survive here.
    pub type_name: String,
    /// The modeled type, when the name is canonical.
    pub otype: Option<ObjectType>,
    pub size: u64,
    pub whence: Whence,
    /// Base id when the object is stored as a pack delta.
    pub delta_base: Option<ObjectId>,
}

/// Per-call lookup switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct LookupFlags {
    /// Substitute through the replace map first.
    pub replace: bool,
    /// Skip the pack-list refresh on miss.
    pub quick: bool,
    /// Never consult loose storage.
    pub ignore_loose: bool,
    /// Never attempt a promisor fetch.
    pub skip_fetch: bool,
}

/// Hook for fetching a missing object from a promisor remote. Returns true
/// when the object is expected to be present afterwards.
pub trait PromisorFetch: Send + Sync {
    fn fetch(&self, id: &ObjectId) -> bool;
}

struct PretendObject {
    otype: ObjectType,
    data: Arc<Vec<u8>>,
}

struct StoreState {
    /// `dirs[0]` is the primary; the rest are alternates in load order.
    dirs: Vec<ObjectDir>,
    alternates_loaded: bool,
    /// Normalized paths of every known directory (cycle/dup guard).
    seen: HashSet<PathBuf>,
    packs: Vec<Arc<PackFile>>,
    packs_loaded: bool,
    pretend: HashMap<ObjectId, PretendObject>,
    replace: HashMap<ObjectId, ObjectId>,
}

pub struct ObjectStore {
    algo: HashAlgo,
    options: StoreOptions,
    state: Mutex<StoreState>,
    delta_cache: DeltaBaseCache,
    fetch: Option<Box<dyn PromisorFetch>>,
}

impl ObjectStore {
    pub fn open(objects_dir: &Path, algo: HashAlgo) -> Result<ObjectStore, ObjectError> {
        Self::open_with_options(objects_dir, algo, StoreOptions::default())
    }

    pub fn open_with_options(
        objects_dir: &Path,
        algo: HashAlgo,
        options: StoreOptions,
    ) -> Result<ObjectStore, ObjectError> {
        if !objects_dir.is_dir() {
            return Err(ObjectError::io(
                objects_dir,
                std::io::Error::new(std::io::ErrorKind::NotFound, "no such object directory"),
            ));
        }
        let primary = ObjectDir {
            path: objects_dir.to_path_buf(),
            disable_ref_updates: false,
            will_destroy: false,
        };
        let mut seen = HashSet::new();
        seen.insert(quarry_core::normalize_path(objects_dir));
        Ok(ObjectStore {
            algo,
            delta_cache: DeltaBaseCache::new(options.delta_cache_bytes),
            options,
            state: Mutex::new(StoreState {
                dirs: vec![primary],
                alternates_loaded: false,
                seen,
                packs: Vec::new(),
                packs_loaded: false,
                pretend: HashMap::new(),
                replace: HashMap::new(),
            }),
            fetch: None,
        })
    }

    pub fn algo(&self) -> HashAlgo {
        self.algo
    }

    pub fn primary_path(&self) -> PathBuf {
        self.state.lock().dirs[0].path.clone()
    }

    pub fn big_file_threshold(&self) -> u64 {
        self.options.big_file_threshold
    }

    pub(crate) fn delta_cache(&self) -> &DeltaBaseCache {
        &self.delta_cache
    }

    /// Install the promisor-remote hook. Setup-time only.
    pub fn set_promisor_fetch(&mut self, fetch: Box<dyn PromisorFetch>) {
        self.fetch = Some(fetch);
    }

    /// Map `from` to `to` for callers that opt into replacement.
    pub fn add_replace(&self, from: ObjectId, to: ObjectId) {
        self.state.lock().replace.insert(from, to);
    }

    /// Append `path` to the primary's `info/alternates`, staged through a
    /// sibling lock file, and link it into the live chain.
    pub fn add_alternate_persistent(&self, path: &Path) -> Result<(), ObjectError> {
        let info = {
            let st = self.state.lock();
            st.dirs[0].path.join("info")
        };
        std::fs::create_dir_all(&info).map_err(|e| ObjectError::io(&info, e))?;
        let target = info.join("alternates");

        let mut lock = Lockfile::acquire(&target, DEFAULT_LOCK_TIMEOUT)?;
        let mut content = match std::fs::read_to_string(&target) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(ObjectError::io(&target, e)),
        };
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(&path.display().to_string());
        content.push('\n');
        use std::io::Write as _;
        lock.write_all(content.as_bytes())
            .map_err(|e| ObjectError::io(&target, e))?;
        lock.commit()?;

        // If the chain is already materialized, link the new entry now;
        // otherwise the lazy load will pick it up.
        let normalized = quarry_core::normalize_path(path);
        let mut st = self.state.lock();
        if st.alternates_loaded && st.seen.insert(normalized.clone()) && normalized.is_dir() {
            st.dirs.push(ObjectDir {
                path: normalized,
                disable_ref_updates: false,
                will_destroy: false,
            });
            st.packs_loaded = false;
        }
        Ok(())
    }

    /// Chain a temporary overlay directory in memory (never persisted to
    /// `info/alternates`).
    pub fn add_alternate_in_memory(&self, path: &Path, will_destroy: bool) {
        let normalized = quarry_core::normalize_path(path);
        let mut st = self.state.lock();
        if !st.seen.insert(normalized.clone()) {
            return;
        }
        st.dirs.push(ObjectDir {
            path: normalized,
            disable_ref_updates: true,
            will_destroy,
        });
        // New directory, new packs.
        st.packs_loaded = false;
    }

    /// Snapshot of the chain, primary first. Loads alternates if needed.
    pub fn object_dirs(&self) -> Vec<ObjectDir> {
        let mut st = self.state.lock();
        Self::ensure_alternates(&mut st);
        st.dirs.clone()
    }

    // ---- lookup ----

    /// Resolve type, size and storage of `id` without materializing it.
    pub fn object_info(
        &self,
        id: &ObjectId,
        flags: LookupFlags,
    ) -> Result<ObjectInfo, ObjectError> {
        let _t = telemetry::timer(TimerId::OdbLookup);
        telemetry::counter_add(CounterId::OdbLookups, 1);
        let id = self.resolve_replace(id, flags);

        if let Some((otype, data)) = self.pretend_get(&id) {
            return Ok(ObjectInfo {
                type_name: otype.name().to_string(),
                otype: Some(otype),
                size: data.len() as u64,
                whence: Whence::Cached,
                delta_base: None,
            });
        }

        let mut fetched = false;
        loop {
            if let Some(info) = self.packed_info(&id)? {
                return Ok(info);
            }
            if !flags.ignore_loose {
                if let Some(info) = self.loose_info(&id)? {
                    return Ok(info);
                }
            }
            if !flags.quick {
                self.reprepare_packs();
                if let Some(info) = self.packed_info(&id)? {
                    return Ok(info);
                }
            }
            if !fetched && !flags.skip_fetch {
                if let Some(fetch) = &self.fetch {
                    telemetry::counter_add(CounterId::PromisorFetches, 1);
                    if fetch.fetch(&id) {
                        fetched = true;
                        continue;
                    }
                }
            }
            return Err(ObjectError::NotFound(id));
        }
    }

    /// Materialize `id` as `(type, bytes)`.
    pub fn read_object(
        &self,
        id: &ObjectId,
        flags: LookupFlags,
    ) -> Result<(ObjectType, Vec<u8>), ObjectError> {
        let _t = telemetry::timer(TimerId::OdbLookup);
        telemetry::counter_add(CounterId::OdbLookups, 1);
        let id = self.resolve_replace(id, flags);

        if let Some((otype, data)) = self.pretend_get(&id) {
            return Ok((otype, data.as_ref().clone()));
        }

        let mut fetched = false;
        loop {
            if let Some(found) = self.read_packed(&id)? {
                return Ok(found);
            }
            if !flags.ignore_loose {
                if let Some(found) = self.read_loose_checked(&id)? {
                    return Ok(found);
                }
            }
            if !flags.quick {
                self.reprepare_packs();
                if let Some(found) = self.read_packed(&id)? {
                    return Ok(found);
                }
            }
            if !fetched && !flags.skip_fetch {
                if let Some(fetch) = &self.fetch {
                    telemetry::counter_add(CounterId::PromisorFetches, 1);
                    if fetch.fetch(&id) {
                        fetched = true;
                        continue;
                    }
                }
            }
            return Err(ObjectError::NotFound(id));
        }
    }

    /// Existence check: quick (no pack refresh) and never fetching.
    pub fn has_object(&self, id: &ObjectId) -> bool {
        let flags = LookupFlags { quick: true, skip_fetch: true, ..LookupFlags::default() };
        self.object_info(id, flags).is_ok()
    }

    /// Re-hash `id`'s stored bytes against its name. Loose objects verify
    /// streaming (the body is never materialized); packed objects verify
    /// their reconstruction. Corrupt storage surfaces as `Corrupt`.
    pub fn verify_object(&self, id: &ObjectId) -> Result<(), ObjectError> {
        if self.pretend_get(id).is_some() {
            return Ok(());
        }
        if let Some(path) = self.find_loose_path(id) {
            return loose::verify_loose_streaming(&path, id);
        }
        if let Some((otype, data)) = self.read_packed(id)? {
            let actual = hash_object(id.algo(), otype, &data);
            if actual != *id {
                return Err(ObjectError::corrupt(id, format!("content hashes to {actual}")));
            }
            return Ok(());
        }
        Err(ObjectError::NotFound(*id))
    }

    // ---- write ----

    /// Hash and store `payload` loose in the primary directory; returns the
    /// id. Rewriting existing content is a successful no-op.
    pub fn write_object(
        &self,
        otype: ObjectType,
        payload: &[u8],
    ) -> Result<ObjectId, ObjectError> {
        let id = hash_object(self.algo, otype, payload);
        let primary = self.primary_path();
        loose::write_loose(&primary, otype, payload, &id, self.options.fsync_object_files)?;
        Ok(id)
    }

    /// Make `payload` readable under its id for this process only; nothing
    /// touches disk.
    pub fn pretend_object(&self, otype: ObjectType, payload: &[u8]) -> ObjectId {
        let id = hash_object(self.algo, otype, payload);
        let mut st = self.state.lock();
        st.pretend
            .entry(id)
            .or_insert_with(|| PretendObject { otype, data: Arc::new(payload.to_vec()) });
        id
    }

    // ---- internals ----

    fn resolve_replace(&self, id: &ObjectId, flags: LookupFlags) -> ObjectId {
        if !flags.replace {
            return *id;
        }
        // An empty map substitutes identity.
        self.state.lock().replace.get(id).copied().unwrap_or(*id)
    }

    pub(crate) fn pretend_get(&self, id: &ObjectId) -> Option<(ObjectType, Arc<Vec<u8>>)> {
        let st = self.state.lock();
        st.pretend.get(id).map(|p| (p.otype, Arc::clone(&p.data)))
    }

    fn ensure_alternates(st: &mut StoreState) {
        if st.alternates_loaded {
            return;
        }
        st.alternates_loaded = true;
        let primary = st.dirs[0].path.clone();
        let mut found = Vec::new();
        let mut seen = std::mem::take(&mut st.seen);
        read_alternates(&primary, MAX_ALTERNATE_DEPTH, &mut seen, &mut found);
        st.seen = seen;
        for path in found {
            st.dirs.push(ObjectDir {
                path,
                disable_ref_updates: false,
                will_destroy: false,
            });
        }
    }

    fn ensure_packs(st: &mut StoreState, algo: HashAlgo) {
        Self::ensure_alternates(st);
        if st.packs_loaded {
            return;
        }
        st.packs_loaded = true;
        let mut packs = Vec::new();
        for dir in &st.dirs {
            packs.extend(scan_pack_dir(&dir.path, algo));
        }
        st.packs = packs;
    }

    /// Rescan pack directories, keeping the open handle (and its bad-object
    /// set) for packs that are still present.
    fn reprepare_packs(&self) {
        let mut st = self.state.lock();
        Self::ensure_alternates(&mut st);
        let existing: HashMap<PathBuf, Arc<PackFile>> = st
            .packs
            .iter()
            .map(|p| (p.path().to_path_buf(), Arc::clone(p)))
            .collect();
        let mut packs = Vec::new();
        for dir in &st.dirs {
            for pack in scan_pack_dir(&dir.path, self.algo) {
                match existing.get(pack.path()) {
                    Some(kept) => packs.push(Arc::clone(kept)),
                    None => packs.push(pack),
                }
            }
        }
        st.packs = packs;
        st.packs_loaded = true;
    }

    fn pack_snapshot(&self) -> Vec<Arc<PackFile>> {
        let mut st = self.state.lock();
        Self::ensure_packs(&mut st, self.algo);
        st.packs.clone()
    }

    fn dir_snapshot(&self) -> Vec<PathBuf> {
        let mut st = self.state.lock();
        Self::ensure_alternates(&mut st);
        st.dirs.iter().map(|d| d.path.clone()).collect()
    }

    pub(crate) fn find_loose_path(&self, id: &ObjectId) -> Option<PathBuf> {
        for dir in self.dir_snapshot() {
            let path = loose::loose_object_path(&dir, id);
            if path.is_file() {
                return Some(path);
            }
        }
        None
    }

    /// Find `id` in the pack list and report it; `Ok(None)` on miss.
    fn packed_info(&self, id: &ObjectId) -> Result<Option<ObjectInfo>, ObjectError> {
        for pack in self.pack_snapshot() {
            if pack.is_bad(id) {
                continue;
            }
            let info = match pack.object_info(id) {
                Ok(None) => continue,
                Ok(Some(info)) => info,
                Err(e @ ObjectError::BadPack { .. }) => {
                    tracing::warn!("marking {id} bad in {:?}: {e}", pack.path());
                    pack.mark_bad(id);
                    continue;
                }
                Err(e) => return Err(e),
            };
            let otype = match info.otype {
                Some(t) => Some(t),
                None => {
                    // REF delta whose base lives outside this pack.
                    match info.delta_base {
                        Some(base) => {
                            let flags = LookupFlags {
                                quick: true,
                                skip_fetch: true,
                                ..LookupFlags::default()
                            };
                            match self.object_info(&base, flags) {
                                Ok(base_info) => base_info.otype,
                                Err(_) => {
                                    tracing::warn!(
                                        "marking {id} bad in {:?}: unresolvable delta base",
                                        pack.path()
                                    );
                                    pack.mark_bad(id);
                                    continue;
                                }
                            }
                        }
                        None => None,
                    }
                }
            };
            let type_name = otype.map(|t| t.name().to_string()).unwrap_or_default();
            return Ok(Some(ObjectInfo {
                type_name,
                otype,
                size: info.size,
                whence: Whence::Packed,
                delta_base: info.delta_base,
            }));
        }
        Ok(None)
    }

    /// Locate `id`'s pack entry for the streaming layer.
    pub(crate) fn locate_packed(
        &self,
        id: &ObjectId,
    ) -> Result<Option<(Arc<PackFile>, PackedInfo)>, ObjectError> {
        for pack in self.pack_snapshot() {
            if pack.is_bad(id) {
                continue;
            }
            match pack.object_info(id) {
                Ok(Some(info)) => return Ok(Some((pack, info))),
                Ok(None) => continue,
                Err(e @ ObjectError::BadPack { .. }) => {
                    tracing::warn!("marking {id} bad in {:?}: {e}", pack.path());
                    pack.mark_bad(id);
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    fn loose_info(&self, id: &ObjectId) -> Result<Option<ObjectInfo>, ObjectError> {
        let Some(path) = self.find_loose_path(id) else {
            return Ok(None);
        };
        match loose::loose_object_info(&path, id) {
            Ok(header) => Ok(Some(ObjectInfo {
                otype: header.object_type(),
                size: header.size,
                whence: Whence::Loose,
                delta_base: None,
                type_name: header.type_name,
            })),
            // Racing prune unlinked it between stat and open.
            Err(ObjectError::Io { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn read_loose_checked(
        &self,
        id: &ObjectId,
    ) -> Result<Option<(ObjectType, Vec<u8>)>, ObjectError> {
        let Some(path) = self.find_loose_path(id) else {
            return Ok(None);
        };
        let (header, body) = match loose::read_loose(&path, id) {
            Ok(ok) => ok,
            Err(ObjectError::Io { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let Some(otype) = header.object_type() else {
            return Err(ObjectError::corrupt(
                id,
                format!("unknown object type {:?}", header.type_name),
            ));
        };
        // The id is the hash of the canonical encoding; a loose file that
        // decodes to anything else is corrupt no matter how it deflated.
        let actual = hash_object(id.algo(), otype, &body);
        if actual != *id {
            return Err(ObjectError::corrupt(id, format!("content hashes to {actual}")));
        }
        Ok(Some((otype, body)))
    }

    fn read_packed(
        &self,
        id: &ObjectId,
    ) -> Result<Option<(ObjectType, Vec<u8>)>, ObjectError> {
        for pack in self.pack_snapshot() {
            if pack.is_bad(id) {
                continue;
            }
            match pack.read_object(id, &self.delta_cache) {
                Ok(None) => continue,
                Ok(Some(PackRead::Done(otype, data))) => return Ok(Some((otype, data))),
                Ok(Some(PackRead::BaseMissing { base, offset })) => {
                    let flags = LookupFlags { quick: true, ..LookupFlags::default() };
                    let (base_type, base_data) = self.read_object(&base, flags)?;
                    match pack.finish_with_base(offset, base_type, &base_data) {
                        Ok(done) => return Ok(Some(done)),
                        Err(e @ ObjectError::BadPack { .. }) => {
                            tracing::warn!("marking {id} bad in {:?}: {e}", pack.path());
                            pack.mark_bad(id);
                            continue;
                        }
                        Err(e) => return Err(e),
                    }
                }
                Err(e @ ObjectError::BadPack { .. }) => {
                    tracing::warn!("marking {id} bad in {:?}: {e}", pack.path());
                    pack.mark_bad(id);
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
