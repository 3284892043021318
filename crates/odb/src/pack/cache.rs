// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded cache of reconstructed delta bases.
//!
//! Delta chains reuse bases heavily; without a cache, reading N chained
//! entries re-expands each base once per dependent, which goes quadratic.
//! Entries are keyed `(pack id, offset)` and evicted least-recently-used
//! once the byte budget is exceeded.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use quarry_core::ObjectType;

pub struct DeltaBaseCache {
    inner: Mutex<CacheInner>,
    budget: usize,
}

struct CacheInner {
    entries: HashMap<(u64, u64), CacheEntry>,
    total_bytes: usize,
    tick: u64,
}

struct CacheEntry {
    otype: ObjectType,
    data: Arc<Vec<u8>>,
    last_used: u64,
}

impl DeltaBaseCache {
    pub fn new(budget: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                total_bytes: 0,
                tick: 0,
            }),
            budget,
        }
    }

    pub fn get(&self, pack: u64, offset: u64) -> Option<(ObjectType, Arc<Vec<u8>>)> {
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;
        let entry = inner.entries.get_mut(&(pack, offset))?;
        entry.last_used = tick;
        Some((entry.otype, Arc::clone(&entry.data)))
    }

    pub fn put(&self, pack: u64, offset: u64, otype: ObjectType, data: Arc<Vec<u8>>) {
        if data.len() > self.budget {
            return;
        }
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;
        if let Some(old) = inner.entries.insert(
            (pack, offset),
            CacheEntry { otype, data: Arc::clone(&data), last_used: tick },
        ) {
            inner.total_bytes -= old.data.len();
        }
        inner.total_bytes += data.len();

        while inner.total_bytes > self.budget {
            let Some((&key, _)) = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
            else {
                break;
            };
            if let Some(evicted) = inner.entries.remove(&key) {
                inner.total_bytes -= evicted.data.len();
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn resident_bytes(&self) -> usize {
        self.inner.lock().total_bytes
    }
}
