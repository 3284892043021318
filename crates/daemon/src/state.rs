// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token-addressed batch state.
//!
//! One mutex guards everything: the current token (instance id + sequence
//! number), the append-only batch ring, and the cookie rendezvous map.
//! Tokens from other daemon incarnations (or from before a force-resync,
//! which mints a fresh instance id) always get the trivial "rescan
//! everything" answer.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use quarry_core::{telemetry, CounterId, TimerId};

/// Token prefix naming this daemon family on the wire.
const TOKEN_HEADER: &str = "quarry";

/// Ring bound: more retained paths than this forces a resync rather than
/// unbounded growth.
const MAX_RETAINED_PATHS: usize = 65536;

/// A parsed watcher token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenData {
    pub instance: String,
    pub seq: u64,
}

impl TokenData {
    /// Parse `"quarry:<instance>:<seq>"`; anything else is foreign.
    pub fn parse(s: &str) -> Option<TokenData> {
        let rest = s.strip_prefix(TOKEN_HEADER)?.strip_prefix(':')?;
        let (instance, seq) = rest.rsplit_once(':')?;
        if instance.is_empty() {
            return None;
        }
        let seq = seq.parse().ok()?;
        Some(TokenData { instance: instance.to_string(), seq })
    }
}

impl std::fmt::Display for TokenData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{TOKEN_HEADER}:{}:{}", self.instance, self.seq)
    }
}

/// One published burst of worktree-relative paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Token sequence this batch was published under.
    pub seq: u64,
    pub paths: Vec<String>,
}

/// What a query gets back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResponse {
    pub token: String,
    /// "Rescan everything"; `paths` is empty.
    pub trivial: bool,
    pub paths: Vec<String>,
}

enum CookieStatus {
    Waiting,
    Seen,
    Wedged,
}

struct StateInner {
    instance: String,
    seq: u64,
    batches: VecDeque<Batch>,
    retained_paths: usize,
    cookies: HashMap<String, CookieStatus>,
    cookie_serial: u64,
}

/// Shared daemon state; everything mutable sits behind one mutex.
pub struct WatcherState {
    inner: Mutex<StateInner>,
    cookie_cond: Condvar,
    cookie_dir: PathBuf,
}

impl WatcherState {
    pub fn new(cookie_dir: PathBuf) -> WatcherState {
        WatcherState {
            inner: Mutex::new(StateInner {
                instance: nanoid::nanoid!(),
                seq: 0,
                batches: VecDeque::new(),
                retained_paths: 0,
                cookies: HashMap::new(),
                cookie_serial: 0,
            }),
            cookie_cond: Condvar::new(),
            cookie_dir,
        }
    }

    /// The current token string.
    pub fn current_token(&self) -> String {
        let inner = self.inner.lock();
        TokenData { instance: inner.instance.clone(), seq: inner.seq }.to_string()
    }

    /// Answer "what changed since `since`".
    ///
    /// An empty (bootstrap) token means "everything this incarnation has
    /// seen": the full batch union comes back under the current token.
    /// Unparseable and foreign tokens get the trivial answer instead.
    pub fn query(&self, since: &str) -> QueryResponse {
        let inner = self.inner.lock();
        let token = TokenData { instance: inner.instance.clone(), seq: inner.seq }.to_string();

        if since.is_empty() || since == "quarry:" {
            let paths = Self::union_since(&inner, 0);
            return QueryResponse { token, trivial: false, paths };
        }

        let Some(parsed) = TokenData::parse(since) else {
            return QueryResponse { token, trivial: true, paths: Vec::new() };
        };
        if parsed.instance != inner.instance || parsed.seq > inner.seq {
            // Foreign incarnation, or a token from after a resync rolled
            // the instance id: the client's cache is unsalvageable.
            return QueryResponse { token, trivial: true, paths: Vec::new() };
        }

        let paths = Self::union_since(&inner, parsed.seq);
        QueryResponse { token, trivial: false, paths }
    }

    /// Deduplicated union of every batch published after `since_seq`,
    /// oldest first.
    fn union_since(inner: &StateInner, since_seq: u64) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut paths = Vec::new();
        for batch in &inner.batches {
            if batch.seq <= since_seq {
                continue;
            }
            for path in &batch.paths {
                if seen.insert(path.clone()) {
                    paths.push(path.clone());
                }
            }
        }
        paths
    }

    /// Fold one coalesced event burst into the ring: rotate the token,
    /// append the batch, and wake any cookie waiters this burst satisfied.
    pub fn publish(&self, paths: Vec<String>, cookies_observed: Vec<String>) {
        let _t = telemetry::timer(TimerId::WatcherPublish);
        let mut inner = self.inner.lock();
        if !paths.is_empty() {
            inner.seq += 1;
            inner.retained_paths += paths.len();
            let batch = Batch { seq: inner.seq, paths };
            inner.batches.push_back(batch);
            telemetry::counter_add(CounterId::WatcherBatches, 1);
            if inner.retained_paths > MAX_RETAINED_PATHS {
                tracing::warn!("batch ring exceeded {MAX_RETAINED_PATHS} paths; forcing resync");
                Self::force_resync_locked(&mut inner);
            }
        }
        let mut woke = false;
        for name in cookies_observed {
            if let Some(status) = inner.cookies.get_mut(&name) {
                *status = CookieStatus::Seen;
                woke = true;
            }
        }
        if woke {
            self.cookie_cond.notify_all();
        }
    }

    /// Drop every batch and mint a fresh instance id; all outstanding
    /// tokens become trivial.
    pub fn force_resync(&self) {
        let mut inner = self.inner.lock();
        Self::force_resync_locked(&mut inner);
    }

    fn force_resync_locked(inner: &mut StateInner) {
        inner.instance = nanoid::nanoid!();
        inner.seq = 0;
        inner.batches.clear();
        inner.retained_paths = 0;
        telemetry::counter_add(CounterId::ForceResyncs, 1);
    }

    /// Create a cookie file inside the watched gitdir and wait until the
    /// event stream reports it back, bounding the wait by `timeout`.
    ///
    /// A `true` return is the happens-before barrier: every filesystem
    /// event ordered before the cookie's creation has been drained into
    /// the ring.
    pub fn wait_for_cookie(&self, timeout: Duration) -> bool {
        let _t = telemetry::timer(TimerId::CookieWait);
        let name = {
            let mut inner = self.inner.lock();
            inner.cookie_serial += 1;
            let name = format!("{}-{}", std::process::id(), inner.cookie_serial);
            inner.cookies.insert(name.clone(), CookieStatus::Waiting);
            name
        };

        // The create must happen outside the lock: the listener thread
        // needs the lock to publish the observation that wakes us.
        let path = self.cookie_dir.join(&name);
        let created = std::fs::create_dir_all(&self.cookie_dir)
            .and_then(|()| std::fs::File::create(&path))
            .is_ok();

        let seen = if created {
            let deadline = Instant::now() + timeout;
            let mut inner = self.inner.lock();
            loop {
                match inner.cookies.get(&name) {
                    Some(CookieStatus::Seen) => break true,
                    Some(CookieStatus::Wedged) | None => break false,
                    Some(CookieStatus::Waiting) => {}
                }
                let now = Instant::now();
                if now >= deadline {
                    break false;
                }
                let timed_out = self
                    .cookie_cond
                    .wait_until(&mut inner, deadline)
                    .timed_out();
                if timed_out {
                    break matches!(inner.cookies.get(&name), Some(CookieStatus::Seen));
                }
            }
        } else {
            false
        };

        let mut inner = self.inner.lock();
        inner.cookies.remove(&name);
        drop(inner);
        let _ = std::fs::remove_file(&path);
        seen
    }

    /// Abort every outstanding cookie wait (daemon is going down).
    pub fn wedge_all_cookies(&self) {
        let mut inner = self.inner.lock();
        for status in inner.cookies.values_mut() {
            if matches!(status, CookieStatus::Waiting) {
                *status = CookieStatus::Wedged;
            }
        }
        self.cookie_cond.notify_all();
    }

    #[cfg(test)]
    pub(crate) fn batch_count(&self) -> usize {
        self.inner.lock().batches.len()
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
