// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Filesystem event sources.
//!
//! One trait seam covers every platform; the shipped implementation rides
//! the `notify` crate's recommended per-platform watcher (inotify on
//! Linux, FSEvents on macOS, ReadDirectoryChangesW on Windows). Kernel
//! overflow surfaces as a rescan-flagged event or a watcher error; both
//! become [`SourceEvent::Resync`].

use std::path::{Path, PathBuf};

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use notify::{RecommendedWatcher, RecursiveMode, Watcher as _};

use crate::WatchError;

/// One delivery from the event source to the listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    /// A coalesced burst of absolute paths that changed.
    Burst(Vec<PathBuf>),
    /// The event stream has a gap; every outstanding token is invalid.
    Resync,
}

/// A running platform event source feeding the listener thread.
pub trait FsEventSource: Send {
    /// Block for the next burst. `None` means the source was stopped.
    fn next_event(&mut self) -> Option<SourceEvent>;

    /// Handle for waking [`FsEventSource::next_event`] with a stop signal
    /// from another thread.
    fn stopper(&self) -> SourceStopper;
}

enum Raw {
    Event(notify::Event),
    Error(String),
    Stop,
}

/// Wakes a blocked source; cheap to clone across threads.
#[derive(Clone)]
pub struct SourceStopper {
    tx: Sender<Raw>,
}

impl SourceStopper {
    pub fn stop_async(&self) {
        let _ = self.tx.send(Raw::Stop);
    }
}

/// `notify`-backed event source watching the worktree (and, for linked
/// worktrees, the external gitdir).
pub struct NotifyEventSource {
    // Dropping the watcher tears the OS watches down.
    _watcher: RecommendedWatcher,
    rx: Receiver<Raw>,
    tx: Sender<Raw>,
}

impl NotifyEventSource {
    pub fn new(worktree: &Path, external_gitdir: Option<&Path>) -> Result<Self, WatchError> {
        let (tx, rx) = unbounded::<Raw>();
        let event_tx = tx.clone();
        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
                let raw = match res {
                    Ok(event) => Raw::Event(event),
                    Err(e) => Raw::Error(e.to_string()),
                };
                let _ = event_tx.send(raw);
            })?;
        watcher.watch(worktree, RecursiveMode::Recursive)?;
        if let Some(gitdir) = external_gitdir {
            watcher.watch(gitdir, RecursiveMode::Recursive)?;
        }
        Ok(NotifyEventSource { _watcher: watcher, rx, tx })
    }

    /// Fold one raw delivery into the burst under assembly. Returns false
    /// when a stop was seen.
    fn fold(raw: Raw, paths: &mut Vec<PathBuf>, resync: &mut bool) -> bool {
        match raw {
            Raw::Stop => false,
            Raw::Error(e) => {
                tracing::warn!("event source error, forcing resync: {e}");
                *resync = true;
                true
            }
            Raw::Event(event) => {
                if event.need_rescan() {
                    *resync = true;
                }
                paths.extend(event.paths);
                true
            }
        }
    }
}

impl FsEventSource for NotifyEventSource {
    fn next_event(&mut self) -> Option<SourceEvent> {
        let first = self.rx.recv().ok()?;
        let mut paths = Vec::new();
        let mut resync = false;
        if !Self::fold(first, &mut paths, &mut resync) {
            return None;
        }
        // Drain whatever arrived in the same burst without blocking.
        loop {
            match self.rx.try_recv() {
                Ok(raw) => {
                    if !Self::fold(raw, &mut paths, &mut resync) {
                        return None;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return None,
            }
        }
        if resync {
            Some(SourceEvent::Resync)
        } else {
            Some(SourceEvent::Burst(paths))
        }
    }

    fn stopper(&self) -> SourceStopper {
        SourceStopper { tx: self.tx.clone() }
    }
}

#[cfg(test)]
#[path = "source_tests.rs"]
mod tests;
