// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The filesystem-watcher daemon.
//!
//! One long-running process per worktree observes OS-level filesystem
//! events, folds them into batches addressed by a monotonic token, and
//! answers IPC queries of the form "what changed since token T". Client
//! helpers for querying and stopping a daemon live in [`client`].

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod client;
mod classify;
mod daemon;
pub mod env;
mod health;
mod listener;
mod source;
mod state;

pub use classify::{PathClass, PathClassifier};
pub use daemon::{run, DaemonConfig};
pub use source::{FsEventSource, NotifyEventSource, SourceEvent, SourceStopper};
pub use state::{Batch, QueryResponse, TokenData, WatcherState};

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// The unix socket a daemon serves inside its gitdir.
pub const SOCKET_FILE: &str = "quarry-watch.ipc";
/// The fs2-locked pidfile guarding one daemon per worktree.
pub const LOCK_FILE: &str = "quarry-watch.lock";
/// Directory (under the gitdir) where query cookies rendezvous.
pub const COOKIE_DIR: &str = "quarry-watch/cookies";

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("{0:?} is not a worktree with a gitdir")]
    NotAWorktree(PathBuf),

    #[error("a watcher daemon already runs for {0:?}")]
    AlreadyRunning(PathBuf),

    #[error("filesystem event source")]
    Source(#[from] notify::Error),

    #[error(transparent)]
    Ipc(#[from] quarry_ipc::IpcError),

    #[error("daemon I/O on {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed daemon response")]
    BadResponse,

    #[error("daemon did not leave the listening state")]
    StopTimeout,
}

impl WatchError {
    pub(crate) fn io(path: &std::path::Path, source: io::Error) -> Self {
        WatchError::Io { path: path.to_path_buf(), source }
    }
}
