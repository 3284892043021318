// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Health thread: re-check externally visible invariants on a coarse tick
//! and request shutdown when one is violated. The set of checks here is
//! deliberately small; platform backends can hook richer signals (volume
//! detach and the like) into the same loop.

use std::path::PathBuf;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use quarry_ipc::ServerStopper;

pub(crate) fn health_loop(
    worktree: PathBuf,
    gitdir: PathBuf,
    interval: Duration,
    stop_rx: Receiver<()>,
    server: ServerStopper,
) {
    loop {
        match stop_rx.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => {}
        }
        if !worktree.is_dir() {
            tracing::warn!("worktree {worktree:?} is gone; shutting down");
            server.stop_async();
            return;
        }
        if !gitdir.is_dir() {
            tracing::warn!("gitdir {gitdir:?} is gone; shutting down");
            server.stop_async();
            return;
        }
    }
}
