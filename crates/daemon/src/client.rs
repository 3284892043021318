// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client half: query or control a running watcher daemon.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use quarry_ipc::{get_active_state, send_command, ActiveState, ConnectOptions};

use crate::{env, WatchError, SOCKET_FILE};

/// Socket path for the daemon serving `gitdir`.
pub fn socket_path(gitdir: &Path) -> PathBuf {
    gitdir.join(SOCKET_FILE)
}

/// A parsed query response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryReply {
    pub token: String,
    /// The daemon could not answer incrementally; rescan everything.
    pub trivial: bool,
    pub paths: Vec<String>,
}

/// Ask the daemon what changed since `since_token`. An empty token is the
/// bootstrap query: everything the daemon's current incarnation has seen,
/// under the current token.
pub fn query(gitdir: &Path, since_token: &str) -> Result<QueryReply, WatchError> {
    let options = ConnectOptions { wait_if_busy: true, ..ConnectOptions::default() };
    // The wire never carries an empty request; the bare token header is
    // the bootstrap spelling.
    let request = if since_token.is_empty() { "quarry:" } else { since_token };
    let raw = send_command(&socket_path(gitdir), options, request.as_bytes())?;
    parse_query_reply(&raw)
}

fn parse_query_reply(raw: &[u8]) -> Result<QueryReply, WatchError> {
    if raw.is_empty() {
        return Err(WatchError::BadResponse);
    }
    let mut segments = raw.split(|b| *b == 0);
    let first = segments.next().unwrap_or_default();
    let first = std::str::from_utf8(first).map_err(|_| WatchError::BadResponse)?;

    if first == "/" {
        let token = segments.next().ok_or(WatchError::BadResponse)?;
        let token = std::str::from_utf8(token).map_err(|_| WatchError::BadResponse)?;
        return Ok(QueryReply { token: token.to_string(), trivial: true, paths: Vec::new() });
    }

    let mut paths = Vec::new();
    for seg in segments {
        if seg.is_empty() {
            continue;
        }
        let path = std::str::from_utf8(seg).map_err(|_| WatchError::BadResponse)?;
        paths.push(path.to_string());
    }
    Ok(QueryReply { token: first.to_string(), trivial: false, paths })
}

/// Force-resync a running daemon (test/debug).
pub fn flush(gitdir: &Path) -> Result<(), WatchError> {
    let options = ConnectOptions { wait_if_busy: true, ..ConnectOptions::default() };
    let raw = send_command(&socket_path(gitdir), options, b"flush")?;
    if raw != b"flushed" {
        return Err(WatchError::BadResponse);
    }
    Ok(())
}

/// Tell the daemon to quit and wait for it to leave the listening state.
pub fn stop(gitdir: &Path) -> Result<(), WatchError> {
    let path = socket_path(gitdir);
    match send_command(&path, ConnectOptions::default(), b"quit") {
        Ok(_) => {}
        // Nothing to stop.
        Err(quarry_ipc::IpcError::PathNotFound(_)) => return Ok(()),
        Err(e) => return Err(e.into()),
    }
    let deadline = Instant::now() + env::stop_timeout();
    while get_active_state(&path) == ActiveState::Listening {
        if Instant::now() >= deadline {
            return Err(WatchError::StopTimeout);
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    Ok(())
}

/// Probe whether a daemon is serving `gitdir`.
pub fn status(gitdir: &Path) -> ActiveState {
    get_active_state(&socket_path(gitdir))
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
