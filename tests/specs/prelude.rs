// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for the integration specs.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use quarry_daemon::{client, run, DaemonConfig};
use quarry_ipc::ActiveState;
use tempfile::TempDir;

/// A throwaway worktree with a `.git` directory.
pub struct Worktree {
    dir: TempDir,
}

impl Worktree {
    pub fn new() -> Worktree {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join(".git")).expect("gitdir");
        Worktree { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn gitdir(&self) -> PathBuf {
        // The daemon canonicalizes its config; fixtures must agree.
        self.dir.path().canonicalize().expect("canonicalize").join(".git")
    }

    /// Write a file inside the worktree.
    pub fn write(&self, rel: &str, contents: &[u8]) {
        let path = self.dir.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("parent");
        }
        std::fs::write(path, contents).expect("write");
    }
}

/// An in-process daemon that stops (and joins) on drop.
pub struct DaemonGuard {
    gitdir: PathBuf,
    thread: Option<std::thread::JoinHandle<Result<(), quarry_daemon::WatchError>>>,
}

impl DaemonGuard {
    pub fn gitdir(&self) -> &Path {
        &self.gitdir
    }

    /// Stop the daemon and return whether `run` came back clean.
    pub fn shutdown(mut self) -> bool {
        client::stop(&self.gitdir).expect("stop");
        match self.thread.take() {
            Some(t) => matches!(t.join(), Ok(Ok(()))),
            None => true,
        }
    }
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        let _ = client::stop(&self.gitdir);
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

/// Start a daemon for `wt` and wait until it is listening.
pub fn start_daemon(wt: &Worktree) -> DaemonGuard {
    let config = DaemonConfig::discover(wt.path()).expect("discover");
    let gitdir = config.gitdir.clone();
    let thread = std::thread::spawn(move || run(&config));

    let deadline = Instant::now() + Duration::from_secs(5);
    while client::status(&gitdir) != ActiveState::Listening {
        assert!(Instant::now() < deadline, "daemon never started listening");
        std::thread::sleep(Duration::from_millis(20));
    }
    // Let the OS watches arm before callers generate events.
    std::thread::sleep(Duration::from_millis(100));
    DaemonGuard { gitdir, thread: Some(thread) }
}
