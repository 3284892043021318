// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle: startup, the IPC request handler, clean teardown.
//!
//! Wire commands: `"quit"` stops the daemon (no response payload),
//! `"flush"` force-resyncs (test/debug), anything else is a since-token
//! query. A query response is one byte string: `"/" NUL <token>` for the
//! trivial "rescan everything" answer, else `<token>` optionally followed
//! by `NUL`-separated worktree-relative paths.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt as _;
use quarry_core::telemetry;
use quarry_ipc::{Flow, Reply, RequestHandler, Server, ServerOptions};
use tracing::info;

use crate::classify::PathClassifier;
use crate::health::health_loop;
use crate::listener::listener_loop;
use crate::source::{FsEventSource, NotifyEventSource};
use crate::state::WatcherState;
use crate::{env, WatchError, COOKIE_DIR, LOCK_FILE, SOCKET_FILE};

/// Everything `run` needs to know about the worktree being watched.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub worktree: PathBuf,
    pub gitdir: PathBuf,
}

impl DaemonConfig {
    /// Standard layout: the gitdir is `<worktree>/.git`.
    pub fn discover(worktree: &Path) -> Result<DaemonConfig, WatchError> {
        let worktree = worktree
            .canonicalize()
            .map_err(|e| WatchError::io(worktree, e))?;
        let gitdir = worktree.join(".git");
        if !gitdir.is_dir() {
            return Err(WatchError::NotAWorktree(worktree));
        }
        Ok(DaemonConfig { worktree, gitdir })
    }

    pub fn socket_path(&self) -> PathBuf {
        self.gitdir.join(SOCKET_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.gitdir.join(LOCK_FILE)
    }

    pub fn cookie_dir(&self) -> PathBuf {
        self.gitdir.join(COOKIE_DIR)
    }
}

struct WatchRequestHandler {
    state: Arc<WatcherState>,
    cookie_timeout: std::time::Duration,
}

impl RequestHandler for WatchRequestHandler {
    fn handle(&self, request: &[u8], reply: &mut Reply<'_>) -> Flow {
        if request == b"quit" {
            // No response payload; the caller's flush is answer enough.
            return Flow::Quit;
        }
        if request == b"flush" {
            self.state.force_resync();
            let _ = reply.send(b"flushed");
            return Flow::Continue;
        }

        // Anything else is a since-token query. Rendezvous with the event
        // stream first so every write ordered before this query is in the
        // ring; a wedged cookie degrades to the trivial answer.
        let synced = self.state.wait_for_cookie(self.cookie_timeout);
        let since = String::from_utf8_lossy(request);
        let response = if synced {
            self.state.query(&since)
        } else {
            tracing::warn!("cookie rendezvous failed; sending trivial response");
            crate::state::QueryResponse {
                token: self.state.current_token(),
                trivial: true,
                paths: Vec::new(),
            }
        };

        let mut payload = Vec::new();
        if response.trivial {
            payload.extend_from_slice(b"/");
            payload.push(0);
            payload.extend_from_slice(response.token.as_bytes());
        } else {
            payload.extend_from_slice(response.token.as_bytes());
            for path in &response.paths {
                payload.push(0);
                payload.extend_from_slice(path.as_bytes());
            }
        }
        let _ = reply.send(&payload);
        Flow::Continue
    }
}

/// Run a watcher daemon until it is told to stop. Returns only after every
/// thread has joined and the socket is gone.
pub fn run(config: &DaemonConfig) -> Result<(), WatchError> {
    let worktree = &config.worktree;
    let gitdir = &config.gitdir;
    if !worktree.is_dir() || !gitdir.is_dir() {
        return Err(WatchError::NotAWorktree(worktree.clone()));
    }

    // 1. One daemon per worktree: take the pidfile lock before touching
    //    anything else. Keep the handle alive for the daemon's lifetime.
    let lock_path = config.lock_path();
    let lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|e| WatchError::io(&lock_path, e))?;
    lock_file
        .try_lock_exclusive()
        .map_err(|_| WatchError::AlreadyRunning(worktree.clone()))?;
    let mut lock_file = lock_file;
    lock_file.set_len(0).map_err(|e| WatchError::io(&lock_path, e))?;
    writeln!(lock_file, "{}", std::process::id()).map_err(|e| WatchError::io(&lock_path, e))?;

    // 2. Cookie directory, before the watcher starts so its creation is
    //    not mistaken for activity.
    let cookie_dir = config.cookie_dir();
    std::fs::create_dir_all(&cookie_dir).map_err(|e| WatchError::io(&cookie_dir, e))?;

    // 3. Shared state.
    let state = Arc::new(WatcherState::new(cookie_dir));
    info!("watching {worktree:?}; initial token {}", state.current_token());

    // 4. Event source before the socket: no window where clients can ask
    //    about events nobody is collecting.
    let external_gitdir = if gitdir.starts_with(worktree) { None } else { Some(gitdir.as_path()) };
    let source = NotifyEventSource::new(worktree, external_gitdir)?;
    let source_stopper = source.stopper();

    // 5. IPC server.
    let handler = Arc::new(WatchRequestHandler {
        state: Arc::clone(&state),
        cookie_timeout: env::cookie_timeout(),
    });
    let mut options = ServerOptions::default();
    if let Some(n) = env::ipc_threads() {
        options.nr_threads = n;
    }
    let server = Server::bind(&config.socket_path(), handler, options)?;
    info!("listening on {:?}", config.socket_path());

    // 6. Listener and health threads.
    let classifier = PathClassifier::new(worktree, gitdir);
    let listener_state = Arc::clone(&state);
    let listener_server = server.stopper();
    let listener = std::thread::Builder::new()
        .name("fsw-listen".to_string())
        .spawn(move || {
            listener_loop(Box::new(source), listener_state, classifier, listener_server)
        })
        .map_err(|e| WatchError::io(worktree, e))?;

    let (health_stop_tx, health_stop_rx) = crossbeam_channel::bounded::<()>(1);
    let health_server = server.stopper();
    let health_worktree = worktree.clone();
    let health_gitdir = gitdir.clone();
    let health = std::thread::Builder::new()
        .name("fsw-health".to_string())
        .spawn(move || {
            health_loop(
                health_worktree,
                health_gitdir,
                env::health_interval(),
                health_stop_rx,
                health_server,
            )
        })
        .map_err(|e| WatchError::io(worktree, e))?;

    // 7. Serve until quit, socket theft, or a lost root.
    server.join()?;

    // 8. Teardown: stop the source (unblocks the listener), wedge any
    //    stragglers waiting on cookies, join everything.
    source_stopper.stop_async();
    state.wedge_all_cookies();
    drop(health_stop_tx);
    let _ = listener.join();
    let _ = health.join();

    telemetry::finalize();
    info!("clean shutdown for {worktree:?}");
    Ok(())
}
