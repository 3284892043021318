// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server side: one accept thread, a fixed worker pool, a bounded fd FIFO
//! between them.
//!
//! The accept thread polls the listening socket and a self-pipe; a byte on
//! the pipe is the shutdown signal, and every poll timeout it re-lstats
//! the socket path to catch another daemon stealing it. Accepted
//! connections queue into a bounded channel; a full queue drops the
//! connection on the floor rather than stalling the accept loop. Each
//! worker serves exactly one request/response exchange per connection,
//! with SIGPIPE blocked so client hangups surface as `EPIPE`.

use std::io::{self, Read as _, Write};
use std::os::fd::{AsFd as _, OwnedFd};
use std::os::unix::fs::{FileTypeExt as _, MetadataExt as _};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::{pthread_sigmask, SigSet, SigmaskHow, Signal};
use quarry_core::{telemetry, CounterId, TimerId};

use crate::pkt::{read_message, write_flush, write_packets, PacketReader};
use crate::IpcError;

/// Queue slots per worker thread.
const FIFO_FACTOR: usize = 100;

/// How long the accept loop sleeps in `poll` before its housekeeping tick.
const ACCEPT_POLL_TIMEOUT_MS: u16 = 60_000;

/// How long a worker waits for a fresh connection to become readable
/// before silently dropping it (clients that connected and hung up).
const WORKER_READABLE_TIMEOUT_MS: u16 = 10;

/// Handler verdict for one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Finish this reply, then shut the server down.
    Quit,
}

/// Streamed response writer handed to the application handler.
pub struct Reply<'a> {
    out: &'a mut dyn Write,
}

impl Reply<'_> {
    /// Append response bytes, split across frames as needed.
    pub fn send(&mut self, data: &[u8]) -> Result<(), IpcError> {
        write_packets(self.out, data)
    }
}

/// Application request handler. Runs on worker threads.
pub trait RequestHandler: Send + Sync + 'static {
    fn handle(&self, request: &[u8], reply: &mut Reply<'_>) -> Flow;
}

#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Worker pool size; at least one.
    pub nr_threads: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        let nr_threads = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self { nr_threads }
    }
}

#[derive(Debug)]
struct Shutdown {
    pipe_w: OwnedFd,
    fired: AtomicBool,
}

impl Shutdown {
    fn fire(&self) {
        if !self.fired.swap(true, Ordering::SeqCst) {
            // A single byte wakes the accept poll.
            if let Ok(dup) = self.pipe_w.try_clone() {
                let mut pipe = std::fs::File::from(dup);
                let _ = pipe.write_all(&[1u8]);
            }
        }
    }
}

/// Cloneable handle that requests an asynchronous shutdown.
#[derive(Clone)]
pub struct ServerStopper {
    shutdown: Arc<Shutdown>,
}

impl ServerStopper {
    pub fn stop_async(&self) {
        self.shutdown.fire();
    }
}

/// A running IPC server bound to a unix socket path.
#[derive(Debug)]
pub struct Server {
    path: PathBuf,
    shutdown: Arc<Shutdown>,
    accept: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl Server {
    /// Bind `path` and start the accept thread plus worker pool.
    pub fn bind(
        path: &Path,
        handler: Arc<dyn RequestHandler>,
        options: ServerOptions,
    ) -> Result<Server, IpcError> {
        // A stale socket from a crashed daemon blocks bind; the caller
        // holds the daemon lock, so anything here is ours to remove.
        match std::fs::symlink_metadata(path) {
            Ok(meta) if meta.file_type().is_socket() => {
                std::fs::remove_file(path)?;
            }
            Ok(_) => {
                return Err(IpcError::Io(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{path:?} exists and is not a socket"),
                )))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(IpcError::Io(e)),
        }

        let listener = UnixListener::bind(path)?;
        listener.set_nonblocking(true)?;
        let meta = std::fs::symlink_metadata(path)?;
        let identity = (meta.dev(), meta.ino());

        let (pipe_r, pipe_w) = nix::unistd::pipe().map_err(io::Error::from)?;
        let shutdown = Arc::new(Shutdown { pipe_w, fired: AtomicBool::new(false) });

        let nr_threads = options.nr_threads.max(1);
        let (tx, rx) = bounded::<UnixStream>(nr_threads * FIFO_FACTOR);

        let mut workers = Vec::with_capacity(nr_threads);
        for i in 0..nr_threads {
            let rx = rx.clone();
            let handler = Arc::clone(&handler);
            let shutdown = Arc::clone(&shutdown);
            let handle = std::thread::Builder::new()
                .name(format!("ipc-worker-{i}"))
                .spawn(move || worker_loop(rx, handler, shutdown))
                .map_err(IpcError::Io)?;
            workers.push(handle);
        }
        drop(rx);

        let accept_path = path.to_path_buf();
        let accept = std::thread::Builder::new()
            .name("ipc-accept".to_string())
            .spawn(move || accept_loop(listener, pipe_r, tx, accept_path, identity))
            .map_err(IpcError::Io)?;

        Ok(Server {
            path: path.to_path_buf(),
            shutdown,
            accept: Some(accept),
            workers,
        })
    }

    /// Handle for requesting shutdown from handlers or other threads.
    pub fn stopper(&self) -> ServerStopper {
        ServerStopper { shutdown: Arc::clone(&self.shutdown) }
    }

    /// Request shutdown without waiting.
    pub fn stop_async(&self) {
        self.shutdown.fire();
    }

    /// Wait for the accept thread and every worker to finish. In-flight
    /// exchanges complete; queued-but-unserved connections drain.
    pub fn join(mut self) -> Result<(), IpcError> {
        if let Some(accept) = self.accept.take() {
            let _ = accept.join();
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        // Leave no stale socket behind.
        let _ = std::fs::remove_file(&self.path);
        Ok(())
    }

    /// Request shutdown and wait for it.
    pub fn shutdown(self) -> Result<(), IpcError> {
        self.stop_async();
        self.join()
    }
}

fn accept_loop(
    listener: UnixListener,
    pipe_r: OwnedFd,
    tx: Sender<UnixStream>,
    path: PathBuf,
    identity: (u64, u64),
) {
    loop {
        let mut fds = [
            PollFd::new(listener.as_fd(), PollFlags::POLLIN),
            PollFd::new(pipe_r.as_fd(), PollFlags::POLLIN),
        ];
        let ready = match poll(&mut fds, PollTimeout::from(ACCEPT_POLL_TIMEOUT_MS)) {
            Ok(n) => n,
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => {
                tracing::error!("ipc accept poll failed: {e}");
                break;
            }
        };

        if ready == 0 {
            // Housekeeping tick: is the socket path still ours?
            if socket_stolen(&path, identity) {
                tracing::warn!("socket {path:?} was taken over; shutting down");
                break;
            }
            continue;
        }

        let pipe_ready = fds[1]
            .revents()
            .map(|r| r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP))
            .unwrap_or(false);
        if pipe_ready {
            if let Ok(dup) = pipe_r.try_clone() {
                let mut drain = std::fs::File::from(dup);
                let mut buf = [0u8; 8];
                let _ = drain.read(&mut buf);
            }
            break;
        }

        let listener_ready = fds[0]
            .revents()
            .map(|r| r.intersects(PollFlags::POLLIN))
            .unwrap_or(false);
        if !listener_ready {
            continue;
        }

        loop {
            match listener.accept() {
                Ok((stream, _addr)) => {
                    telemetry::counter_add(CounterId::IpcAccepted, 1);
                    if let Err(TrySendError::Full(dropped)) = tx.try_send(stream) {
                        // Back-pressure beats head-of-line blocking: shed
                        // the connection.
                        telemetry::counter_add(CounterId::IpcDropped, 1);
                        tracing::debug!("ipc queue full; dropping connection");
                        drop(dropped);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::error!("ipc accept failed: {e}");
                    break;
                }
            }
        }
    }
    // Dropping the sender lets workers drain the queue and exit.
}

/// Compare the live path against the inode/device we bound.
fn socket_stolen(path: &Path, identity: (u64, u64)) -> bool {
    match std::fs::symlink_metadata(path) {
        Ok(meta) => !meta.file_type().is_socket() || (meta.dev(), meta.ino()) != identity,
        Err(_) => true,
    }
}

fn worker_loop(rx: Receiver<UnixStream>, handler: Arc<dyn RequestHandler>, shutdown: Arc<Shutdown>) {
    // A client hangup mid-write must surface as EPIPE, not kill the
    // process.
    let mut sigpipe = SigSet::empty();
    sigpipe.add(Signal::SIGPIPE);
    if let Err(e) = pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&sigpipe), None) {
        tracing::warn!("unable to block SIGPIPE on worker: {e}");
    }

    while let Ok(stream) = rx.recv() {
        if let Err(e) = serve_one(stream, handler.as_ref(), &shutdown) {
            tracing::debug!("ipc exchange aborted: {e}");
        }
    }
}

fn serve_one(
    stream: UnixStream,
    handler: &dyn RequestHandler,
    shutdown: &Arc<Shutdown>,
) -> Result<(), IpcError> {
    // Clients that connected and went away again never become readable;
    // shed them quietly.
    let mut fds = [PollFd::new(stream.as_fd(), PollFlags::POLLIN)];
    match poll(&mut fds, PollTimeout::from(WORKER_READABLE_TIMEOUT_MS)) {
        Ok(0) => return Ok(()),
        Ok(_) => {}
        Err(nix::errno::Errno::EINTR) => return Ok(()),
        Err(e) => return Err(IpcError::Io(io::Error::from(e))),
    }

    stream.set_nonblocking(false)?;

    let mut reader = PacketReader::new(stream.try_clone()?);
    let request = read_message(&mut reader)?;
    if request.is_empty() {
        return Ok(());
    }

    let _t = telemetry::timer(TimerId::IpcRequest);
    telemetry::counter_add(CounterId::IpcRequests, 1);

    let mut writer = stream;
    let flow = {
        let mut reply = Reply { out: &mut writer };
        handler.handle(&request, &mut reply)
    };
    write_flush(&mut writer)?;
    writer.flush()?;

    if flow == Flow::Quit {
        shutdown.fire();
    }
    Ok(())
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
