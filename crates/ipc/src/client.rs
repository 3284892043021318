// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client side: connect (with a startup-race retry budget), exchange one
//! framed request/response, probe a daemon's liveness.

use std::io;
use std::os::unix::fs::FileTypeExt as _;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::pkt::{read_message, write_message, PacketReader};
use crate::IpcError;

/// Total connect budget; retries step every [`WAIT_STEP`].
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const WAIT_STEP: Duration = Duration::from_millis(50);

/// What a trivial connect-and-disconnect learns about a socket path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveState {
    /// A server is accepting connections.
    Listening,
    /// The socket exists but nothing accepts (stale file or dying daemon).
    NotListening,
    /// Nothing at the path at all.
    PathNotFound,
    /// The path exists but is not a socket.
    InvalidPath,
    OtherError,
}

/// Probe `path` without sending anything.
pub fn get_active_state(path: &Path) -> ActiveState {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return ActiveState::PathNotFound,
        Err(_) => return ActiveState::OtherError,
    };
    if !meta.file_type().is_socket() {
        return ActiveState::InvalidPath;
    }
    match UnixStream::connect(path) {
        Ok(_) => ActiveState::Listening,
        Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => ActiveState::NotListening,
        Err(_) => ActiveState::OtherError,
    }
}

/// Retry policy while the daemon may still be starting up.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectOptions {
    /// Retry `ECONNREFUSED` (socket exists, accept queue not up yet).
    pub wait_if_busy: bool,
    /// Retry `ENOENT` (daemon has not created its socket yet).
    pub wait_if_not_found: bool,
}

/// One established exchange channel: owned read and write halves of the
/// same socket.
#[derive(Debug)]
pub struct ClientConnection {
    reader: PacketReader<UnixStream>,
    writer: UnixStream,
}

impl ClientConnection {
    fn new(stream: UnixStream) -> Result<Self, IpcError> {
        let writer = stream.try_clone()?;
        Ok(Self { reader: PacketReader::new(stream), writer })
    }

    /// Send one request and collect the whole response.
    pub fn send_command(&mut self, request: &[u8]) -> Result<Vec<u8>, IpcError> {
        write_message(&mut self.writer, request)?;
        read_message(&mut self.reader)
    }
}

/// Connect to the daemon at `path` within the retry budget.
pub fn try_connect(path: &Path, options: ConnectOptions) -> Result<ClientConnection, IpcError> {
    let deadline = Instant::now() + CONNECT_TIMEOUT;
    loop {
        match UnixStream::connect(path) {
            Ok(stream) => return ClientConnection::new(stream),
            Err(e) => {
                let retry = match e.kind() {
                    io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset => {
                        options.wait_if_busy
                    }
                    io::ErrorKind::NotFound => options.wait_if_not_found,
                    _ => false,
                };
                if !retry {
                    return Err(match e.kind() {
                        io::ErrorKind::ConnectionRefused => {
                            IpcError::NotListening(path.to_path_buf())
                        }
                        io::ErrorKind::NotFound => IpcError::PathNotFound(path.to_path_buf()),
                        _ => IpcError::Io(e),
                    });
                }
                if Instant::now() >= deadline {
                    return Err(IpcError::ConnectTimeout(path.to_path_buf()));
                }
                std::thread::sleep(WAIT_STEP);
            }
        }
    }
}

/// Convenience: connect, send, disconnect.
pub fn send_command(
    path: &Path,
    options: ConnectOptions,
    request: &[u8],
) -> Result<Vec<u8>, IpcError> {
    let mut conn = try_connect(path, options)?;
    conn.send_command(request)
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
