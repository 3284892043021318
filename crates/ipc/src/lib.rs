// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Simple IPC: packet-line framing over local unix sockets.
//!
//! This is the sole wire between short-lived client processes and
//! long-running helper daemons. A request and a response are each a run of
//! payload frames terminated by a flush; the server side is an accept
//! thread feeding a fixed worker pool through a bounded FIFO.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod client;
mod pkt;
mod server;

pub use client::{
    get_active_state, send_command, try_connect, ActiveState, ClientConnection, ConnectOptions,
};
pub use pkt::{
    read_message, write_delim, write_flush, write_message, write_packet, write_packets,
    write_response_end, Packet, PacketReader, MAX_PAYLOAD,
};
pub use server::{Flow, Reply, RequestHandler, Server, ServerOptions, ServerStopper};

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("invalid packet length {0:?}")]
    InvalidLength(String),

    #[error("packet of {0} bytes exceeds the frame limit")]
    TooLarge(usize),

    #[error("connection closed mid-packet")]
    Truncated,

    #[error("no server is listening at {0:?}")]
    NotListening(PathBuf),

    #[error("no socket at {0:?}")]
    PathNotFound(PathBuf),

    #[error("gave up connecting to {0:?}")]
    ConnectTimeout(PathBuf),

    #[error("ipc I/O")]
    Io(#[from] io::Error),
}
