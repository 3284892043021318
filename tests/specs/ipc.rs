// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! IPC transport specs: a real server on a real socket.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use quarry_ipc::{
    get_active_state, send_command, ActiveState, ConnectOptions, Flow, Reply, RequestHandler,
    Server, ServerOptions, MAX_PAYLOAD,
};

struct Reverser {
    exchanges: AtomicUsize,
}

impl RequestHandler for Reverser {
    fn handle(&self, request: &[u8], reply: &mut Reply<'_>) -> Flow {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        if request == b"quit" {
            return Flow::Quit;
        }
        let reversed: Vec<u8> = request.iter().rev().copied().collect();
        let _ = reply.send(&reversed);
        Flow::Continue
    }
}

#[test]
fn a_daemon_lifecycle_on_a_fresh_socket() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("daemon.ipc");
    assert_eq!(get_active_state(&path), ActiveState::PathNotFound);

    let handler = Arc::new(Reverser { exchanges: AtomicUsize::new(0) });
    let server =
        Server::bind(&path, Arc::clone(&handler) as Arc<dyn RequestHandler>, ServerOptions { nr_threads: 2 }).unwrap();
    assert_eq!(get_active_state(&path), ActiveState::Listening);

    let wait = ConnectOptions { wait_if_busy: true, ..ConnectOptions::default() };
    assert_eq!(send_command(&path, wait, b"abc").unwrap(), b"cba");

    // Requests and responses larger than one frame survive intact.
    let big: Vec<u8> = (0..MAX_PAYLOAD + 11).map(|i| (i % 251) as u8).collect();
    let reversed = send_command(&path, wait, &big).unwrap();
    let expect: Vec<u8> = big.iter().rev().copied().collect();
    assert_eq!(reversed, expect);

    // quit: empty response, then the server unwinds and removes the
    // socket.
    assert_eq!(send_command(&path, wait, b"quit").unwrap(), b"");
    server.join().unwrap();
    assert_eq!(get_active_state(&path), ActiveState::PathNotFound);
    assert_eq!(handler.exchanges.load(Ordering::SeqCst), 3);
}

#[test]
fn each_connection_carries_exactly_one_exchange() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("one-shot.ipc");
    let handler = Arc::new(Reverser { exchanges: AtomicUsize::new(0) });
    let server = Server::bind(&path, Arc::clone(&handler) as Arc<dyn RequestHandler>, ServerOptions::default()).unwrap();

    let wait = ConnectOptions { wait_if_busy: true, ..ConnectOptions::default() };
    for _ in 0..10 {
        assert_eq!(send_command(&path, wait, b"xy").unwrap(), b"yx");
    }
    assert_eq!(handler.exchanges.load(Ordering::SeqCst), 10);
    server.shutdown().unwrap();
}
