// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Watcher daemon specs: a live daemon over a temporary worktree.
//!
//! The cookie rendezvous makes these deterministic: a query issued after
//! a write must observe that write, with no sleeps or retries.

use super::prelude::{start_daemon, Worktree};
use quarry_daemon::client;
use quarry_ipc::ActiveState;
use serial_test::serial;

#[test]
#[serial]
fn a_created_file_shows_up_in_the_first_query() {
    let wt = Worktree::new();
    let daemon = start_daemon(&wt);

    wt.write("a.txt", b"hello");

    let reply = client::query(daemon.gitdir(), "").expect("query");
    assert!(!reply.trivial);
    assert!(
        reply.paths.iter().any(|p| p == "a.txt"),
        "a.txt missing from {:?}",
        reply.paths
    );

    // Immediately re-querying with the returned token: nothing new, same
    // token.
    let again = client::query(daemon.gitdir(), &reply.token).expect("requery");
    assert!(!again.trivial);
    assert!(again.paths.is_empty(), "unexpected paths {:?}", again.paths);
    assert_eq!(again.token, reply.token);

    assert!(daemon.shutdown(), "daemon must unwind cleanly");
}

#[test]
#[serial]
fn tokens_are_monotonic_across_batches() {
    let wt = Worktree::new();
    let daemon = start_daemon(&wt);

    wt.write("first.txt", b"1");
    let t1 = client::query(daemon.gitdir(), "").expect("first query");
    assert!(t1.paths.iter().any(|p| p == "first.txt"));

    wt.write("second.txt", b"2");
    let t2 = client::query(daemon.gitdir(), &t1.token).expect("second query");
    assert!(!t2.trivial);
    assert!(t2.paths.iter().any(|p| p == "second.txt"));
    assert!(!t2.paths.iter().any(|p| p == "first.txt"), "old batch must not repeat");

    // A bootstrap query still sees the union of both batches.
    let all = client::query(daemon.gitdir(), "").expect("union query");
    assert!(all.paths.iter().any(|p| p == "first.txt"));
    assert!(all.paths.iter().any(|p| p == "second.txt"));
}

#[test]
#[serial]
fn changes_inside_the_gitdir_are_not_reported() {
    let wt = Worktree::new();
    let daemon = start_daemon(&wt);

    wt.write(".git/SOMEFILE", b"internal");
    wt.write("visible.txt", b"external");

    let reply = client::query(daemon.gitdir(), "").expect("query");
    assert!(reply.paths.iter().any(|p| p == "visible.txt"));
    assert!(
        !reply.paths.iter().any(|p| p.contains("SOMEFILE")),
        "gitdir internals leaked: {:?}",
        reply.paths
    );
}

#[test]
#[serial]
fn flush_invalidates_every_outstanding_token() {
    let wt = Worktree::new();
    let daemon = start_daemon(&wt);

    wt.write("before.txt", b"x");
    let before = client::query(daemon.gitdir(), "").expect("query");
    assert!(!before.trivial);

    client::flush(daemon.gitdir()).expect("flush");

    let after = client::query(daemon.gitdir(), &before.token).expect("stale query");
    assert!(after.trivial, "stale tokens get the trivial rescan answer");
    assert_ne!(after.token, before.token);
}

#[test]
#[serial]
fn stop_ends_the_daemon_and_clears_the_socket() {
    let wt = Worktree::new();
    let daemon = start_daemon(&wt);
    let gitdir = daemon.gitdir().to_path_buf();

    assert_eq!(client::status(&gitdir), ActiveState::Listening);
    assert!(daemon.shutdown(), "run() must return Ok on a clean stop");
    assert_eq!(client::status(&gitdir), ActiveState::PathNotFound);
}

#[test]
#[serial]
fn second_daemon_for_the_same_worktree_is_refused() {
    let wt = Worktree::new();
    let daemon = start_daemon(&wt);

    let config = quarry_daemon::DaemonConfig::discover(wt.path()).expect("discover");
    let err = quarry_daemon::run(&config).expect_err("second daemon must not start");
    assert!(matches!(err, quarry_daemon::WatchError::AlreadyRunning(_)));

    drop(daemon);
}
