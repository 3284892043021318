// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Listener thread: drain the event source into the batch ring.

use std::sync::Arc;

use quarry_core::{telemetry, CounterId};
use quarry_ipc::ServerStopper;

use crate::classify::{PathClass, PathClassifier};
use crate::source::{FsEventSource, SourceEvent};
use crate::state::WatcherState;

/// Run until the source stops or a watched root disappears. Each burst
/// becomes at most one published batch.
pub(crate) fn listener_loop(
    mut source: Box<dyn FsEventSource>,
    state: Arc<WatcherState>,
    classifier: PathClassifier,
    server: ServerStopper,
) {
    while let Some(event) = source.next_event() {
        match event {
            SourceEvent::Resync => {
                tracing::warn!("event stream gap; all outstanding tokens invalidated");
                state.force_resync();
            }
            SourceEvent::Burst(paths) => {
                telemetry::counter_add(CounterId::WatcherEvents, paths.len() as u64);
                let mut batch = Vec::new();
                let mut cookies = Vec::new();
                let mut lost_root = false;

                for path in paths {
                    match classifier.classify_absolute(&path) {
                        PathClass::WorkdirPath(rel) if rel.is_empty() => {
                            if !classifier.worktree().is_dir() {
                                lost_root = true;
                            }
                        }
                        PathClass::WorkdirPath(rel) => batch.push(rel),
                        PathClass::IsDotGit | PathClass::IsGitdir => {
                            if !path.exists() {
                                lost_root = true;
                            }
                        }
                        PathClass::InsideDotGitWithCookie(name)
                        | PathClass::InsideGitdirWithCookie(name) => cookies.push(name),
                        PathClass::InsideDotGit
                        | PathClass::InsideGitdir
                        | PathClass::OutsideCone => {}
                    }
                }

                if lost_root {
                    tracing::warn!("watched root is gone; shutting the daemon down");
                    state.wedge_all_cookies();
                    server.stop_async();
                    break;
                }
                if !batch.is_empty() || !cookies.is_empty() {
                    state.publish(batch, cookies);
                }
            }
        }
    }
}
