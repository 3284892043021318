// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.
//!
//! Every knob parses fail-soft: an unset or malformed value falls back to
//! its default.

use std::time::Duration;

/// Worker-pool size override (`QUARRY_IPC_THREADS`). Defaults to the
/// available parallelism.
pub fn ipc_threads() -> Option<usize> {
    std::env::var("QUARRY_IPC_THREADS")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|n| *n > 0)
}

/// How long a query waits for its cookie to be observed
/// (`QUARRY_COOKIE_TIMEOUT_MS`, default 5s).
pub fn cookie_timeout() -> Duration {
    std::env::var("QUARRY_COOKIE_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(5))
}

/// How long `stop` polls for the daemon to leave the listening state
/// (`QUARRY_STOP_TIMEOUT_MS`, default 10s).
pub fn stop_timeout() -> Duration {
    std::env::var("QUARRY_STOP_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(10))
}

/// Health-check tick interval (`QUARRY_HEALTH_INTERVAL_MS`, default 5s).
pub fn health_interval() -> Duration {
    std::env::var("QUARRY_HEALTH_INTERVAL_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(5))
}
