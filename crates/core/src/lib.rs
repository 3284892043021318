// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Quarry core primitives.
//!
//! Everything the higher layers share: object ids and the hash-algorithm
//! registry, object types and their canonical header encoding, the JSON
//! writer, thread-local telemetry, lockfiles and path normalization.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod hash;
mod jsonw;
mod lockfile;
mod object;
mod oid;
mod path;
pub mod telemetry;

pub use hash::{HashAlgo, Hasher};
pub use jsonw::JsonWriter;
pub use lockfile::{LockError, Lockfile, DEFAULT_LOCK_TIMEOUT};
pub use object::{format_header, hash_object, ObjectHeader, ObjectType};
pub use oid::{ObjectId, OidError, MAX_RAW_LEN};
pub use path::normalize_path;
pub use telemetry::{CounterId, TimerGuard, TimerId};
