// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The object database: content-addressed storage for immutable objects.
//!
//! An [`ObjectStore`] composes a primary object directory with an ordered
//! chain of alternates. Objects live either loose (one deflated file each)
//! or packed (delta-compressed archives with companion indices); lookups
//! fall through pretend cache → packs → loose chain, with optional
//! promisor-remote fetch on final miss.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod alternates;
mod errors;
mod loose;
mod pack;
mod store;
mod stream;
mod zlib;

pub use errors::ObjectError;
pub use loose::{loose_object_path, read_loose, read_loose_any_type, scan_loose, HeaderStatus};
pub use pack::{DeltaBaseCache, PackFile, PackedInfo};
pub use store::{
    LookupFlags, ObjectDir, ObjectInfo, ObjectStore, PromisorFetch, StoreOptions, Whence,
};
pub use stream::{stream_blob_to_writer, ObjectStream};

/// Blobs at or above this size stream instead of materializing.
pub const DEFAULT_BIG_FILE_THRESHOLD: u64 = 512 * 1024 * 1024;

/// Budget for the delta-base reconstruction cache.
pub const DEFAULT_DELTA_CACHE_BYTES: usize = 96 * 1024 * 1024;
