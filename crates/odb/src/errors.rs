// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Object-database errors, grouped by kind rather than by module.

use std::io;
use std::path::PathBuf;

use quarry_core::ObjectId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObjectError {
    /// Absent from every object directory and pack in the chain.
    #[error("object {0} not found")]
    NotFound(ObjectId),

    /// Stored bytes do not decode to the id they are filed under.
    #[error("corrupt object {id}: {detail}")]
    Corrupt { id: ObjectId, detail: String },

    /// A packfile or its index is structurally broken.
    #[error("bad pack {path:?}: {detail}")]
    BadPack { path: PathBuf, detail: String },

    /// Underlying filesystem failure.
    #[error("object database I/O on {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A shared-file lock could not be taken or committed.
    #[error(transparent)]
    Lock(#[from] quarry_core::LockError),
}

impl ObjectError {
    pub(crate) fn corrupt(id: &ObjectId, detail: impl Into<String>) -> Self {
        ObjectError::Corrupt { id: *id, detail: detail.into() }
    }

    pub(crate) fn bad_pack(path: &std::path::Path, detail: impl Into<String>) -> Self {
        ObjectError::BadPack { path: path.to_path_buf(), detail: detail.into() }
    }

    pub(crate) fn io(path: &std::path::Path, source: io::Error) -> Self {
        ObjectError::Io { path: path.to_path_buf(), source }
    }

    /// Whether a facade-level retry may still find the object elsewhere.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ObjectError::NotFound(_))
    }
}
