// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Constant-time pathname classification.
//!
//! Clients only ever hear about paths inside the working directory proper.
//! The daemon uses the `.git`/gitdir classes internally: deletion of either
//! shuts the daemon down, and the cookie-prefixed classes drive the query
//! rendezvous. The daemon never reads the index and keeps no index-relative
//! state; it only collects modified workdir paths.

use std::path::{Path, PathBuf};

use crate::COOKIE_DIR;

/// Where one observed pathname falls relative to the watched cone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathClass {
    /// Inside the working directory proper; the worktree-relative path.
    WorkdirPath(String),
    /// Exactly the `.git` entry of the worktree.
    IsDotGit,
    InsideDotGit,
    InsideDotGitWithCookie(String),
    /// Exactly the external gitdir of a linked worktree.
    IsGitdir,
    InsideGitdir,
    InsideGitdirWithCookie(String),
    OutsideCone,
}

/// Precomputed prefixes for classifying absolute event paths.
pub struct PathClassifier {
    worktree: PathBuf,
    gitdir: PathBuf,
    gitdir_in_worktree: bool,
}

impl PathClassifier {
    pub fn new(worktree: &Path, gitdir: &Path) -> PathClassifier {
        PathClassifier {
            worktree: worktree.to_path_buf(),
            gitdir: gitdir.to_path_buf(),
            gitdir_in_worktree: gitdir.starts_with(worktree),
        }
    }

    pub fn worktree(&self) -> &Path {
        &self.worktree
    }

    pub fn gitdir(&self) -> &Path {
        &self.gitdir
    }

    /// Classify an absolute pathname from a filesystem event.
    pub fn classify_absolute(&self, path: &Path) -> PathClass {
        if let Ok(rel) = path.strip_prefix(&self.worktree) {
            return self.classify_workdir_relative(rel);
        }
        if !self.gitdir_in_worktree {
            if let Ok(rel) = path.strip_prefix(&self.gitdir) {
                return Self::classify_gitdir_relative(rel);
            }
        }
        PathClass::OutsideCone
    }

    /// Classify a path relative to the worktree root.
    pub fn classify_workdir_relative(&self, rel: &Path) -> PathClass {
        if rel.as_os_str().is_empty() {
            return PathClass::WorkdirPath(String::new());
        }
        match rel.strip_prefix(".git") {
            Err(_) => PathClass::WorkdirPath(rel.to_string_lossy().into_owned()),
            Ok(inner) if inner.as_os_str().is_empty() => PathClass::IsDotGit,
            Ok(inner) => match Self::cookie_name(inner) {
                Some(name) => PathClass::InsideDotGitWithCookie(name),
                None => PathClass::InsideDotGit,
            },
        }
    }

    /// Classify a path relative to an external gitdir.
    pub fn classify_gitdir_relative(rel: &Path) -> PathClass {
        if rel.as_os_str().is_empty() {
            return PathClass::IsGitdir;
        }
        match Self::cookie_name(rel) {
            Some(name) => PathClass::InsideGitdirWithCookie(name),
            None => PathClass::InsideGitdir,
        }
    }

    /// The cookie filename, when `rel` (gitdir-relative) is under the
    /// cookie directory.
    fn cookie_name(rel: &Path) -> Option<String> {
        let inner = rel.strip_prefix(COOKIE_DIR).ok()?;
        if inner.as_os_str().is_empty() {
            return None;
        }
        Some(inner.to_string_lossy().into_owned())
    }
}

#[cfg(test)]
#[path = "classify_tests.rs"]
mod tests;
