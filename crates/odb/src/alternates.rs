// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `info/alternates` loading.
//!
//! Each object directory may name further object directories to search.
//! Entries de-duplicate by normalized path (which also breaks reference
//! cycles), missing directories warn rather than fail, and recursion stops
//! at a fixed depth budget.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use quarry_core::normalize_path;

/// Recursion budget for nested `info/alternates` files.
pub(crate) const MAX_ALTERNATE_DEPTH: usize = 5;

/// Load `objdir`'s alternates (recursively) into `out`, skipping anything
/// already in `seen`. `seen` holds normalized paths and must already
/// contain every known object directory, the primary included.
pub(crate) fn read_alternates(
    objdir: &Path,
    depth: usize,
    seen: &mut HashSet<PathBuf>,
    out: &mut Vec<PathBuf>,
) {
    let file = objdir.join("info").join("alternates");
    let content = match std::fs::read_to_string(&file) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
        Err(e) => {
            tracing::warn!("unable to read {file:?}: {e}");
            return;
        }
    };
    link_alt_odb_entries(&content, objdir, depth, seen, out);
}

fn link_alt_odb_entries(
    content: &str,
    relative_base: &Path,
    depth: usize,
    seen: &mut HashSet<PathBuf>,
    out: &mut Vec<PathBuf>,
) {
    if depth == 0 {
        tracing::warn!(
            "alternate object directories nest deeper than {MAX_ALTERNATE_DEPTH}; \
             ignoring the rest of the chain under {relative_base:?}"
        );
        return;
    }
    for line in content.lines() {
        let Some(entry) = parse_alt_odb_line(line) else {
            continue;
        };
        let path = PathBuf::from(entry);
        let absolute = if path.is_absolute() { path } else { relative_base.join(path) };
        let normalized = normalize_path(&absolute);

        if !seen.insert(normalized.clone()) {
            // Duplicate or cycle back into a known directory.
            continue;
        }
        if !normalized.is_dir() {
            tracing::warn!("ignoring nonexistent alternate object directory {normalized:?}");
            continue;
        }
        out.push(normalized.clone());
        read_alternates(&normalized, depth - 1, seen, out);
    }
}

/// One line of an alternates file: `#` comments and blank lines yield
/// nothing; a leading quote means a C-escaped string.
fn parse_alt_odb_line(line: &str) -> Option<String> {
    let line = line.trim_end_matches('\r');
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    if let Some(rest) = line.strip_prefix('"') {
        return unquote_c_style(rest);
    }
    Some(line.to_string())
}

/// Unquote the remainder of a C-quoted string (opening quote already
/// stripped). Returns `None` on malformed input.
pub(crate) fn unquote_c_style(rest: &str) -> Option<String> {
    let mut out = String::with_capacity(rest.len());
    let mut chars = rest.chars();
    loop {
        match chars.next()? {
            '"' => return Some(out),
            '\\' => match chars.next()? {
                'a' => out.push('\u{07}'),
                'b' => out.push('\u{08}'),
                'f' => out.push('\u{0c}'),
                'n' => out.push('\n'),
                'r' => out.push('\r'),
                't' => out.push('\t'),
                'v' => out.push('\u{0b}'),
                '\\' => out.push('\\'),
                '"' => out.push('"'),
                d @ '0'..='7' => {
                    // Up to three octal digits.
                    let mut value = d as u32 - '0' as u32;
                    for _ in 0..2 {
                        match chars.clone().next() {
                            Some(o @ '0'..='7') => {
                                value = value * 8 + (o as u32 - '0' as u32);
                                chars.next();
                            }
                            _ => break,
                        }
                    }
                    out.push(char::from_u32(value)?);
                }
                _ => return None,
            },
            c => out.push(c),
        }
    }
}

#[cfg(test)]
#[path = "alternates_tests.rs"]
mod tests;
