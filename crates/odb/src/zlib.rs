// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Thin incremental-inflate wrapper over flate2's raw `Decompress`.
//!
//! The loose codec, pack reader and streaming layer all inflate from an
//! in-memory window (usually an mmap) into caller-sized buffers, tracking
//! consumed input so trailing garbage can be detected.

use flate2::{Decompress, FlushDecompress, Status};

/// Incremental inflater over a borrowed input window.
pub(crate) struct Inflater {
    z: Decompress,
    pos: usize,
    done: bool,
}

/// One inflate step's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// Bytes were produced (possibly zero, when the output window is full).
    Produced(usize),
    /// The deflate stream reached its end; the count is the final bytes
    /// produced by this step.
    End(usize),
}

impl Inflater {
    pub fn new() -> Self {
        Self { z: Decompress::new(true), pos: 0, done: false }
    }

    /// Byte offset of the first unconsumed input byte.
    pub fn consumed(&self) -> usize {
        self.pos
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Inflate from `input[consumed..]` into `out`. `Err(())` is a corrupt
    /// stream; the caller attaches context.
    pub fn step(&mut self, input: &[u8], out: &mut [u8]) -> Result<Step, ()> {
        if self.done {
            return Ok(Step::End(0));
        }
        let before_in = self.z.total_in();
        let before_out = self.z.total_out();
        let status = self
            .z
            .decompress(&input[self.pos..], out, FlushDecompress::None)
            .map_err(|_| ())?;
        self.pos += (self.z.total_in() - before_in) as usize;
        let produced = (self.z.total_out() - before_out) as usize;
        match status {
            Status::StreamEnd => {
                self.done = true;
                Ok(Step::End(produced))
            }
            Status::Ok => Ok(Step::Produced(produced)),
            Status::BufError => {
                // No progress is only legal while the output window is
                // full; anything else (typically exhausted input without a
                // StreamEnd) is a truncated or stuck stream.
                if produced == 0 && !out.is_empty() {
                    Err(())
                } else {
                    Ok(Step::Produced(produced))
                }
            }
        }
    }
}
