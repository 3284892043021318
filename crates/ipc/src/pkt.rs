// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Packet-line framing.
//!
//! Every frame is four lowercase hex digits giving the total length
//! (header plus payload) followed by the payload. Three zero-payload
//! sentinels punctuate streams: `0000` flush, `0001` delim, `0002`
//! response-end.

use std::io::{self, Read, Write};

use crate::IpcError;

/// Largest payload one frame can carry.
pub const MAX_PAYLOAD: usize = 65520;

const HEADER_LEN: usize = 4;

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Normal(Vec<u8>),
    Flush,
    Delim,
    ResponseEnd,
    /// Clean end of input between frames.
    Eof,
}

/// Write one payload frame. The payload must fit a single frame.
pub fn write_packet(out: &mut dyn Write, payload: &[u8]) -> Result<(), IpcError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(IpcError::TooLarge(payload.len()));
    }
    let header = format!("{:04x}", payload.len() + HEADER_LEN);
    out.write_all(header.as_bytes())?;
    out.write_all(payload)?;
    Ok(())
}

/// Split arbitrarily long data across as many frames as needed.
pub fn write_packets(out: &mut dyn Write, data: &[u8]) -> Result<(), IpcError> {
    for chunk in data.chunks(MAX_PAYLOAD) {
        write_packet(out, chunk)?;
    }
    Ok(())
}

pub fn write_flush(out: &mut dyn Write) -> Result<(), IpcError> {
    out.write_all(b"0000")?;
    Ok(())
}

pub fn write_delim(out: &mut dyn Write) -> Result<(), IpcError> {
    out.write_all(b"0001")?;
    Ok(())
}

pub fn write_response_end(out: &mut dyn Write) -> Result<(), IpcError> {
    out.write_all(b"0002")?;
    Ok(())
}

/// Send one complete message: payload frames, then the flush.
pub fn write_message(out: &mut dyn Write, data: &[u8]) -> Result<(), IpcError> {
    write_packets(out, data)?;
    write_flush(out)?;
    out.flush()?;
    Ok(())
}

/// Frame decoder with single-packet lookahead.
#[derive(Debug)]
pub struct PacketReader<R: Read> {
    inner: R,
    peeked: Option<Packet>,
}

impl<R: Read> PacketReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, peeked: None }
    }

    /// Look at the next frame without consuming it.
    pub fn peek(&mut self) -> Result<&Packet, IpcError> {
        if self.peeked.is_none() {
            self.peeked = Some(self.read_raw()?);
        }
        match &self.peeked {
            Some(p) => Ok(p),
            None => Err(IpcError::Truncated),
        }
    }

    /// Consume and return the next frame.
    pub fn read_packet(&mut self) -> Result<Packet, IpcError> {
        if let Some(p) = self.peeked.take() {
            return Ok(p);
        }
        self.read_raw()
    }

    fn read_raw(&mut self) -> Result<Packet, IpcError> {
        let mut header = [0u8; HEADER_LEN];
        match read_exact_or_eof(&mut self.inner, &mut header)? {
            ReadOutcome::Eof => return Ok(Packet::Eof),
            ReadOutcome::Partial => return Err(IpcError::Truncated),
            ReadOutcome::Full => {}
        }
        let text = std::str::from_utf8(&header)
            .map_err(|_| IpcError::InvalidLength(format!("{header:?}")))?;
        let len = usize::from_str_radix(text, 16)
            .map_err(|_| IpcError::InvalidLength(text.to_string()))?;
        match len {
            0 => return Ok(Packet::Flush),
            1 => return Ok(Packet::Delim),
            2 => return Ok(Packet::ResponseEnd),
            3 => return Err(IpcError::InvalidLength(text.to_string())),
            _ => {}
        }
        if len > MAX_PAYLOAD + HEADER_LEN {
            return Err(IpcError::TooLarge(len));
        }
        let mut payload = vec![0u8; len - HEADER_LEN];
        self.inner
            .read_exact(&mut payload)
            .map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => IpcError::Truncated,
                _ => IpcError::Io(e),
            })?;
        Ok(Packet::Normal(payload))
    }
}

enum ReadOutcome {
    Full,
    Partial,
    Eof,
}

/// Fill `buf`, distinguishing clean EOF at a frame boundary from a torn
/// header.
fn read_exact_or_eof(r: &mut dyn Read, buf: &mut [u8]) -> Result<ReadOutcome, IpcError> {
    let mut filled = 0usize;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => {
                return Ok(if filled == 0 { ReadOutcome::Eof } else { ReadOutcome::Partial })
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(IpcError::Io(e)),
        }
    }
    Ok(ReadOutcome::Full)
}

/// Collect payload frames until a flush. A clean EOF also ends the message
/// (a quitting server sends nothing at all).
pub fn read_message<R: Read>(reader: &mut PacketReader<R>) -> Result<Vec<u8>, IpcError> {
    let mut out = Vec::new();
    loop {
        match reader.read_packet()? {
            Packet::Normal(mut payload) => out.append(&mut payload),
            Packet::Flush | Packet::Eof => return Ok(out),
            Packet::Delim | Packet::ResponseEnd => continue,
        }
    }
}

#[cfg(test)]
#[path = "pkt_tests.rs"]
mod tests;
