// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::IpcError;

fn reader(bytes: &[u8]) -> PacketReader<&[u8]> {
    PacketReader::new(bytes)
}

#[test]
fn single_packet_encodes_length_plus_payload() {
    let mut out = Vec::new();
    write_packet(&mut out, b"hi").unwrap();
    assert_eq!(out, b"0006hi");
}

#[test]
fn sentinels_have_fixed_encodings() {
    let mut out = Vec::new();
    write_flush(&mut out).unwrap();
    write_delim(&mut out).unwrap();
    write_response_end(&mut out).unwrap();
    assert_eq!(out, b"000000010002");
}

#[test]
fn two_packets_then_flush_round_trip() {
    let mut out = Vec::new();
    write_packet(&mut out, b"first").unwrap();
    write_packet(&mut out, b"second").unwrap();
    write_flush(&mut out).unwrap();

    let mut r = reader(&out);
    assert_eq!(r.read_packet().unwrap(), Packet::Normal(b"first".to_vec()));
    assert_eq!(r.read_packet().unwrap(), Packet::Normal(b"second".to_vec()));
    assert_eq!(r.read_packet().unwrap(), Packet::Flush);
    assert_eq!(r.read_packet().unwrap(), Packet::Eof);
}

#[test]
fn empty_payload_packet_is_legal() {
    let mut out = Vec::new();
    write_packet(&mut out, b"").unwrap();
    assert_eq!(out, b"0004");
    let mut r = reader(&out);
    assert_eq!(r.read_packet().unwrap(), Packet::Normal(Vec::new()));
}

#[test]
fn peek_does_not_consume() {
    let mut out = Vec::new();
    write_packet(&mut out, b"x").unwrap();
    write_flush(&mut out).unwrap();

    let mut r = reader(&out);
    assert_eq!(r.peek().unwrap(), &Packet::Normal(b"x".to_vec()));
    assert_eq!(r.peek().unwrap(), &Packet::Normal(b"x".to_vec()));
    assert_eq!(r.read_packet().unwrap(), Packet::Normal(b"x".to_vec()));
    assert_eq!(r.read_packet().unwrap(), Packet::Flush);
}

#[test]
fn oversized_write_is_refused() {
    let mut out = Vec::new();
    let payload = vec![0u8; MAX_PAYLOAD + 1];
    assert!(matches!(write_packet(&mut out, &payload), Err(IpcError::TooLarge(_))));
    assert!(out.is_empty());
}

#[test]
fn write_packets_splits_at_the_frame_limit() {
    let mut out = Vec::new();
    let payload = vec![b'a'; MAX_PAYLOAD + 7];
    write_packets(&mut out, &payload).unwrap();

    let mut r = reader(&out);
    let first = match r.read_packet().unwrap() {
        Packet::Normal(p) => p,
        other => panic!("expected payload frame, got {other:?}"),
    };
    let second = match r.read_packet().unwrap() {
        Packet::Normal(p) => p,
        other => panic!("expected payload frame, got {other:?}"),
    };
    assert_eq!(first.len(), MAX_PAYLOAD);
    assert_eq!(second.len(), 7);
}

#[yare::parameterized(
    reserved_three = { b"0003".as_slice() },
    not_hex = { b"zzzz".as_slice() },
)]
fn bad_headers_error(bytes: &[u8]) {
    let mut r = reader(bytes);
    assert!(matches!(r.read_packet(), Err(IpcError::InvalidLength(_))));
}

#[test]
fn over_limit_header_errors() {
    // 0xfff8 > MAX_PAYLOAD + 4
    let mut r = reader(b"fff8");
    assert!(matches!(r.read_packet(), Err(IpcError::TooLarge(_))));
}

#[test]
fn torn_header_is_truncation() {
    let mut r = reader(b"00");
    assert!(matches!(r.read_packet(), Err(IpcError::Truncated)));
}

#[test]
fn torn_payload_is_truncation() {
    let mut r = reader(b"0008ab");
    assert!(matches!(r.read_packet(), Err(IpcError::Truncated)));
}

#[test]
fn read_message_concatenates_until_flush() {
    let mut out = Vec::new();
    write_packet(&mut out, b"hello ").unwrap();
    write_packet(&mut out, b"world").unwrap();
    write_flush(&mut out).unwrap();
    write_packet(&mut out, b"next message").unwrap();
    write_flush(&mut out).unwrap();

    let mut r = reader(&out);
    assert_eq!(read_message(&mut r).unwrap(), b"hello world");
    assert_eq!(read_message(&mut r).unwrap(), b"next message");
}

#[test]
fn read_message_is_gentle_on_clean_eof() {
    // A quitting server closes without replying at all.
    let mut r = reader(b"");
    assert_eq!(read_message(&mut r).unwrap(), b"");
}

#[test]
fn uppercase_hex_is_accepted_on_read() {
    let mut r = reader(b"0006hi");
    assert!(matches!(r.read_packet().unwrap(), Packet::Normal(_)));
    let mut r = reader(b"000Ahello!");
    assert_eq!(r.read_packet().unwrap(), Packet::Normal(b"hello!".to_vec()));
}
