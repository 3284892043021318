// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn type_names_round_trip() {
    for t in [ObjectType::Blob, ObjectType::Tree, ObjectType::Commit, ObjectType::Tag] {
        assert_eq!(ObjectType::from_name(t.name()), Some(t));
    }
    assert_eq!(ObjectType::from_name("blobby"), None);
    assert_eq!(ObjectType::from_name(""), None);
    assert_eq!(ObjectType::from_name("Blob"), None);
}

#[test]
fn header_encoding_is_canonical() {
    assert_eq!(format_header(ObjectType::Blob, 0), b"blob 0\0");
    assert_eq!(format_header(ObjectType::Commit, 1234), b"commit 1234\0");
    assert_eq!(format_header(ObjectType::Tree, 7), b"tree 7\0");
}

#[test]
fn unknown_type_header_is_carried_verbatim() {
    let hdr = ObjectHeader { type_name: "gnarly".to_string(), size: 3 };
    assert_eq!(hdr.object_type(), None);

    let hdr = ObjectHeader { type_name: "tag".to_string(), size: 3 };
    assert_eq!(hdr.object_type(), Some(ObjectType::Tag));
}
