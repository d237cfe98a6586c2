// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use fusemod_proto::*;

fn request_payload(frame: &[u8]) -> &[u8] {
    let header = decode_header(frame).expect("request header");
    decode_and_validate(frame, header.payload_len).expect("valid frame")
}

#[test]
fn test_frame_roundtrip_all_message_types() {
    let max_chunk = WriteNotification::max_chunk(0).unwrap();
    let payloads: Vec<Vec<u8>> = vec![
        Vec::new(),
        b"/a".to_vec(),
        (0..=255u8).collect(),
        vec![0xAB; max_chunk],
    ];

    for msg_type in 0..=9u16 {
        for payload in &payloads {
            let frame = encode_request(msg_type, payload).expect("encode");
            let header = decode_header(&frame).expect("header");
            assert_eq!(header.msg_type, msg_type);
            assert_eq!(header.payload_len as usize, payload.len());
            assert_eq!(decode_and_validate(&frame, header.payload_len).unwrap(), &payload[..]);
        }
    }
}

#[test]
fn test_every_encoded_frame_validates() {
    for len in [0usize, 1, 17, 1024, MAX_PAYLOAD_LEN] {
        let payload = vec![0x5A; len];
        let frame = encode(7, &payload).unwrap();
        assert!(frame.len() <= MAX_FRAME_SIZE);
        let header = decode_header_as(FrameRole::Response, &frame).unwrap();
        assert!(decode_and_validate(&frame, header.payload_len).is_ok());
    }
}

#[test]
fn test_crc_field_corruption_is_rejected() {
    let frame = encode_request(1, b"/dir").unwrap();
    let crc_at = frame.len() - 4;
    for bit in 0..16 {
        let mut corrupted = frame.clone();
        corrupted[crc_at + bit / 8] ^= 1 << (bit % 8);
        let err = decode_and_validate(&corrupted, 4).unwrap_err();
        assert!(matches!(err, FrameError::CrcMismatch { .. }));
        assert_eq!(err.code(), ErrorCode::CrcMismatch);
    }
}

#[test]
fn test_payload_corruption_is_rejected() {
    let mut frame = encode_request(1, b"/dir").unwrap();
    frame[HEADER_LEN + 1] = b'x';
    assert!(matches!(decode_and_validate(&frame, 4), Err(FrameError::CrcMismatch { .. })));
}

#[test]
fn test_bad_trailer_is_invalid_packet() {
    let mut frame = encode_request(1, b"/dir").unwrap();
    let last = frame.len() - 1;
    frame[last] = 0x00;
    let err = decode_and_validate(&frame, 4).unwrap_err();
    assert!(matches!(err, FrameError::BadTrailer(_)));
    assert_eq!(err.code(), ErrorCode::InvalidPacket);
}

#[test]
fn test_length_inconsistency_is_invalid_packet() {
    let frame = encode_request(1, b"/dir").unwrap();
    let err = decode_and_validate(&frame, 3).unwrap_err();
    assert!(matches!(err, FrameError::LengthMismatch { .. }));
    assert_eq!(err.code(), ErrorCode::InvalidPacket);
}

#[test]
fn test_parse_mkdir_and_deletes() {
    let frame = encode_request(1, b"/a/b").unwrap();
    assert_eq!(
        parse_command(1, request_payload(&frame)).unwrap(),
        Command::MakeDir { path: b"/a/b" }
    );
    assert_eq!(parse_command(3, b"/a").unwrap(), Command::RemoveDir { path: b"/a" });
    assert_eq!(parse_command(4, b"/f").unwrap(), Command::RemoveFile { path: b"/f" });

    for msg_type in [1u16, 3, 4] {
        let err = parse_command(msg_type, b"").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidPath);
    }
}

#[test]
fn test_parse_mkfile_layout() {
    let flags = CapabilityFlags::READABLE | CapabilityFlags::WRITABLE;
    let payload = Command::MakeFile {
        flags,
        path: b"/a/b",
    }
    .encode_payload();
    assert_eq!(payload.len(), 6 + 4);
    assert_eq!(
        parse_command(2, &payload).unwrap(),
        Command::MakeFile {
            flags,
            path: b"/a/b"
        }
    );

    // Declared path length must account for every trailing byte
    let mut padded = payload.clone();
    padded.push(0);
    assert_eq!(parse_command(2, &padded).unwrap_err().code(), ErrorCode::InvalidPacket);
    assert_eq!(parse_command(2, &payload[..5]).unwrap_err().code(), ErrorCode::InvalidPacket);
}

#[test]
fn test_mkfile_keeps_unknown_flag_bits() {
    let mut payload = Vec::new();
    payload.extend_from_slice(&(0x8000_0001u32).to_le_bytes());
    payload.extend_from_slice(&2u16.to_le_bytes());
    payload.extend_from_slice(b"/x");
    match parse_command(2, &payload).unwrap() {
        Command::MakeFile { flags, .. } => {
            assert!(flags.readable());
            assert!(!flags.writable());
            assert_eq!(flags.bits(), 0x8000_0001);
        }
        other => panic!("unexpected command: {:?}", other),
    }
}

#[test]
fn test_parse_content_commands() {
    let payload = Command::SetContent {
        path: b"/a/b",
        content: b"hello",
    }
    .encode_payload();
    assert_eq!(payload.len(), 4 + 4 + 5);
    assert_eq!(
        parse_command(5, &payload).unwrap(),
        Command::SetContent {
            path: b"/a/b",
            content: b"hello"
        }
    );
    assert_eq!(
        parse_command(6, &payload).unwrap(),
        Command::AppendContent {
            path: b"/a/b",
            content: b"hello"
        }
    );

    assert_eq!(parse_command(5, &payload[..3]).unwrap_err().code(), ErrorCode::InvalidPacket);
    assert_eq!(
        parse_command(5, &payload[..payload.len() - 1]).unwrap_err().code(),
        ErrorCode::InvalidPacket
    );

    // path_len pointing past the end of the payload
    let bogus = [0xff, 0x00, 0x00, 0x00];
    assert_eq!(parse_command(6, &bogus).unwrap_err().code(), ErrorCode::InvalidPacket);
}

#[test]
fn test_notification_echo_and_unknown_types() {
    assert_eq!(parse_command(7, b"anything").unwrap(), Command::NotifyEcho);
    for msg_type in [0u16, 8, 9, 0xffff] {
        let err = parse_command(msg_type, b"/a").unwrap_err();
        assert_eq!(err, ValidationError::UnknownType(msg_type));
        assert_eq!(err.code(), ErrorCode::InvalidType);
    }
}

#[test]
fn test_notification_payload_roundtrip() {
    let notification = WriteNotification {
        path: b"/a/b".to_vec(),
        content: b"payload".to_vec(),
        offset: 0x0102_0304,
    };
    let payload = notification.encode_payload();
    assert_eq!(payload.len(), 2 + 4 + 2 + 7 + 4);
    assert_eq!(parse_notification(&payload).unwrap(), notification);
    assert!(parse_notification(&payload[..payload.len() - 1]).is_err());
}

#[test]
fn test_notification_chunk_capacity() {
    assert_eq!(WriteNotification::fixed_overhead(4), 10 + 2 + 4 + 2 + 4);
    assert_eq!(WriteNotification::max_chunk(4), Some(3072 - 22));
    assert_eq!(WriteNotification::max_chunk(3072 - 18), None);
    assert_eq!(WriteNotification::max_chunk(3072 - 19), Some(1));
}

#[test]
fn test_error_codes_are_wire_stable() {
    let expected = [
        (ErrorCode::InvalidPath, 1u8),
        (ErrorCode::AlreadyExists, 2),
        (ErrorCode::NotFound, 3),
        (ErrorCode::InvalidOperation, 4),
        (ErrorCode::IoError, 5),
        (ErrorCode::InvalidPacket, 6),
        (ErrorCode::CrcMismatch, 8),
        (ErrorCode::InvalidType, 9),
    ];
    for (code, raw) in expected {
        assert_eq!(code.as_u8(), raw);
        assert_eq!(ErrorCode::from_u8(raw), Some(code));
    }
    assert_eq!(ErrorCode::from_u8(0), None);
    assert_eq!(ErrorCode::from_u8(7), None);
}
