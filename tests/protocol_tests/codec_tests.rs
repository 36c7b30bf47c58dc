//! Codec Tests
//!
//! Tests for operation and response encoding/decoding.

use std::io::Cursor;

use bytes::{BufMut, Bytes, BytesMut};
use kvserver::protocol::{
    decode_operation, decode_response, encode_operation, encode_response, read_operation,
    read_response, write_operation, write_response, Operation, Reply, Response, Status,
    MAX_PAYLOAD_SIZE, REQUEST_HEADER_SIZE, RESPONSE_HEADER_SIZE,
};
use kvserver::KvError;

// =============================================================================
// Operation Encoding/Decoding Tests
// =============================================================================

#[test]
fn test_encode_decode_get() {
    let op = Operation::get("hello");
    let encoded = encode_operation(&op);
    let decoded = decode_operation(&encoded).unwrap();

    match decoded {
        Operation::Get { key } => assert_eq!(key, Bytes::from("hello")),
        _ => panic!("Expected GET operation"),
    }
}

#[test]
fn test_encode_decode_put() {
    let op = Operation::put("mykey", "myvalue");
    let encoded = encode_operation(&op);
    let decoded = decode_operation(&encoded).unwrap();

    match decoded {
        Operation::Put {
            key,
            value,
            expected,
        } => {
            assert_eq!(key, Bytes::from("mykey"));
            assert_eq!(value, Bytes::from("myvalue"));
            assert_eq!(expected, None);
        }
        _ => panic!("Expected PUT operation"),
    }
}

#[test]
fn test_encode_decode_conditional_put() {
    let op = Operation::Put {
        key: Bytes::from("k"),
        value: Bytes::from("v"),
        expected: Some(7),
    };
    let decoded = decode_operation(&encode_operation(&op)).unwrap();
    assert_eq!(decoded, op);
}

#[test]
fn test_encode_decode_delete() {
    let op = Operation::Delete {
        key: Bytes::from("todelete"),
        expected: Some(3),
    };
    let decoded = decode_operation(&encode_operation(&op)).unwrap();
    assert_eq!(decoded, op);
}

#[test]
fn test_encode_decode_get_when() {
    let op = Operation::GetWhen {
        key: Bytes::from("data"),
        cond_key: Bytes::from("flag"),
        cond_value: Bytes::from("ready"),
    };
    let decoded = decode_operation(&encode_operation(&op)).unwrap();
    assert_eq!(decoded, op);
}

#[test]
fn test_ping_frame_is_header_only() {
    let encoded = encode_operation(&Operation::Ping);
    assert_eq!(encoded.len(), REQUEST_HEADER_SIZE);
    assert_eq!(encoded[0], 0x04);
    assert_eq!(decode_operation(&encoded).unwrap(), Operation::Ping);
}

#[test]
fn test_binary_key_and_empty_value() {
    let op = Operation::Put {
        key: Bytes::from_static(&[0x00, 0xFF, 0x0A]),
        value: Bytes::new(),
        expected: None,
    };
    assert_eq!(decode_operation(&encode_operation(&op)).unwrap(), op);
}

#[test]
fn test_get_wire_layout() {
    let encoded = encode_operation(&Operation::get("ab"));
    assert_eq!(
        encoded.as_ref(),
        &[0x01, 0, 0, 0, 6, 0, 0, 0, 2, b'a', b'b']
    );
}

// =============================================================================
// Malformed Frame Tests
// =============================================================================

#[test]
fn test_unknown_command() {
    let frame = [0x7F, 0, 0, 0, 0];
    assert!(matches!(decode_operation(&frame), Err(KvError::Protocol(_))));
}

#[test]
fn test_incomplete_header() {
    assert!(matches!(
        decode_operation(&[0x01, 0, 0]),
        Err(KvError::Protocol(_))
    ));
}

#[test]
fn test_incomplete_payload() {
    let encoded = encode_operation(&Operation::get("hello"));
    let truncated = &encoded[..encoded.len() - 2];
    assert!(matches!(
        decode_operation(truncated),
        Err(KvError::Protocol(_))
    ));
}

#[test]
fn test_key_length_exceeds_payload() {
    let mut frame = BytesMut::new();
    frame.put_u8(0x01);
    frame.put_u32(6);
    frame.put_u32(100);
    frame.put_slice(b"ab");
    assert!(matches!(decode_operation(&frame), Err(KvError::Protocol(_))));
}

#[test]
fn test_trailing_bytes_rejected() {
    let mut frame = BytesMut::new();
    frame.put_u8(0x01);
    frame.put_u32(7);
    frame.put_u32(2);
    frame.put_slice(b"ab");
    frame.put_u8(0xEE);
    assert!(matches!(decode_operation(&frame), Err(KvError::Protocol(_))));
}

#[test]
fn test_invalid_precondition_flag() {
    let mut frame = BytesMut::new();
    frame.put_u8(0x03);
    frame.put_u32(7);
    frame.put_u32(2);
    frame.put_slice(b"ab");
    frame.put_u8(0x09);
    assert!(matches!(decode_operation(&frame), Err(KvError::Protocol(_))));
}

#[test]
fn test_oversized_payload_rejected() {
    let mut frame = BytesMut::new();
    frame.put_u8(0x02);
    frame.put_u32(MAX_PAYLOAD_SIZE + 1);

    // The length is refused before any payload is read
    let mut cursor = Cursor::new(frame.to_vec());
    assert!(matches!(
        read_operation(&mut cursor),
        Err(KvError::Protocol(_))
    ));
}

// =============================================================================
// Response Encoding/Decoding Tests
// =============================================================================

#[test]
fn test_encode_decode_value_response() {
    let response: Response = Reply::Value {
        value: Bytes::from("world"),
        version: 4,
    }
    .into();
    let encoded = encode_response(&response);
    assert_eq!(encoded.len(), RESPONSE_HEADER_SIZE + 5);

    let decoded = decode_response(&encoded).unwrap();
    assert_eq!(decoded.status, Status::Value);
    assert_eq!(decoded.version, 4);
    assert_eq!(decoded.payload, Bytes::from("world"));
}

#[test]
fn test_conflict_carries_actual_version() {
    let response: Response = Reply::VersionConflict { actual: 9 }.into();
    let decoded = decode_response(&encode_response(&response)).unwrap();

    assert_eq!(decoded.status, Status::Conflict);
    assert_eq!(
        Reply::try_from(decoded).unwrap(),
        Reply::VersionConflict { actual: 9 }
    );
}

#[test]
fn test_error_response_message() {
    let decoded = decode_response(&encode_response(&Response::error("bad things"))).unwrap();
    assert_eq!(
        Reply::try_from(decoded).unwrap(),
        Reply::Error("bad things".to_string())
    );
}

#[test]
fn test_session_frames_are_not_replies() {
    let ready = decode_response(&encode_response(&Response::ready(12))).unwrap();
    assert_eq!(ready.status, Status::Ready);
    assert_eq!(ready.version, 12);
    assert!(matches!(Reply::try_from(ready), Err(KvError::Protocol(_))));

    let saturated = decode_response(&encode_response(&Response::pool_saturated())).unwrap();
    assert_eq!(saturated.status, Status::PoolSaturated);
    assert!(Reply::try_from(saturated).is_err());
}

#[test]
fn test_unknown_status() {
    let mut frame = vec![0x42];
    frame.extend_from_slice(&[0u8; 12]);
    assert!(matches!(decode_response(&frame), Err(KvError::Protocol(_))));
}

// =============================================================================
// Stream I/O Tests
// =============================================================================

#[test]
fn test_stream_operations_in_order() {
    let ops = vec![
        Operation::put("a", "1"),
        Operation::get("a"),
        Operation::delete("a"),
        Operation::Ping,
    ];

    let mut buf = Vec::new();
    for op in &ops {
        write_operation(&mut buf, op).unwrap();
    }

    let mut cursor = Cursor::new(buf);
    for op in &ops {
        assert_eq!(&read_operation(&mut cursor).unwrap(), op);
    }

    // Clean end of stream
    let eof = read_operation(&mut cursor).unwrap_err();
    assert!(eof.is_disconnect());
}

#[test]
fn test_stream_responses() {
    let mut buf = Vec::new();
    write_response(&mut buf, &Reply::Written { version: 1 }.into()).unwrap();
    write_response(&mut buf, &Reply::NotFound.into()).unwrap();

    let mut cursor = Cursor::new(buf);
    let first = Reply::try_from(read_response(&mut cursor).unwrap()).unwrap();
    let second = Reply::try_from(read_response(&mut cursor).unwrap()).unwrap();

    assert_eq!(first, Reply::Written { version: 1 });
    assert_eq!(second, Reply::NotFound);
}
