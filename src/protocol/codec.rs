//! Protocol codec
//!
//! Encoding and decoding functions for the wire protocol.
//!
//! ## Wire Format
//!
//! ### Request Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Cmd (1)  │ Len (4)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Payload by Operation Type
//! - GET:     key_len (4) + key
//! - PUT:     key_len (4) + key + precond + value
//! - DELETE:  key_len (4) + key + precond
//! - GETWHEN: key_len (4) + key + cond_len (4) + cond_key + cond_value
//! - PING:    empty
//!
//! `precond` is `0x00` (unconditional) or `0x01` followed by the expected
//! version (8).
//!
//! ### Response Format
//! ```text
//! ┌──────────┬─────────────┬──────────┬─────────────────┐
//! │Status(1) │ Version (8) │ Len (4)  │     Payload     │
//! └──────────┴─────────────┴──────────┴─────────────────┘
//! ```

use std::io::{Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{OpKind, Operation, Response, Status};
use crate::error::{KvError, Result};

/// Request header size: 1 byte command + 4 bytes length
pub const REQUEST_HEADER_SIZE: usize = 5;

/// Response header size: 1 byte status + 8 bytes version + 4 bytes length
pub const RESPONSE_HEADER_SIZE: usize = 13;

/// Maximum payload size (16 MB)
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

const NO_PRECONDITION: u8 = 0x00;
const HAS_PRECONDITION: u8 = 0x01;

// =============================================================================
// Operation Encoding/Decoding
// =============================================================================

/// Encode an operation to bytes
///
/// Format: cmd_type (1) + payload_len (4) + payload
pub fn encode_operation(operation: &Operation) -> Bytes {
    let mut payload = BytesMut::new();

    match operation {
        Operation::Get { key } => {
            put_key(&mut payload, key);
        }
        Operation::Put {
            key,
            value,
            expected,
        } => {
            put_key(&mut payload, key);
            put_precondition(&mut payload, *expected);
            payload.put_slice(value);
        }
        Operation::Delete { key, expected } => {
            put_key(&mut payload, key);
            put_precondition(&mut payload, *expected);
        }
        Operation::GetWhen {
            key,
            cond_key,
            cond_value,
        } => {
            put_key(&mut payload, key);
            put_key(&mut payload, cond_key);
            payload.put_slice(cond_value);
        }
        Operation::Ping => {}
    }

    let mut message = BytesMut::with_capacity(REQUEST_HEADER_SIZE + payload.len());
    message.put_u8(operation.kind() as u8);
    message.put_u32(payload.len() as u32);
    message.put_slice(&payload);
    message.freeze()
}

fn put_key(buf: &mut BytesMut, key: &[u8]) {
    buf.put_u32(key.len() as u32);
    buf.put_slice(key);
}

fn put_precondition(buf: &mut BytesMut, expected: Option<u64>) {
    match expected {
        Some(version) => {
            buf.put_u8(HAS_PRECONDITION);
            buf.put_u64(version);
        }
        None => buf.put_u8(NO_PRECONDITION),
    }
}

/// Decode an operation from a complete frame
pub fn decode_operation(bytes: &[u8]) -> Result<Operation> {
    if bytes.len() < REQUEST_HEADER_SIZE {
        return Err(KvError::Protocol(format!(
            "Incomplete header: expected {} bytes, got {}",
            REQUEST_HEADER_SIZE,
            bytes.len()
        )));
    }

    let cmd_type = bytes[0];
    let payload_len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
    check_payload_len(payload_len)?;

    let total_len = REQUEST_HEADER_SIZE + payload_len;
    if bytes.len() < total_len {
        return Err(KvError::Protocol(format!(
            "Incomplete payload: expected {} bytes, got {}",
            total_len,
            bytes.len()
        )));
    }

    let payload = Bytes::copy_from_slice(&bytes[REQUEST_HEADER_SIZE..total_len]);
    decode_payload(cmd_type, payload)
}

/// Decode the payload of a frame whose header has already been read
fn decode_payload(cmd_type: u8, mut payload: Bytes) -> Result<Operation> {
    let kind = OpKind::from_byte(cmd_type).ok_or_else(|| {
        KvError::Protocol(format!("Unknown command type: 0x{:02x}", cmd_type))
    })?;

    let operation = match kind {
        OpKind::Get => Operation::Get {
            key: take_key(&mut payload, kind)?,
        },
        OpKind::Put => {
            let key = take_key(&mut payload, kind)?;
            let expected = take_precondition(&mut payload, kind)?;
            Operation::Put {
                key,
                value: payload.split_off(0),
                expected,
            }
        }
        OpKind::Delete => {
            let key = take_key(&mut payload, kind)?;
            let expected = take_precondition(&mut payload, kind)?;
            Operation::Delete { key, expected }
        }
        OpKind::GetWhen => {
            let key = take_key(&mut payload, kind)?;
            let cond_key = take_key(&mut payload, kind)?;
            Operation::GetWhen {
                key,
                cond_key,
                cond_value: payload.split_off(0),
            }
        }
        OpKind::Ping => Operation::Ping,
    };

    if payload.has_remaining() {
        return Err(KvError::Protocol(format!(
            "{} command: unexpected trailing {} bytes",
            kind,
            payload.remaining()
        )));
    }

    Ok(operation)
}

/// Split a length-prefixed key off the front of the payload
fn take_key(payload: &mut Bytes, kind: OpKind) -> Result<Bytes> {
    if payload.remaining() < 4 {
        return Err(KvError::Protocol(format!(
            "{} command: missing key length",
            kind
        )));
    }

    let key_len = payload.get_u32() as usize;
    if payload.remaining() < key_len {
        return Err(KvError::Protocol(format!(
            "{} command: incomplete key (expected {}, got {})",
            kind,
            key_len,
            payload.remaining()
        )));
    }

    Ok(payload.split_to(key_len))
}

fn take_precondition(payload: &mut Bytes, kind: OpKind) -> Result<Option<u64>> {
    if !payload.has_remaining() {
        return Err(KvError::Protocol(format!(
            "{} command: missing precondition flag",
            kind
        )));
    }

    match payload.get_u8() {
        NO_PRECONDITION => Ok(None),
        HAS_PRECONDITION if payload.remaining() >= 8 => Ok(Some(payload.get_u64())),
        HAS_PRECONDITION => Err(KvError::Protocol(format!(
            "{} command: truncated expected version",
            kind
        ))),
        flag => Err(KvError::Protocol(format!(
            "{} command: invalid precondition flag 0x{:02x}",
            kind, flag
        ))),
    }
}

fn check_payload_len(payload_len: usize) -> Result<()> {
    if payload_len > MAX_PAYLOAD_SIZE as usize {
        return Err(KvError::Protocol(format!(
            "Payload too large: {} bytes (max {})",
            payload_len, MAX_PAYLOAD_SIZE
        )));
    }
    Ok(())
}

// =============================================================================
// Response Encoding/Decoding
// =============================================================================

/// Encode a response to bytes
///
/// Format: status (1) + version (8) + payload_len (4) + payload
pub fn encode_response(response: &Response) -> Bytes {
    let mut message = BytesMut::with_capacity(RESPONSE_HEADER_SIZE + response.payload.len());
    message.put_u8(response.status as u8);
    message.put_u64(response.version);
    message.put_u32(response.payload.len() as u32);
    message.put_slice(&response.payload);
    message.freeze()
}

/// Decode a response from a complete frame
pub fn decode_response(bytes: &[u8]) -> Result<Response> {
    if bytes.len() < RESPONSE_HEADER_SIZE {
        return Err(KvError::Protocol(format!(
            "Incomplete response header: expected {} bytes, got {}",
            RESPONSE_HEADER_SIZE,
            bytes.len()
        )));
    }

    let mut header = &bytes[..RESPONSE_HEADER_SIZE];
    let status_byte = header.get_u8();
    let version = header.get_u64();
    let payload_len = header.get_u32() as usize;
    check_payload_len(payload_len)?;

    let total_len = RESPONSE_HEADER_SIZE + payload_len;
    if bytes.len() < total_len {
        return Err(KvError::Protocol(format!(
            "Incomplete response payload: expected {} bytes, got {}",
            total_len,
            bytes.len()
        )));
    }

    let status = Status::from_byte(status_byte).ok_or_else(|| {
        KvError::Protocol(format!("Unknown response status: 0x{:02x}", status_byte))
    })?;

    Ok(Response {
        status,
        version,
        payload: Bytes::copy_from_slice(&bytes[RESPONSE_HEADER_SIZE..total_len]),
    })
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Read a complete operation from a stream
///
/// Blocks until a complete frame is received or an error occurs. A frame
/// that arrives intact but cannot be decoded is a `Protocol` error.
pub fn read_operation<R: Read>(reader: &mut R) -> Result<Operation> {
    let mut header = [0u8; REQUEST_HEADER_SIZE];
    reader.read_exact(&mut header)?;

    let cmd_type = header[0];
    let payload_len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
    check_payload_len(payload_len)?;

    let mut payload = vec![0u8; payload_len];
    if payload_len > 0 {
        reader.read_exact(&mut payload)?;
    }

    decode_payload(cmd_type, Bytes::from(payload))
}

/// Write an operation to a stream
pub fn write_operation<W: Write>(writer: &mut W, operation: &Operation) -> Result<()> {
    writer.write_all(&encode_operation(operation))?;
    writer.flush()?;
    Ok(())
}

/// Read a complete response from a stream
pub fn read_response<R: Read>(reader: &mut R) -> Result<Response> {
    let mut header = [0u8; RESPONSE_HEADER_SIZE];
    reader.read_exact(&mut header)?;

    let payload_len = u32::from_be_bytes([header[9], header[10], header[11], header[12]]) as usize;
    check_payload_len(payload_len)?;

    let mut frame = Vec::with_capacity(RESPONSE_HEADER_SIZE + payload_len);
    frame.extend_from_slice(&header);
    frame.resize(RESPONSE_HEADER_SIZE + payload_len, 0);
    if payload_len > 0 {
        reader.read_exact(&mut frame[RESPONSE_HEADER_SIZE..])?;
    }

    decode_response(&frame)
}

/// Write a response to a stream
pub fn write_response<W: Write>(writer: &mut W, response: &Response) -> Result<()> {
    writer.write_all(&encode_response(response))?;
    writer.flush()?;
    Ok(())
}
