//! Protocol Module
//!
//! Defines the wire protocol for client-server communication.
//!
//! ## Protocol Format (V1 - Simple Binary)
//!
//! ### Request Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Cmd (1)  │ Len (4)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Commands
//! - 0x01: GET      - Payload: key_len (4) + key
//! - 0x02: PUT      - Payload: key_len (4) + key + precond + value
//! - 0x03: DEL      - Payload: key_len (4) + key + precond
//! - 0x04: PING     - Payload: empty
//! - 0x05: GETWHEN  - Payload: key_len (4) + key + cond_len (4) + cond_key + cond_value
//!
//! ### Response Format
//! ```text
//! ┌──────────┬─────────────┬──────────┬─────────────────┐
//! │Status(1) │ Version (8) │ Len (4)  │     Payload     │
//! └──────────┴─────────────┴──────────┴─────────────────┘
//! ```
//!
//! ### Status Codes
//! - 0x00: VALUE          0x04: DELETED
//! - 0x01: NOT_FOUND      0x05: CONFLICT
//! - 0x02: ERROR          0x06: TIMED_OUT
//! - 0x03: WRITTEN        0x07: PONG
//! - 0x10: READY (greeting, version = session id)
//! - 0x11: POOL_SATURATED (connection rejected)

mod codec;
mod operation;
mod response;
mod text;

pub use codec::{
    decode_operation, decode_response, encode_operation, encode_response, read_operation,
    read_response, write_operation, write_response, MAX_PAYLOAD_SIZE, REQUEST_HEADER_SIZE,
    RESPONSE_HEADER_SIZE,
};
pub use operation::{OpKind, Operation};
pub use response::{Reply, Response, Status};
pub use text::{format_operation, parse_line};
