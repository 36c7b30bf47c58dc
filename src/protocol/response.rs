//! Response definitions
//!
//! `Response` is the wire frame, `Reply` the typed outcome both ends work with.

use std::fmt;

use bytes::Bytes;

use crate::error::{KvError, Result};

/// Response status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Value = 0x00,
    NotFound = 0x01,
    Error = 0x02,
    Written = 0x03,
    Deleted = 0x04,
    Conflict = 0x05,
    TimedOut = 0x06,
    Pong = 0x07,

    // Session control
    Ready = 0x10,
    PoolSaturated = 0x11,
}

impl Status {
    pub fn from_byte(byte: u8) -> Option<Self> {
        let status = match byte {
            0x00 => Status::Value,
            0x01 => Status::NotFound,
            0x02 => Status::Error,
            0x03 => Status::Written,
            0x04 => Status::Deleted,
            0x05 => Status::Conflict,
            0x06 => Status::TimedOut,
            0x07 => Status::Pong,
            0x10 => Status::Ready,
            0x11 => Status::PoolSaturated,
            _ => return None,
        };
        Some(status)
    }
}

/// A response frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Status code
    pub status: Status,

    /// Entry version, actual version on conflict, or session id on READY
    pub version: u64,

    /// Value for VALUE, message for ERROR, empty otherwise
    pub payload: Bytes,
}

impl Response {
    fn new(status: Status, version: u64, payload: Bytes) -> Self {
        Self {
            status,
            version,
            payload,
        }
    }

    /// Greeting sent when a worker picks up the session
    pub fn ready(session_id: u64) -> Self {
        Self::new(Status::Ready, session_id, Bytes::new())
    }

    /// Rejection sent when the worker pool and its queue are full
    pub fn pool_saturated() -> Self {
        Self::new(Status::PoolSaturated, 0, Bytes::new())
    }

    /// Create an ERROR response
    pub fn error(message: &str) -> Self {
        Self::new(Status::Error, 0, Bytes::copy_from_slice(message.as_bytes()))
    }
}

/// Typed outcome of one operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// GET / GETWHEN found a value
    Value { value: Bytes, version: u64 },

    /// PUT succeeded
    Written { version: u64 },

    /// DELETE succeeded
    Deleted,

    /// Key absent (GET, GETWHEN, DELETE)
    NotFound,

    /// Precondition failed; `actual` is the current version (0 if absent)
    VersionConflict { actual: u64 },

    /// GETWHEN condition not met in time
    TimedOut,

    Pong,

    /// Server-side failure reported in-band
    Error(String),
}

impl Reply {
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }
}

impl From<Reply> for Response {
    fn from(reply: Reply) -> Self {
        match reply {
            Reply::Value { value, version } => Response::new(Status::Value, version, value),
            Reply::Written { version } => Response::new(Status::Written, version, Bytes::new()),
            Reply::Deleted => Response::new(Status::Deleted, 0, Bytes::new()),
            Reply::NotFound => Response::new(Status::NotFound, 0, Bytes::new()),
            Reply::VersionConflict { actual } => {
                Response::new(Status::Conflict, actual, Bytes::new())
            }
            Reply::TimedOut => Response::new(Status::TimedOut, 0, Bytes::new()),
            Reply::Pong => Response::new(Status::Pong, 0, Bytes::new()),
            Reply::Error(message) => Response::error(&message),
        }
    }
}

impl TryFrom<Response> for Reply {
    type Error = KvError;

    fn try_from(response: Response) -> Result<Self> {
        let reply = match response.status {
            Status::Value => Reply::Value {
                value: response.payload,
                version: response.version,
            },
            Status::Written => Reply::Written {
                version: response.version,
            },
            Status::Deleted => Reply::Deleted,
            Status::NotFound => Reply::NotFound,
            Status::Conflict => Reply::VersionConflict {
                actual: response.version,
            },
            Status::TimedOut => Reply::TimedOut,
            Status::Pong => Reply::Pong,
            Status::Error => {
                Reply::Error(String::from_utf8_lossy(&response.payload).into_owned())
            }
            Status::Ready | Status::PoolSaturated => {
                return Err(KvError::Protocol(format!(
                    "unexpected session control frame {:?} in place of a reply",
                    response.status
                )))
            }
        };
        Ok(reply)
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Value { value, version } => {
                write!(f, "{} (v{})", String::from_utf8_lossy(value), version)
            }
            Reply::Written { version } => write!(f, "OK (v{})", version),
            Reply::Deleted => f.write_str("DELETED"),
            Reply::NotFound => f.write_str("NOT FOUND"),
            Reply::VersionConflict { actual } => {
                write!(f, "CONFLICT (current v{})", actual)
            }
            Reply::TimedOut => f.write_str("TIMED OUT"),
            Reply::Pong => f.write_str("PONG"),
            Reply::Error(message) => write!(f, "ERROR {}", message),
        }
    }
}
