//! Operation definitions
//!
//! Represents requests from clients.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Operation types (wire command byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OpKind {
    Get = 0x01,
    Put = 0x02,
    Delete = 0x03,
    Ping = 0x04,
    GetWhen = 0x05,
}

impl OpKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(OpKind::Get),
            0x02 => Some(OpKind::Put),
            0x03 => Some(OpKind::Delete),
            0x04 => Some(OpKind::Ping),
            0x05 => Some(OpKind::GetWhen),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Get => "GET",
            OpKind::Put => "PUT",
            OpKind::Delete => "DELETE",
            OpKind::Ping => "PING",
            OpKind::GetWhen => "GETWHEN",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Get a value by key
    Get { key: Bytes },

    /// Put a key-value pair, optionally only at an expected version
    Put {
        key: Bytes,
        value: Bytes,
        expected: Option<u64>,
    },

    /// Delete a key, optionally only at an expected version
    Delete { key: Bytes, expected: Option<u64> },

    /// Read `key` once `cond_key` holds `cond_value`
    GetWhen {
        key: Bytes,
        cond_key: Bytes,
        cond_value: Bytes,
    },

    /// Ping (health check)
    Ping,
}

impl Operation {
    pub fn get(key: impl Into<Bytes>) -> Self {
        Operation::Get { key: key.into() }
    }

    pub fn put(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Operation::Put {
            key: key.into(),
            value: value.into(),
            expected: None,
        }
    }

    pub fn delete(key: impl Into<Bytes>) -> Self {
        Operation::Delete {
            key: key.into(),
            expected: None,
        }
    }

    /// Get the operation type
    pub fn kind(&self) -> OpKind {
        match self {
            Operation::Get { .. } => OpKind::Get,
            Operation::Put { .. } => OpKind::Put,
            Operation::Delete { .. } => OpKind::Delete,
            Operation::GetWhen { .. } => OpKind::GetWhen,
            Operation::Ping => OpKind::Ping,
        }
    }

    /// The key this operation targets, if any
    pub fn key(&self) -> Option<&Bytes> {
        match self {
            Operation::Get { key }
            | Operation::Put { key, .. }
            | Operation::Delete { key, .. }
            | Operation::GetWhen { key, .. } => Some(key),
            Operation::Ping => None,
        }
    }
}
