//! Line syntax for interactive input
//!
//! ```text
//! GET <key>
//! PUT <key> <value> [expected-version]
//! DELETE <key> [expected-version]      (alias: DEL)
//! GETWHEN <key> <cond-key> <cond-value>
//! PING
//! ```
//!
//! Verbs are case-insensitive; tokens are separated by whitespace.

use bytes::Bytes;

use super::Operation;
use crate::error::{KvError, Result};

/// Parse one line into an operation
///
/// Returns `Ok(None)` for blank lines and `#` comments.
pub fn parse_line(line: &str) -> Result<Option<Operation>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let mut tokens = line.split_whitespace();
    let verb = tokens.next().unwrap_or_default().to_ascii_uppercase();
    let args: Vec<&str> = tokens.collect();

    let operation = match (verb.as_str(), args.as_slice()) {
        ("GET", [key]) => Operation::Get { key: bytes(key) },
        ("PUT", [key, value]) => Operation::Put {
            key: bytes(key),
            value: bytes(value),
            expected: None,
        },
        ("PUT", [key, value, expected]) => Operation::Put {
            key: bytes(key),
            value: bytes(value),
            expected: Some(parse_version(expected)?),
        },
        ("DELETE" | "DEL", [key]) => Operation::Delete {
            key: bytes(key),
            expected: None,
        },
        ("DELETE" | "DEL", [key, expected]) => Operation::Delete {
            key: bytes(key),
            expected: Some(parse_version(expected)?),
        },
        ("GETWHEN", [key, cond_key, cond_value]) => Operation::GetWhen {
            key: bytes(key),
            cond_key: bytes(cond_key),
            cond_value: bytes(cond_value),
        },
        ("PING", []) => Operation::Ping,
        ("GET" | "PUT" | "DELETE" | "DEL" | "GETWHEN" | "PING", _) => {
            return Err(KvError::Protocol(format!(
                "wrong number of arguments for {}: {}",
                verb,
                usage(&verb)
            )))
        }
        _ => return Err(KvError::Protocol(format!("unknown command: {}", verb))),
    };

    Ok(Some(operation))
}

/// Render an operation in line syntax
pub fn format_operation(operation: &Operation) -> String {
    let text = |b: &Bytes| String::from_utf8_lossy(b).into_owned();

    match operation {
        Operation::Get { key } => format!("GET {}", text(key)),
        Operation::Put {
            key,
            value,
            expected: None,
        } => format!("PUT {} {}", text(key), text(value)),
        Operation::Put {
            key,
            value,
            expected: Some(v),
        } => format!("PUT {} {} {}", text(key), text(value), v),
        Operation::Delete {
            key,
            expected: None,
        } => format!("DELETE {}", text(key)),
        Operation::Delete {
            key,
            expected: Some(v),
        } => format!("DELETE {} {}", text(key), v),
        Operation::GetWhen {
            key,
            cond_key,
            cond_value,
        } => format!(
            "GETWHEN {} {} {}",
            text(key),
            text(cond_key),
            text(cond_value)
        ),
        Operation::Ping => "PING".to_string(),
    }
}

fn bytes(token: &str) -> Bytes {
    Bytes::copy_from_slice(token.as_bytes())
}

fn parse_version(token: &str) -> Result<u64> {
    token
        .parse()
        .map_err(|_| KvError::Protocol(format!("invalid expected version: {}", token)))
}

fn usage(verb: &str) -> &'static str {
    match verb {
        "GET" => "GET <key>",
        "PUT" => "PUT <key> <value> [expected-version]",
        "DELETE" | "DEL" => "DELETE <key> [expected-version]",
        "GETWHEN" => "GETWHEN <key> <cond-key> <cond-value>",
        _ => "PING",
    }
}
