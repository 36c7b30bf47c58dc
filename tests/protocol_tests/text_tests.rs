//! Line Syntax Tests
//!
//! Tests for parsing and formatting interactive input lines.

use bytes::Bytes;
use kvserver::protocol::{format_operation, parse_line, Operation};
use kvserver::KvError;

fn parse(line: &str) -> Operation {
    parse_line(line).unwrap().expect("line should hold an operation")
}

fn protocol_error(line: &str) -> String {
    match parse_line(line) {
        Err(KvError::Protocol(message)) => message,
        other => panic!("Expected protocol error for {:?}, got {:?}", line, other),
    }
}

#[test]
fn test_parse_get() {
    assert_eq!(parse("GET alpha"), Operation::get("alpha"));
}

#[test]
fn test_verbs_are_case_insensitive() {
    assert_eq!(parse("get alpha"), Operation::get("alpha"));
    assert_eq!(parse("Ping"), Operation::Ping);
}

#[test]
fn test_parse_put_with_and_without_version() {
    assert_eq!(parse("PUT k v"), Operation::put("k", "v"));
    assert_eq!(
        parse("PUT k v 3"),
        Operation::Put {
            key: Bytes::from("k"),
            value: Bytes::from("v"),
            expected: Some(3),
        }
    );
}

#[test]
fn test_parse_delete_alias() {
    assert_eq!(parse("DEL k"), Operation::delete("k"));
    assert_eq!(
        parse("delete k 2"),
        Operation::Delete {
            key: Bytes::from("k"),
            expected: Some(2),
        }
    );
}

#[test]
fn test_parse_get_when() {
    assert_eq!(
        parse("GETWHEN data flag go"),
        Operation::GetWhen {
            key: Bytes::from("data"),
            cond_key: Bytes::from("flag"),
            cond_value: Bytes::from("go"),
        }
    );
}

#[test]
fn test_extra_whitespace() {
    assert_eq!(parse("   PUT   k\tv  \n"), Operation::put("k", "v"));
}

#[test]
fn test_blank_and_comment_lines() {
    assert!(parse_line("").unwrap().is_none());
    assert!(parse_line("   \n").unwrap().is_none());
    assert!(parse_line("# GET k").unwrap().is_none());
}

#[test]
fn test_wrong_arity() {
    let message = protocol_error("GET");
    assert!(message.contains("GET <key>"), "{}", message);

    let message = protocol_error("PUT k");
    assert!(message.contains("PUT <key> <value>"), "{}", message);

    protocol_error("PING extra");
}

#[test]
fn test_unknown_verb() {
    let message = protocol_error("FROB k");
    assert!(message.contains("unknown command: FROB"), "{}", message);
}

#[test]
fn test_invalid_version() {
    let message = protocol_error("PUT k v notanumber");
    assert!(message.contains("invalid expected version"), "{}", message);
}

#[test]
fn test_format_parses_back() {
    let ops = vec![
        Operation::get("a"),
        Operation::put("a", "1"),
        Operation::Put {
            key: Bytes::from("a"),
            value: Bytes::from("2"),
            expected: Some(1),
        },
        Operation::delete("a"),
        Operation::GetWhen {
            key: Bytes::from("a"),
            cond_key: Bytes::from("b"),
            cond_value: Bytes::from("c"),
        },
        Operation::Ping,
    ];

    for op in ops {
        let line = format_operation(&op);
        assert_eq!(parse(&line), op, "line: {}", line);
    }
}
