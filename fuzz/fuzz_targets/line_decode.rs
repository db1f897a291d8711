//! Fuzz target for the line decoder
//!
//! # Strategy
//!
//! - Random text: arbitrary UTF-8 lines
//! - Known prefixes: every message prefix followed by arbitrary text, so the
//!   field parsers (ids, readings, actuator lists, states) see garbage
//!
//! # Invariants
//!
//! - `decode` NEVER panics
//! - A decoded non-error message re-encodes and decodes to itself
//! - Text after a known prefix never decodes as an unknown message

#![no_main]

use arbitrary::Arbitrary;
use greenhouse_proto::{ErrorKind, Message, decode, encode};
use libfuzzer_sys::fuzz_target;

const PREFIXES: [&str; 7] =
    ["type=sensor:", "type=control", "sensors:", "offline:", "actuator:", "E_unknown:", "E_invalid:"];

#[derive(Debug, Arbitrary)]
enum LineInput {
    Raw(String),
    Prefixed { prefix: u8, rest: String },
}

fuzz_target!(|input: LineInput| {
    let (line, prefixed) = match input {
        LineInput::Raw(line) => (line, false),
        LineInput::Prefixed { prefix, rest } => {
            let prefix = PREFIXES[usize::from(prefix) % PREFIXES.len()];
            (format!("{prefix}{rest}"), true)
        }
    };

    let message = decode(&line);

    if prefixed {
        assert!(
            !matches!(message, Message::Error { kind: ErrorKind::Unknown, .. })
                || line.starts_with("E_unknown:"),
            "prefixed line decoded as unknown: {line:?}"
        );
    }

    if matches!(message, Message::Error { .. }) {
        return;
    }

    let encoded = encode(&message).expect("decoded message must re-encode");
    assert!(!encoded.contains('\n'));
    assert_eq!(decode(&encoded), message, "round trip failed for {line:?}");
});
