//! Per-line translation of the agent subprocess's stdout.
//!
//! The subprocess interleaves protocol lines with human-readable banners and
//! emits its progress as native `codex/event` notifications that SSE-side
//! clients do not understand. [`translate_line`] decides for each line
//! whether it is dropped, passed through, or rewritten.

use serde_json::Value;

use crate::events::{decode_native, encode_notification, NATIVE_EVENT_METHOD};

/// Substrings that mark a known startup banner.
pub const BANNER_HINTS: &[&str] = &[
    "MCP Doc Forge Server",
    "Server is running",
    "Starting",
    "Listening",
];

/// What to do with one stdout line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineDisposition {
    /// Write this compact JSON line to the gateway's stdout.
    Emit(String),
    /// Do not forward the line.
    Drop(DropReason),
}

/// Why a line was not forwarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Empty or whitespace only.
    Blank,
    /// Non-JSON line matching a [`BANNER_HINTS`] entry.
    Banner,
    /// Any other line not starting with `{` or `[`.
    NotJson,
    /// Looked like JSON but failed to parse.
    Malformed(String),
    /// Native event with no wire encoding.
    Internal,
    /// Not valid UTF-8.
    InvalidUtf8,
}

/// Translate one raw line of subprocess stdout.
#[must_use]
pub fn translate_bytes(line: &[u8]) -> LineDisposition {
    match std::str::from_utf8(line) {
        Ok(text) => translate_line(text),
        Err(_) => LineDisposition::Drop(DropReason::InvalidUtf8),
    }
}

/// Translate one line of subprocess stdout.
#[must_use]
pub fn translate_line(line: &str) -> LineDisposition {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return LineDisposition::Drop(DropReason::Blank);
    }
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        let reason = if is_banner(trimmed) {
            DropReason::Banner
        } else {
            DropReason::NotJson
        };
        return LineDisposition::Drop(reason);
    }

    let value: Value = match serde_json::from_str(trimmed) {
        Ok(value) => value,
        Err(err) => return LineDisposition::Drop(DropReason::Malformed(err.to_string())),
    };

    let outgoing = if value.get("method").and_then(Value::as_str) == Some(NATIVE_EVENT_METHOD) {
        match decode_native(&value).as_ref().and_then(encode_notification) {
            Some(encoded) => encoded,
            None => return LineDisposition::Drop(DropReason::Internal),
        }
    } else {
        value
    };

    LineDisposition::Emit(outgoing.to_string())
}

/// Whether `line` contains one of the [`BANNER_HINTS`].
#[must_use]
pub fn is_banner(line: &str) -> bool {
    BANNER_HINTS.iter().any(|hint| line.contains(hint))
}
