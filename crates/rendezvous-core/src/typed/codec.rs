//! TaskLine codec - `<kind> <json>` 形式の task 行
//!
//! A task line is the kind, one space, then the payload as single-line JSON.
//! serde_json never emits a raw newline, so every encoded line is a valid
//! queue entry.

use serde_json::Value;

use super::task::Task;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("task line is missing a kind")]
    MissingKind,

    #[error("task kind {0:?} contains whitespace")]
    InvalidKind(String),

    #[error("payload for {kind} is not valid JSON: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Encodes `task` as a task line.
pub fn encode<T: Task>(task: &T) -> Result<String, CodecError> {
    validate_kind(T::KIND)?;
    let payload = serde_json::to_string(task).map_err(|source| CodecError::Payload {
        kind: T::KIND.to_string(),
        source,
    })?;
    Ok(format!("{} {payload}", T::KIND))
}

/// Splits a task line into its kind and parsed payload.
///
/// A bare kind with no payload decodes to JSON `null`.
pub fn decode(line: &str) -> Result<(&str, Value), CodecError> {
    let line = line.trim();
    let (kind, payload) = match line.split_once(char::is_whitespace) {
        Some((kind, payload)) => (kind, payload.trim_start()),
        None => (line, ""),
    };
    if kind.is_empty() {
        return Err(CodecError::MissingKind);
    }
    if payload.is_empty() {
        return Ok((kind, Value::Null));
    }
    let value = serde_json::from_str(payload).map_err(|source| CodecError::Payload {
        kind: kind.to_string(),
        source,
    })?;
    Ok((kind, value))
}

pub fn validate_kind(kind: &str) -> Result<(), CodecError> {
    if kind.is_empty() {
        return Err(CodecError::MissingKind);
    }
    if kind.chars().any(char::is_whitespace) {
        return Err(CodecError::InvalidKind(kind.to_string()));
    }
    Ok(())
}
