//! Queue blob codec.
//!
//! ```text
//! A
//! B
//! #next#
//! C
//! ```
//!
//! UTF-8, one task per line. A `#next#` line separates each appended batch
//! from the undrained content before it. Decoding drops the separators; the
//! batch boundaries carry no meaning for the consumer.

use crate::domain::errors::{Error, Result};

/// Line that separates appended batches.
pub const BATCH_DELIMITER: &str = "#next#";

/// Checks that `task` survives a round trip through the blob.
pub fn validate_task(task: &str) -> Result<()> {
    if task.is_empty() {
        return Err(Error::invalid_task(task, "task is empty"));
    }
    if task.contains('\n') {
        return Err(Error::invalid_task(task, "task contains a newline"));
    }
    if task == BATCH_DELIMITER {
        return Err(Error::invalid_task(task, "task equals the batch delimiter"));
    }
    Ok(())
}

/// Appends `batch` to the undrained `existing` text.
///
/// `existing` must already be valid blob text; `batch` must be non-empty and
/// validated.
pub fn merge<S: AsRef<str>>(existing: Option<&str>, batch: &[S]) -> String {
    let mut out = String::new();
    if let Some(existing) = existing.map(trim_trailing_newline).filter(|s| !s.is_empty()) {
        out.push_str(existing);
        out.push('\n');
        out.push_str(BATCH_DELIMITER);
        out.push('\n');
    }
    for (i, task) in batch.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(task.as_ref());
    }
    out
}

/// Parses a queue blob read from `path` into its tasks, in order.
pub fn decode(path: &str, data: &[u8]) -> Result<Vec<String>> {
    let text = std::str::from_utf8(data)
        .map_err(|e| Error::corrupt(path, format!("not valid UTF-8: {e}")))?;
    decode_str(path, text)
}

/// Returns the blob's text once it is known to decode cleanly.
pub fn checked_text<'a>(path: &str, data: &'a [u8]) -> Result<&'a str> {
    let text = std::str::from_utf8(data)
        .map_err(|e| Error::corrupt(path, format!("not valid UTF-8: {e}")))?;
    decode_str(path, text)?;
    Ok(text)
}

pub fn decode_str(path: &str, text: &str) -> Result<Vec<String>> {
    let text = trim_trailing_newline(text);
    if text.is_empty() {
        return Ok(Vec::new());
    }

    let lines: Vec<&str> = text.split('\n').collect();
    let last = lines.len() - 1;
    let mut tasks = Vec::with_capacity(lines.len());
    let mut previous_was_delimiter = false;
    for (i, line) in lines.into_iter().enumerate() {
        if line == BATCH_DELIMITER {
            if i == 0 || i == last || previous_was_delimiter {
                return Err(Error::corrupt(
                    path,
                    format!("misplaced batch delimiter on line {}", i + 1),
                ));
            }
            previous_was_delimiter = true;
            continue;
        }
        if line.is_empty() {
            return Err(Error::corrupt(path, format!("empty task on line {}", i + 1)));
        }
        previous_was_delimiter = false;
        tasks.push(line.to_string());
    }
    Ok(tasks)
}

fn trim_trailing_newline(text: &str) -> &str {
    text.strip_suffix('\n').unwrap_or(text)
}
