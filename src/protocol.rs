//! Line framing for the stdio channel.
//!
//! Every message is exactly one line of UTF-8 text holding one JSON value,
//! terminated by `\n`. This module owns the `serde_json` side of that framing so
//! the client and the server loops only deal with `Value`s and strings.

use crate::error::Result;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Serializes a message into a single line of JSON, without the terminator.
///
/// `serde_json`'s compact form escapes control characters inside strings, so
/// the output never contains a raw newline.
pub fn encode<T: Serialize + ?Sized>(msg: &T) -> Result<String> {
    Ok(serde_json::to_string(msg)?)
}

/// Attempts to decode one line of child output.
///
/// Returns `None` for blank lines and for anything that is not valid JSON; the
/// child is allowed to interleave diagnostic text with protocol messages.
pub fn decode(line: &str) -> Option<Value> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(line) {
        Ok(value) => Some(value),
        Err(e) => {
            trace!(error = %e, line = %line, "Ignoring non-JSON line");
            None
        }
    }
}

/// The integer correlation id of a message, if it has one.
pub fn message_id(msg: &Value) -> Option<i64> {
    msg.get("id").and_then(Value::as_i64)
}

/// Writes one framed line and flushes it.
pub async fn write_line<W>(writer: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut framed = Vec::with_capacity(line.len() + 1);
    framed.extend_from_slice(line.as_bytes());
    framed.push(b'\n');
    // One write_all per message so a concurrent writer can't split a line.
    writer.write_all(&framed).await?;
    writer.flush().await
}
