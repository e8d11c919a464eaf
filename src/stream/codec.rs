/// Record framing for the chat hub.
///
/// The hub delimits records with the ASCII record separator (`0x1E`). The
/// transport may coalesce several records into one message, so decoding
/// splits on every separator. Fragments that are not JSON are kept as opaque
/// tokens; decoding never fails.
use memchr::memchr_iter;
use serde::Serialize;
use serde_json::{Map, Value};
use smallvec::SmallVec;

use crate::error::ClientError;
use crate::protocol::event::StreamEvent;

pub const RECORD_SEPARATOR: char = '\u{1e}';
const RECORD_SEPARATOR_BYTE: u8 = 0x1e;

/// One decoded record.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Json(Value),
    Opaque(String),
}

pub type Records = SmallVec<[Record; 2]>;

impl Record {
    /// The first record the hub sends after a successful handshake is `{}`.
    #[must_use]
    pub fn is_handshake_ack(&self) -> bool {
        matches!(self, Record::Json(Value::Object(map)) if map.is_empty())
    }

    /// Decode into a hub event; opaque tokens are never events.
    #[must_use]
    pub fn into_event(self) -> StreamEvent {
        match self {
            Record::Json(value) => StreamEvent::from_value(value),
            Record::Opaque(_) => StreamEvent::Ignored,
        }
    }
}

/// Split a raw payload into records.
#[must_use]
pub fn decode(raw: &str) -> Records {
    let mut out = Records::new();
    let bytes = raw.as_bytes();
    let mut start = 0usize;
    for end in memchr_iter(RECORD_SEPARATOR_BYTE, bytes) {
        push_record(&raw[start..end], &mut out);
        start = end + 1;
    }
    push_record(&raw[start..], &mut out);
    out
}

fn push_record(fragment: &str, out: &mut Records) {
    if fragment.is_empty() {
        return;
    }
    match serde_json::from_str::<Value>(fragment) {
        Ok(value) if is_present(&value) => out.push(Record::Json(value)),
        Ok(_) => {}
        Err(_) => {
            if !fragment.trim().is_empty() {
                out.push(Record::Opaque(fragment.to_string()));
            }
        }
    }
}

/// JSON values that carry nothing (`null`, `false`, `0`, `""`) are dropped
/// like empty fragments.
fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Serialize one outgoing record, terminated by the record separator.
///
/// # Errors
///
/// Returns [`ClientError::Internal`] if the value cannot be serialized.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String, ClientError> {
    let mut frame = serde_json::to_string(value)
        .map_err(|err| ClientError::Internal(format!("Failed to encode frame: {err}")))?;
    frame.push(RECORD_SEPARATOR);
    Ok(frame)
}

/// The empty-object acknowledgement, mostly useful for tests and mock hubs.
#[must_use]
pub fn handshake_ack() -> String {
    let mut frame = Value::Object(Map::new()).to_string();
    frame.push(RECORD_SEPARATOR);
    frame
}
