//! Codec for encoding and decoding Chirp events.
//!
//! Events travel as `text/event-stream` records:
//!
//! ```text
//! id: <event id>
//! event: <messageReceived|activeClients|ping>
//! data: <payload line>
//!
//! ```
//!
//! A multi-line payload is written as one `data:` line per line and joined
//! back with `\n` on decode.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::event::{Event, EventKind};

/// Maximum encoded record size (1 MiB).
pub const MAX_RECORD_SIZE: usize = 1024 * 1024;

/// Record terminator.
const RECORD_DELIMITER: &[u8] = b"\n\n";

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Record exceeds maximum size.
    #[error("Record size {0} exceeds maximum {MAX_RECORD_SIZE}")]
    RecordTooLarge(usize),

    /// No record terminator in the data yet.
    #[error("Incomplete record")]
    Incomplete,

    /// A required field line is absent.
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// The `event:` line names an unknown kind.
    #[error("Invalid event kind: {0}")]
    InvalidKind(String),

    /// Record is not valid UTF-8.
    #[error("Invalid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

/// Encode an event to bytes.
///
/// # Errors
///
/// Returns an error if the record is too large.
pub fn encode(event: &Event) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::with_capacity(event.id.len() + event.payload.len() + 48);
    encode_into(event, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode an event into an existing buffer.
///
/// On error the buffer is left as it was.
///
/// # Errors
///
/// Returns an error if the record is too large.
pub fn encode_into(event: &Event, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let start = buf.len();

    put_field(buf, "id", &strip_line_breaks(&event.id));
    put_field(buf, "event", event.kind.as_str());
    for line in payload_lines(&event.payload) {
        put_field(buf, "data", line);
    }
    buf.put_u8(b'\n');

    let written = buf.len() - start;
    if written > MAX_RECORD_SIZE {
        buf.truncate(start);
        return Err(ProtocolError::RecordTooLarge(written));
    }

    Ok(())
}

/// Decode the first record in `data`.
///
/// # Errors
///
/// Returns an error if no complete record is present or it is invalid.
pub fn decode(data: &[u8]) -> Result<Event, ProtocolError> {
    match find_delimiter(data) {
        Some(end) => parse_record(&data[..end]),
        None if data.len() > MAX_RECORD_SIZE => Err(ProtocolError::RecordTooLarge(data.len())),
        None => Err(ProtocolError::Incomplete),
    }
}

/// Try to decode a record from a buffer, advancing it if successful.
///
/// Returns `Ok(Some(event))` if a complete record was decoded,
/// `Ok(None)` if more data is needed, or `Err` on protocol error.
///
/// # Errors
///
/// Returns an error if the record is too large or invalid.
pub fn decode_from(buf: &mut BytesMut) -> Result<Option<Event>, ProtocolError> {
    let Some(end) = find_delimiter(buf) else {
        if buf.len() > MAX_RECORD_SIZE {
            return Err(ProtocolError::RecordTooLarge(buf.len()));
        }
        return Ok(None);
    };

    let record = buf.split_to(end + RECORD_DELIMITER.len());
    parse_record(&record[..end]).map(Some)
}

fn put_field(buf: &mut BytesMut, name: &str, value: &str) {
    buf.reserve(name.len() + value.len() + 3);
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(b": ");
    buf.extend_from_slice(value.as_bytes());
    buf.put_u8(b'\n');
}

/// Split on every line terminator a reader accepts: `\r\n`, `\r` and `\n`.
fn payload_lines(payload: &str) -> impl Iterator<Item = &str> {
    payload
        .split("\r\n")
        .flat_map(|chunk| chunk.split(['\r', '\n']))
}

fn strip_line_breaks(value: &str) -> std::borrow::Cow<'_, str> {
    if value.contains(['\r', '\n']) {
        value.replace(['\r', '\n'], "").into()
    } else {
        value.into()
    }
}

fn find_delimiter(data: &[u8]) -> Option<usize> {
    data.windows(RECORD_DELIMITER.len())
        .position(|window| window == RECORD_DELIMITER)
}

fn parse_record(record: &[u8]) -> Result<Event, ProtocolError> {
    let text = std::str::from_utf8(record)?;

    let mut id = None;
    let mut kind = None;
    let mut data: Vec<&str> = Vec::new();

    for line in text.split('\n') {
        // Comment lines start with a colon.
        if line.is_empty() || line.starts_with(':') {
            continue;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "id" => id = Some(value),
            "event" => kind = Some(value),
            "data" => data.push(value),
            _ => {}
        }
    }

    let id = id.ok_or(ProtocolError::MissingField("id"))?;
    let kind = kind.ok_or(ProtocolError::MissingField("event"))?;
    let kind = kind
        .parse::<EventKind>()
        .map_err(|_| ProtocolError::InvalidKind(kind.to_string()))?;

    Ok(Event::new(id, kind, data.join("\n")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let event = Event::message_received("abc123", r#"{"text":"hi","sender":"bob"}"#);
        let encoded = encode(&event).unwrap();

        assert_eq!(
            &encoded[..],
            b"id: abc123\nevent: messageReceived\ndata: {\"text\":\"hi\",\"sender\":\"bob\"}\n\n"
        );
    }

    #[test]
    fn test_encode_multiline_payload() {
        let event = Event::message_received("m-1", "first\nsecond");
        let encoded = encode(&event).unwrap();

        assert_eq!(
            &encoded[..],
            b"id: m-1\nevent: messageReceived\ndata: first\ndata: second\n\n"
        );
        assert_eq!(decode(&encoded).unwrap(), event);
    }

    #[test]
    fn test_bare_carriage_return_starts_new_data_line() {
        let event = Event::message_received("m-1", "x\rid: forged\r\nevent: ping");
        let encoded = encode(&event).unwrap();

        assert_eq!(
            &encoded[..],
            b"id: m-1\nevent: messageReceived\ndata: x\ndata: id: forged\ndata: event: ping\n\n"
        );

        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.id, "m-1");
        assert_eq!(decoded.kind, EventKind::MessageReceived);
        assert_eq!(decoded.payload, "x\nid: forged\nevent: ping");
    }

    #[test]
    fn test_encode_strips_line_breaks_from_id() {
        let event = Event::ping("evil\nevent: x", 1);
        let encoded = encode(&event).unwrap();
        let decoded = decode(&encoded).unwrap();

        assert_eq!(decoded.id, "evilevent: x");
        assert_eq!(decoded.kind, EventKind::Ping);
    }

    #[test]
    fn test_record_too_large() {
        let event = Event::message_received("big", "x".repeat(MAX_RECORD_SIZE + 1));
        let mut buf = BytesMut::from(&b"prefix"[..]);

        match encode_into(&event, &mut buf) {
            Err(ProtocolError::RecordTooLarge(_)) => {}
            other => panic!("Expected RecordTooLarge error, got {:?}", other),
        }
        assert_eq!(&buf[..], b"prefix");
    }

    #[test]
    fn test_decode_incomplete() {
        let encoded = encode(&Event::ping("p-1", 42)).unwrap();

        match decode(&encoded[..encoded.len() - 1]) {
            Err(ProtocolError::Incomplete) => {}
            other => panic!("Expected Incomplete error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_unknown_kind() {
        match decode(b"id: 1\nevent: newChat\ndata: hello\n\n") {
            Err(ProtocolError::InvalidKind(kind)) => assert_eq!(kind, "newChat"),
            other => panic!("Expected InvalidKind error, got {:?}", other),
        }
        assert!(matches!(
            decode(b"event: ping\ndata: 1\n\n"),
            Err(ProtocolError::MissingField("id"))
        ));
    }

    #[test]
    fn test_decode_skips_comments_and_unknown_fields() {
        let decoded = decode(b": keep-alive\nretry: 1000\nid: 7\nevent: activeClients\ndata:2\n\n")
            .unwrap();

        assert_eq!(decoded, Event::active_clients("7", 2));
    }

    #[test]
    fn test_streaming_decode() {
        let first = Event::message_received("m-1", "hello");
        let second = Event::active_clients("a-1", 2);

        let mut buf = BytesMut::new();
        encode_into(&first, &mut buf).unwrap();
        encode_into(&second, &mut buf).unwrap();
        buf.extend_from_slice(b"id: partial\n");

        assert_eq!(decode_from(&mut buf).unwrap(), Some(first));
        assert_eq!(decode_from(&mut buf).unwrap(), Some(second));
        assert_eq!(decode_from(&mut buf).unwrap(), None);
        assert_eq!(&buf[..], b"id: partial\n");
    }
}
