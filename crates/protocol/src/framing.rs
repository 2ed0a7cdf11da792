//! Push-stream framing.
//!
//! # Record Format
//!
//! Output is framed as Server-Sent-Events records, one per [`StreamEvent`]:
//!
//! ```text
//! data: <base64>\n\n                    stdout
//! event: stderr\ndata: <base64>\n\n     stderr
//! event: error\ndata: <base64>\n\n      error message
//! event: close\ndata: closed\n\n        close notice
//! ```
//!
//! Lines starting with `:` are comments. A stream opens with the comment
//! [`CONNECTED_COMMENT`] and may carry keep-alive comments at any point.

use crate::error::{ProtocolError, Result};
use crate::events::{EventKind, StreamEvent};

/// Comment sent when a push stream is opened.
pub const CONNECTED_COMMENT: &str = ": connected\n\n";

/// Record separator.
const RECORD_SEPARATOR: &str = "\n\n";

/// The two fields of a push-stream record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseRecord {
    /// Event name; `None` for stdout, which uses the implicit default event.
    pub event: Option<&'static str>,
    /// Text payload.
    pub data: String,
}

impl SseRecord {
    /// Builds the record for an event.
    pub fn from_event(event: &StreamEvent) -> Self {
        let name = match event.kind {
            EventKind::Data => None,
            kind => Some(kind.as_str()),
        };
        Self {
            event: name,
            data: event.encoded_payload(),
        }
    }

    /// Writes the record in wire form, including the trailing blank line.
    pub fn encode(&self) -> String {
        match self.event {
            Some(name) => format!("event: {}\ndata: {}{}", name, self.data, RECORD_SEPARATOR),
            None => format!("data: {}{}", self.data, RECORD_SEPARATOR),
        }
    }
}

/// Encodes an event as a complete push-stream record.
pub fn encode_sse(event: &StreamEvent) -> String {
    SseRecord::from_event(event).encode()
}

/// Parses a single record (without its trailing blank line).
///
/// Returns `Ok(None)` for comment-only records.
pub fn decode_record(record: &str) -> Result<Option<StreamEvent>> {
    let mut kind = EventKind::Data;
    let mut data: Option<String> = None;

    for line in record.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(name) = line.strip_prefix("event:") {
            kind = EventKind::parse(name.trim())?;
        } else if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            match data.as_mut() {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(value);
                }
                None => data = Some(value.to_string()),
            }
        } else {
            return Err(ProtocolError::MalformedRecord(line.to_string()));
        }
    }

    match data {
        Some(data) => StreamEvent::from_encoded(kind, &data).map(Some),
        None if kind == EventKind::Data => Ok(None),
        None => Err(ProtocolError::MalformedRecord(format!(
            "{} record without data",
            kind
        ))),
    }
}

/// Incremental decoder for a push stream arriving in arbitrary chunks.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
}

impl SseDecoder {
    /// Creates an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns every event completed by it.
    pub fn push(&mut self, chunk: &str) -> Result<Vec<StreamEvent>> {
        // A CRLF may straddle two chunks, so line endings are normalised
        // over the buffer rather than per chunk.
        self.buffer.push_str(chunk);
        if self.buffer.contains("\r\n") {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }

        let mut events = Vec::new();
        while let Some(end) = self.buffer.find(RECORD_SEPARATOR) {
            let record: String = self.buffer.drain(..end + RECORD_SEPARATOR.len()).collect();
            if let Some(event) = decode_record(&record[..end])? {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Returns the number of buffered bytes not yet forming a record.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_stdout_has_no_event_line() {
        let record = encode_sse(&StreamEvent::data(&b"ls\r\n"[..]));
        assert_eq!(record, "data: bHMNCg==\n\n");
    }

    #[test]
    fn test_encode_stderr_and_close() {
        assert_eq!(
            encode_sse(&StreamEvent::stderr(&b"oops"[..])),
            "event: stderr\ndata: b29wcw==\n\n"
        );
        assert_eq!(
            encode_sse(&StreamEvent::close()),
            "event: close\ndata: closed\n\n"
        );
    }

    #[test]
    fn test_decoder_handles_split_chunks() {
        let mut decoder = SseDecoder::new();
        let wire = format!(
            "{}{}{}",
            CONNECTED_COMMENT,
            encode_sse(&StreamEvent::data(&b"hello"[..])),
            encode_sse(&StreamEvent::close())
        );

        let (first, second) = wire.split_at(17);
        let mut events = decoder.push(first).unwrap();
        events.extend(decoder.push(second).unwrap());

        assert_eq!(
            events,
            vec![StreamEvent::data(&b"hello"[..]), StreamEvent::close()]
        );
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_decoder_skips_comments() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(": keep-alive\n\n").unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_decoder_accepts_crlf() {
        let mut decoder = SseDecoder::new();
        let events = decoder
            .push("event: stderr\r\ndata: b29wcw==\r\n\r\n")
            .unwrap();
        assert_eq!(events, vec![StreamEvent::stderr(&b"oops"[..])]);
    }

    #[test]
    fn test_decoder_joins_crlf_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        let mut events = decoder
            .push("event: stderr\r\ndata: b29wcw==\r\n\r")
            .unwrap();
        assert!(events.is_empty());

        events.extend(decoder.push("\ndata: aGk=\r").unwrap());
        assert_eq!(events, vec![StreamEvent::stderr(&b"oops"[..])]);

        events.extend(decoder.push("\n\r\n").unwrap());
        assert_eq!(
            events,
            vec![
                StreamEvent::stderr(&b"oops"[..]),
                StreamEvent::data(&b"hi"[..])
            ]
        );
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_decode_default_message_event_is_data() {
        let event = decode_record("event: message\ndata: aGk=").unwrap();
        assert_eq!(event, Some(StreamEvent::data(&b"hi"[..])));
    }

    #[test]
    fn test_decode_unknown_event() {
        let result = decode_record("event: bell\ndata: x");
        assert!(matches!(result, Err(ProtocolError::UnknownEventKind(_))));
    }

    #[test]
    fn test_decode_error_without_data() {
        let result = decode_record("event: error");
        assert!(matches!(result, Err(ProtocolError::MalformedRecord(_))));
    }

    #[test]
    fn test_decode_garbage_line() {
        let result = decode_record("hello world");
        assert!(matches!(result, Err(ProtocolError::MalformedRecord(_))));
    }
}
