//! Output events fanned out from a shell session to its subscribers.
//!
//! Every event carries a kind tag and a byte payload. Payloads are opaque
//! terminal bytes and are base64-encoded whenever they cross a text-oriented
//! transport, so arbitrary binary output survives intact.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Payload carried by a close notice.
pub const CLOSE_PAYLOAD: &str = "closed";

/// Kind tag of a stream event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Standard output of the remote shell.
    Data,
    /// Standard error of the remote shell.
    Stderr,
    /// A connect or channel failure; the payload is the UTF-8 message.
    Error,
    /// The session has ended.
    Close,
}

impl EventKind {
    /// Returns the wire name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Data => "data",
            EventKind::Stderr => "stderr",
            EventKind::Error => "error",
            EventKind::Close => "close",
        }
    }

    /// Parses a wire name.
    ///
    /// `stdout` and `message` are accepted as aliases for `data`; `message`
    /// is the name an SSE record carries when it has no `event:` line.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "data" | "stdout" | "message" => Ok(EventKind::Data),
            "stderr" => Ok(EventKind::Stderr),
            "error" => Ok(EventKind::Error),
            "close" => Ok(EventKind::Close),
            other => Err(ProtocolError::UnknownEventKind(other.to_string())),
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single event of a session's output stream.
///
/// The payload is reference-counted so one inbound chunk can be handed to
/// every subscriber without copying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    /// What the payload represents.
    pub kind: EventKind,
    /// Raw payload bytes.
    pub payload: Bytes,
}

impl StreamEvent {
    /// Creates an event of the given kind.
    pub fn new(kind: EventKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Creates a stdout event.
    pub fn data(payload: impl Into<Bytes>) -> Self {
        Self::new(EventKind::Data, payload)
    }

    /// Creates a stderr event.
    pub fn stderr(payload: impl Into<Bytes>) -> Self {
        Self::new(EventKind::Stderr, payload)
    }

    /// Creates an error event carrying a human-readable message.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(EventKind::Error, Bytes::from(message.into()))
    }

    /// Creates a close notice.
    pub fn close() -> Self {
        Self::new(EventKind::Close, Bytes::from_static(CLOSE_PAYLOAD.as_bytes()))
    }

    /// Returns the payload in its text-transport form.
    ///
    /// Close notices carry the literal `closed`; every other kind is base64.
    pub fn encoded_payload(&self) -> String {
        match self.kind {
            EventKind::Close => CLOSE_PAYLOAD.to_string(),
            _ => STANDARD.encode(&self.payload),
        }
    }

    /// Rebuilds an event from its kind and text-transport payload.
    pub fn from_encoded(kind: EventKind, encoded: &str) -> Result<Self> {
        match kind {
            EventKind::Close => Ok(Self::close()),
            _ => Ok(Self::new(kind, STANDARD.decode(encoded.trim())?)),
        }
    }

    /// Returns the payload as text, replacing invalid UTF-8.
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}
