//! Request, response and socket message definitions.
//!
//! HTTP bodies and socket messages are JSON. Socket messages are tagged by a
//! `type` field; output payloads are base64 text.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::events::{EventKind, StreamEvent};

// ============================================================================
// Session requests
// ============================================================================

/// Request to start a new shell session.
///
/// Fields default to empty so that missing values surface as validation
/// errors at the boundary instead of deserialization failures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRequest {
    /// Remote host name or address.
    #[serde(default)]
    pub host: String,
    /// Remote port; the gateway default applies when absent.
    #[serde(default)]
    pub port: Option<u16>,
    /// Login user.
    #[serde(default)]
    pub username: String,
    /// Password; key-based authentication is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Response to a successful start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartResponse {
    /// Identifier of the new session.
    pub id: String,
}

/// Keystrokes to forward to a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRequest {
    /// Target session.
    #[serde(default)]
    pub id: String,
    /// Text to write verbatim.
    #[serde(default)]
    pub data: Option<String>,
}

/// Viewport size change.
///
/// Dimensions are signed so that zero and negative values reach validation
/// instead of failing to parse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeRequest {
    /// Target session.
    #[serde(default)]
    pub id: String,
    /// New terminal columns.
    #[serde(default)]
    pub cols: Option<i64>,
    /// New terminal rows.
    #[serde(default)]
    pub rows: Option<i64>,
}

/// Request to close a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseRequest {
    /// Target session.
    #[serde(default)]
    pub id: String,
}

/// Generic success acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// Always true.
    pub ok: bool,
}

impl Ack {
    /// The success acknowledgement.
    pub const OK: Ack = Ack { ok: true };
}

/// Summary of a live session, as reported by the sessions listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Session identifier.
    pub id: String,
    /// Lifecycle state (`connecting` or `ready`).
    pub state: String,
    /// Remote host.
    pub host: String,
    /// Remote port.
    pub port: u16,
    /// Login user.
    pub username: String,
    /// Number of attached subscribers.
    pub subscribers: usize,
    /// Creation time (Unix epoch milliseconds).
    pub created_at: u64,
}

// ============================================================================
// Errors
// ============================================================================

/// Error codes shared by HTTP responses and socket messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Missing or malformed parameters.
    InvalidRequest,
    /// Caller is not authorized.
    Unauthorized,
    /// Unknown session.
    NotFound,
    /// Session channel not yet established.
    NotReady,
    /// Connect or authentication failed.
    ConnectFailed,
    /// Session channel failed mid-session.
    ChannelFailed,
    /// Session was closed before it became ready.
    Aborted,
    /// Too many live sessions.
    LimitReached,
    /// Unexpected internal failure.
    InternalError,
}

/// Error body returned by the HTTP surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

// ============================================================================
// Socket messages
// ============================================================================

/// Messages a socket client sends to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start a session bound to this socket.
    Start(StartRequest),
    /// Keystrokes for the bound session.
    Input {
        /// Text to write verbatim.
        data: String,
    },
    /// Viewport change for the bound session.
    Resize {
        /// New terminal columns.
        cols: i64,
        /// New terminal rows.
        rows: i64,
    },
    /// Close the bound session.
    Close,
}

impl ClientMessage {
    /// Parses a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serializes to a JSON text frame.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Messages the gateway sends to a socket client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The bound session is ready.
    Started {
        /// Session identifier.
        id: String,
    },
    /// Base64 stdout chunk.
    Data {
        /// Encoded payload.
        data: String,
    },
    /// Base64 stderr chunk.
    Stderr {
        /// Encoded payload.
        data: String,
    },
    /// A failure; session-level errors are followed by `closed`.
    Error {
        /// Machine-readable code, when known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<ErrorCode>,
        /// Human-readable message.
        message: String,
    },
    /// The bound session has ended.
    Closed,
}

impl ServerMessage {
    /// Converts a session output event into its socket form.
    pub fn from_event(event: &StreamEvent) -> Self {
        match event.kind {
            EventKind::Data => ServerMessage::Data {
                data: event.encoded_payload(),
            },
            EventKind::Stderr => ServerMessage::Stderr {
                data: event.encoded_payload(),
            },
            EventKind::Error => ServerMessage::Error {
                code: None,
                message: event.payload_lossy(),
            },
            EventKind::Close => ServerMessage::Closed,
        }
    }

    /// Builds an error message with a code.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: Some(code),
            message: message.into(),
        }
    }

    /// Parses a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serializes to a JSON text frame.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
