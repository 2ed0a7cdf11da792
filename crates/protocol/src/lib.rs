//! # Web Shell Protocol Library
//!
//! Wire types shared by the gateway and its clients.
//!
//! ## Overview
//!
//! - **Stream Events**: kind-tagged output chunks fanned out from a session
//! - **Push-Stream Framing**: Server-Sent-Events records with base64 payloads
//! - **Messages**: HTTP request/response bodies and the socket message set
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{encode_sse, SseDecoder, StreamEvent};
//!
//! let record = encode_sse(&StreamEvent::data(&b"$ "[..]));
//! assert_eq!(record, "data: JCA=\n\n");
//!
//! let mut decoder = SseDecoder::new();
//! let events = decoder.push(&record).unwrap();
//! assert_eq!(events[0].payload.as_ref(), b"$ ");
//! ```
//!
//! ## Modules
//!
//! - [`events`]: Stream event kinds and payload encoding
//! - [`framing`]: Push-stream record encoder and incremental decoder
//! - [`messages`]: Request, response and socket message definitions
//! - [`error`]: Error types

pub mod error;
pub mod events;
pub mod framing;
pub mod messages;

pub use error::{ProtocolError, Result};
pub use events::{EventKind, StreamEvent, CLOSE_PAYLOAD};
pub use framing::{decode_record, encode_sse, SseDecoder, SseRecord, CONNECTED_COMMENT};
pub use messages::{
    Ack, ClientMessage, CloseRequest, ErrorBody, ErrorCode, InputRequest, ResizeRequest,
    ServerMessage, SessionSummary, StartRequest, StartResponse,
};
