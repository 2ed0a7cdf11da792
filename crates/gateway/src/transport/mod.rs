//! Output transports.
//!
//! - [`queue`]: bounded subscriber shared by both transports
//! - [`sse`]: one-way push stream
//! - [`socket`]: bidirectional WebSocket

pub mod queue;
pub mod socket;
pub mod sse;

pub use queue::{QueueReceiver, QueueSubscriber, OVERFLOW_MESSAGE};
