//! Step-stream normalization and Matrix rendering.
//!
//! The Letta step stream arrives as raw SSE chunks; [`events`] normalizes
//! them, [`driver`] enforces the turn deadlines, and [`handler`] renders the
//! progress-then-final lifecycle into a room.

pub mod driver;
pub mod events;
pub mod handler;

pub use driver::{StepStream, DEFAULT_IDLE_TIMEOUT, DEFAULT_TOTAL_TIMEOUT};
pub use events::{ChunkParser, StreamEvent, UsageStats};
pub use handler::{LiveEditStreamingHandler, RoomSink, StreamingMessageHandler};
