//! Typed client and sync driver for the Matrix homeserver.

pub mod client;
pub mod sync;
pub mod types;
pub mod typing;

pub use client::HomeserverClient;
pub use sync::SyncService;
pub use types::{MatrixEvent, RoomMessageContent, Session};
pub use typing::TypingGuard;
