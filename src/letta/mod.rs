//! Typed client for the Letta control plane.
//!
//! Mirrors the shape of the homeserver client: one HTTP core
//! ([`LettaClient`]) and thin API sections borrowing it.

pub mod agents;
pub mod blocks;
pub mod client;
pub mod folders;
pub mod messages;
pub mod types;

pub use agents::AgentApi;
pub use blocks::BlockApi;
pub use client::{LettaClient, LettaClientConfig};
pub use folders::FolderApi;
pub use messages::{ChunkStream, MessageApi};
