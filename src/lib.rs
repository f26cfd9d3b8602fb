//! # Letta Matrix Bridge
//!
//! A long-lived service that gives every AI agent in a [Letta](https://docs.letta.com)
//! deployment a first-class Matrix identity and mediates message, media, and
//! streaming interactions between Matrix users and agents.
//!
//! Each Letta agent gets a dedicated Matrix account (`@agent_<id>:<server>`),
//! a private room created and owned by that account, and membership in a
//! shared "Letta Agents" Space. The bridge keeps names, rooms, and
//! memberships consistent as agents are created and renamed, routes inbound
//! room messages to the right agent, and posts responses as the agent's own
//! identity.
//!
//! ## Architecture
//!
//! - [`matrix`] - typed homeserver client, sync driver, typing indicators
//! - [`letta`] - typed Letta client: agents, blocks, folders, messages,
//!   and the SSE step stream
//! - [`store`] - persisted agent/user/room mappings and the Space config
//! - [`provision`] - user, room, and Space managers plus the diffing engine
//!   that converges them against the Letta agent set
//! - [`streaming`] - step-stream normalization and the progress-then-final
//!   rendering of agent turns into Matrix messages
//! - [`media`] - attachment ingestion: images to multimodal prompts, audio
//!   to transcripts, documents to extracted text, everything else into
//!   indexed Letta folders
//! - [`dispatch`] - inbound event classification, deduplication, target
//!   resolution, and delivery
//! - [`bridge`] - the root service graph wiring it all together
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use letta_matrix_bridge::{Bridge, BridgeConfig, MediaCollaborators};
//! # use std::sync::Arc;
//! # struct NoExtractor;
//! # impl letta_matrix_bridge::media::document::DocumentExtractor for NoExtractor {
//! #     fn extract(&self, _: &[u8], _: &str)
//! #         -> Result<letta_matrix_bridge::media::document::RawExtraction,
//! #                   letta_matrix_bridge::media::document::ExtractError> {
//! #         Err(letta_matrix_bridge::media::document::ExtractError::Disabled)
//! #     }
//! # }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BridgeConfig::from_env()?;
//!     let collaborators = MediaCollaborators {
//!         extractor: Arc::new(NoExtractor),
//!         ocr: None,
//!         transcriber: None,
//!     };
//!     Bridge::start(config, collaborators).await?.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Error handling
//!
//! All operations return [`Result<T, BridgeError>`](crate::error::BridgeError)
//! with diagnostics via [`miette`]. Per-agent provisioning failures and
//! per-event dispatch failures are contained; they never abort the engine
//! or the sync loop.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![warn(clippy::all)]

pub mod auth;
pub mod bridge;
pub mod config;
pub mod dedupe;
pub mod dispatch;
pub mod error;
pub mod letta;
pub mod matrix;
pub mod media;
pub mod prompt;
pub mod provision;
pub mod retry;
pub mod store;
pub mod streaming;

// Re-export main types for convenience
pub use bridge::{Bridge, MediaCollaborators};
pub use config::BridgeConfig;
pub use dedupe::EventDedupe;
pub use dispatch::MessageDispatcher;
pub use error::{BridgeError, BridgeResult, JoinError};
pub use letta::LettaClient;
pub use matrix::HomeserverClient;
pub use store::{AgentUserMapping, MappingStore, SpaceConfig};

/// Convenience type alias for Results in this crate.
pub type Result<T> = std::result::Result<T, BridgeError>;
