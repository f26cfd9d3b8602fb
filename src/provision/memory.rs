//! Shared `matrix_capabilities` memory block.
//!
//! One block, owned by the bridge, tells every agent how its Matrix
//! presence works. The block is content-addressed: a hash comparison keeps
//! re-syncs cheap and updates it in place when the text changes, and every
//! agent is attached to the one current block.

use crate::letta::types::{Block, UpdateBlockRequest};
use crate::letta::LettaClient;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Label of the shared block.
pub const MATRIX_BLOCK_LABEL: &str = "matrix_capabilities";

/// What every agent is told about its Matrix presence.
pub const MATRIX_CAPABILITIES_CONTENT: &str = "\
# Matrix Integration

You are connected to Matrix, a decentralized chat platform. You have your \
own Matrix account and a dedicated room where users talk to you.

## How messages reach you
- Messages posted in your room are delivered to you directly.
- Messages from other Letta agents arrive wrapped in an \
[INTER-AGENT MESSAGE from ...] header; treat them as your main task for \
that turn and avoid open-ended back-and-forth loops.
- Uploaded images, voice messages, and documents are converted for you \
(image content, transcripts, extracted text) before delivery.

## How your replies appear
- Your response is posted into the room as your own Matrix identity.
- While you work, tool activity may be shown as progress messages.

## Tips
- Keep replies conversational; they are read in a chat client.
- When a message asks you to @-mention a user in your reply, include the \
mention exactly as given so the reply can be routed.
";

fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..16].to_string()
}

/// Keeps the shared capabilities block current and attached to agents.
#[derive(Debug)]
pub struct MatrixMemory {
    letta: Arc<LettaClient>,
}

impl MatrixMemory {
    /// Create a memory manager.
    pub fn new(letta: Arc<LettaClient>) -> Self {
        Self { letta }
    }

    /// Find or create the capabilities block, updating its value when the
    /// content changed. Returns the block id, or `None` on failure.
    pub async fn get_or_create_block(&self) -> Option<String> {
        let target_hash = content_hash(MATRIX_CAPABILITIES_CONTENT);

        let blocks = match self.letta.blocks().list(Some(MATRIX_BLOCK_LABEL)).await {
            Ok(blocks) => blocks,
            Err(error) => {
                tracing::error!(error = %error, "failed to list capability blocks");
                return None;
            }
        };

        if let Some(block) = blocks.into_iter().next() {
            let block_id = block.id.clone()?;
            if content_hash(&block.value) != target_hash {
                match self
                    .letta
                    .blocks()
                    .update(
                        &block_id,
                        UpdateBlockRequest {
                            value: Some(MATRIX_CAPABILITIES_CONTENT.to_string()),
                            label: None,
                        },
                    )
                    .await
                {
                    Ok(_) => tracing::info!(block_id = %block_id, "updated capabilities block"),
                    Err(error) => {
                        tracing::error!(block_id = %block_id, error = %error, "failed to update capabilities block")
                    }
                }
            }
            return Some(block_id);
        }

        match self
            .letta
            .blocks()
            .create(&Block {
                id: None,
                label: MATRIX_BLOCK_LABEL.to_string(),
                value: MATRIX_CAPABILITIES_CONTENT.to_string(),
                limit: None,
                description: Some("Matrix chat integration capabilities".to_string()),
            })
            .await
        {
            Ok(block) => {
                if let Some(id) = &block.id {
                    tracing::info!(block_id = %id, "created capabilities block");
                }
                block.id
            }
            Err(error) => {
                tracing::error!(error = %error, "failed to create capabilities block");
                None
            }
        }
    }

    /// Attach the current block to one agent, replacing any stale block
    /// carrying the same label.
    pub async fn ensure_agent_has_block(&self, agent_id: &str, block_id: &str) -> bool {
        match self.letta.blocks().list_attached(agent_id).await {
            Ok(attached) => {
                for block in attached {
                    if block.label != MATRIX_BLOCK_LABEL {
                        continue;
                    }
                    match block.id.as_deref() {
                        Some(id) if id == block_id => return true,
                        Some(stale) => {
                            if let Err(error) = self.letta.blocks().detach(agent_id, stale).await {
                                tracing::warn!(agent_id, error = %error, "failed to detach stale block");
                            }
                        }
                        None => {}
                    }
                    break;
                }
            }
            Err(error) => {
                tracing::error!(agent_id, error = %error, "failed to list attached blocks");
                return false;
            }
        }

        match self.letta.blocks().attach(agent_id, block_id).await {
            Ok(_) => {
                tracing::info!(agent_id, "attached capabilities block");
                true
            }
            Err(error) => {
                tracing::error!(agent_id, error = %error, "failed to attach capabilities block");
                false
            }
        }
    }

    /// Sync the block to the given agents. Returns `(synced, failed)`.
    pub async fn sync_to_agents(&self, agent_ids: &[String]) -> (usize, usize) {
        if agent_ids.is_empty() {
            return (0, 0);
        }

        let Some(block_id) = self.get_or_create_block().await else {
            return (0, agent_ids.len());
        };

        let mut synced = 0;
        let mut failed = 0;
        for agent_id in agent_ids {
            if self.ensure_agent_has_block(agent_id, &block_id).await {
                synced += 1;
            } else {
                failed += 1;
            }
        }

        tracing::info!(synced, failed, "capabilities block sync complete");
        (synced, failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_short_and_stable() {
        let a = content_hash("hello");
        let b = content_hash("hello");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(content_hash("hello"), content_hash("world"));
    }

    #[test]
    fn test_capabilities_content_mentions_the_contracts() {
        assert!(MATRIX_CAPABILITIES_CONTENT.contains("INTER-AGENT MESSAGE"));
        assert!(MATRIX_CAPABILITIES_CONTENT.contains("Matrix"));
    }
}
