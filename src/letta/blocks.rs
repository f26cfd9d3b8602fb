//! Memory block API endpoints.

use super::client::LettaClient;
use super::types::{Block, UpdateBlockRequest};
use crate::error::BridgeResult;

/// Query parameters for the block list endpoint.
#[derive(Debug, Clone, serde::Serialize, Default)]
pub struct ListBlocksParams {
    /// Filter by label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Block API operations.
#[derive(Debug)]
pub struct BlockApi<'a> {
    client: &'a LettaClient,
}

impl<'a> BlockApi<'a> {
    /// Create a new block API instance.
    pub fn new(client: &'a LettaClient) -> Self {
        Self { client }
    }

    /// List blocks, optionally filtered by label.
    pub async fn list(&self, label: Option<&str>) -> BridgeResult<Vec<Block>> {
        self.client
            .get_with_query(
                "v1/blocks",
                &ListBlocksParams {
                    label: label.map(|l| l.to_string()),
                },
            )
            .await
    }

    /// Create a new block.
    pub async fn create(&self, block: &Block) -> BridgeResult<Block> {
        self.client.post("v1/blocks", block).await
    }

    /// Update an existing block.
    pub async fn update(&self, block_id: &str, request: UpdateBlockRequest) -> BridgeResult<Block> {
        self.client
            .patch(&format!("v1/blocks/{}", block_id), &request)
            .await
    }

    /// List blocks attached to an agent.
    pub async fn list_attached(&self, agent_id: &str) -> BridgeResult<Vec<Block>> {
        self.client
            .get(&format!("v1/agents/{}/core-memory/blocks", agent_id))
            .await
    }

    /// Attach a block to an agent.
    pub async fn attach(&self, agent_id: &str, block_id: &str) -> BridgeResult<serde_json::Value> {
        self.client
            .patch(
                &format!("v1/agents/{}/core-memory/blocks/attach/{}", agent_id, block_id),
                &(),
            )
            .await
    }

    /// Detach a block from an agent.
    pub async fn detach(&self, agent_id: &str, block_id: &str) -> BridgeResult<serde_json::Value> {
        self.client
            .patch(
                &format!("v1/agents/{}/core-memory/blocks/detach/{}", agent_id, block_id),
                &(),
            )
            .await
    }
}
