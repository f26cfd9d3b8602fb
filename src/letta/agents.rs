//! Agent API endpoints.

use super::client::LettaClient;
use super::types::{AgentState, ListAgentsParams};
use crate::error::BridgeResult;

/// Page size used when walking the full agent list.
const PAGE_LIMIT: u32 = 100;

/// Cap on pages fetched in one listing pass, guarding against a server that
/// keeps returning data for a stale cursor.
const MAX_PAGES: usize = 10;

/// Agent API operations.
#[derive(Debug)]
pub struct AgentApi<'a> {
    client: &'a LettaClient,
}

impl<'a> AgentApi<'a> {
    /// Create a new agent API instance.
    pub fn new(client: &'a LettaClient) -> Self {
        Self { client }
    }

    /// List one page of agents.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::error::BridgeError`] if the request fails or if the
    /// response cannot be parsed.
    pub async fn list(&self, params: Option<ListAgentsParams>) -> BridgeResult<Vec<AgentState>> {
        self.client
            .get_with_query("v1/agents", &params.unwrap_or_default())
            .await
    }

    /// Get a specific agent by ID.
    pub async fn get(&self, agent_id: &str) -> BridgeResult<AgentState> {
        self.client.get(&format!("v1/agents/{}", agent_id)).await
    }

    /// Walk the agent list to completion using `after`-cursor pagination.
    ///
    /// The cursor is the id of the last item of the previous page. Results
    /// are deduplicated by id, the walk stops after [`MAX_PAGES`] pages, and
    /// a cursor that fails to advance ends the walk instead of looping.
    pub async fn list_all(&self) -> BridgeResult<Vec<AgentState>> {
        let mut agents: Vec<AgentState> = Vec::new();
        let mut seen_ids = std::collections::HashSet::new();
        let mut after: Option<String> = None;
        let mut last_cursor: Option<String> = None;

        for page in 0..MAX_PAGES {
            let batch = self
                .list(Some(ListAgentsParams {
                    after: after.clone(),
                    limit: Some(PAGE_LIMIT),
                }))
                .await?;

            if batch.is_empty() {
                break;
            }

            let batch_len = batch.len();
            let next_cursor = batch.last().map(|a| a.id.clone());

            for agent in batch {
                if seen_ids.insert(agent.id.clone()) {
                    agents.push(agent);
                }
            }

            if batch_len < PAGE_LIMIT as usize {
                break;
            }

            if next_cursor == last_cursor {
                tracing::warn!(
                    cursor = ?next_cursor,
                    "agent list cursor did not advance, stopping pagination"
                );
                break;
            }

            last_cursor = next_cursor.clone();
            after = next_cursor;
            tracing::debug!(page = page + 1, total = agents.len(), "fetched agent page");
        }

        tracing::info!(count = agents.len(), "listed Letta agents");
        Ok(agents)
    }
}
