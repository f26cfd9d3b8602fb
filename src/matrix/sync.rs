//! Long-poll sync driver.
//!
//! The first pass runs with `timeline.limit = 0` so boot does not replay
//! history; subsequent passes use a bounded timeline with lazy-loaded
//! members and presence/account-data disabled.

use super::client::HomeserverClient;
use super::types::MatrixEvent;
use crate::error::BridgeResult;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Long-poll timeout passed to the homeserver.
const SYNC_TIMEOUT_MS: u64 = 30_000;

/// Timeline limit after the initial pass.
const TIMELINE_LIMIT: u64 = 50;

/// Backoff applied when a sync round trip fails.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

fn sync_filter(timeline_limit: u64) -> serde_json::Value {
    serde_json::json!({
        "room": {
            "timeline": { "limit": timeline_limit, "lazy_load_members": true },
            "state": { "lazy_load_members": true }
        },
        "presence": { "types": [] },
        "account_data": { "types": [] }
    })
}

/// Drives `/sync` forever, feeding each timeline message event to the
/// handler.
#[derive(Debug)]
pub struct SyncService {
    homeserver: Arc<HomeserverClient>,
    token: String,
}

impl SyncService {
    /// Create a sync driver for the given access token.
    pub fn new(homeserver: Arc<HomeserverClient>, token: String) -> Self {
        Self { homeserver, token }
    }

    /// Run the sync loop until the task is cancelled.
    ///
    /// Handler failures are logged and never abort the loop; transport
    /// failures back off briefly and retry with the same `since` token.
    pub async fn run_forever<F, Fut>(&self, on_event: F) -> BridgeResult<()>
    where
        F: Fn(MatrixEvent) -> Fut,
        Fut: Future<Output = ()>,
    {
        // Initial pass: establish the since token without replaying history.
        let initial = self
            .homeserver
            .sync(None, &sync_filter(0), 0, &self.token)
            .await?;
        let mut since = initial.next_batch;
        tracing::info!("initial sync complete, entering event loop");

        let filter = sync_filter(TIMELINE_LIMIT);
        loop {
            match self
                .homeserver
                .sync(Some(&since), &filter, SYNC_TIMEOUT_MS, &self.token)
                .await
            {
                Ok(response) => {
                    for event in response.message_events() {
                        on_event(event).await;
                    }
                    since = response.next_batch;
                }
                Err(error) => {
                    if error.is_retryable() {
                        tracing::warn!(error = %error, "sync failed, backing off");
                    } else {
                        tracing::error!(error = %error, "sync failed");
                    }
                    tokio::time::sleep(ERROR_BACKOFF).await;
                }
            }
        }
    }
}
