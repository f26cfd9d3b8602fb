//! Typing indicator management.
//!
//! The homeserver expires typing notifications after their timeout, so a
//! long-running agent turn needs periodic refreshes. The refresh loop sets a
//! 30 s timeout and re-sends every 25 s until stopped.

use super::client::HomeserverClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// How long one typing notification lasts on the server.
const TYPING_TIMEOUT: Duration = Duration::from_secs(30);

/// How often the indicator is refreshed while active.
const REFRESH_INTERVAL: Duration = Duration::from_secs(25);

/// Keeps a typing indicator alive until dropped or stopped.
#[derive(Debug)]
pub struct TypingGuard {
    homeserver: Arc<HomeserverClient>,
    room_id: String,
    user_id: String,
    token: String,
    refresher: Option<JoinHandle<()>>,
}

impl TypingGuard {
    /// Start showing a typing indicator for the given identity.
    pub fn start(
        homeserver: Arc<HomeserverClient>,
        room_id: impl Into<String>,
        user_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        let room_id = room_id.into();
        let user_id = user_id.into();
        let token = token.into();

        let refresher = {
            let homeserver = homeserver.clone();
            let room_id = room_id.clone();
            let user_id = user_id.clone();
            let token = token.clone();
            tokio::spawn(async move {
                loop {
                    if let Err(error) = homeserver
                        .set_typing(
                            &room_id,
                            &user_id,
                            true,
                            TYPING_TIMEOUT.as_millis() as u64,
                            &token,
                        )
                        .await
                    {
                        tracing::debug!(room_id = %room_id, error = %error, "typing refresh failed");
                    }
                    tokio::time::sleep(REFRESH_INTERVAL).await;
                }
            })
        };

        Self {
            homeserver,
            room_id,
            user_id,
            token,
            refresher: Some(refresher),
        }
    }

    /// Stop the refresh loop and clear the indicator.
    pub async fn stop(mut self) {
        if let Some(refresher) = self.refresher.take() {
            refresher.abort();
        }
        if let Err(error) = self
            .homeserver
            .set_typing(&self.room_id, &self.user_id, false, 0, &self.token)
            .await
        {
            tracing::debug!(room_id = %self.room_id, error = %error, "failed to clear typing indicator");
        }
    }
}

impl Drop for TypingGuard {
    fn drop(&mut self) {
        // Best effort: the refresh task must not outlive the guard. The
        // indicator itself expires on the server within TYPING_TIMEOUT.
        if let Some(refresher) = self.refresher.take() {
            refresher.abort();
        }
    }
}
