//! Agent room lifecycle: creation as the agent identity, invitations,
//! renames, and history seeding.

use super::spaces::SpaceManager;
use super::users::UserManager;
use crate::config::localpart;
use crate::letta::LettaClient;
use crate::matrix::types::{standard_initial_state, CreateRoomRequest, RoomMessageContent};
use crate::matrix::HomeserverClient;
use crate::store::{AgentUserMapping, InvitationStatus, MappingStore};
use std::collections::HashMap;
use std::sync::Arc;

/// Number of recent Letta messages seeded into a freshly created room.
const HISTORY_SEED_LIMIT: usize = 15;

/// The display name of an agent's room.
pub fn agent_room_name(agent_name: &str) -> String {
    format!("{agent_name} — Letta Agent Chat")
}

/// The topic of an agent's room.
pub fn agent_room_topic(agent_name: &str) -> String {
    format!("Private chat with Letta agent: {agent_name}")
}

/// Manages per-agent Matrix rooms.
#[derive(Debug)]
pub struct RoomManager {
    homeserver: Arc<HomeserverClient>,
    spaces: Arc<SpaceManager>,
    users: Arc<UserManager>,
    store: Arc<MappingStore>,
    letta: Arc<LettaClient>,
    invitees: Vec<String>,
    auto_join_accounts: Vec<(String, String)>,
    seed_history: bool,
}

impl RoomManager {
    /// Create a room manager.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        homeserver: Arc<HomeserverClient>,
        spaces: Arc<SpaceManager>,
        users: Arc<UserManager>,
        store: Arc<MappingStore>,
        letta: Arc<LettaClient>,
        invitees: Vec<String>,
        auto_join_accounts: Vec<(String, String)>,
        seed_history: bool,
    ) -> Self {
        Self {
            homeserver,
            spaces,
            users,
            store,
            letta,
            invitees,
            auto_join_accounts,
            seed_history,
        }
    }

    /// Rename an existing room to match a new agent name.
    pub async fn update_room_name(&self, room_id: &str, agent_name: &str) -> bool {
        let Ok(token) = self.users.admin_token().await else {
            tracing::warn!(room_id, "no admin token, cannot update room name");
            return false;
        };

        let name = agent_room_name(agent_name);
        match self
            .homeserver
            .put_state(
                room_id,
                "m.room.name",
                "",
                &serde_json::json!({ "name": name }),
                &token,
            )
            .await
        {
            Ok(()) => {
                tracing::info!(room_id, name, "updated room name");
                true
            }
            Err(error) => {
                tracing::error!(room_id, error = %error, "failed to update room name");
                false
            }
        }
    }

    /// Find an existing room for an agent by scanning joined-room names.
    ///
    /// Repair path after state loss: the mapping has no room id but a room
    /// with the conventional name may still exist.
    pub async fn discover_agent_room(&self, agent_name: &str) -> Option<String> {
        let token = self.users.admin_token().await.ok()?;
        let rooms = match self.homeserver.joined_rooms(&token).await {
            Ok(rooms) => rooms,
            Err(error) => {
                tracing::warn!(error = %error, "cannot list joined rooms for discovery");
                return None;
            }
        };

        let expected = agent_room_name(agent_name);
        for room_id in rooms {
            let Ok(state) = self
                .homeserver
                .get_state(&room_id, "m.room.name", "", &token)
                .await
            else {
                continue;
            };
            if state.get("name").and_then(|n| n.as_str()) == Some(expected.as_str()) {
                tracing::info!(agent_name, room_id = %room_id, "discovered existing agent room");
                return Some(room_id);
            }
        }
        None
    }

    /// Create the agent's room if needed, or repair invitations on an
    /// existing one. Returns the room id when one exists afterwards.
    ///
    /// Room creation authenticates as the agent's own Matrix identity, which
    /// makes the agent the room creator and its highest-power member.
    pub async fn create_or_update_agent_room(
        &self,
        mapping: &mut AgentUserMapping,
    ) -> Option<String> {
        if !mapping.created {
            tracing::error!(agent = %mapping.agent_name, "cannot create room, user not created");
            return None;
        }

        if let Some(room_id) = mapping.room_id.clone() {
            if mapping.room_created && self.spaces.check_room_exists(&room_id).await {
                self.auto_accept_invitations(&room_id, mapping).await;
                return Some(room_id);
            }
            tracing::warn!(room_id = %room_id, "mapped room missing on server, recreating");
            mapping.room_id = None;
            mapping.room_created = false;
        }

        // Repair path: a conventionally named room may survive a state loss.
        if let Some(existing) = self.discover_agent_room(&mapping.agent_name).await {
            mapping.room_id = Some(existing.clone());
            mapping.room_created = true;
            self.store.upsert(mapping.clone()).await;
            self.store.save().await;
            self.auto_accept_invitations(&existing, mapping).await;
            return Some(existing);
        }

        let session = match self
            .homeserver
            .login(localpart(&mapping.matrix_user_id), &mapping.matrix_password)
            .await
        {
            Ok(session) => session,
            Err(error) => {
                tracing::error!(user_id = %mapping.matrix_user_id, error = %error, "failed to login as agent for room creation");
                return None;
            }
        };

        let request = CreateRoomRequest {
            name: Some(agent_room_name(&mapping.agent_name)),
            topic: Some(agent_room_topic(&mapping.agent_name)),
            preset: Some("trusted_private_chat".to_string()),
            invite: self.invitees.clone(),
            is_direct: Some(false),
            initial_state: standard_initial_state(),
            ..Default::default()
        };

        let room_id = match self
            .homeserver
            .create_room(&request, &session.access_token)
            .await
        {
            Ok(room_id) => room_id,
            Err(error) => {
                tracing::error!(agent = %mapping.agent_name, error = %error, "failed to create agent room");
                return None;
            }
        };
        tracing::info!(agent = %mapping.agent_name, room_id = %room_id, "created agent room");

        mapping.room_id = Some(room_id.clone());
        mapping.room_created = true;
        mapping.invitation_status = Some(
            self.invitees
                .iter()
                .map(|user| (user.clone(), InvitationStatus::Invited))
                .collect(),
        );
        self.store.upsert(mapping.clone()).await;
        self.store.save().await;

        if self.spaces.space_id().await.is_some()
            && !self
                .spaces
                .add_room_to_space(&room_id, &mapping.agent_name)
                .await
        {
            tracing::warn!(room_id = %room_id, "failed to add room to space");
        }

        self.auto_accept_invitations(&room_id, mapping).await;

        if self.seed_history {
            self.seed_recent_history(mapping, &room_id, &session.access_token)
                .await;
        }

        Some(room_id)
    }

    /// Join each known core account into the room, tracking the outcome per
    /// invitee. Failures are recorded, persisted, and retried on the next
    /// provisioning pass; they never propagate.
    pub async fn auto_accept_invitations(&self, room_id: &str, mapping: &mut AgentUserMapping) {
        let mut status: HashMap<String, InvitationStatus> =
            mapping.invitation_status.take().unwrap_or_default();

        for (user_id, password) in &self.auto_join_accounts {
            let session = match self.homeserver.login(localpart(user_id), password).await {
                Ok(session) => session,
                Err(error) => {
                    tracing::error!(user_id = %user_id, error = %error, "failed to login invitee for auto-join");
                    status.insert(user_id.clone(), InvitationStatus::Failed);
                    continue;
                }
            };

            match self
                .homeserver
                .join_room(room_id, &session.access_token)
                .await
            {
                Ok(_) => {
                    tracing::info!(user_id = %user_id, room_id, "invitee joined room");
                    status.insert(user_id.clone(), InvitationStatus::Joined);
                }
                Err(error) => {
                    tracing::warn!(user_id = %user_id, room_id, error = %error, "invitee could not join room");
                    status.insert(user_id.clone(), InvitationStatus::Failed);
                }
            }
        }

        mapping.invitation_status = Some(status);
        self.store.upsert(mapping.clone()).await;
        self.store.save().await;
    }

    /// Post the agent's recent Letta conversation into the new room, as the
    /// agent, marked so dispatch never re-processes it.
    async fn seed_recent_history(
        &self,
        mapping: &AgentUserMapping,
        room_id: &str,
        agent_token: &str,
    ) {
        let messages = match self.letta.messages().history(&mapping.agent_id).await {
            Ok(page) => page.into_items(),
            Err(error) => {
                tracing::warn!(agent_id = %mapping.agent_id, error = %error, "could not fetch history for seeding");
                return;
            }
        };
        if messages.is_empty() {
            return;
        }

        let start = messages.len().saturating_sub(HISTORY_SEED_LIMIT);
        let mut recent = &messages[start..];
        // A leading tool return is an incomplete turn; drop it.
        if recent
            .first()
            .is_some_and(|m| m.message_type == "tool_return_message")
        {
            recent = &recent[1..];
        }

        let mut imported = 0usize;
        for message in recent {
            let body = match message.message_type.as_str() {
                "user_message" => format!("[History] {}", message.text()),
                "assistant_message" => message.text(),
                _ => continue,
            };
            let content = RoomMessageContent::text(body).historical();
            match self
                .homeserver
                .send_message(room_id, &content, agent_token)
                .await
            {
                Ok(_) => imported += 1,
                Err(error) => {
                    tracing::warn!(room_id, error = %error, "failed to seed history message");
                }
            }
        }
        tracing::info!(agent_id = %mapping.agent_id, imported, "seeded conversation history");
    }

    /// Exposed seeding result for tests and repair tooling: which of the
    /// fetched messages would be posted, in order, with their final bodies.
    pub fn plan_history_bodies(messages: &[crate::letta::types::HistoryMessage]) -> Vec<String> {
        let start = messages.len().saturating_sub(HISTORY_SEED_LIMIT);
        let mut recent = &messages[start..];
        if recent
            .first()
            .is_some_and(|m| m.message_type == "tool_return_message")
        {
            recent = &recent[1..];
        }
        recent
            .iter()
            .filter_map(|message| match message.message_type.as_str() {
                "user_message" => Some(format!("[History] {}", message.text())),
                "assistant_message" => Some(message.text()),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::letta::types::HistoryMessage;

    fn history(message_type: &str, text: &str) -> HistoryMessage {
        HistoryMessage {
            message_type: message_type.to_string(),
            content: serde_json::Value::String(text.to_string()),
        }
    }

    #[test]
    fn test_room_name_format() {
        assert_eq!(agent_room_name("Meridian"), "Meridian — Letta Agent Chat");
        assert_eq!(
            agent_room_topic("Meridian"),
            "Private chat with Letta agent: Meridian"
        );
    }

    #[test]
    fn test_history_plan_prefixes_user_messages() {
        let messages = vec![
            history("user_message", "hello"),
            history("assistant_message", "hi there"),
            history("reasoning_message", "thinking"),
        ];
        let bodies = RoomManager::plan_history_bodies(&messages);
        assert_eq!(bodies, vec!["[History] hello", "hi there"]);
    }

    #[test]
    fn test_history_plan_drops_leading_tool_return() {
        let messages = vec![
            history("tool_return_message", "orphaned"),
            history("user_message", "question"),
        ];
        let bodies = RoomManager::plan_history_bodies(&messages);
        assert_eq!(bodies, vec!["[History] question"]);
    }

    #[test]
    fn test_history_plan_limits_window() {
        let messages: Vec<_> = (0..40)
            .map(|i| history("user_message", &format!("m{i}")))
            .collect();
        let bodies = RoomManager::plan_history_bodies(&messages);
        assert_eq!(bodies.len(), HISTORY_SEED_LIMIT);
        assert_eq!(bodies[0], "[History] m25");
        assert_eq!(bodies.last().unwrap(), "[History] m39");
    }

    #[test]
    fn test_history_plan_joins_content_parts() {
        let messages = vec![HistoryMessage {
            message_type: "assistant_message".to_string(),
            content: serde_json::json!([
                {"type": "text", "text": "part one"},
                {"type": "text", "text": "part two"}
            ]),
        }];
        let bodies = RoomManager::plan_history_bodies(&messages);
        assert_eq!(bodies, vec!["part one part two"]);
    }
}
