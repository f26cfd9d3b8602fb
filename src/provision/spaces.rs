//! The "Letta Agents" Space: creation, verification, and room linking.

use super::users::UserManager;
use crate::config::localpart;
use crate::matrix::types::{standard_initial_state, CreateRoomRequest};
use crate::matrix::HomeserverClient;
use crate::store::{AgentUserMapping, MappingStore, SpaceConfig};
use std::collections::HashMap;
use std::sync::Arc;

/// Manages the Space that lists every agent room.
#[derive(Debug)]
pub struct SpaceManager {
    homeserver: Arc<HomeserverClient>,
    users: Arc<UserManager>,
    store: Arc<MappingStore>,
    server_name: String,
    admin_user_id: String,
    admin_password: String,
    main_bot_user_id: String,
}

impl SpaceManager {
    /// Create a space manager.
    pub fn new(
        homeserver: Arc<HomeserverClient>,
        users: Arc<UserManager>,
        store: Arc<MappingStore>,
        server_name: impl Into<String>,
        admin_user_id: impl Into<String>,
        admin_password: impl Into<String>,
        main_bot_user_id: impl Into<String>,
    ) -> Self {
        Self {
            homeserver,
            users,
            store,
            server_name: server_name.into(),
            admin_user_id: admin_user_id.into(),
            admin_password: admin_password.into(),
            main_bot_user_id: main_bot_user_id.into(),
        }
    }

    /// The currently known space id, if any.
    pub async fn space_id(&self) -> Option<String> {
        self.store.space_config().await.map(|c| c.space_id)
    }

    /// Check whether a room exists on the server.
    ///
    /// A 403 confirms existence (access denied to an existing room); only a
    /// 404 means the room is gone.
    pub async fn check_room_exists(&self, room_id: &str) -> bool {
        let Ok(token) = self.users.admin_token().await else {
            tracing::warn!(room_id, "no admin token, cannot check room existence");
            return false;
        };

        match self.homeserver.get_room_state(room_id, &token).await {
            Ok(_) => true,
            Err(error) => match error.status_code() {
                Some(404) => false,
                Some(403) => true,
                _ => {
                    tracing::warn!(room_id, error = %error, "unexpected response checking room");
                    false
                }
            },
        }
    }

    /// Ensure the "Letta Agents" Space exists, creating it if necessary.
    ///
    /// Returns the space id and whether this call created it. A recorded
    /// space that no longer exists on the server is replaced.
    pub async fn create_letta_agents_space(&self) -> Option<(String, bool)> {
        if let Some(config) = self.store.space_config().await {
            if self.check_room_exists(&config.space_id).await {
                tracing::info!(space_id = %config.space_id, "Letta Agents space already exists");
                return Some((config.space_id, false));
            }
            tracing::warn!(space_id = %config.space_id, "stored space no longer exists, creating a new one");
            self.store.set_space_config(None).await;
        }

        let session = match self
            .homeserver
            .login(localpart(&self.admin_user_id), &self.admin_password)
            .await
        {
            Ok(session) => session,
            Err(error) => {
                tracing::error!(error = %error, "failed to login as admin to create space");
                return None;
            }
        };

        let request = CreateRoomRequest {
            name: Some(SpaceConfig::NAME.to_string()),
            topic: Some(
                "All Letta AI agents - organized by the Letta Matrix bridge".to_string(),
            ),
            preset: Some("private_chat".to_string()),
            invite: vec![self.admin_user_id.clone(), self.main_bot_user_id.clone()],
            creation_content: Some(serde_json::json!({"type": "m.space"})),
            power_level_content_override: Some(serde_json::json!({
                "events": { "m.space.child": 50 }
            })),
            initial_state: standard_initial_state(),
            ..Default::default()
        };

        match self
            .homeserver
            .create_room(&request, &session.access_token)
            .await
        {
            Ok(space_id) => {
                tracing::info!(space_id = %space_id, "created Letta Agents space");
                self.store
                    .set_space_config(Some(SpaceConfig::new(&space_id)))
                    .await;
                self.store.save_space_config().await;
                Some((space_id, true))
            }
            Err(error) => {
                tracing::error!(error = %error, "failed to create Letta Agents space");
                None
            }
        }
    }

    /// Link a room into the Space.
    ///
    /// The child link in the space decides success; the parent link written
    /// into the room is best effort.
    pub async fn add_room_to_space(&self, room_id: &str, room_name: &str) -> bool {
        let Some(space_id) = self.space_id().await else {
            tracing::warn!(room_id, "no space id available, cannot add room to space");
            return false;
        };

        let Ok(token) = self.users.admin_token().await else {
            tracing::warn!(room_id, "no admin token, cannot add room to space");
            return false;
        };

        let child = serde_json::json!({
            "via": [self.server_name],
            "suggested": true,
            // Room name keys the client-side sort order.
            "order": room_name,
        });

        match self
            .homeserver
            .put_state(&space_id, "m.space.child", room_id, &child, &token)
            .await
        {
            Ok(()) => {
                tracing::info!(room_id, room_name, "added room to Letta Agents space");
            }
            Err(error) => {
                tracing::error!(room_id, error = %error, "failed to add room to space");
                return false;
            }
        }

        let parent = serde_json::json!({
            "via": [self.server_name],
            "canonical": true,
        });
        if let Err(error) = self
            .homeserver
            .put_state(room_id, "m.space.parent", &space_id, &parent, &token)
            .await
        {
            tracing::warn!(room_id, error = %error, "failed to set space as parent");
        }

        true
    }

    /// Link every created room into the Space. Returns the number linked.
    pub async fn migrate_existing_rooms_to_space(
        &self,
        mappings: &HashMap<String, AgentUserMapping>,
    ) -> usize {
        if self.space_id().await.is_none() {
            tracing::warn!("no space id available, cannot migrate rooms");
            return 0;
        }

        let mut migrated = 0;
        for mapping in mappings.values() {
            let Some(room_id) = mapping.room_id.as_deref() else {
                continue;
            };
            if !mapping.room_created {
                continue;
            }
            if self.add_room_to_space(room_id, &mapping.agent_name).await {
                migrated += 1;
            } else {
                tracing::warn!(agent = %mapping.agent_name, "failed to migrate room to space");
            }
        }

        tracing::info!(migrated, "migrated existing rooms to space");
        migrated
    }
}
