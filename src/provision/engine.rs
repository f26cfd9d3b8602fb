//! The provisioning engine: diffs the Letta agent set against the mapping
//! store and converges Matrix state, on boot and on a timer.

use super::memory::MatrixMemory;
use super::rooms::RoomManager;
use super::spaces::SpaceManager;
use super::users::UserManager;
use crate::config::CoreUser;
use crate::letta::types::AgentState;
use crate::letta::LettaClient;
use crate::store::{AgentUserMapping, MappingStore};
use std::sync::Arc;
use std::time::Duration;

/// Orchestrates user, room, and space managers over the mapping store.
#[derive(Debug)]
pub struct ProvisioningEngine {
    users: Arc<UserManager>,
    rooms: Arc<RoomManager>,
    spaces: Arc<SpaceManager>,
    store: Arc<MappingStore>,
    letta: Arc<LettaClient>,
    memory: MatrixMemory,
    core_users: Vec<CoreUser>,
    interval: Duration,
}

impl ProvisioningEngine {
    /// Create a provisioning engine.
    pub fn new(
        users: Arc<UserManager>,
        rooms: Arc<RoomManager>,
        spaces: Arc<SpaceManager>,
        store: Arc<MappingStore>,
        letta: Arc<LettaClient>,
        core_users: Vec<CoreUser>,
        interval: Duration,
    ) -> Self {
        let memory = MatrixMemory::new(letta.clone());
        Self {
            users,
            rooms,
            spaces,
            store,
            letta,
            memory,
            core_users,
            interval,
        }
    }

    /// Run once at startup, then on every tick.
    pub async fn run(&self) {
        self.run_once().await;
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // first tick fires immediately and is already done
        loop {
            ticker.tick().await;
            self.run_once().await;
        }
    }

    /// One full provisioning pass. Per-agent failures never abort the pass.
    pub async fn run_once(&self) {
        tracing::info!("starting agent provisioning pass");

        self.users.ensure_core_users_exist(&self.core_users).await;

        self.store.load().await;
        self.store.load_space_config().await;

        let space_just_created = match self.spaces.create_letta_agents_space().await {
            Some((space_id, created)) => {
                tracing::info!(space_id = %space_id, created, "Letta Agents space ready");
                created
            }
            None => {
                tracing::warn!("no space available, rooms will not be organized");
                false
            }
        };

        let agents = match self.letta.agents().list_all().await {
            Ok(agents) => agents,
            Err(error) => {
                tracing::error!(error = %error, "failed to list Letta agents, skipping pass");
                return;
            }
        };

        let known: std::collections::HashSet<String> =
            self.store.snapshot().await.keys().cloned().collect();

        for agent in &agents {
            match self.store.get(&agent.id).await {
                None => self.provision_new_agent(agent).await,
                Some(mapping) => self.reconcile_existing_agent(agent, mapping).await,
            }
        }

        let current: std::collections::HashSet<&str> =
            agents.iter().map(|a| a.id.as_str()).collect();
        let vanished = known
            .iter()
            .filter(|id| !current.contains(id.as_str()))
            .count();
        if vanished > 0 {
            // Mappings are never deactivated; agents may reappear.
            tracing::info!(count = vanished, "agents present in mappings but not in Letta");
        }

        self.store.save().await;

        // Every live agent carries the shared capabilities block.
        let agent_ids: Vec<String> = agents.iter().map(|a| a.id.clone()).collect();
        self.memory.sync_to_agents(&agent_ids).await;

        if space_just_created {
            let snapshot = self.store.snapshot().await;
            self.spaces.migrate_existing_rooms_to_space(&snapshot).await;
        }

        let total = self.store.len().await;
        tracing::info!(total, "provisioning pass complete");
    }

    /// Create user, room, and space link for an agent seen for the first
    /// time.
    async fn provision_new_agent(&self, agent: &AgentState) {
        tracing::info!(agent_id = %agent.id, name = %agent.name, "provisioning new agent");

        let matrix_user_id = self.users.user_id_for_agent(&agent.id);
        let password = self.users.generate_password();

        let mut mapping = AgentUserMapping {
            agent_id: agent.id.clone(),
            agent_name: agent.name.clone(),
            matrix_user_id,
            matrix_password: password,
            created: false,
            room_id: None,
            room_created: false,
            invitation_status: None,
        };

        self.create_user_and_room(agent, &mut mapping).await;
    }

    /// Converge an agent that already has a mapping.
    async fn reconcile_existing_agent(&self, agent: &AgentState, mut mapping: AgentUserMapping) {
        if mapping.agent_name != agent.name {
            self.apply_rename(agent, &mut mapping).await;
        }

        if !mapping.created {
            tracing::info!(agent_id = %agent.id, "retrying user creation");
            self.create_user_and_room(agent, &mut mapping).await;
        } else if !mapping.room_created {
            tracing::info!(agent_id = %agent.id, "creating missing room");
            self.rooms.create_or_update_agent_room(&mut mapping).await;
            self.store.upsert(mapping).await;
        } else {
            // User and room exist; re-ensure invitations.
            if let Some(room_id) = mapping.room_id.clone() {
                self.rooms
                    .auto_accept_invitations(&room_id, &mut mapping)
                    .await;
            }
            self.store.upsert(mapping).await;
        }
    }

    /// Apply a rename: mapping first, then room name and display name as
    /// independent writes. One failing does not block the other.
    async fn apply_rename(&self, agent: &AgentState, mapping: &mut AgentUserMapping) {
        let old_name = std::mem::replace(&mut mapping.agent_name, agent.name.clone());
        tracing::info!(
            agent_id = %agent.id,
            from = %old_name,
            to = %agent.name,
            "agent renamed"
        );
        self.store.upsert(mapping.clone()).await;

        if let Some(room_id) = mapping.room_id.as_deref() {
            if mapping.room_created && !self.rooms.update_room_name(room_id, &agent.name).await {
                tracing::warn!(agent_id = %agent.id, "room rename failed");
            }
        }

        // Display name is exactly the agent name, no prefix.
        if !self
            .users
            .update_display_name(&mapping.matrix_user_id, &agent.name)
            .await
        {
            tracing::warn!(agent_id = %agent.id, "display name update failed");
        }
    }

    /// Create the Matrix account (reusing any stored password) and then the
    /// room.
    async fn create_user_and_room(&self, agent: &AgentState, mapping: &mut AgentUserMapping) {
        let username = UserManager::generate_username(&agent.id);

        let created = self
            .users
            .create_matrix_user(&username, &mapping.matrix_password, &agent.name)
            .await;
        mapping.created = created;
        self.store.upsert(mapping.clone()).await;

        if !created {
            tracing::error!(agent_id = %agent.id, "failed to create Matrix user");
            return;
        }

        // Registration set the name via the account's own token; the admin
        // path covers the already-existed case.
        self.users
            .update_display_name(&mapping.matrix_user_id, &agent.name)
            .await;

        self.rooms.create_or_update_agent_room(mapping).await;
        self.store.upsert(mapping.clone()).await;
    }
}
