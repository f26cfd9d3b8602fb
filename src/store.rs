//! Persistent agent-to-Matrix mapping state.
//!
//! Two JSON files live under the data directory:
//! `agent_user_mappings.json` (object keyed by agent id) and
//! `letta_space_config.json`. Writes go through a temp file and an atomic
//! rename, so external readers never observe half-written state. Load and
//! save failures log and leave the in-memory view untouched.

use crate::error::{BridgeError, BridgeResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Where an invited core user stands with respect to an agent room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    /// Invited but not yet joined.
    Invited,
    /// Joined the room.
    Joined,
    /// The join attempt failed; retried on the next provisioning pass.
    Failed,
}

/// Bridge-side record of one Letta agent's Matrix footprint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentUserMapping {
    /// Stable Letta agent id.
    pub agent_id: String,
    /// Current agent name; the source of truth for room and display names.
    pub agent_name: String,
    /// Derived Matrix user id; never changes once assigned.
    pub matrix_user_id: String,
    /// Password of the agent's Matrix account.
    pub matrix_password: String,
    /// Whether the Matrix account exists.
    #[serde(default)]
    pub created: bool,
    /// The agent's room, once created.
    #[serde(default)]
    pub room_id: Option<String>,
    /// Whether the room exists.
    #[serde(default)]
    pub room_created: bool,
    /// Per-invitee join outcome. Optional for backward compatibility with
    /// older state files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invitation_status: Option<HashMap<String, InvitationStatus>>,
}

/// Persisted record of the agents Space.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpaceConfig {
    /// Room id of the Space.
    pub space_id: String,
    /// When the Space was created.
    pub created_at: DateTime<Utc>,
    /// Space display name.
    pub name: String,
}

impl SpaceConfig {
    /// The fixed display name of the bridge's Space.
    pub const NAME: &'static str = "Letta Agents";

    /// A fresh config for a newly created space.
    pub fn new(space_id: impl Into<String>) -> Self {
        Self {
            space_id: space_id.into(),
            created_at: Utc::now(),
            name: Self::NAME.to_string(),
        }
    }
}

const MAPPINGS_FILE: &str = "agent_user_mappings.json";
const SPACE_CONFIG_FILE: &str = "letta_space_config.json";

/// Process-wide owner of the canonical mapping set.
///
/// Readers take cheap snapshots; the provisioning engine serializes writes.
#[derive(Debug)]
pub struct MappingStore {
    data_dir: PathBuf,
    mappings: RwLock<HashMap<String, AgentUserMapping>>,
    space: RwLock<Option<SpaceConfig>>,
}

impl MappingStore {
    /// Create a store over the given data directory.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            mappings: RwLock::new(HashMap::new()),
            space: RwLock::new(None),
        }
    }

    fn mappings_path(&self) -> PathBuf {
        self.data_dir.join(MAPPINGS_FILE)
    }

    fn space_config_path(&self) -> PathBuf {
        self.data_dir.join(SPACE_CONFIG_FILE)
    }

    /// Load the mapping set from disk. Missing files leave the current view
    /// unchanged; parse failures log and return without corrupting it.
    pub async fn load(&self) {
        match read_json::<HashMap<String, AgentUserMapping>>(&self.mappings_path()).await {
            Ok(Some(loaded)) => {
                let count = loaded.len();
                *self.mappings.write().await = loaded;
                tracing::info!(count, "loaded agent mappings");
            }
            Ok(None) => tracing::info!("no existing agent mappings file"),
            Err(error) => tracing::error!(error = %error, "failed to load agent mappings"),
        }
    }

    /// Persist the mapping set atomically.
    pub async fn save(&self) {
        let snapshot = self.mappings.read().await.clone();
        if let Err(error) = write_json_atomic(&self.mappings_path(), &snapshot).await {
            tracing::error!(error = %error, "failed to save agent mappings");
        }
    }

    /// Load the space configuration from disk.
    pub async fn load_space_config(&self) {
        match read_json::<SpaceConfig>(&self.space_config_path()).await {
            Ok(Some(config)) => {
                tracing::info!(space_id = %config.space_id, "loaded space configuration");
                *self.space.write().await = Some(config);
            }
            Ok(None) => tracing::info!("no existing space configuration"),
            Err(error) => tracing::error!(error = %error, "failed to load space configuration"),
        }
    }

    /// Persist the space configuration atomically.
    pub async fn save_space_config(&self) {
        let snapshot = self.space.read().await.clone();
        let Some(config) = snapshot else { return };
        if let Err(error) = write_json_atomic(&self.space_config_path(), &config).await {
            tracing::error!(error = %error, "failed to save space configuration");
        }
    }

    /// The current space configuration, if any.
    pub async fn space_config(&self) -> Option<SpaceConfig> {
        self.space.read().await.clone()
    }

    /// Replace the space configuration in memory.
    pub async fn set_space_config(&self, config: Option<SpaceConfig>) {
        *self.space.write().await = config;
    }

    /// An immutable snapshot of every mapping.
    pub async fn snapshot(&self) -> HashMap<String, AgentUserMapping> {
        self.mappings.read().await.clone()
    }

    /// Look up a mapping by agent id.
    pub async fn get(&self, agent_id: &str) -> Option<AgentUserMapping> {
        self.mappings.read().await.get(agent_id).cloned()
    }

    /// Look up the mapping that owns a room.
    pub async fn get_by_room_id(&self, room_id: &str) -> Option<AgentUserMapping> {
        self.mappings
            .read()
            .await
            .values()
            .find(|m| m.room_id.as_deref() == Some(room_id))
            .cloned()
    }

    /// Look up a mapping by its Matrix user id.
    pub async fn get_by_user_id(&self, matrix_user_id: &str) -> Option<AgentUserMapping> {
        self.mappings
            .read()
            .await
            .values()
            .find(|m| m.matrix_user_id == matrix_user_id)
            .cloned()
    }

    /// Insert or replace a mapping.
    pub async fn upsert(&self, mapping: AgentUserMapping) {
        self.mappings
            .write()
            .await
            .insert(mapping.agent_id.clone(), mapping);
    }

    /// Number of mappings currently held.
    pub async fn len(&self) -> usize {
        self.mappings.read().await.len()
    }

    /// Whether the store holds no mappings.
    pub async fn is_empty(&self) -> bool {
        self.mappings.read().await.is_empty()
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> BridgeResult<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(BridgeError::Io(e)),
    }
}

async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> BridgeResult<()> {
    let json = serde_json::to_vec_pretty(value)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
