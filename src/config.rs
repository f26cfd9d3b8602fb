//! Environment-driven configuration for the bridge.
//!
//! All knobs are read once at startup; a missing required value is a
//! [`BridgeError::Config`] and aborts the process before any network I/O.

use crate::error::{BridgeError, BridgeResult};
use crate::media::document::DocumentParseConfig;
use smart_default::SmartDefault;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// A core Matrix account the bridge must be able to operate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreUser {
    /// Full Matrix user id (`@user:server`).
    pub user_id: String,
    /// Account password.
    pub password: String,
    /// Display name to set at creation time.
    pub display_name: String,
}

/// Default embedding configuration applied when an agent has none of its own.
#[derive(Debug, Clone, SmartDefault)]
pub struct EmbeddingDefaults {
    /// Embedding model identifier.
    #[default = "letta/letta-free"]
    pub model: String,
    /// Endpoint type (openai, huggingface, ...).
    #[default = "openai"]
    pub endpoint_type: String,
    /// Optional endpoint URL override.
    pub endpoint: Option<String>,
    /// Embedding dimension.
    #[default = 1536]
    pub dim: u32,
    /// Chunk size for text splitting.
    #[default = 300]
    pub chunk_size: u32,
}

/// Complete bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Base URL for all Matrix calls.
    pub homeserver_url: url::Url,
    /// Main bridge bot user id (`@letta:server` by convention).
    pub bot_user_id: String,
    /// Main bridge bot password.
    pub bot_password: String,
    /// Admin account user id; falls back to the main bot if unset.
    pub admin_user_id: String,
    /// Admin account password.
    pub admin_password: String,
    /// Secondary admin account invited to agent rooms, if configured.
    pub admin_alt_user_id: Option<String>,
    /// Optional MCP bot credentials; created and invited when set.
    pub mcp_user: Option<CoreUser>,
    /// Optional mail-bridge credentials; invited and auto-joined when set.
    pub mail_bridge_user: Option<CoreUser>,
    /// Optional base/observer room; absence is not fatal.
    pub base_room_id: Option<String>,
    /// Directory holding the persisted mapping and space files.
    pub data_dir: PathBuf,
    /// Seconds between provisioning passes.
    pub agent_sync_interval: Duration,
    /// Letta API base URL.
    pub letta_api_url: url::Url,
    /// Letta bearer token, if the server requires one.
    pub letta_token: Option<String>,
    /// Fallback agent when per-room resolution fails.
    pub default_agent_id: Option<String>,
    /// Whether dispatch uses the step-stream path.
    pub streaming_enabled: bool,
    /// Total stream deadline.
    pub streaming_timeout: Duration,
    /// Defaults used when creating Letta folders.
    pub embedding: EmbeddingDefaults,
    /// Document extraction settings.
    pub document_parsing: DocumentParseConfig,
    /// Whether generated passwords are replaced with a literal constant.
    pub dev_mode: bool,
    /// Log verbosity requested by the environment (consumed by the host app).
    pub log_level: String,
}

impl BridgeConfig {
    /// Build the configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] when a required option is missing or
    /// unparseable.
    pub fn from_env() -> BridgeResult<Self> {
        let homeserver_url = required("MATRIX_HOMESERVER_URL")?;
        let homeserver_url = url::Url::parse(&homeserver_url)
            .map_err(|e| BridgeError::config(format!("MATRIX_HOMESERVER_URL invalid: {e}")))?;

        let bot_user_id = required("MATRIX_USERNAME")?;
        let bot_password = required("MATRIX_PASSWORD")?;

        let admin_user_id = optional("MATRIX_ADMIN_USERNAME").unwrap_or_else(|| bot_user_id.clone());
        let admin_password =
            optional("MATRIX_ADMIN_PASSWORD").unwrap_or_else(|| bot_password.clone());

        let mcp_user = match (optional("MATRIX_MCP_USERNAME"), optional("MATRIX_MCP_PASSWORD")) {
            (Some(user_id), Some(password)) => Some(CoreUser {
                user_id,
                password,
                display_name: "Letta MCP".to_string(),
            }),
            (Some(_), None) | (None, Some(_)) => {
                return Err(BridgeError::config(
                    "MATRIX_MCP_USERNAME and MATRIX_MCP_PASSWORD must be set together",
                ))
            }
            (None, None) => None,
        };

        let mail_bridge_user = match (
            optional("MATRIX_MAIL_BRIDGE_USERNAME"),
            optional("MATRIX_MAIL_BRIDGE_PASSWORD"),
        ) {
            (Some(user_id), Some(password)) => Some(CoreUser {
                user_id,
                password,
                display_name: "Agent Mail Bridge".to_string(),
            }),
            _ => None,
        };

        let letta_api_url = optional("LETTA_API_URL")
            .unwrap_or_else(|| "http://localhost:8283".to_string());
        let letta_api_url = url::Url::parse(&letta_api_url)
            .map_err(|e| BridgeError::config(format!("LETTA_API_URL invalid: {e}")))?;

        Ok(Self {
            homeserver_url,
            bot_user_id,
            bot_password,
            admin_user_id,
            admin_password,
            admin_alt_user_id: optional("MATRIX_ADMIN_ALT_USERNAME"),
            mcp_user,
            mail_bridge_user,
            base_room_id: optional("MATRIX_ROOM_ID"),
            data_dir: optional("MATRIX_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            agent_sync_interval: Duration::from_secs(parse_or(
                "MATRIX_AGENT_SYNC_INTERVAL",
                60,
            )?),
            letta_api_url,
            letta_token: optional("LETTA_TOKEN").filter(|t| !t.trim().is_empty()),
            default_agent_id: optional("LETTA_AGENT_ID"),
            streaming_enabled: parse_bool("LETTA_STREAMING_ENABLED", false),
            streaming_timeout: Duration::from_secs(parse_or("LETTA_STREAMING_TIMEOUT", 120)?),
            embedding: EmbeddingDefaults {
                model: optional("LETTA_EMBEDDING_MODEL")
                    .unwrap_or_else(|| "letta/letta-free".to_string()),
                endpoint_type: optional("LETTA_EMBEDDING_ENDPOINT_TYPE")
                    .unwrap_or_else(|| "openai".to_string()),
                endpoint: optional("LETTA_EMBEDDING_ENDPOINT"),
                dim: parse_or("LETTA_EMBEDDING_DIM", 1536)?,
                chunk_size: parse_or("LETTA_EMBEDDING_CHUNK_SIZE", 300)?,
            },
            document_parsing: DocumentParseConfig::from_env()?,
            dev_mode: parse_bool("DEV_MODE", false),
            log_level: optional("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// The Matrix server name, taken from the main bot's user id domain and
    /// falling back to the homeserver host.
    pub fn server_name(&self) -> String {
        self.bot_user_id
            .split_once(':')
            .map(|(_, server)| server.to_string())
            .or_else(|| self.homeserver_url.host_str().map(|h| h.to_string()))
            .unwrap_or_default()
    }

    /// The core accounts that must exist before agent provisioning runs.
    pub fn core_users(&self) -> Vec<CoreUser> {
        let mut users = vec![CoreUser {
            user_id: self.bot_user_id.clone(),
            password: self.bot_password.clone(),
            display_name: "Letta".to_string(),
        }];
        if self.admin_user_id != self.bot_user_id {
            users.push(CoreUser {
                user_id: self.admin_user_id.clone(),
                password: self.admin_password.clone(),
                display_name: "Matrix Admin".to_string(),
            });
        }
        if let Some(mcp) = &self.mcp_user {
            users.push(mcp.clone());
        }
        if let Some(mail) = &self.mail_bridge_user {
            users.push(mail.clone());
        }
        users
    }

    /// Users invited to every agent room.
    pub fn room_invitees(&self) -> Vec<String> {
        let mut invitees = vec![self.admin_user_id.clone()];
        if let Some(alt) = &self.admin_alt_user_id {
            if !invitees.contains(alt) {
                invitees.push(alt.clone());
            }
        }
        if !invitees.contains(&self.bot_user_id) {
            invitees.push(self.bot_user_id.clone());
        }
        if let Some(mcp) = &self.mcp_user {
            invitees.push(mcp.user_id.clone());
        }
        if let Some(mail) = &self.mail_bridge_user {
            invitees.push(mail.user_id.clone());
        }
        invitees
    }

    /// Invitees with known passwords, used for invitation auto-acceptance.
    pub fn auto_join_accounts(&self) -> Vec<(String, String)> {
        let mut accounts = vec![
            (self.admin_user_id.clone(), self.admin_password.clone()),
            (self.bot_user_id.clone(), self.bot_password.clone()),
        ];
        if let Some(mcp) = &self.mcp_user {
            accounts.push((mcp.user_id.clone(), mcp.password.clone()));
        }
        if let Some(mail) = &self.mail_bridge_user {
            accounts.push((mail.user_id.clone(), mail.password.clone()));
        }
        accounts.dedup_by(|a, b| a.0 == b.0);
        accounts
    }
}

fn required(name: &str) -> BridgeResult<String> {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| BridgeError::config(format!("{name} must be set")))
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes"),
        Err(_) => default,
    }
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> BridgeResult<T> {
    match env::var(name) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse()
            .map_err(|_| BridgeError::config(format!("{name} is not a valid number: {v}"))),
        _ => Ok(default),
    }
}

/// Extract the localpart from a full Matrix user id.
///
/// `@letta:example.org` becomes `letta`; a bare localpart passes through.
pub fn localpart(user_id: &str) -> &str {
    let without_server = user_id.split(':').next().unwrap_or(user_id);
    without_server.strip_prefix('@').unwrap_or(without_server)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_localpart_extraction() {
        assert_eq!(localpart("@letta:matrix.example.org"), "letta");
        assert_eq!(localpart("@admin:matrix.example.org"), "admin");
        assert_eq!(localpart("letta"), "letta");
        assert_eq!(localpart("@letta"), "letta");
    }

    #[test]
    fn test_embedding_defaults() {
        let defaults = EmbeddingDefaults::default();
        assert_eq!(defaults.model, "letta/letta-free");
        assert_eq!(defaults.endpoint_type, "openai");
        assert_eq!(defaults.dim, 1536);
        assert_eq!(defaults.chunk_size, 300);
        assert!(defaults.endpoint.is_none());
    }

    fn test_config() -> BridgeConfig {
        BridgeConfig {
            homeserver_url: url::Url::parse("https://matrix.example.org").unwrap(),
            bot_user_id: "@letta:matrix.example.org".to_string(),
            bot_password: "bot-pass".to_string(),
            admin_user_id: "@matrixadmin:matrix.example.org".to_string(),
            admin_password: "admin-pass".to_string(),
            admin_alt_user_id: Some("@admin:matrix.example.org".to_string()),
            mcp_user: Some(CoreUser {
                user_id: "@mcp:matrix.example.org".to_string(),
                password: "mcp-pass".to_string(),
                display_name: "Letta MCP".to_string(),
            }),
            mail_bridge_user: None,
            base_room_id: None,
            data_dir: PathBuf::from("./data"),
            agent_sync_interval: Duration::from_secs(60),
            letta_api_url: url::Url::parse("http://localhost:8283").unwrap(),
            letta_token: None,
            default_agent_id: None,
            streaming_enabled: false,
            streaming_timeout: Duration::from_secs(120),
            embedding: EmbeddingDefaults::default(),
            document_parsing: DocumentParseConfig::default(),
            dev_mode: false,
            log_level: "info".to_string(),
        }
    }

    #[test]
    fn test_server_name_from_bot_user_id() {
        let config = test_config();
        assert_eq!(config.server_name(), "matrix.example.org");
    }

    #[test]
    fn test_core_users_skip_duplicate_admin() {
        let mut config = test_config();
        config.admin_user_id = config.bot_user_id.clone();
        let users = config.core_users();
        assert_eq!(users.len(), 2); // bot + mcp
        assert_eq!(users[0].user_id, "@letta:matrix.example.org");
    }

    #[test]
    fn test_room_invitees_order_and_content() {
        let config = test_config();
        let invitees = config.room_invitees();
        assert_eq!(
            invitees,
            vec![
                "@matrixadmin:matrix.example.org",
                "@admin:matrix.example.org",
                "@letta:matrix.example.org",
                "@mcp:matrix.example.org",
            ]
        );
    }

    #[test]
    fn test_auto_join_accounts_have_passwords() {
        let config = test_config();
        let accounts = config.auto_join_accounts();
        assert_eq!(accounts.len(), 3);
        assert!(accounts.iter().all(|(_, pw)| !pw.is_empty()));
        // The invite-only alt admin has no password and must not appear.
        assert!(!accounts
            .iter()
            .any(|(id, _)| id == "@admin:matrix.example.org"));
    }
}
