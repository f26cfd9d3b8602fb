//! Matrix user account management: derivation, creation, display names,
//! and the cached admin session.

use crate::config::{localpart, CoreUser};
use crate::error::{BridgeError, BridgeResult};
use crate::matrix::HomeserverClient;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Literal password substituted for every generated one in dev mode, so
/// local test environments stay reproducible.
const DEV_MODE_PASSWORD: &str = "password";

/// Outcome of probing whether a Matrix account exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserProbe {
    /// The probe login unexpectedly succeeded.
    Exists,
    /// The account exists; the dummy password was rejected.
    ExistsAuthFailed,
    /// No such account.
    NotFound,
}

impl UserProbe {
    /// Whether the account exists in any form.
    pub fn exists(&self) -> bool {
        !matches!(self, Self::NotFound)
    }
}

/// Manages Matrix user accounts for the bridge.
#[derive(Debug)]
pub struct UserManager {
    homeserver: Arc<HomeserverClient>,
    server_name: String,
    admin_user_id: String,
    admin_password: String,
    dev_mode: bool,
    admin_token: Mutex<Option<String>>,
}

impl UserManager {
    /// Create a user manager bound to the given admin account.
    pub fn new(
        homeserver: Arc<HomeserverClient>,
        server_name: impl Into<String>,
        admin_user_id: impl Into<String>,
        admin_password: impl Into<String>,
        dev_mode: bool,
    ) -> Self {
        Self {
            homeserver,
            server_name: server_name.into(),
            admin_user_id: admin_user_id.into(),
            admin_password: admin_password.into(),
            dev_mode,
            admin_token: Mutex::new(None),
        }
    }

    /// Derive the Matrix localpart for an agent id.
    ///
    /// Deterministic and independent of the agent's name so renames never
    /// move the account: strip a leading `agent-`, turn `-` into `_`, drop
    /// anything outside `[A-Za-z0-9_]`, and prefix `agent_`.
    pub fn generate_username(agent_id: &str) -> String {
        let clean = agent_id.strip_prefix("agent-").unwrap_or(agent_id);
        let clean: String = clean
            .chars()
            .map(|c| if c == '-' { '_' } else { c })
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        format!("agent_{clean}")
    }

    /// The full Matrix user id for an agent id on this server.
    pub fn user_id_for_agent(&self, agent_id: &str) -> String {
        format!("@{}:{}", Self::generate_username(agent_id), self.server_name)
    }

    /// Generate an account password: 16 random alphanumeric characters from
    /// the OS RNG, or the dev-mode constant.
    pub fn generate_password(&self) -> String {
        if self.dev_mode {
            return DEV_MODE_PASSWORD.to_string();
        }

        use rand::Rng;
        const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
        let mut rng = rand::rngs::OsRng;
        (0..16)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect()
    }

    /// Probe whether an account exists by attempting a login with a dummy
    /// password.
    pub async fn check_user_exists(&self, localpart: &str) -> UserProbe {
        let user_id = format!("@{}:{}", localpart, self.server_name);
        match self
            .homeserver
            .login(&user_id, "dummy_check_password_12345")
            .await
        {
            // A dummy-password login should never succeed, but a 200 still
            // proves the account exists.
            Ok(_) => UserProbe::Exists,
            Err(error) => match error.status_code() {
                Some(403) => UserProbe::ExistsAuthFailed,
                Some(404) => UserProbe::NotFound,
                // Conservative: treat anything else as absent so creation
                // is attempted and M_USER_IN_USE resolves the ambiguity.
                _ => UserProbe::NotFound,
            },
        }
    }

    /// Create a Matrix account and set its display name.
    ///
    /// Returns `true` on success or when the account already exists.
    pub async fn create_matrix_user(
        &self,
        localpart: &str,
        password: &str,
        display_name: &str,
    ) -> bool {
        match self.homeserver.register(localpart, password).await {
            Ok(session) => {
                let user_id = format!("@{}:{}", localpart, self.server_name);
                tracing::info!(user_id = %user_id, "created Matrix user");
                if let Err(error) = self
                    .set_display_name(&user_id, display_name, &session.access_token)
                    .await
                {
                    tracing::warn!(user_id = %user_id, error = %error, "failed to set display name after registration");
                }
                true
            }
            Err(error) if error.matrix_errcode() == Some("M_USER_IN_USE") => {
                tracing::info!(localpart, "Matrix user already exists");
                true
            }
            Err(error) => {
                tracing::error!(localpart, error = %error, "failed to create Matrix user");
                false
            }
        }
    }

    /// Set a display name using the account's own token. Idempotent.
    pub async fn set_display_name(
        &self,
        user_id: &str,
        display_name: &str,
        access_token: &str,
    ) -> BridgeResult<()> {
        self.homeserver
            .set_display_name(user_id, display_name, access_token)
            .await
    }

    /// Set a display name using admin privileges, for accounts whose own
    /// token is not at hand.
    ///
    /// Degrades to a no-op (with a log line) when no admin token can be
    /// obtained.
    pub async fn update_display_name(&self, user_id: &str, display_name: &str) -> bool {
        let token = match self.admin_token().await {
            Ok(token) => token,
            Err(_) => {
                tracing::warn!(user_id, "no admin token, skipping display name update");
                return false;
            }
        };

        match self
            .homeserver
            .set_display_name(user_id, display_name, &token)
            .await
        {
            Ok(()) => {
                tracing::info!(user_id, display_name, "updated display name");
                true
            }
            Err(error) => {
                tracing::error!(user_id, error = %error, "failed to update display name");
                false
            }
        }
    }

    /// Obtain (and cache) an admin access token.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::AdminTokenUnavailable`] when the admin login
    /// fails; callers degrade rather than crash.
    pub async fn admin_token(&self) -> BridgeResult<String> {
        let mut cached = self.admin_token.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }

        match self
            .homeserver
            .login(localpart(&self.admin_user_id), &self.admin_password)
            .await
        {
            Ok(session) => {
                tracing::info!(admin = %self.admin_user_id, "obtained admin access token");
                *cached = Some(session.access_token.clone());
                Ok(session.access_token)
            }
            Err(error) => {
                tracing::error!(admin = %self.admin_user_id, error = %error, "failed to obtain admin token");
                Err(BridgeError::AdminTokenUnavailable)
            }
        }
    }

    /// Drop the cached admin token so the next call logs in again.
    pub async fn invalidate_admin_token(&self) {
        *self.admin_token.lock().await = None;
    }

    /// Ensure the bridge's core accounts exist.
    ///
    /// Partial failures are logged per account; the batch never aborts.
    pub async fn ensure_core_users_exist(&self, core_users: &[CoreUser]) {
        for user in core_users {
            let user_local = localpart(&user.user_id);
            if self.check_user_exists(user_local).await.exists() {
                tracing::info!(user_id = %user.user_id, "core user already exists");
                continue;
            }

            tracing::info!(user_id = %user.user_id, "core user missing, creating");
            if self
                .create_matrix_user(user_local, &user.password, &user.display_name)
                .await
            {
                tracing::info!(user_id = %user.user_id, "provisioned core user");
            } else {
                tracing::error!(user_id = %user.user_id, "failed to provision core user");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(
        "agent-597b5756-2915-4560-ba6b-91005f085166",
        "agent_597b5756_2915_4560_ba6b_91005f085166";
        "uuid agent id"
    )]
    #[test_case("agent-simple", "agent_simple"; "plain suffix")]
    #[test_case("no-prefix-id", "agent_no_prefix_id"; "missing agent prefix")]
    #[test_case("agent-weird!@#chars", "agent_weirdchars"; "special characters stripped")]
    #[test_case("agent-", "agent_"; "empty suffix")]
    fn test_generate_username(agent_id: &str, expected: &str) {
        assert_eq!(UserManager::generate_username(agent_id), expected);
    }

    #[test]
    fn test_generate_username_is_name_independent() {
        // Renaming an agent must never change the derived localpart.
        let a = UserManager::generate_username("agent-123-abc");
        let b = UserManager::generate_username("agent-123-abc");
        assert_eq!(a, b);
        assert_eq!(a, "agent_123_abc");
    }

    fn manager(dev_mode: bool) -> UserManager {
        let homeserver = Arc::new(
            HomeserverClient::new(url::Url::parse("https://matrix.example.org").unwrap()).unwrap(),
        );
        UserManager::new(
            homeserver,
            "example.org",
            "@matrixadmin:example.org",
            "pw",
            dev_mode,
        )
    }

    #[test]
    fn test_generate_password_shape() {
        let manager = manager(false);
        let password = manager.generate_password();
        assert_eq!(password.len(), 16);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
        // Two draws should essentially never collide.
        assert_ne!(password, manager.generate_password());
    }

    #[test]
    fn test_dev_mode_password_is_constant() {
        let manager = manager(true);
        assert_eq!(manager.generate_password(), "password");
        assert_eq!(manager.generate_password(), "password");
    }

    #[test]
    fn test_user_id_for_agent() {
        let manager = manager(false);
        assert_eq!(
            manager.user_id_for_agent("agent-597b5756-2915-4560-ba6b-91005f085166"),
            "@agent_597b5756_2915_4560_ba6b_91005f085166:example.org"
        );
    }

    #[test]
    fn test_probe_exists_helper() {
        assert!(UserProbe::Exists.exists());
        assert!(UserProbe::ExistsAuthFailed.exists());
        assert!(!UserProbe::NotFound.exists());
    }
}
